pub mod collection;
pub mod error_handler;
pub mod repository_handler;
pub mod validator;

pub use collection::*;
pub use error_handler::*;
pub use repository_handler::*;
pub use validator::*;
