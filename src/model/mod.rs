pub mod common;
pub mod filter;
pub mod instance;
pub mod typedef;
pub mod user_context;

pub use common::*;
pub use filter::*;
pub use instance::*;
pub use typedef::*;
pub use user_context::*;
