pub mod memory;
pub mod traits;
pub mod type_registry;

pub use memory::*;
pub use traits::*;
pub use type_registry::*;
