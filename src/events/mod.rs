pub mod emitter;
pub mod event;

pub use emitter::*;
pub use event::*;
