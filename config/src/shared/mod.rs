mod base;
mod channel;
mod consumer;

pub use base::*;
pub use channel::*;
pub use consumer::*;
