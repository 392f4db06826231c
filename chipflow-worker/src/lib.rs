//! The generic worker loop and the concrete handlers it dispatches to.

pub mod consumer;
pub mod handler;
pub mod handlers;

pub use consumer::{WorkerLoop, WorkerLoopConfig};
pub use handler::TaskHandler;
