mod chunk;
mod consts;

pub use chunk::{AudioChunk, QueueItem};
pub use consts::*;
