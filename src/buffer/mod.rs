//! Buffering core: chunked ring buffer plus the streaming adapter over it.

mod adapter;
mod ring;

pub use adapter::StreamAdapter;
pub use ring::{Chunk, ChunkRing, Direction};
