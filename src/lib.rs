pub mod buffer;
pub mod config;
pub mod constants;
pub mod device;
pub mod error;

pub use buffer::{Chunk, ChunkRing, Direction, StreamAdapter};
pub use config::{DeviceConfig, SampleFormat, StreamArgs};
pub use device::{LoopbackDevice, StreamHandle};
pub use error::{DeviceError, Result};
