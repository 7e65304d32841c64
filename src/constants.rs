//! Default sizing for the simulated device
//!
//! These mirror typical SDR driver defaults: a ring of 32 buffers of 1024
//! complex-float samples per channel, two symmetric channels.

/// Number of chunks in the ring buffer.
pub const DEFAULT_NUM_BUFFERS: usize = 32;

/// Samples per chunk, per channel.
pub const DEFAULT_BUFFER_LEN: usize = 1024;

/// Symmetric RX/TX channel count of the simulated hardware.
pub const DEFAULT_NUM_CHANNELS: usize = 2;

/// Default tuner sample rate in Hz.
pub const DEFAULT_SAMPLE_RATE: f64 = 2_048_000.0;

/// Default center frequency in Hz.
pub const DEFAULT_FREQUENCY: f64 = 100_000_000.0;
