//! Configuration for the loopback device simulation.
//!
//! The device is sized once, before any stream is opened: channel count,
//! sample format and ring dimensions are all fixed for the lifetime of an
//! open ring. Defaults match common SDR driver values (32 buffers of 1024
//! CF32 samples, two channels).

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_BUFFER_LEN, DEFAULT_FREQUENCY, DEFAULT_NUM_BUFFERS, DEFAULT_NUM_CHANNELS,
    DEFAULT_SAMPLE_RATE,
};
use crate::error::{DeviceError, Result};

/// Wire sample format carried by a stream.
///
/// Each variant is one complex sample; `elem_size` is the byte width of one
/// element on one channel.
///
/// # Parsing
/// ```
/// use loopradio::config::SampleFormat;
///
/// let fmt: SampleFormat = "CF32".parse().unwrap();
/// assert_eq!(fmt.elem_size(), 8);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SampleFormat {
    /// Complex 32-bit float (I and Q), 8 bytes per element.
    Cf32,
    /// Complex signed 16-bit, 4 bytes per element.
    Cs16,
    /// Complex signed 8-bit, 2 bytes per element.
    Cs8,
}

impl SampleFormat {
    /// Byte size of one element (one complex sample on one channel).
    pub fn elem_size(&self) -> usize {
        match self {
            SampleFormat::Cf32 => 8,
            SampleFormat::Cs16 => 4,
            SampleFormat::Cs8 => 2,
        }
    }

    /// Full-scale amplitude of the format.
    pub fn full_scale(&self) -> f64 {
        match self {
            SampleFormat::Cf32 => 1.0,
            SampleFormat::Cs16 => 32767.0,
            SampleFormat::Cs8 => 127.0,
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SampleFormat::Cf32 => "CF32",
            SampleFormat::Cs16 => "CS16",
            SampleFormat::Cs8 => "CS8",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for SampleFormat {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CF32" => Ok(SampleFormat::Cf32),
            "CS16" => Ok(SampleFormat::Cs16),
            "CS8" => Ok(SampleFormat::Cs8),
            _ => Err(DeviceError::UnsupportedFormat(s.to_string())),
        }
    }
}

/// Per-stream sizing arguments, the equivalent of SDR stream kwargs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamArgs {
    /// Number of chunks in the ring.
    pub num_buffers: usize,
    /// Samples per chunk, per channel.
    pub buffer_len: usize,
}

impl Default for StreamArgs {
    fn default() -> Self {
        Self {
            num_buffers: DEFAULT_NUM_BUFFERS,
            buffer_len: DEFAULT_BUFFER_LEN,
        }
    }
}

/// Device-wide configuration, loadable from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Symmetric RX/TX channel count.
    pub channels: usize,
    /// Native sample format.
    pub format: SampleFormat,
    /// Default ring sizing used when stream args omit them.
    pub stream: StreamArgs,
    /// Initial tuner sample rate in Hz.
    pub sample_rate: f64,
    /// Initial center frequency in Hz.
    pub frequency: f64,
    /// Initial bandwidth in Hz; 0 means auto (track sample rate).
    pub bandwidth: f64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            channels: DEFAULT_NUM_CHANNELS,
            format: SampleFormat::Cf32,
            stream: StreamArgs::default(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            frequency: DEFAULT_FREQUENCY,
            bandwidth: 0.0,
        }
    }
}

impl DeviceConfig {
    /// Load a configuration from a TOML file. Missing keys take defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| DeviceError::Config(format!("{}: {}", path.as_ref().display(), e)))?;
        let config: DeviceConfig =
            toml::from_str(&text).map_err(|e| DeviceError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject sizings that cannot form a valid ring.
    pub fn validate(&self) -> Result<()> {
        if self.channels == 0 {
            return Err(DeviceError::Config("channels must be >= 1".into()));
        }
        if self.stream.num_buffers < 2 {
            return Err(DeviceError::Config(
                "num_buffers must be >= 2 (one slot is reserved)".into(),
            ));
        }
        if self.stream.buffer_len == 0 {
            return Err(DeviceError::Config("buffer_len must be >= 1".into()));
        }
        if self.sample_rate <= 0.0 {
            return Err(DeviceError::Config("sample_rate must be positive".into()));
        }
        Ok(())
    }
}
