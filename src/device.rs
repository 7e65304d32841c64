//! Simulated loopback SDR device.
//!
//! Samples written to the TX stream come back out of the RX stream. The
//! device owns the shared [`ChunkRing`] and one [`StreamAdapter`] per active
//! direction; everything else on this type is metadata plumbing (antennas,
//! gains, tuning, sensors, settings) that configures or describes the
//! simulated hardware without touching the sample path.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::buffer::{ChunkRing, Direction, StreamAdapter};
use crate::config::{DeviceConfig, SampleFormat, StreamArgs};
use crate::error::{DeviceError, Result};

/// Inclusive range of a tunable element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Range {
    pub minimum: f64,
    pub maximum: f64,
}

impl Range {
    pub fn new(minimum: f64, maximum: f64) -> Self {
        Self { minimum, maximum }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.minimum && value <= self.maximum
    }
}

/// Opaque handle to a set-up stream, tagged with its direction.
///
/// An explicit tag replaces the pointer-arithmetic handles some drivers use
/// to tell RX from TX.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHandle {
    direction: Direction,
}

impl StreamHandle {
    pub fn direction(&self) -> Direction {
        self.direction
    }
}

/// Tunable device knobs. All accessor-grade state lives here, behind one
/// lock, away from the streaming path.
struct TunerState {
    frequency: f64,
    correction_ppm: f64,
    sample_rate: f64,
    bandwidth: f64,
    master_clock_rate: f64,
    clock_source: String,
    antennas: HashMap<(Direction, usize), String>,
    gains: HashMap<(Direction, usize, String), f64>,
    gain_mode: bool,
    iq_swap: bool,
    offset_tune: bool,
    digital_agc: bool,
    direct_sampling: u32,
}

/// Which directions have been set up, and the ring they share.
struct StreamTable {
    ring: Option<Arc<ChunkRing>>,
    open_rx: bool,
    open_tx: bool,
}

pub struct LoopbackDevice {
    config: DeviceConfig,
    tuner: Mutex<TunerState>,
    streams: Mutex<StreamTable>,
    rx_adapter: Mutex<Option<StreamAdapter>>,
    tx_adapter: Mutex<Option<StreamAdapter>>,
}

impl LoopbackDevice {
    pub fn new(config: DeviceConfig) -> Result<Self> {
        config.validate()?;
        let tuner = TunerState {
            frequency: config.frequency,
            correction_ppm: 0.0,
            sample_rate: config.sample_rate,
            bandwidth: config.bandwidth,
            master_clock_rate: 0.0,
            clock_source: "internal".to_string(),
            antennas: HashMap::new(),
            gains: HashMap::new(),
            gain_mode: false,
            iq_swap: false,
            offset_tune: false,
            digital_agc: false,
            direct_sampling: 0,
        };
        Ok(Self {
            config,
            tuner: Mutex::new(tuner),
            streams: Mutex::new(StreamTable {
                ring: None,
                open_rx: false,
                open_tx: false,
            }),
            rx_adapter: Mutex::new(None),
            tx_adapter: Mutex::new(None),
        })
    }

    /*******************************************************************
     * Identification
     ******************************************************************/

    pub fn driver_key(&self) -> &'static str {
        "Loopback"
    }

    pub fn hardware_key(&self) -> &'static str {
        "LoopbackHardware"
    }

    pub fn hardware_info(&self) -> HashMap<String, String> {
        HashMap::from([
            ("origin".to_string(), env!("CARGO_PKG_REPOSITORY").to_string()),
            ("driver".to_string(), self.driver_key().to_string()),
        ])
    }

    /*******************************************************************
     * Channels
     ******************************************************************/

    /// Channel count is symmetric: the simulated hardware always has as many
    /// TX channels as RX channels.
    pub fn num_channels(&self, _direction: Direction) -> usize {
        self.config.channels
    }

    pub fn full_duplex(&self, _direction: Direction, _channel: usize) -> bool {
        true
    }

    /*******************************************************************
     * Stream lifecycle
     ******************************************************************/

    /// Formats the device can stream. The simulation carries exactly one
    /// element size at a time, so only the configured native format is
    /// offered.
    pub fn stream_formats(&self, _direction: Direction, _channel: usize) -> Vec<SampleFormat> {
        vec![self.config.format]
    }

    /// Native format and its full-scale amplitude.
    pub fn native_format(&self, _direction: Direction, _channel: usize) -> (SampleFormat, f64) {
        (self.config.format, self.config.format.full_scale())
    }

    /// Set up a stream for one direction.
    ///
    /// The first setup allocates the shared ring; later setups must agree
    /// with it in buffer count, buffer length, channel count and element
    /// size, or fail with `ConfigurationConflict`.
    pub fn setup_stream(
        &self,
        direction: Direction,
        format: SampleFormat,
        channels: &[usize],
        args: &StreamArgs,
    ) -> Result<StreamHandle> {
        if format != self.config.format {
            return Err(DeviceError::UnsupportedFormat(format!(
                "{} (native format is {})",
                format, self.config.format
            )));
        }

        let num_channels = if channels.is_empty() {
            self.config.channels
        } else {
            for (want, got) in channels.iter().enumerate() {
                if *got != want {
                    return Err(DeviceError::InvalidChannelSelection(format!(
                        "channels must be contiguous from 0, got {:?}",
                        channels
                    )));
                }
            }
            if channels.len() > self.config.channels {
                return Err(DeviceError::InvalidChannelSelection(format!(
                    "device has {} channels, {} requested",
                    self.config.channels,
                    channels.len()
                )));
            }
            channels.len()
        };

        let mut table = self.streams.lock();
        match &table.ring {
            None => {
                let ring = ChunkRing::new(
                    args.num_buffers,
                    args.buffer_len,
                    num_channels,
                    format.elem_size(),
                )?;
                log::debug!(
                    "ring allocated: {} buffers x {} samples x {} channels x {} bytes",
                    args.num_buffers,
                    args.buffer_len,
                    num_channels,
                    format.elem_size()
                );
                table.ring = Some(Arc::new(ring));
            }
            Some(ring) => {
                Self::check_congruent("buffer count", args.num_buffers, ring.num_buffers())?;
                Self::check_congruent("buffer length", args.buffer_len, ring.buffer_len())?;
                Self::check_congruent("channel count", num_channels, ring.channels())?;
                Self::check_congruent("element size", format.elem_size(), ring.elem_size())?;
                log::debug!("ring congruency validated");
            }
        }

        let open = match direction {
            Direction::Rx => &mut table.open_rx,
            Direction::Tx => &mut table.open_tx,
        };
        if *open {
            return Err(DeviceError::StreamState(format!(
                "{} stream is already set up",
                direction.side()
            )));
        }
        *open = true;

        Ok(StreamHandle { direction })
    }

    fn check_congruent(what: &'static str, requested: usize, existing: usize) -> Result<()> {
        if requested != existing {
            return Err(DeviceError::ConfigurationConflict {
                what,
                requested,
                existing,
            });
        }
        Ok(())
    }

    /// Activate a set-up stream, creating its adapter. Samples can flow only
    /// while the stream is active.
    pub fn activate_stream(&self, handle: StreamHandle) -> Result<()> {
        let ring = {
            let table = self.streams.lock();
            let open = match handle.direction {
                Direction::Rx => table.open_rx,
                Direction::Tx => table.open_tx,
            };
            if !open {
                return Err(DeviceError::StreamState(format!(
                    "{} stream is not set up",
                    handle.direction.side()
                )));
            }
            match &table.ring {
                Some(ring) => ring.clone(),
                None => {
                    return Err(DeviceError::StreamState("no ring buffer allocated".into()));
                }
            }
        };

        let mut slot = self.adapter_slot(handle.direction).lock();
        if slot.is_some() {
            return Err(DeviceError::StreamState(format!(
                "{} stream is already active",
                handle.direction.side()
            )));
        }
        *slot = Some(StreamAdapter::new(ring, handle.direction));
        Ok(())
    }

    /// Deactivate a stream. Dropping the adapter flushes any held chunk, so
    /// a partially-filled write chunk is published to the read side.
    pub fn deactivate_stream(&self, handle: StreamHandle) -> Result<()> {
        self.adapter_slot(handle.direction).lock().take();
        Ok(())
    }

    /// Close a stream. Once both directions are closed the ring is released
    /// and the next setup may size a fresh one.
    pub fn close_stream(&self, handle: StreamHandle) -> Result<()> {
        self.deactivate_stream(handle)?;
        let mut table = self.streams.lock();
        match handle.direction {
            Direction::Rx => table.open_rx = false,
            Direction::Tx => table.open_tx = false,
        }
        if !table.open_rx && !table.open_tx && table.ring.take().is_some() {
            log::debug!("ring buffer released");
        }
        Ok(())
    }

    /// Largest transfer the device completes in one piece: one chunk.
    pub fn stream_mtu(&self) -> Result<usize> {
        self.streams
            .lock()
            .ring
            .as_ref()
            .map(|ring| ring.buffer_len())
            .ok_or_else(|| DeviceError::StreamState("no stream has been set up".into()))
    }

    /// Read up to `num_samples` per channel from the RX stream, blocking up
    /// to `timeout` for data to arrive. Returns the samples transferred,
    /// which may be fewer than requested; callers loop.
    pub fn read_stream(
        &self,
        handle: StreamHandle,
        bufs: &mut [&mut [u8]],
        num_samples: usize,
        timeout: Duration,
    ) -> Result<usize> {
        if handle.direction != Direction::Rx {
            return Err(DeviceError::StreamState(
                "read_stream called with a write-direction handle".into(),
            ));
        }
        let mut slot = self.rx_adapter.lock();
        let adapter = slot
            .as_mut()
            .ok_or_else(|| DeviceError::StreamState("read stream is not active".into()))?;

        let deadline = Instant::now() + timeout;
        loop {
            match adapter.read(bufs, num_samples) {
                Ok(n) => return Ok(n),
                Err(e) if e.is_transient() => {
                    if !adapter.wait_ready(deadline) {
                        return Err(DeviceError::Timeout);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Write up to `num_samples` per channel to the TX stream, blocking up
    /// to `timeout` for ring space. Returns the samples transferred, which
    /// may be fewer than requested; callers loop.
    pub fn write_stream(
        &self,
        handle: StreamHandle,
        bufs: &[&[u8]],
        num_samples: usize,
        timeout: Duration,
    ) -> Result<usize> {
        if handle.direction != Direction::Tx {
            return Err(DeviceError::StreamState(
                "write_stream called with a read-direction handle".into(),
            ));
        }
        let mut slot = self.tx_adapter.lock();
        let adapter = slot
            .as_mut()
            .ok_or_else(|| DeviceError::StreamState("write stream is not active".into()))?;

        let deadline = Instant::now() + timeout;
        loop {
            match adapter.write(bufs, num_samples) {
                Ok(n) => return Ok(n),
                Err(e) if e.is_transient() => {
                    if !adapter.wait_ready(deadline) {
                        return Err(DeviceError::Timeout);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn adapter_slot(&self, direction: Direction) -> &Mutex<Option<StreamAdapter>> {
        match direction {
            Direction::Rx => &self.rx_adapter,
            Direction::Tx => &self.tx_adapter,
        }
    }

    /*******************************************************************
     * Antennas
     ******************************************************************/

    pub fn list_antennas(&self, _direction: Direction, _channel: usize) -> Vec<String> {
        vec!["RX".to_string(), "TX".to_string()]
    }

    pub fn set_antenna(&self, direction: Direction, channel: usize, name: &str) -> Result<()> {
        self.check_channel(channel)?;
        if !self.list_antennas(direction, channel).iter().any(|a| a == name) {
            return Err(DeviceError::Config(format!("unknown antenna '{}'", name)));
        }
        self.tuner
            .lock()
            .antennas
            .insert((direction, channel), name.to_string());
        Ok(())
    }

    pub fn antenna(&self, direction: Direction, channel: usize) -> String {
        self.tuner
            .lock()
            .antennas
            .get(&(direction, channel))
            .cloned()
            .unwrap_or_else(|| {
                match direction {
                    Direction::Rx => "RX",
                    Direction::Tx => "TX",
                }
                .to_string()
            })
    }

    /*******************************************************************
     * Gains
     ******************************************************************/

    pub fn list_gains(&self, _direction: Direction, _channel: usize) -> Vec<String> {
        ["IF1", "IF2", "IF3", "IF4", "IF5", "IF6", "TUNER"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    pub fn gain_range(&self, _direction: Direction, _channel: usize, name: &str) -> Range {
        match name {
            "IF1" => Range::new(-3.0, 6.0),
            "IF2" | "IF3" => Range::new(0.0, 9.0),
            "IF4" => Range::new(0.0, 2.0),
            "IF5" | "IF6" => Range::new(3.0, 15.0),
            _ => Range::new(0.0, 30.0),
        }
    }

    pub fn set_gain(
        &self,
        direction: Direction,
        channel: usize,
        name: &str,
        value: f64,
    ) -> Result<()> {
        self.check_channel(channel)?;
        if !self.list_gains(direction, channel).iter().any(|g| g == name) {
            return Err(DeviceError::Config(format!("unknown gain element '{}'", name)));
        }
        let range = self.gain_range(direction, channel, name);
        if !range.contains(value) {
            return Err(DeviceError::Config(format!(
                "gain {} = {} outside [{}, {}]",
                name, value, range.minimum, range.maximum
            )));
        }
        log::debug!("setting {} gain {} = {} dB", direction.side(), name, value);
        self.tuner
            .lock()
            .gains
            .insert((direction, channel, name.to_string()), value);
        Ok(())
    }

    pub fn gain(&self, direction: Direction, channel: usize, name: &str) -> f64 {
        self.tuner
            .lock()
            .gains
            .get(&(direction, channel, name.to_string()))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn has_gain_mode(&self, _direction: Direction, _channel: usize) -> bool {
        true
    }

    pub fn set_gain_mode(&self, _direction: Direction, _channel: usize, automatic: bool) {
        self.tuner.lock().gain_mode = automatic;
    }

    pub fn gain_mode(&self, _direction: Direction, _channel: usize) -> bool {
        self.tuner.lock().gain_mode
    }

    /*******************************************************************
     * Frequency
     ******************************************************************/

    pub fn list_frequencies(&self, _direction: Direction, _channel: usize) -> Vec<String> {
        vec!["RF".to_string(), "CORR".to_string()]
    }

    pub fn frequency_range(
        &self,
        _direction: Direction,
        _channel: usize,
        name: &str,
    ) -> Result<Range> {
        match name {
            "RF" => Ok(Range::new(24e6, 1.764e9)),
            "CORR" => Ok(Range::new(-1000.0, 1000.0)),
            _ => Err(DeviceError::Config(format!(
                "unknown frequency component '{}'",
                name
            ))),
        }
    }

    pub fn set_frequency(
        &self,
        direction: Direction,
        channel: usize,
        name: &str,
        value: f64,
    ) -> Result<()> {
        self.check_channel(channel)?;
        let range = self.frequency_range(direction, channel, name)?;
        if !range.contains(value) {
            return Err(DeviceError::Config(format!(
                "{} = {} outside [{}, {}]",
                name, value, range.minimum, range.maximum
            )));
        }
        let mut tuner = self.tuner.lock();
        match name {
            "RF" => tuner.frequency = value,
            "CORR" => tuner.correction_ppm = value,
            _ => unreachable!("validated by frequency_range"),
        }
        Ok(())
    }

    pub fn frequency(&self, _direction: Direction, _channel: usize, name: &str) -> Result<f64> {
        let tuner = self.tuner.lock();
        match name {
            "RF" => Ok(tuner.frequency),
            "CORR" => Ok(tuner.correction_ppm),
            _ => Err(DeviceError::Config(format!(
                "unknown frequency component '{}'",
                name
            ))),
        }
    }

    /*******************************************************************
     * Sample rate / bandwidth
     ******************************************************************/

    pub fn set_sample_rate(&self, channel: usize, rate: f64) -> Result<()> {
        self.check_channel(channel)?;
        if rate <= 0.0 {
            return Err(DeviceError::Config("sample rate must be positive".into()));
        }
        log::debug!("setting sample rate: {} Hz", rate);
        self.tuner.lock().sample_rate = rate;
        Ok(())
    }

    pub fn sample_rate(&self, _channel: usize) -> f64 {
        self.tuner.lock().sample_rate
    }

    pub fn list_sample_rates(&self, _channel: usize) -> Vec<f64> {
        vec![
            250_000.0,
            1_024_000.0,
            1_536_000.0,
            1_792_000.0,
            1_920_000.0,
            3_200_000.0,
        ]
    }

    pub fn sample_rate_range(&self, _channel: usize) -> Vec<Range> {
        vec![Range::new(225_001.0, 300_000.0), Range::new(900_001.0, 3_200_000.0)]
    }

    pub fn set_bandwidth(&self, channel: usize, bandwidth: f64) -> Result<()> {
        self.check_channel(channel)?;
        self.tuner.lock().bandwidth = bandwidth;
        Ok(())
    }

    /// Zero bandwidth means auto: track the sample rate.
    pub fn bandwidth(&self, _channel: usize) -> f64 {
        let tuner = self.tuner.lock();
        if tuner.bandwidth == 0.0 {
            tuner.sample_rate
        } else {
            tuner.bandwidth
        }
    }

    pub fn bandwidth_range(&self, _channel: usize) -> Vec<Range> {
        vec![Range::new(0.0, 8e6)]
    }

    /*******************************************************************
     * Clocking
     ******************************************************************/

    pub fn set_master_clock_rate(&self, rate: f64) {
        self.tuner.lock().master_clock_rate = rate;
    }

    /// Zero means autodetect.
    pub fn master_clock_rate(&self) -> f64 {
        self.tuner.lock().master_clock_rate
    }

    pub fn master_clock_rates(&self) -> Vec<Range> {
        vec![Range::new(0.0, 0.0), Range::new(10e6, 52e6)]
    }

    pub fn list_clock_sources(&self) -> Vec<String> {
        vec![
            "internal".to_string(),
            "external".to_string(),
            "ext+pps".to_string(),
        ]
    }

    pub fn set_clock_source(&self, source: &str) -> Result<()> {
        if !self.list_clock_sources().iter().any(|s| s == source) {
            return Err(DeviceError::Config(format!("unknown clock source '{}'", source)));
        }
        self.tuner.lock().clock_source = source.to_string();
        Ok(())
    }

    pub fn clock_source(&self) -> String {
        self.tuner.lock().clock_source.clone()
    }

    /*******************************************************************
     * Sensors
     ******************************************************************/

    pub fn list_sensors(&self) -> Vec<String> {
        vec!["clock_locked".to_string(), "board_temp".to_string()]
    }

    pub fn read_sensor(&self, name: &str) -> Result<String> {
        match name {
            "clock_locked" => Ok("true".to_string()),
            "board_temp" => Ok("26.5".to_string()),
            _ => Err(DeviceError::UnknownSensor(name.to_string())),
        }
    }

    pub fn list_channel_sensors(&self, _direction: Direction, _channel: usize) -> Vec<String> {
        vec!["lo_locked".to_string()]
    }

    pub fn read_channel_sensor(
        &self,
        _direction: Direction,
        channel: usize,
        name: &str,
    ) -> Result<String> {
        self.check_channel(channel)?;
        match name {
            "lo_locked" => Ok("true".to_string()),
            _ => Err(DeviceError::UnknownSensor(name.to_string())),
        }
    }

    /*******************************************************************
     * Settings
     ******************************************************************/

    pub fn write_setting(&self, key: &str, value: &str) -> Result<()> {
        let mut tuner = self.tuner.lock();
        match key {
            "iq_swap" => tuner.iq_swap = value == "true",
            "offset_tune" => tuner.offset_tune = value == "true",
            "digital_agc" => tuner.digital_agc = value == "true",
            "direct_samp" => {
                tuner.direct_sampling = value.parse().unwrap_or_else(|_| {
                    log::warn!("invalid direct sampling mode '{}', using 0", value);
                    0
                });
            }
            _ => {
                return Err(DeviceError::Config(format!("unknown setting '{}'", key)));
            }
        }
        log::debug!("setting {} = {}", key, value);
        Ok(())
    }

    pub fn read_setting(&self, key: &str) -> Result<String> {
        let tuner = self.tuner.lock();
        match key {
            "iq_swap" => Ok(tuner.iq_swap.to_string()),
            "offset_tune" => Ok(tuner.offset_tune.to_string()),
            "digital_agc" => Ok(tuner.digital_agc.to_string()),
            "direct_samp" => Ok(tuner.direct_sampling.to_string()),
            _ => Err(DeviceError::Config(format!("unknown setting '{}'", key))),
        }
    }

    fn check_channel(&self, channel: usize) -> Result<()> {
        if channel >= self.config.channels {
            return Err(DeviceError::InvalidChannelSelection(format!(
                "channel {} out of range (device has {})",
                channel, self.config.channels
            )));
        }
        Ok(())
    }
}
