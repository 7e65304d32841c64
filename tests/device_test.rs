use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use loopradio::{
    DeviceConfig, DeviceError, Direction, LoopbackDevice, SampleFormat, StreamArgs,
};

fn small_device() -> Arc<LoopbackDevice> {
    let config = DeviceConfig {
        channels: 2,
        format: SampleFormat::Cs16,
        stream: StreamArgs {
            num_buffers: 4,
            buffer_len: 8,
        },
        ..DeviceConfig::default()
    };
    Arc::new(LoopbackDevice::new(config).unwrap())
}

fn small_args() -> StreamArgs {
    StreamArgs {
        num_buffers: 4,
        buffer_len: 8,
    }
}

/// CS16 element: 4 bytes per complex sample.
const ELEM: usize = 4;

fn encode(start: usize, count: usize, channels: usize) -> Vec<Vec<u8>> {
    (0..channels)
        .map(|chan| {
            (start..start + count)
                .flat_map(|i| ((i + 1000 * chan) as u32).to_le_bytes())
                .collect()
        })
        .collect()
}

#[test]
fn test_full_duplex_loopback_across_threads() {
    let device = small_device();
    let args = small_args();

    let tx = device
        .setup_stream(Direction::Tx, SampleFormat::Cs16, &[0, 1], &args)
        .unwrap();
    let rx = device
        .setup_stream(Direction::Rx, SampleFormat::Cs16, &[0, 1], &args)
        .unwrap();
    device.activate_stream(tx).unwrap();
    device.activate_stream(rx).unwrap();
    assert_eq!(device.stream_mtu().unwrap(), 8);

    // Writer thread: 20 samples as 8 + 8 + 4, then deactivate to flush the
    // partially-filled third chunk.
    let writer_device = device.clone();
    let writer = thread::spawn(move || {
        let timeout = Duration::from_secs(1);
        for (start, count) in [(0usize, 8usize), (8, 8), (16, 4)] {
            let data = encode(start, count, 2);
            let mut offset = 0;
            while offset < count {
                let bufs: Vec<&[u8]> = data
                    .iter()
                    .map(|c| &c[offset * ELEM..count * ELEM])
                    .collect();
                offset += writer_device
                    .write_stream(tx, &bufs, count - offset, timeout)
                    .unwrap();
            }
        }
        writer_device.deactivate_stream(tx).unwrap();
    });

    // Reader side: drain 20 samples, looping on partial transfers.
    let timeout = Duration::from_secs(1);
    let mut received: Vec<Vec<u8>> = vec![Vec::new(); 2];
    let mut total = 0usize;
    while total < 20 {
        let want = 20 - total;
        let mut out = vec![vec![0u8; want * ELEM]; 2];
        let n = {
            let mut bufs: Vec<&mut [u8]> = out.iter_mut().map(|c| c.as_mut_slice()).collect();
            device.read_stream(rx, &mut bufs, want, timeout).unwrap()
        };
        assert!(n > 0, "read made no progress");
        for chan in 0..2 {
            received[chan].extend_from_slice(&out[chan][..n * ELEM]);
        }
        total += n;
    }
    writer.join().unwrap();

    let expected = encode(0, 20, 2);
    for chan in 0..2 {
        assert_eq!(
            received[chan], expected[chan],
            "channel {} samples out of order or corrupted",
            chan
        );
    }

    device.close_stream(rx).unwrap();
    device.close_stream(tx).unwrap();
}

#[test]
fn test_read_timeout_with_no_writer() {
    let device = small_device();
    let rx = device
        .setup_stream(Direction::Rx, SampleFormat::Cs16, &[], &small_args())
        .unwrap();
    device.activate_stream(rx).unwrap();

    let mut out = vec![vec![0u8; 8 * ELEM]; 2];
    let mut bufs: Vec<&mut [u8]> = out.iter_mut().map(|c| c.as_mut_slice()).collect();

    let start = Instant::now();
    let result = device.read_stream(rx, &mut bufs, 8, Duration::from_millis(50));
    let elapsed = start.elapsed();

    assert!(matches!(result, Err(DeviceError::Timeout)));
    assert!(
        elapsed >= Duration::from_millis(45),
        "timed out after only {:?}",
        elapsed
    );
    assert!(
        out.iter().all(|c| c.iter().all(|b| *b == 0)),
        "no data may be transferred on timeout"
    );
}

#[test]
fn test_second_setup_must_agree_with_ring() {
    let device = small_device();
    let args = small_args();
    device
        .setup_stream(Direction::Tx, SampleFormat::Cs16, &[], &args)
        .unwrap();

    let bigger = StreamArgs {
        num_buffers: 8,
        buffer_len: 8,
    };
    assert!(matches!(
        device.setup_stream(Direction::Rx, SampleFormat::Cs16, &[], &bigger),
        Err(DeviceError::ConfigurationConflict {
            what: "buffer count",
            requested: 8,
            existing: 4
        })
    ));

    let longer = StreamArgs {
        num_buffers: 4,
        buffer_len: 16,
    };
    assert!(matches!(
        device.setup_stream(Direction::Rx, SampleFormat::Cs16, &[], &longer),
        Err(DeviceError::ConfigurationConflict {
            what: "buffer length",
            ..
        })
    ));

    assert!(matches!(
        device.setup_stream(Direction::Rx, SampleFormat::Cs16, &[0], &args),
        Err(DeviceError::ConfigurationConflict {
            what: "channel count",
            ..
        })
    ));

    // A congruent second setup is fine.
    assert!(
        device
            .setup_stream(Direction::Rx, SampleFormat::Cs16, &[], &args)
            .is_ok()
    );
}

#[test]
fn test_closing_both_streams_releases_ring() {
    let device = small_device();
    let args = small_args();
    let tx = device
        .setup_stream(Direction::Tx, SampleFormat::Cs16, &[], &args)
        .unwrap();
    let rx = device
        .setup_stream(Direction::Rx, SampleFormat::Cs16, &[], &args)
        .unwrap();
    device.close_stream(tx).unwrap();

    // RX still open: ring sizing is pinned.
    let other = StreamArgs {
        num_buffers: 8,
        buffer_len: 16,
    };
    assert!(matches!(
        device.setup_stream(Direction::Tx, SampleFormat::Cs16, &[], &other),
        Err(DeviceError::ConfigurationConflict { .. })
    ));

    // Both closed: a fresh setup may size a new ring.
    device.close_stream(rx).unwrap();
    assert!(
        device
            .setup_stream(Direction::Tx, SampleFormat::Cs16, &[], &other)
            .is_ok()
    );
}

#[test]
fn test_stream_contract_errors() {
    let device = small_device();
    let args = small_args();

    assert!(matches!(
        device.stream_mtu(),
        Err(DeviceError::StreamState(_))
    ));

    // Only the native format is streamable.
    assert!(matches!(
        device.setup_stream(Direction::Rx, SampleFormat::Cf32, &[], &args),
        Err(DeviceError::UnsupportedFormat(_))
    ));

    // Channel selection must be contiguous from zero.
    assert!(matches!(
        device.setup_stream(Direction::Rx, SampleFormat::Cs16, &[1], &args),
        Err(DeviceError::InvalidChannelSelection(_))
    ));

    let rx = device
        .setup_stream(Direction::Rx, SampleFormat::Cs16, &[], &args)
        .unwrap();

    // Setting up the same direction twice is a state error.
    assert!(matches!(
        device.setup_stream(Direction::Rx, SampleFormat::Cs16, &[], &args),
        Err(DeviceError::StreamState(_))
    ));

    // I/O before activation is a state error.
    let mut out = vec![vec![0u8; 8 * ELEM]; 2];
    let mut bufs: Vec<&mut [u8]> = out.iter_mut().map(|c| c.as_mut_slice()).collect();
    assert!(matches!(
        device.read_stream(rx, &mut bufs, 8, Duration::from_millis(10)),
        Err(DeviceError::StreamState(_))
    ));

    device.activate_stream(rx).unwrap();
    assert!(matches!(
        device.activate_stream(rx),
        Err(DeviceError::StreamState(_))
    ));

    // Reading with a write-direction handle is rejected outright.
    let tx = device
        .setup_stream(Direction::Tx, SampleFormat::Cs16, &[], &args)
        .unwrap();
    let mut bufs: Vec<&mut [u8]> = out.iter_mut().map(|c| c.as_mut_slice()).collect();
    assert!(matches!(
        device.read_stream(tx, &mut bufs, 8, Duration::from_millis(10)),
        Err(DeviceError::StreamState(_))
    ));
}

#[test]
fn test_metadata_surface() {
    let device = small_device();

    assert_eq!(device.driver_key(), "Loopback");
    assert_eq!(device.num_channels(Direction::Rx), 2);
    assert!(device.full_duplex(Direction::Rx, 0));
    assert_eq!(
        device.stream_formats(Direction::Rx, 0),
        vec![SampleFormat::Cs16]
    );

    // Antennas.
    device.set_antenna(Direction::Rx, 0, "TX").unwrap();
    assert_eq!(device.antenna(Direction::Rx, 0), "TX");
    assert!(device.set_antenna(Direction::Rx, 0, "DISH").is_err());
    assert!(device.set_antenna(Direction::Rx, 9, "RX").is_err());

    // Gains validate against their ranges.
    device.set_gain(Direction::Rx, 0, "IF1", 4.0).unwrap();
    assert_eq!(device.gain(Direction::Rx, 0, "IF1"), 4.0);
    assert_eq!(device.gain(Direction::Rx, 0, "TUNER"), 0.0);
    assert!(device.set_gain(Direction::Rx, 0, "IF1", 20.0).is_err());
    assert!(device.set_gain(Direction::Rx, 0, "BOGUS", 1.0).is_err());

    // Frequency components.
    device
        .set_frequency(Direction::Rx, 0, "RF", 146e6)
        .unwrap();
    assert_eq!(device.frequency(Direction::Rx, 0, "RF").unwrap(), 146e6);
    assert!(device.set_frequency(Direction::Rx, 0, "RF", 1.0).is_err());
    assert!(device.frequency(Direction::Rx, 0, "LO").is_err());

    // Bandwidth 0 tracks the sample rate.
    device.set_sample_rate(0, 1_024_000.0).unwrap();
    assert_eq!(device.bandwidth(0), 1_024_000.0);
    device.set_bandwidth(0, 250_000.0).unwrap();
    assert_eq!(device.bandwidth(0), 250_000.0);

    // Clock sources are a fixed menu.
    device.set_clock_source("external").unwrap();
    assert_eq!(device.clock_source(), "external");
    assert!(device.set_clock_source("sundial").is_err());

    // Sensors.
    assert_eq!(device.read_sensor("clock_locked").unwrap(), "true");
    assert!(matches!(
        device.read_sensor("warp_core_temp"),
        Err(DeviceError::UnknownSensor(_))
    ));
    assert_eq!(
        device
            .read_channel_sensor(Direction::Rx, 0, "lo_locked")
            .unwrap(),
        "true"
    );

    // Settings round-trip through the string store.
    device.write_setting("iq_swap", "true").unwrap();
    assert_eq!(device.read_setting("iq_swap").unwrap(), "true");
    device.write_setting("direct_samp", "2").unwrap();
    assert_eq!(device.read_setting("direct_samp").unwrap(), "2");
    device.write_setting("direct_samp", "bogus").unwrap();
    assert_eq!(device.read_setting("direct_samp").unwrap(), "0");
    assert!(device.write_setting("flux_capacitor", "on").is_err());
}
