use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use crossbeam_channel::bounded;

use loopradio::{DeviceConfig, Direction, LoopbackDevice, StreamHandle};

/// Pump samples through the simulated loopback device and report throughput.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Optional device configuration TOML file
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Number of ring buffers
    #[arg(long)]
    buffers: Option<usize>,

    /// Samples per buffer, per channel
    #[arg(long)]
    bufflen: Option<usize>,

    /// Total samples to pump per channel
    #[arg(long, default_value_t = 1_000_000)]
    samples: usize,

    /// Per-transfer timeout in milliseconds
    #[arg(long, default_value_t = 1000)]
    timeout_ms: u64,
}

/// Deterministic byte pattern so the reader can verify the loopback.
fn pattern(byte_index: usize, channel: usize) -> u8 {
    ((byte_index + 31 * channel) % 251) as u8
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => DeviceConfig::load(path)?,
        None => DeviceConfig::default(),
    };
    if let Some(buffers) = args.buffers {
        config.stream.num_buffers = buffers;
    }
    if let Some(bufflen) = args.bufflen {
        config.stream.buffer_len = bufflen;
    }

    println!("=== loopradio - simulated loopback SDR ===");
    println!("Format: {}", config.format);
    println!("Channels: {}", config.channels);
    println!(
        "Ring: {} buffers x {} samples",
        config.stream.num_buffers, config.stream.buffer_len
    );
    println!("Samples to pump: {}", args.samples);
    println!();

    let stream_args = config.stream;
    let channels = config.channels;
    let elem_size = config.format.elem_size();
    let format = config.format;
    let timeout = Duration::from_millis(args.timeout_ms);

    let device = Arc::new(LoopbackDevice::new(config)?);

    let tx_handle = device.setup_stream(Direction::Tx, format, &[], &stream_args)?;
    let rx_handle = device.setup_stream(Direction::Rx, format, &[], &stream_args)?;
    device.activate_stream(tx_handle)?;
    device.activate_stream(rx_handle)?;
    println!("Streams active (MTU {} samples). Pumping...", device.stream_mtu()?);

    let (stats_tx, stats_rx) = bounded(1);
    let writer_device = device.clone();
    let total = args.samples;
    let writer = thread::spawn(move || {
        let start = Instant::now();
        match run_writer(&writer_device, tx_handle, channels, elem_size, total, timeout) {
            Ok(sent) => {
                let _ = stats_tx.send((sent, start.elapsed()));
            }
            Err(e) => log::error!("writer failed: {}", e),
        }
    });

    let start = Instant::now();
    let (received, mismatches) =
        run_reader(&device, rx_handle, channels, elem_size, total, timeout)?;
    let read_elapsed = start.elapsed();

    writer
        .join()
        .map_err(|_| anyhow::anyhow!("writer thread panicked"))?;
    let (sent, write_elapsed) = stats_rx
        .recv()
        .map_err(|_| anyhow::anyhow!("writer reported no statistics"))?;

    device.close_stream(rx_handle)?;
    device.close_stream(tx_handle)?;

    let rate = received as f64 / read_elapsed.as_secs_f64() / 1e6;
    println!("Wrote {} samples in {:.3} s", sent, write_elapsed.as_secs_f64());
    println!(
        "Read {} samples in {:.3} s ({:.2} Msps/channel)",
        received,
        read_elapsed.as_secs_f64(),
        rate
    );
    if mismatches > 0 {
        anyhow::bail!("loopback corrupted {} bytes", mismatches);
    }
    println!("Loopback verified: all samples match.");
    Ok(())
}

fn run_writer(
    device: &LoopbackDevice,
    handle: StreamHandle,
    channels: usize,
    elem_size: usize,
    total: usize,
    timeout: Duration,
) -> anyhow::Result<usize> {
    let block_len = device.stream_mtu()?;
    let mut block = vec![vec![0u8; block_len * elem_size]; channels];
    let mut sent = 0usize;

    while sent < total {
        let n = (total - sent).min(block_len);
        for (chan, buf) in block.iter_mut().enumerate() {
            for (j, byte) in buf[..n * elem_size].iter_mut().enumerate() {
                *byte = pattern(sent * elem_size + j, chan);
            }
        }

        let mut offset = 0usize;
        while offset < n {
            let bufs: Vec<&[u8]> = block
                .iter()
                .map(|c| &c[offset * elem_size..n * elem_size])
                .collect();
            offset += device.write_stream(handle, &bufs, n - offset, timeout)?;
        }
        sent += n;
    }

    // Publish any partially-filled final chunk so the reader can drain it.
    device.deactivate_stream(handle)?;
    Ok(sent)
}

fn run_reader(
    device: &LoopbackDevice,
    handle: StreamHandle,
    channels: usize,
    elem_size: usize,
    total: usize,
    timeout: Duration,
) -> anyhow::Result<(usize, usize)> {
    let block_len = device.stream_mtu()?;
    let mut block = vec![vec![0u8; block_len * elem_size]; channels];
    let mut received = 0usize;
    let mut mismatches = 0usize;

    while received < total {
        let want = (total - received).min(block_len);
        let n = {
            let mut bufs: Vec<&mut [u8]> = block
                .iter_mut()
                .map(|c| &mut c[..want * elem_size])
                .collect();
            device.read_stream(handle, &mut bufs, want, timeout)?
        };

        for (chan, buf) in block.iter().enumerate() {
            for (j, byte) in buf[..n * elem_size].iter().enumerate() {
                if *byte != pattern(received * elem_size + j, chan) {
                    mismatches += 1;
                }
            }
        }
        received += n;
    }
    Ok((received, mismatches))
}
