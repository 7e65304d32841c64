//! Fixed-capacity ring of multi-channel sample chunks.
//!
//! Writes loop back to future reads: the TX side acquires a chunk, fills it,
//! and releases it; the RX side acquires the same chunk later and drains it.
//! All chunk memory is allocated once at construction. One slot is
//! permanently reserved so that two cursors suffice to distinguish an empty
//! ring from a full one.
//!
//! The ring is single-producer/single-consumer: exactly one thread drives
//! each side. Cursor arithmetic needs no lock for correctness because each
//! side only stores its own cursor and loads the other's; the cursors are
//! atomics with acquire/release ordering so the protocol also holds across
//! OS threads.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::error::{DeviceError, Result};

/// Which way samples flow through a stream.
///
/// `Rx` consumes chunks from the ring (device to application), `Tx` produces
/// chunks into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Rx,
    Tx,
}

impl Direction {
    /// Human-readable side name for diagnostics.
    pub fn side(&self) -> &'static str {
        match self {
            Direction::Rx => "read",
            Direction::Tx => "write",
        }
    }
}

/// One ring slot's worth of per-channel sample storage, checked out of the
/// ring by `acquire` and returned by `release`.
///
/// The chunk remembers which slot it came from and which side acquired it,
/// so the ring can reject releases that do not match the outstanding
/// acquisition.
#[derive(Debug)]
pub struct Chunk {
    bufs: Vec<Vec<u8>>,
    slot: usize,
    direction: Direction,
}

impl Chunk {
    /// Number of channels in this chunk.
    pub fn channels(&self) -> usize {
        self.bufs.len()
    }

    /// Byte length of each channel region.
    pub fn channel_bytes(&self) -> usize {
        self.bufs[0].len()
    }

    /// Read access to one channel's region.
    pub fn channel(&self, idx: usize) -> &[u8] {
        &self.bufs[idx]
    }

    /// Write access to one channel's region.
    pub fn channel_mut(&mut self, idx: usize) -> &mut [u8] {
        &mut self.bufs[idx]
    }

    /// Slot index this chunk occupies in the ring.
    pub fn slot(&self) -> usize {
        self.slot
    }
}

/// Fixed-capacity multi-channel chunk ring buffer.
///
/// Sizing (slot count, chunk length, channel count, element size) is fixed
/// at construction. `acquire_*`/`release_*` are the only mutating
/// operations; at most one acquisition per side may be outstanding.
pub struct ChunkRing {
    /// Chunk storage per slot. `None` while the chunk is checked out.
    /// Uncontended by protocol; the mutex exists so the ring is `Sync`.
    slots: Box<[Mutex<Option<Vec<Vec<u8>>>>]>,
    /// Monotonic count of released writes, interpreted modulo slot count.
    write_idx: AtomicU64,
    /// Monotonic count of released reads, interpreted modulo slot count.
    read_idx: AtomicU64,
    read_busy: AtomicBool,
    write_busy: AtomicBool,
    buffer_len: usize,
    elem_size: usize,
    channels: usize,
    /// Pairs with `avail_cond` so releases cannot slip between a failed
    /// availability check and the wait that follows it.
    avail_lock: Mutex<()>,
    avail_cond: Condvar,
}

impl ChunkRing {
    /// Allocate a ring of `num_buffers` chunks, each holding `buffer_len`
    /// samples of `elem_size` bytes on each of `channels` channels.
    pub fn new(
        num_buffers: usize,
        buffer_len: usize,
        channels: usize,
        elem_size: usize,
    ) -> Result<Self> {
        if num_buffers < 2 {
            return Err(DeviceError::Config(
                "ring needs at least 2 buffers (one slot is reserved)".into(),
            ));
        }
        if buffer_len == 0 || channels == 0 || elem_size == 0 {
            return Err(DeviceError::Config(
                "buffer length, channel count and element size must all be >= 1".into(),
            ));
        }

        let slots = (0..num_buffers)
            .map(|_| {
                let bufs = (0..channels)
                    .map(|_| vec![0u8; buffer_len * elem_size])
                    .collect();
                Mutex::new(Some(bufs))
            })
            .collect();

        Ok(Self {
            slots,
            write_idx: AtomicU64::new(0),
            read_idx: AtomicU64::new(0),
            read_busy: AtomicBool::new(false),
            write_busy: AtomicBool::new(false),
            buffer_len,
            elem_size,
            channels,
            avail_lock: Mutex::new(()),
            avail_cond: Condvar::new(),
        })
    }

    pub fn num_buffers(&self) -> usize {
        self.slots.len()
    }

    /// Samples per chunk, per channel.
    pub fn buffer_len(&self) -> usize {
        self.buffer_len
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn elem_size(&self) -> usize {
        self.elem_size
    }

    /// Byte length of one channel region of one chunk.
    pub fn chunk_bytes(&self) -> usize {
        self.buffer_len * self.elem_size
    }

    /// Chunks ready to be consumed by the read side.
    pub fn available_to_read(&self) -> usize {
        let w = self.write_idx.load(Ordering::Acquire);
        let r = self.read_idx.load(Ordering::Acquire);
        (w.wrapping_sub(r) % self.slots.len() as u64) as usize
    }

    /// Chunks the write side may still fill. One slot is always reserved,
    /// so `available_to_read() + available_to_write() == num_buffers() - 1`.
    pub fn available_to_write(&self) -> usize {
        self.slots.len() - self.available_to_read() - 1
    }

    /// Check out the next chunk to consume. Fails with `Underflow` when the
    /// ring is empty, or `ProtocolViolation` if a read acquisition is
    /// already outstanding.
    pub fn acquire_read(&self) -> Result<Chunk> {
        self.acquire(Direction::Rx)
    }

    /// Check out the next chunk to fill. Fails with `Overflow` when no slot
    /// is free, or `ProtocolViolation` if a write acquisition is already
    /// outstanding.
    pub fn acquire_write(&self) -> Result<Chunk> {
        self.acquire(Direction::Tx)
    }

    /// Return a consumed chunk and advance the read cursor.
    pub fn release_read(&self, chunk: Chunk) -> Result<()> {
        self.release(Direction::Rx, chunk)
    }

    /// Publish a filled chunk and advance the write cursor.
    pub fn release_write(&self, chunk: Chunk) -> Result<()> {
        self.release(Direction::Tx, chunk)
    }

    /// Block until a chunk is available to read or `deadline` passes.
    /// Returns whether a chunk is available.
    pub fn wait_readable(&self, deadline: Instant) -> bool {
        self.wait_available(deadline, || self.available_to_read() > 0)
    }

    /// Block until a slot is available to write or `deadline` passes.
    /// Returns whether a slot is available.
    pub fn wait_writable(&self, deadline: Instant) -> bool {
        self.wait_available(deadline, || self.available_to_write() > 0)
    }

    fn wait_available<F: Fn() -> bool>(&self, deadline: Instant, ready: F) -> bool {
        let mut guard = self.avail_lock.lock();
        loop {
            // The predicate must be re-checked under the lock: releases
            // notify while holding it, so a wakeup cannot be missed between
            // the check and the wait.
            if ready() {
                return true;
            }
            if self.avail_cond.wait_until(&mut guard, deadline).timed_out() {
                return ready();
            }
        }
    }

    fn cursor(&self, direction: Direction) -> &AtomicU64 {
        match direction {
            Direction::Rx => &self.read_idx,
            Direction::Tx => &self.write_idx,
        }
    }

    fn busy(&self, direction: Direction) -> &AtomicBool {
        match direction {
            Direction::Rx => &self.read_busy,
            Direction::Tx => &self.write_busy,
        }
    }

    fn acquire(&self, direction: Direction) -> Result<Chunk> {
        let busy = self.busy(direction);
        if busy.swap(true, Ordering::AcqRel) {
            return Err(DeviceError::ProtocolViolation(format!(
                "second {} acquisition while one is still outstanding",
                direction.side()
            )));
        }

        let available = match direction {
            Direction::Rx => self.available_to_read(),
            Direction::Tx => self.available_to_write(),
        };
        if available == 0 {
            busy.store(false, Ordering::Release);
            return Err(match direction {
                Direction::Rx => DeviceError::Underflow,
                Direction::Tx => DeviceError::Overflow,
            });
        }

        let cursor = self.cursor(direction).load(Ordering::Acquire);
        let slot = (cursor % self.slots.len() as u64) as usize;
        match self.slots[slot].lock().take() {
            Some(bufs) => Ok(Chunk {
                bufs,
                slot,
                direction,
            }),
            None => {
                busy.store(false, Ordering::Release);
                Err(DeviceError::ProtocolViolation(format!(
                    "slot {} is empty; ring cursors are corrupted",
                    slot
                )))
            }
        }
    }

    fn release(&self, direction: Direction, chunk: Chunk) -> Result<()> {
        if chunk.direction != direction {
            return Err(DeviceError::ProtocolViolation(format!(
                "chunk acquired for {} released to the {} side",
                chunk.direction.side(),
                direction.side()
            )));
        }
        if !self.busy(direction).load(Ordering::Acquire) {
            return Err(DeviceError::ProtocolViolation(format!(
                "{} release without an outstanding acquisition",
                direction.side()
            )));
        }

        let cursor = self.cursor(direction);
        let current = cursor.load(Ordering::Acquire);
        let slot = (current % self.slots.len() as u64) as usize;
        if chunk.slot != slot {
            return Err(DeviceError::ProtocolViolation(format!(
                "released chunk from slot {} does not match acquired slot {}",
                chunk.slot, slot
            )));
        }

        *self.slots[slot].lock() = Some(chunk.bufs);
        cursor.store(current + 1, Ordering::Release);
        self.busy(direction).store(false, Ordering::Release);

        // Wake any waiter; lock ordering matches wait_available.
        let _guard = self.avail_lock.lock();
        self.avail_cond.notify_all();
        Ok(())
    }
}
