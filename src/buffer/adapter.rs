//! Adapter from whole-chunk acquire/release to arbitrary-length transfers.
//!
//! The ring only moves full chunks; streaming callers want to read or write
//! however many samples they have on hand. The adapter holds at most one
//! chunk, copies caller data piecemeal into or out of it, and releases it
//! back to the ring once it is exactly full (write) or drained (read).
//! A single `transact` may move fewer samples than requested; callers loop.

use std::sync::Arc;
use std::time::Instant;

use super::ring::{Chunk, ChunkRing, Direction};
use crate::error::{DeviceError, Result};

/// Caller-side buffers for one transfer, one slice per channel.
/// The variant determines which way bytes flow.
enum Transfer<'a, 'b> {
    /// Chunk to caller (stream read).
    Out(&'a mut [&'b mut [u8]]),
    /// Caller to chunk (stream write).
    In(&'a [&'b [u8]]),
}

impl Transfer<'_, '_> {
    fn channels(&self) -> usize {
        match self {
            Transfer::Out(bufs) => bufs.len(),
            Transfer::In(bufs) => bufs.len(),
        }
    }

    /// Every caller buffer must cover the bytes this transfer will touch.
    fn check_capacity(&self, needed: usize) -> Result<()> {
        let short = match self {
            Transfer::Out(bufs) => bufs.iter().map(|b| b.len()).min(),
            Transfer::In(bufs) => bufs.iter().map(|b| b.len()).min(),
        };
        match short {
            Some(len) if len < needed => Err(DeviceError::ShortBuffer { needed, len }),
            _ => Ok(()),
        }
    }

    fn copy(&mut self, chunk: &mut Chunk, offset: usize, nbytes: usize) {
        match self {
            Transfer::Out(bufs) => {
                for (chan, dst) in bufs.iter_mut().enumerate() {
                    dst[..nbytes].copy_from_slice(&chunk.channel(chan)[offset..offset + nbytes]);
                }
            }
            Transfer::In(bufs) => {
                for (chan, src) in bufs.iter().enumerate() {
                    chunk.channel_mut(chan)[offset..offset + nbytes].copy_from_slice(&src[..nbytes]);
                }
            }
        }
    }
}

/// Streaming facade over one side of a [`ChunkRing`].
///
/// One adapter exists per active stream direction. Dropping an adapter that
/// still holds a chunk releases it back to the ring, so a partially-filled
/// write chunk is published rather than lost.
pub struct StreamAdapter {
    ring: Arc<ChunkRing>,
    direction: Direction,
    held: Option<Chunk>,
    /// Samples already consumed/produced in the held chunk.
    usage: usize,
}

impl StreamAdapter {
    pub fn new(ring: Arc<ChunkRing>, direction: Direction) -> Self {
        Self {
            ring,
            direction,
            held: None,
            usage: 0,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Samples per chunk, per channel.
    pub fn buffer_len(&self) -> usize {
        self.ring.buffer_len()
    }

    pub fn elem_size(&self) -> usize {
        self.ring.elem_size()
    }

    /// Samples consumed/produced so far in the held chunk.
    pub fn usage(&self) -> usize {
        self.usage
    }

    /// Samples remaining in the held chunk before it is released.
    pub fn space(&self) -> usize {
        self.buffer_len() - self.usage
    }

    /// Copy up to `num_samples` from the held chunk into `bufs`, one slice
    /// per channel. Returns the number of samples actually copied.
    pub fn read(&mut self, bufs: &mut [&mut [u8]], num_samples: usize) -> Result<usize> {
        if self.direction != Direction::Rx {
            return Err(DeviceError::StreamState(
                "read on a write-direction adapter".into(),
            ));
        }
        self.transact(Transfer::Out(bufs), num_samples)
    }

    /// Copy up to `num_samples` from `bufs` into the held chunk, one slice
    /// per channel. Returns the number of samples actually copied.
    pub fn write(&mut self, bufs: &[&[u8]], num_samples: usize) -> Result<usize> {
        if self.direction != Direction::Tx {
            return Err(DeviceError::StreamState(
                "write on a read-direction adapter".into(),
            ));
        }
        self.transact(Transfer::In(bufs), num_samples)
    }

    /// Block until the underlying ring can satisfy an acquire for this
    /// direction, or `deadline` passes. Returns readiness.
    pub fn wait_ready(&self, deadline: Instant) -> bool {
        match self.direction {
            Direction::Rx => self.ring.wait_readable(deadline),
            Direction::Tx => self.ring.wait_writable(deadline),
        }
    }

    /// Shared transfer path for both directions; only the copy step differs.
    fn transact(&mut self, mut xfer: Transfer<'_, '_>, num_samples: usize) -> Result<usize> {
        if self.held.is_none() {
            // Transient acquire failures propagate with nothing copied.
            let chunk = match self.direction {
                Direction::Rx => self.ring.acquire_read()?,
                Direction::Tx => self.ring.acquire_write()?,
            };
            log::debug!(
                "{} adapter acquired chunk with {} channels",
                self.direction.side(),
                chunk.channels()
            );
            self.usage = 0;
            self.held = Some(chunk);
        }
        let chunk = match self.held.as_mut() {
            Some(chunk) => chunk,
            None => {
                return Err(DeviceError::ProtocolViolation(
                    "adapter lost its held chunk".into(),
                ));
            }
        };

        if xfer.channels() != chunk.channels() {
            return Err(DeviceError::ChannelCountMismatch {
                expected: chunk.channels(),
                actual: xfer.channels(),
            });
        }

        // Never more than remains in the held chunk.
        let n = num_samples.min(self.ring.buffer_len() - self.usage);
        let offset = self.usage * self.ring.elem_size();
        let nbytes = n * self.ring.elem_size();

        xfer.check_capacity(nbytes)?;
        xfer.copy(chunk, offset, nbytes);
        self.usage += n;

        // A full (or fully drained) chunk goes back to the ring so the other
        // side can make progress; the next transact acquires a fresh one.
        if self.usage == self.ring.buffer_len() {
            if let Some(chunk) = self.held.take() {
                self.release(chunk)?;
            }
            self.usage = 0;
        }

        Ok(n)
    }

    fn release(&self, chunk: Chunk) -> Result<()> {
        match self.direction {
            Direction::Rx => self.ring.release_read(chunk),
            Direction::Tx => self.ring.release_write(chunk),
        }
    }
}

impl Drop for StreamAdapter {
    fn drop(&mut self) {
        if let Some(chunk) = self.held.take() {
            if self.direction == Direction::Tx && self.usage > 0 {
                log::debug!(
                    "flushing write chunk holding {} of {} samples",
                    self.usage,
                    self.ring.buffer_len()
                );
            }
            if let Err(e) = self.release(chunk) {
                log::warn!("failed to release held chunk on drop: {}", e);
            }
        }
    }
}
