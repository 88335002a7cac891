//! Decoded frames and the single-slot hand-off between capture and processing.
//!
//! - `Frame`: owned RGB8 pixel buffer with its dimensions.
//! - `FrameBuffer`: one-slot, overwrite-on-write buffer. The acquisition thread
//!   writes, the orchestrator reads. A write never blocks; a read blocks until a
//!   frame newer than the last one read is available.
//!
//! Frames are never queued. If the reader falls behind, unread frames are
//! overwritten and counted as dropped.

use anyhow::{anyhow, Result};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::ingest::CaptureError;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// A decoded RGB8 frame.
///
/// Pixel data is interleaved `R, G, B` rows, `width * height * 3` bytes.
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    sequence: u64,
}

impl Frame {
    /// Wrap an RGB8 buffer. Fails when the buffer does not match the dimensions.
    pub fn from_rgb8(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if data.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            sequence: 0,
        })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// Publish order assigned by the frame source (1-based, 0 if never published).
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub(crate) fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    /// Copy the pixels into an `image` buffer (for annotation and encoding).
    pub fn to_rgb_image(&self) -> Result<image::RgbImage> {
        image::RgbImage::from_raw(self.width, self.height, self.data.clone())
            .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", self.width, self.height))
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------------
// FrameBuffer: one slot, latest frame wins
// ----------------------------------------------------------------------------

#[derive(Default)]
struct Slot {
    frame: Option<Frame>,
    closed: bool,
    published: u64,
    dropped: u64,
}

/// Single-slot hand-off between one writer and one reader.
///
/// `put` replaces whatever is in the slot and wakes the reader. `get` takes the
/// frame out of the slot, so the same frame is never returned twice.
pub struct FrameBuffer {
    slot: Mutex<Slot>,
    ready: Condvar,
}

/// Counters for a `FrameBuffer`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameBufferStats {
    pub published: u64,
    /// Frames overwritten before anyone read them.
    pub dropped: u64,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::default()),
            ready: Condvar::new(),
        }
    }

    /// Store `frame`, discarding any unread frame. Never blocks on the reader.
    ///
    /// Frames put after `close()` are dropped.
    pub fn put(&self, frame: Frame) {
        // The writer must keep going even if a reader panicked while holding the lock.
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.closed {
            slot.dropped += 1;
            return;
        }
        if slot.frame.replace(frame).is_some() {
            slot.dropped += 1;
        }
        slot.published += 1;
        drop(slot);
        self.ready.notify_one();
    }

    /// Block until a frame is available and take it.
    ///
    /// Returns `CaptureError::Closed` once the buffer is closed and drained.
    pub fn get(&self) -> Result<Frame, CaptureError> {
        let mut slot = self.lock()?;
        loop {
            if let Some(frame) = slot.frame.take() {
                return Ok(frame);
            }
            if slot.closed {
                return Err(CaptureError::Closed);
            }
            slot = self
                .ready
                .wait(slot)
                .map_err(|_| CaptureError::BufferPoisoned)?;
        }
    }

    /// Like `get`, but gives up after `timeout` and returns `Ok(None)`.
    pub fn get_timeout(&self, timeout: Duration) -> Result<Option<Frame>, CaptureError> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.lock()?;
        loop {
            if let Some(frame) = slot.frame.take() {
                return Ok(Some(frame));
            }
            if slot.closed {
                return Err(CaptureError::Closed);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let (guard, _) = self
                .ready
                .wait_timeout(slot, deadline - now)
                .map_err(|_| CaptureError::BufferPoisoned)?;
            slot = guard;
        }
    }

    /// Mark the writer as gone. Readers drain the pending frame, then see `Closed`.
    pub fn close(&self) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        slot.closed = true;
        drop(slot);
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.slot
            .lock()
            .map(|slot| slot.closed)
            .unwrap_or(true)
    }

    pub fn stats(&self) -> FrameBufferStats {
        let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        FrameBufferStats {
            published: slot.published,
            dropped: slot.dropped,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Slot>, CaptureError> {
        self.slot.lock().map_err(|_| CaptureError::BufferPoisoned)
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
