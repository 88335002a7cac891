//! Transport seam between `FrameSource` and a concrete stream.
//!
//! A `SessionOpener` turns a stream URL into a live `StreamSession`. The
//! session hands out decoded frames one at a time until the stream breaks.
//! `FrameSource` owns the session and never exposes it.

use thiserror::Error;

use crate::frame::Frame;

/// Errors raised while acquiring frames.
///
/// `Unreachable`, `Open` and `Read` are transient: `FrameSource` recovers from
/// them with its reconnect state machine. `Closed` and `BufferPoisoned` are
/// reported by the frame buffer to the reader.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("stream endpoint {url:?} is unreachable")]
    Unreachable { url: String },
    #[error("failed to open stream {url:?}: {reason}")]
    Open { url: String, reason: String },
    #[error("stream read failed: {0}")]
    Read(String),
    #[error("stream ended")]
    EndOfStream,
    #[error("frame source closed")]
    Closed,
    #[error("frame buffer lock poisoned")]
    BufferPoisoned,
}

impl CaptureError {
    pub fn open(url: &str, reason: impl std::fmt::Display) -> Self {
        CaptureError::Open {
            url: url.to_string(),
            reason: format!("{:#}", reason),
        }
    }

    pub fn read(reason: impl std::fmt::Display) -> Self {
        CaptureError::Read(format!("{:#}", reason))
    }
}

/// A live stream connection.
pub trait StreamSession: Send {
    /// Decode the next frame. Any error means the session is dead.
    fn read_frame(&mut self) -> Result<Frame, CaptureError>;

    /// Human readable transport name for logs.
    fn describe(&self) -> String;
}

/// Opens sessions against a stream URL.
pub trait SessionOpener: Send {
    fn open(&mut self, url: &str) -> Result<Box<dyn StreamSession>, CaptureError>;
}
