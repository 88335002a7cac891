//! Frame ingestion.
//!
//! This module keeps a live connection to a network camera and publishes the
//! freshest decoded frame:
//! - `probe`: cheap TCP reachability check before opening a stream
//! - `session`: the transport seam (`SessionOpener`, `StreamSession`) and
//!   the capture error taxonomy
//! - `mjpeg`: MJPEG/JPEG over HTTP, plus `stub://` synthetic streams
//! - `source`: `FrameSource`, the reconnect state machine on its own thread
//!
//! Transient failures (unreachable host, failed open, broken stream) never
//! leave this module. A source that keeps failing to open ends up `Exhausted`
//! and closes its frame buffer, which is how the orchestrator learns about it.

mod mjpeg;
mod probe;
mod session;
mod source;

pub use mjpeg::StreamOpener;
pub use probe::{ConnectionProbe, TcpProbe, DEFAULT_PROBE_TIMEOUT};
pub use session::{CaptureError, SessionOpener, StreamSession};
pub use source::{Acquisition, CaptureState, FrameSource, RetryPolicy, SourceStats};
