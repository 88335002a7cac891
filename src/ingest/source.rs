//! Resilient frame source.
//!
//! `FrameSource` owns the stream session and runs the acquisition loop on its
//! own thread. Frames are published into a `FrameBuffer`; callers only ever see
//! `read()`, `is_opened()` and `release()`, so replacing a dead session is an
//! internal transition.
//!
//! Reconnect state machine:
//!
//! ```text
//!   Connecting --probe fails--> (sleep probe_backoff) Connecting
//!   Connecting --open ok------> Streaming
//!   Connecting --open fails---> (sleep open_backoff) Connecting | Exhausted
//!   Streaming  --read ok------> Streaming (frame published)
//!   Streaming  --read fails---> Reconnecting
//!   Reconnecting -------------> (sleep reconnect_backoff) Connecting
//!   Exhausted: terminal
//! ```

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};

use super::probe::{ConnectionProbe, DEFAULT_PROBE_TIMEOUT};
use super::session::{CaptureError, SessionOpener, StreamSession};
use crate::frame::{Frame, FrameBuffer};

/// Lifecycle of the stream connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureState {
    Connecting,
    Streaming,
    Reconnecting,
    Exhausted,
}

impl CaptureState {
    fn as_u8(self) -> u8 {
        match self {
            CaptureState::Connecting => 0,
            CaptureState::Streaming => 1,
            CaptureState::Reconnecting => 2,
            CaptureState::Exhausted => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => CaptureState::Connecting,
            1 => CaptureState::Streaming,
            2 => CaptureState::Reconnecting,
            _ => CaptureState::Exhausted,
        }
    }
}

/// Backoffs and limits for the reconnect state machine.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Wait after a failed reachability probe.
    pub probe_backoff: Duration,
    /// Wait after a failed session open.
    pub open_backoff: Duration,
    /// Wait after a live stream breaks, before probing again.
    pub reconnect_backoff: Duration,
    /// Consecutive failures tolerated before giving up. Exceeding it is terminal.
    pub max_open_failures: u32,
    pub probe_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            probe_backoff: Duration::from_secs(30),
            open_backoff: Duration::from_secs(1),
            reconnect_backoff: Duration::from_secs(30),
            max_open_failures: 3,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

impl RetryPolicy {
    /// Zero backoffs, same failure threshold. For tests and simulations.
    pub fn immediate() -> Self {
        Self {
            probe_backoff: Duration::ZERO,
            open_backoff: Duration::ZERO,
            reconnect_backoff: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// Statistics for a frame source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceStats {
    pub url: String,
    pub state: CaptureState,
    pub frames_published: u64,
    pub reconnects: u64,
    pub retry_failures: u32,
}

/// Status shared between the acquisition thread and the owner of `FrameSource`.
/// Carries no frame data.
#[derive(Default)]
struct SourceStatus {
    state: AtomicU8,
    frames_published: AtomicU64,
    reconnects: AtomicU64,
    retry_failures: AtomicU32,
    release_requested: AtomicBool,
}

impl SourceStatus {
    fn state(&self) -> CaptureState {
        CaptureState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Move to `state` unless already `Exhausted`, which is terminal.
    fn set_state(&self, state: CaptureState) {
        let exhausted = CaptureState::Exhausted.as_u8();
        let _ = self
            .state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current != exhausted).then_some(state.as_u8())
            });
    }

    fn release_requested(&self) -> bool {
        self.release_requested.load(Ordering::SeqCst)
    }
}

// ----------------------------------------------------------------------------
// Acquisition: single-step driver of the state machine
// ----------------------------------------------------------------------------

/// The reconnect state machine, advanced one transition per `step()`.
///
/// `FrameSource` runs this on a background thread; tests drive it directly.
pub struct Acquisition {
    url: String,
    probe: Box<dyn ConnectionProbe>,
    opener: Box<dyn SessionOpener>,
    policy: RetryPolicy,
    buffer: Arc<FrameBuffer>,
    status: Arc<SourceStatus>,
    session: Option<Box<dyn StreamSession>>,
    retry_failures: u32,
}

impl Acquisition {
    pub fn new(
        url: impl Into<String>,
        probe: Box<dyn ConnectionProbe>,
        opener: Box<dyn SessionOpener>,
        policy: RetryPolicy,
        buffer: Arc<FrameBuffer>,
    ) -> Self {
        Self::with_status(
            url.into(),
            probe,
            opener,
            policy,
            buffer,
            Arc::new(SourceStatus::default()),
        )
    }

    fn with_status(
        url: String,
        probe: Box<dyn ConnectionProbe>,
        opener: Box<dyn SessionOpener>,
        policy: RetryPolicy,
        buffer: Arc<FrameBuffer>,
        status: Arc<SourceStatus>,
    ) -> Self {
        Self {
            url,
            probe,
            opener,
            policy,
            buffer,
            status,
            session: None,
            retry_failures: 0,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.status.state()
    }

    pub fn retry_failures(&self) -> u32 {
        self.retry_failures
    }

    pub fn frames_published(&self) -> u64 {
        self.status.frames_published.load(Ordering::SeqCst)
    }

    /// Perform one transition and return the resulting state.
    pub fn step(&mut self) -> CaptureState {
        if self.status.release_requested() {
            self.shut_down();
            return CaptureState::Exhausted;
        }
        let next = match self.state() {
            CaptureState::Connecting => self.connect(),
            CaptureState::Streaming => self.stream_one(),
            CaptureState::Reconnecting => {
                log::info!(
                    "FrameSource: reconnecting to {} in {}s",
                    self.url,
                    self.policy.reconnect_backoff.as_secs()
                );
                thread::sleep(self.policy.reconnect_backoff);
                self.status.reconnects.fetch_add(1, Ordering::SeqCst);
                CaptureState::Connecting
            }
            CaptureState::Exhausted => CaptureState::Exhausted,
        };
        if next == CaptureState::Exhausted {
            self.shut_down();
        }
        self.status.set_state(next);
        self.state()
    }

    /// Run until the source is exhausted or released.
    pub fn run(mut self) {
        while self.step() != CaptureState::Exhausted {}
        if self.status.release_requested() {
            log::info!("FrameSource: released {}", self.url);
        } else {
            log::error!(
                "FrameSource: giving up on {} after {} consecutive failures",
                self.url,
                self.retry_failures
            );
        }
    }

    fn shut_down(&mut self) {
        self.session = None;
        self.buffer.close();
        self.status.set_state(CaptureState::Exhausted);
    }

    fn connect(&mut self) -> CaptureState {
        if !self.probe.probe(&self.url) {
            self.record_failure();
            log::warn!(
                "FrameSource: {} (retry in {}s)",
                CaptureError::Unreachable {
                    url: self.url.clone()
                },
                self.policy.probe_backoff.as_secs()
            );
            thread::sleep(self.policy.probe_backoff);
            return CaptureState::Connecting;
        }

        match self.opener.open(&self.url) {
            Ok(session) => {
                log::info!("FrameSource: streaming {}", session.describe());
                self.session = Some(session);
                self.retry_failures = 0;
                self.status.retry_failures.store(0, Ordering::SeqCst);
                CaptureState::Streaming
            }
            Err(e) => {
                self.record_failure();
                log::warn!(
                    "FrameSource: {} (failure {} of {})",
                    e,
                    self.retry_failures,
                    self.policy.max_open_failures
                );
                thread::sleep(self.policy.open_backoff);
                if self.retry_failures > self.policy.max_open_failures {
                    CaptureState::Exhausted
                } else {
                    CaptureState::Connecting
                }
            }
        }
    }

    fn stream_one(&mut self) -> CaptureState {
        let Some(session) = self.session.as_mut() else {
            return CaptureState::Reconnecting;
        };
        match session.read_frame() {
            Ok(frame) => {
                let sequence = self.status.frames_published.fetch_add(1, Ordering::SeqCst) + 1;
                self.buffer.put(frame.with_sequence(sequence));
                CaptureState::Streaming
            }
            Err(e) => {
                log::warn!("FrameSource: invalid image from {}: {}", self.url, e);
                self.session = None;
                CaptureState::Reconnecting
            }
        }
    }

    fn record_failure(&mut self) {
        self.retry_failures += 1;
        self.status
            .retry_failures
            .store(self.retry_failures, Ordering::SeqCst);
    }
}

// ----------------------------------------------------------------------------
// FrameSource: the public, thread-owning handle
// ----------------------------------------------------------------------------

/// Live stream source with background acquisition and automatic reconnects.
pub struct FrameSource {
    url: String,
    buffer: Arc<FrameBuffer>,
    status: Arc<SourceStatus>,
    handle: Option<JoinHandle<()>>,
}

impl FrameSource {
    /// Start the acquisition thread for `url`.
    pub fn spawn(
        url: impl Into<String>,
        probe: Box<dyn ConnectionProbe>,
        opener: Box<dyn SessionOpener>,
        policy: RetryPolicy,
    ) -> Result<Self> {
        let url = url.into();
        let buffer = Arc::new(FrameBuffer::new());
        let status = Arc::new(SourceStatus::default());
        let acquisition = Acquisition::with_status(
            url.clone(),
            probe,
            opener,
            policy,
            Arc::clone(&buffer),
            Arc::clone(&status),
        );
        let handle = thread::Builder::new()
            .name("frame-source".to_string())
            .spawn(move || acquisition.run())
            .context("spawn frame source thread")?;
        Ok(Self {
            url,
            buffer,
            status,
            handle: Some(handle),
        })
    }

    /// True only while a session is open and frames are being published.
    pub fn is_opened(&self) -> bool {
        self.status.state() == CaptureState::Streaming
    }

    /// True until the source is exhausted or released.
    pub fn is_live(&self) -> bool {
        self.status.state() != CaptureState::Exhausted
    }

    pub fn state(&self) -> CaptureState {
        self.status.state()
    }

    /// Block for the freshest frame.
    ///
    /// Returns `None` when the source has shut down or the buffer failed.
    pub fn read(&self) -> Option<Frame> {
        match self.buffer.get() {
            Ok(frame) => Some(frame),
            Err(CaptureError::Closed) => {
                log::debug!("FrameSource: {} closed, no more frames", self.url);
                None
            }
            Err(e) => {
                log::error!("FrameSource: read from {} failed: {}", self.url, e);
                None
            }
        }
    }

    /// Tear down the session and stop the acquisition thread.
    ///
    /// The thread notices at its next transition; a blocking network read is
    /// bounded by the session's read timeout.
    pub fn release(&mut self) {
        self.status.release_requested.store(true, Ordering::SeqCst);
        self.status.set_state(CaptureState::Exhausted);
        self.buffer.close();
        if let Some(handle) = self.handle.take() {
            if handle.is_finished() {
                let _ = handle.join();
            }
        }
    }

    pub fn stats(&self) -> SourceStats {
        SourceStats {
            url: self.url.clone(),
            state: self.status.state(),
            frames_published: self.status.frames_published.load(Ordering::SeqCst),
            reconnects: self.status.reconnects.load(Ordering::SeqCst),
            retry_failures: self.status.retry_failures.load(Ordering::SeqCst),
        }
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.status.release_requested.store(true, Ordering::SeqCst);
        self.buffer.close();
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedProbe(Mutex<VecDeque<bool>>);

    impl ConnectionProbe for ScriptedProbe {
        fn probe(&self, _url: &str) -> bool {
            self.0.lock().unwrap().pop_front().unwrap_or(true)
        }
    }

    struct FailingOpener {
        attempts: Arc<AtomicU32>,
    }

    impl SessionOpener for FailingOpener {
        fn open(&mut self, url: &str) -> Result<Box<dyn StreamSession>, CaptureError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(CaptureError::open(url, "connection refused"))
        }
    }

    fn always_reachable() -> Box<dyn ConnectionProbe> {
        Box::new(ScriptedProbe(Mutex::new(VecDeque::new())))
    }

    #[test]
    fn repeated_open_failures_exhaust_the_source() {
        let attempts = Arc::new(AtomicU32::new(0));
        let buffer = Arc::new(FrameBuffer::new());
        let mut acquisition = Acquisition::new(
            "http://camera.local/stream",
            always_reachable(),
            Box::new(FailingOpener {
                attempts: Arc::clone(&attempts),
            }),
            RetryPolicy::immediate(),
            Arc::clone(&buffer),
        );

        for _ in 0..3 {
            assert_eq!(acquisition.step(), CaptureState::Connecting);
        }
        assert_eq!(acquisition.step(), CaptureState::Exhausted);
        assert_eq!(attempts.load(Ordering::SeqCst), 4);

        // Terminal: no further attempts.
        assert_eq!(acquisition.step(), CaptureState::Exhausted);
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert!(buffer.is_closed());
    }

    #[test]
    fn probe_failures_do_not_exhaust_the_source() {
        let attempts = Arc::new(AtomicU32::new(0));
        let probe = ScriptedProbe(Mutex::new(VecDeque::from(vec![false; 10])));
        let mut acquisition = Acquisition::new(
            "http://camera.local/stream",
            Box::new(probe),
            Box::new(FailingOpener {
                attempts: Arc::clone(&attempts),
            }),
            RetryPolicy::immediate(),
            Arc::new(FrameBuffer::new()),
        );

        for _ in 0..10 {
            assert_eq!(acquisition.step(), CaptureState::Connecting);
        }
        assert_eq!(acquisition.retry_failures(), 10);
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn spawned_source_reports_exhausted_and_stays_closed() -> Result<()> {
        let attempts = Arc::new(AtomicU32::new(0));
        let source = FrameSource::spawn(
            "http://camera.local/stream",
            always_reachable(),
            Box::new(FailingOpener {
                attempts: Arc::clone(&attempts),
            }),
            RetryPolicy::immediate(),
        )?;

        assert!(source.read().is_none());
        assert_eq!(source.state(), CaptureState::Exhausted);
        assert!(!source.is_opened());
        assert!(!source.is_live());
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        Ok(())
    }

    #[test]
    fn released_source_stops_publishing() -> Result<()> {
        let mut source = FrameSource::spawn(
            "stub://porch?width=8&height=8&fps=50",
            always_reachable(),
            Box::new(crate::ingest::StreamOpener::default()),
            RetryPolicy::immediate(),
        )?;

        let frame = source.read().expect("first frame");
        assert_eq!((frame.width, frame.height), (8, 8));

        source.release();
        assert!(!source.is_opened());
        assert!(!source.is_live());
        // At most the frame already in the slot, then closed.
        let _ = source.read();
        assert!(source.read().is_none());
        Ok(())
    }
}
