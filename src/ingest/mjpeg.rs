//! MJPEG-over-HTTP stream sessions.
//!
//! `StreamOpener` dispatches on the URL scheme:
//! - `http(s)://` with a `multipart/*` response: continuous MJPEG stream,
//!   JPEG frames are cut out of the byte stream by their SOI/EOI markers.
//! - `http(s)://` with any other response: single JPEG snapshot, re-fetched
//!   on every read.
//! - `stub://name[?width=..&height=..&fps=..&frames=..]`: synthetic frames
//!   for tests and demos, no network.
//!
//! Connect and read timeouts bound every network call, so a stalled camera
//! surfaces as a read error instead of a hang.

use std::io::Read;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use url::Url;

use super::session::{CaptureError, SessionOpener, StreamSession};
use crate::frame::Frame;

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens HTTP MJPEG/JPEG or synthetic sessions depending on the URL scheme.
pub struct StreamOpener {
    agent: ureq::Agent,
}

impl StreamOpener {
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(connect_timeout)
            .timeout_read(read_timeout)
            .build();
        Self { agent }
    }
}

impl Default for StreamOpener {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT)
    }
}

impl SessionOpener for StreamOpener {
    fn open(&mut self, url: &str) -> Result<Box<dyn StreamSession>, CaptureError> {
        let parsed = Url::parse(url).map_err(|e| CaptureError::open(url, e))?;
        match parsed.scheme() {
            "stub" => Ok(Box::new(
                SyntheticSession::from_url(&parsed).map_err(|e| CaptureError::open(url, e))?,
            )),
            "http" | "https" => Ok(Box::new(
                HttpSession::connect(&self.agent, url).map_err(|e| CaptureError::open(url, e))?,
            )),
            other => Err(CaptureError::open(
                url,
                format!("unsupported scheme '{}'; expected http(s) or stub", other),
            )),
        }
    }
}

// ----------------------------------------------------------------------------
// HTTP session
// ----------------------------------------------------------------------------

struct HttpSession {
    agent: ureq::Agent,
    url: String,
    stream: HttpStream,
    frame_count: u64,
}

enum HttpStream {
    Mjpeg(MjpegStream),
    SingleJpeg,
}

impl HttpSession {
    fn connect(agent: &ureq::Agent, url: &str) -> Result<Self> {
        let response = agent
            .get(url)
            .call()
            .with_context(|| format!("connect to {}", url))?;
        let content_type = response.header("Content-Type").unwrap_or("").to_lowercase();
        let stream = if content_type.contains("multipart") {
            HttpStream::Mjpeg(MjpegStream::new(response.into_reader()))
        } else {
            HttpStream::SingleJpeg
        };
        log::info!(
            "FrameSource: connected to {} ({})",
            url,
            if content_type.is_empty() {
                "no content type"
            } else {
                content_type.as_str()
            }
        );
        Ok(Self {
            agent: agent.clone(),
            url: url.to_string(),
            stream,
            frame_count: 0,
        })
    }
}

impl StreamSession for HttpSession {
    fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        let jpeg = match &mut self.stream {
            HttpStream::Mjpeg(stream) => stream.read_next_jpeg(),
            HttpStream::SingleJpeg => fetch_single_jpeg(&self.agent, &self.url),
        }
        .map_err(|e| {
            if e.downcast_ref::<EndOfStream>().is_some() {
                CaptureError::EndOfStream
            } else {
                CaptureError::read(e)
            }
        })?;
        let frame = decode_jpeg(&jpeg).map_err(CaptureError::read)?;
        self.frame_count += 1;
        Ok(frame)
    }

    fn describe(&self) -> String {
        let mode = match self.stream {
            HttpStream::Mjpeg(_) => "mjpeg",
            HttpStream::SingleJpeg => "jpeg",
        };
        format!("{} {} ({} frames)", mode, self.url, self.frame_count)
    }
}

#[derive(Debug)]
struct EndOfStream;

impl std::fmt::Display for EndOfStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("mjpeg stream ended")
    }
}

impl std::error::Error for EndOfStream {}

struct MjpegStream {
    reader: Box<dyn Read + Send + Sync>,
    buffer: Vec<u8>,
}

impl MjpegStream {
    fn new(reader: Box<dyn Read + Send + Sync>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    fn read_next_jpeg(&mut self) -> Result<Vec<u8>> {
        let mut chunk = vec![0u8; 8192];
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let frame = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(frame);
            }

            let read = self.reader.read(&mut chunk).context("read mjpeg chunk")?;
            if read == 0 {
                return Err(anyhow::Error::new(EndOfStream));
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                // Keep the tail in case it holds the start of a marker.
                let keep = 2.min(self.buffer.len());
                let drain_len = self.buffer.len() - keep;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

fn fetch_single_jpeg(agent: &ureq::Agent, url: &str) -> Result<Vec<u8>> {
    let response = agent
        .get(url)
        .call()
        .with_context(|| format!("fetch jpeg snapshot from {}", url))?;
    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(MAX_JPEG_BYTES as u64)
        .read_to_end(&mut bytes)
        .context("read jpeg snapshot")?;
    if bytes.is_empty() {
        return Err(anyhow!("empty jpeg snapshot"));
    }
    Ok(bytes)
}

fn decode_jpeg(bytes: &[u8]) -> Result<Frame> {
    let image = image::load_from_memory(bytes).context("decode jpeg")?;
    let rgb = image.into_rgb8();
    let (width, height) = rgb.dimensions();
    Frame::from_rgb8(rgb.into_raw(), width, height)
}

fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let end = buffer[start + 2..]
        .windows(2)
        .position(|w| w == [0xFF, 0xD9])?;
    Some((start, start + 2 + end + 2))
}

// ----------------------------------------------------------------------------
// Synthetic session (stub://) for tests and demos
// ----------------------------------------------------------------------------

struct SyntheticSession {
    name: String,
    width: u32,
    height: u32,
    interval: Duration,
    frame_limit: Option<u64>,
    frame_count: u64,
    last_frame_at: Option<Instant>,
}

impl SyntheticSession {
    fn from_url(url: &Url) -> Result<Self> {
        let mut session = Self {
            name: url.host_str().unwrap_or("synthetic").to_string(),
            width: 640,
            height: 480,
            interval: Duration::from_millis(100),
            frame_limit: None,
            frame_count: 0,
            last_frame_at: None,
        };
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "width" => session.width = value.parse().context("stub width")?,
                "height" => session.height = value.parse().context("stub height")?,
                "fps" => {
                    let fps: u32 = value.parse().context("stub fps")?;
                    session.interval = if fps == 0 {
                        Duration::ZERO
                    } else {
                        Duration::from_millis((1000 / fps).max(1) as u64)
                    };
                }
                "frames" => session.frame_limit = Some(value.parse().context("stub frames")?),
                other => return Err(anyhow!("unknown stub parameter '{}'", other)),
            }
        }
        if session.width == 0 || session.height == 0 {
            return Err(anyhow!("stub frame size must be non-zero"));
        }
        log::info!(
            "FrameSource: connected to stub://{} (synthetic {}x{})",
            session.name,
            session.width,
            session.height
        );
        Ok(session)
    }

    /// Gray background with a bright square drifting left to right.
    fn generate_pixels(&self) -> Vec<u8> {
        let (w, h) = (self.width as usize, self.height as usize);
        let mut pixels = vec![48u8; w * h * 3];
        let side = (w.min(h) / 6).max(1);
        let x0 = (self.frame_count as usize * 4) % w.saturating_sub(side).max(1);
        let y0 = h.saturating_sub(side) / 2;
        for y in y0..(y0 + side).min(h) {
            for x in x0..(x0 + side).min(w) {
                let idx = (y * w + x) * 3;
                pixels[idx..idx + 3].copy_from_slice(&[220, 200, 40]);
            }
        }
        pixels
    }
}

impl StreamSession for SyntheticSession {
    fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        if self
            .frame_limit
            .is_some_and(|limit| self.frame_count >= limit)
        {
            return Err(CaptureError::EndOfStream);
        }
        if let Some(last) = self.last_frame_at {
            let elapsed = last.elapsed();
            if elapsed < self.interval {
                std::thread::sleep(self.interval - elapsed);
            }
        }
        let frame = Frame::from_rgb8(self.generate_pixels(), self.width, self.height)
            .map_err(CaptureError::read)?;
        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        Ok(frame)
    }

    fn describe(&self) -> String {
        format!("stub://{} ({} frames)", self.name, self.frame_count)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn tiny_jpeg(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbImage::from_pixel(width, height, image::Rgb([10, 20, 30]));
        let mut out = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut out), image::ImageFormat::Jpeg)
            .unwrap();
        out
    }

    #[test]
    fn finds_jpeg_bounds_inside_multipart_noise() {
        let mut buffer = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
        let start = buffer.len();
        buffer.extend_from_slice(&[0xFF, 0xD8, 1, 2, 3, 0xFF, 0xD9]);
        buffer.extend_from_slice(b"\r\n--frame");

        assert_eq!(find_jpeg_bounds(&buffer), Some((start, start + 7)));
        assert_eq!(find_jpeg_bounds(b"--frame only"), None);
        assert_eq!(find_jpeg_bounds(&[0xFF, 0xD8, 0x00]), None);
    }

    #[test]
    fn mjpeg_stream_yields_frames_then_ends() {
        let jpeg = tiny_jpeg(8, 6);
        let mut body = Vec::new();
        for _ in 0..2 {
            body.extend_from_slice(b"--boundary\r\nContent-Type: image/jpeg\r\n\r\n");
            body.extend_from_slice(&jpeg);
            body.extend_from_slice(b"\r\n");
        }
        let mut stream = MjpegStream::new(Box::new(Cursor::new(body)));

        for _ in 0..2 {
            let bytes = stream.read_next_jpeg().unwrap();
            let frame = decode_jpeg(&bytes).unwrap();
            assert_eq!((frame.width, frame.height), (8, 6));
        }
        let err = stream.read_next_jpeg().unwrap_err();
        assert!(err.downcast_ref::<EndOfStream>().is_some());
    }

    #[test]
    fn corrupt_jpeg_is_a_read_error() {
        assert!(decode_jpeg(&[0xFF, 0xD8, 0x00, 0xFF, 0xD9]).is_err());
    }

    #[test]
    fn stub_session_honours_size_and_frame_limit() {
        let mut opener = StreamOpener::default();
        let mut session = opener
            .open("stub://porch?width=32&height=24&fps=0&frames=3")
            .unwrap();

        for _ in 0..3 {
            let frame = session.read_frame().unwrap();
            assert_eq!((frame.width, frame.height), (32, 24));
        }
        assert!(matches!(
            session.read_frame(),
            Err(CaptureError::EndOfStream)
        ));
    }

    #[test]
    fn unsupported_scheme_is_an_open_error() {
        let mut opener = StreamOpener::default();
        assert!(matches!(
            opener.open("rtsp://10.0.0.2/live"),
            Err(CaptureError::Open { .. })
        ));
    }
}
