#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use mirra_common::{Error, Result};
use serde::{Deserialize, Serialize};

pub mod dummy;
pub mod fallback;

pub use dummy::SolidColorSource;
pub use fallback::{FallbackFrame, FallbackFrameCapture};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PixelFormat {
    Rgba8,
    Rgb8,
}

impl PixelFormat {
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgba8 => 4,
            PixelFormat::Rgb8 => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixels(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// A decoded, tightly packed video frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub resolution: Resolution,
    pub format: PixelFormat,
    pub timestamp_us: u64,
    pub data: Bytes,
}

impl VideoFrame {
    pub fn new(
        resolution: Resolution,
        format: PixelFormat,
        timestamp_us: u64,
        data: impl Into<Bytes>,
    ) -> Result<Self> {
        let data = data.into();
        let expected = resolution.pixels() * format.bytes_per_pixel();
        if data.len() != expected {
            return Err(Error::internal(format!(
                "frame buffer is {} bytes, expected {} for {}x{} {:?}",
                data.len(),
                expected,
                resolution.width,
                resolution.height,
                format
            )));
        }
        Ok(Self {
            resolution,
            format,
            timestamp_us,
            data,
        })
    }
}

/// Anything that can hand out its most recent decoded frame.
///
/// `latest_frame` returns `None` until the source is producing decoded frames.
pub trait FrameSource: Send + Sync {
    fn resolution(&self) -> Option<Resolution>;
    fn latest_frame(&self) -> Option<VideoFrame>;
}

/// Turns depacketized payloads of an incoming track into frames.
///
/// `end_of_frame` is the RTP marker bit; decoders buffer until it is set.
pub trait Decoder: Send {
    fn decode(
        &mut self,
        payload: &[u8],
        timestamp: u32,
        end_of_frame: bool,
    ) -> Result<Option<VideoFrame>>;
}

/// Latest-value frame cell backing an incoming stream. A decoder task
/// publishes into it; readers take a clone of whatever is newest.
#[derive(Debug, Default)]
pub struct LatestFrame {
    frame: Mutex<Option<VideoFrame>>,
}

impl LatestFrame {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn publish(&self, frame: VideoFrame) {
        if let Ok(mut slot) = self.frame.lock() {
            *slot = Some(frame);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut slot) = self.frame.lock() {
            *slot = None;
        }
    }
}

impl FrameSource for LatestFrame {
    fn resolution(&self) -> Option<Resolution> {
        self.frame
            .lock()
            .ok()
            .and_then(|f| f.as_ref().map(|f| f.resolution))
    }

    fn latest_frame(&self) -> Option<VideoFrame> {
        self.frame.lock().ok().and_then(|f| f.clone())
    }
}
