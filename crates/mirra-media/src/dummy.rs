use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::{FrameSource, PixelFormat, Resolution, VideoFrame};

/// Test-pattern source: a flat RGBA frame of fixed size.
pub struct SolidColorSource {
    resolution: Resolution,
    rgb: [u8; 3],
    ready: AtomicBool,
    seq: AtomicU64,
}

impl SolidColorSource {
    pub fn new(resolution: Resolution, rgb: [u8; 3]) -> Self {
        Self {
            resolution,
            rgb,
            ready: AtomicBool::new(true),
            seq: AtomicU64::new(0),
        }
    }

    /// A source that is attached but not yet producing decoded frames.
    pub fn idle(resolution: Resolution) -> Self {
        let source = Self::new(resolution, [0, 0, 0]);
        source.set_ready(false);
        source
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }
}

impl FrameSource for SolidColorSource {
    fn resolution(&self) -> Option<Resolution> {
        Some(self.resolution)
    }

    fn latest_frame(&self) -> Option<VideoFrame> {
        if !self.ready.load(Ordering::Acquire) {
            return None;
        }
        let [r, g, b] = self.rgb;
        let data: Vec<u8> = std::iter::repeat([r, g, b, 0xFF])
            .take(self.resolution.pixels())
            .flatten()
            .collect();
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        // 30fps pacing for timestamps only
        VideoFrame::new(self.resolution, PixelFormat::Rgba8, seq * 33_333, data).ok()
    }
}
