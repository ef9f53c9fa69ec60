//! Still-frame capture used to paper over a slot swap.

use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};
use tracing::{debug, warn};

use crate::{FrameSource, PixelFormat, Resolution, VideoFrame};

/// An immutable PNG snapshot of a retiring slot's last rendered output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackFrame {
    pub resolution: Resolution,
    pub png: Bytes,
}

impl FallbackFrame {
    /// `data:image/png;base64,...` form, for surfaces that take a URL.
    pub fn to_data_url(&self) -> String {
        format!(
            "data:image/png;base64,{}",
            general_purpose::STANDARD.encode(&self.png)
        )
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackFrameCapture;

impl FallbackFrameCapture {
    /// Snapshots the current frame of `source`.
    ///
    /// Returns `None` when the source has no decoded frame yet.
    pub fn capture(source: &dyn FrameSource) -> Option<FallbackFrame> {
        let Some(frame) = source.latest_frame() else {
            debug!("fallback capture skipped: source has no ready frame");
            return None;
        };
        Self::encode(&frame)
    }

    pub fn encode(frame: &VideoFrame) -> Option<FallbackFrame> {
        let color = match frame.format {
            PixelFormat::Rgba8 => ExtendedColorType::Rgba8,
            PixelFormat::Rgb8 => ExtendedColorType::Rgb8,
        };
        let mut png = Vec::new();
        let res = frame.resolution;
        if let Err(e) =
            PngEncoder::new(&mut png).write_image(&frame.data, res.width, res.height, color)
        {
            warn!(
                "failed to encode {}x{} fallback frame: {}",
                res.width, res.height, e
            );
            return None;
        }
        Some(FallbackFrame {
            resolution: res,
            png: Bytes::from(png),
        })
    }
}
