//! Local media acquisition.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};
use webrtc::api::media_engine::{MIME_TYPE_VP8, MIME_TYPE_VP9};
use webrtc::media::io::ivf_reader::IVFReader;
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use mirra_common::{Error, Result};
use mirra_media::FrameSource;

use crate::transport::{LocalMedia, MediaFeed};

/// Produces the camera's tracks once per session. A failure here means the
/// session cannot be turned on.
#[async_trait]
pub trait CameraSource: Send + Sync {
    async fn acquire(&self) -> Result<LocalMedia>;
}

/// Replays a VP8/VP9 IVF recording in a loop as the outgoing video track.
pub struct IvfFileCamera {
    path: PathBuf,
}

struct IvfClip {
    mime_type: &'static str,
    frame_duration: Duration,
    frames: Vec<Bytes>,
}

impl IvfFileCamera {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(path: &Path) -> Result<IvfClip> {
        let file = File::open(path).map_err(|e| {
            Error::media_acquisition(format!("cannot open {}: {}", path.display(), e))
        })?;
        let (mut reader, header) = IVFReader::new(BufReader::new(file)).map_err(|e| {
            Error::media_acquisition(format!("{} is not an IVF file: {}", path.display(), e))
        })?;

        let mime_type = match &header.four_cc {
            b"VP80" => MIME_TYPE_VP8,
            b"VP90" => MIME_TYPE_VP9,
            other => {
                return Err(Error::media_acquisition(format!(
                    "unsupported IVF codec {:?}",
                    String::from_utf8_lossy(other)
                )))
            }
        };

        let millis = if header.timebase_denominator == 0 {
            33
        } else {
            (1000 * header.timebase_numerator as u64) / header.timebase_denominator as u64
        };
        let frame_duration = Duration::from_millis(millis.max(1));

        let mut frames = Vec::new();
        while let Ok((frame, _)) = reader.parse_next_frame() {
            frames.push(frame.freeze());
        }
        if frames.is_empty() {
            return Err(Error::media_acquisition(format!(
                "{} contains no frames",
                path.display()
            )));
        }
        Ok(IvfClip {
            mime_type,
            frame_duration,
            frames,
        })
    }
}

#[async_trait]
impl CameraSource for IvfFileCamera {
    async fn acquire(&self) -> Result<LocalMedia> {
        let path = self.path.clone();
        let clip = tokio::task::spawn_blocking(move || Self::load(&path))
            .await
            .map_err(Error::internal)??;

        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: clip.mime_type.to_string(),
                ..Default::default()
            },
            "video".to_string(),
            "mirra".to_string(),
        ));
        info!(
            path = %self.path.display(),
            frames = clip.frames.len(),
            frame_ms = clip.frame_duration.as_millis() as u64,
            "camera file loaded"
        );

        let feed = MediaFeed::new(tokio::spawn(pace_frames(Arc::clone(&track), clip)));
        let track: Arc<dyn TrackLocal + Send + Sync> = track;
        Ok(LocalMedia {
            tracks: vec![track],
            preview: None,
            feeds: vec![Arc::new(feed)],
        })
    }
}

async fn pace_frames(track: Arc<TrackLocalStaticSample>, clip: IvfClip) {
    let mut ticker = interval(clip.frame_duration);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    for frame in clip.frames.iter().cycle() {
        ticker.tick().await;
        let sample = Sample {
            data: frame.clone(),
            duration: clip.frame_duration,
            ..Default::default()
        };
        if let Err(e) = track.write_sample(&sample).await {
            debug!("dropping camera frame: {}", e);
        }
    }
}

/// Camera with no tracks, optionally exposing a preview for still capture.
#[derive(Default)]
pub struct DummyCamera {
    preview: Option<Arc<dyn FrameSource>>,
    fail: bool,
}

impl DummyCamera {
    pub fn new(preview: Option<Arc<dyn FrameSource>>) -> Self {
        Self {
            preview,
            fail: false,
        }
    }

    /// A camera that is never available.
    pub fn unavailable() -> Self {
        Self {
            preview: None,
            fail: true,
        }
    }
}

#[async_trait]
impl CameraSource for DummyCamera {
    async fn acquire(&self) -> Result<LocalMedia> {
        if self.fail {
            return Err(Error::media_acquisition("no camera device available"));
        }
        Ok(LocalMedia {
            preview: self.preview.clone(),
            ..LocalMedia::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal IVF container: 32-byte file header, then a 12-byte header
    /// before each frame.
    fn ivf_clip(four_cc: &[u8; 4], rate: u32, scale: u32, frames: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"DKIF");
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&32u16.to_le_bytes());
        out.extend_from_slice(four_cc);
        out.extend_from_slice(&320u16.to_le_bytes());
        out.extend_from_slice(&240u16.to_le_bytes());
        out.extend_from_slice(&rate.to_le_bytes());
        out.extend_from_slice(&scale.to_le_bytes());
        out.extend_from_slice(&(frames.len() as u32).to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        for (i, frame) in frames.iter().enumerate() {
            out.extend_from_slice(&(frame.len() as u32).to_le_bytes());
            out.extend_from_slice(&(i as u64).to_le_bytes());
            out.extend_from_slice(frame);
        }
        out
    }

    fn temp_clip(name: &str, bytes: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(format!("mirra-{}-{}.ivf", name, std::process::id()));
        std::fs::write(&path, bytes).expect("write temp clip");
        path
    }

    #[test]
    fn test_load_vp8_clip() {
        let frames: [&[u8]; 3] = [&[0x10, 0x02, 0x00], &[0x31, 0x01], &[0x31, 0x02, 0x03, 0x04]];
        let path = temp_clip("vp8", &ivf_clip(b"VP80", 25, 1, &frames));
        let clip = IvfFileCamera::load(&path);
        let _ = std::fs::remove_file(&path);

        let clip = clip.expect("valid clip");
        assert_eq!(clip.mime_type, MIME_TYPE_VP8);
        assert_eq!(clip.frame_duration, Duration::from_millis(40));
        assert_eq!(clip.frames.len(), 3);
        assert_eq!(&clip.frames[2][..], frames[2]);
    }

    #[test]
    fn test_load_rejects_unknown_codec_and_empty_clip() {
        let path = temp_clip("av1", &ivf_clip(b"AV01", 30, 1, &[&[0x00]]));
        let result = IvfFileCamera::load(&path);
        let _ = std::fs::remove_file(&path);
        assert!(matches!(result, Err(Error::MediaAcquisition(_))));

        let path = temp_clip("empty", &ivf_clip(b"VP90", 30, 1, &[]));
        let result = IvfFileCamera::load(&path);
        let _ = std::fs::remove_file(&path);
        assert!(matches!(result, Err(Error::MediaAcquisition(_))));
    }

    #[tokio::test]
    async fn test_acquire_publishes_one_video_track() {
        let path = temp_clip("track", &ivf_clip(b"VP80", 30, 1, &[&[0x10, 0x02, 0x00]]));
        let media = IvfFileCamera::new(&path).acquire().await;
        let _ = std::fs::remove_file(&path);

        let media = media.expect("camera acquired");
        assert_eq!(media.tracks.len(), 1);
        assert_eq!(media.tracks[0].id(), "video");
        assert_eq!(media.feeds.len(), 1);
        assert!(media.preview.is_none());
    }

    #[tokio::test]
    async fn test_missing_file_is_acquisition_failure() {
        let camera = IvfFileCamera::new("/nonexistent/mirra/clip.ivf");
        assert!(matches!(
            camera.acquire().await,
            Err(Error::MediaAcquisition(_))
        ));
    }

    #[tokio::test]
    async fn test_non_ivf_file_is_rejected() {
        let path = std::env::temp_dir().join(format!("mirra-not-ivf-{}.ivf", std::process::id()));
        std::fs::write(&path, b"definitely not an ivf container").expect("write temp file");
        let result = IvfFileCamera::new(&path).acquire().await;
        let _ = std::fs::remove_file(&path);
        assert!(matches!(result, Err(Error::MediaAcquisition(_))));
    }

    #[tokio::test]
    async fn test_dummy_camera_availability() {
        assert!(DummyCamera::default().acquire().await.is_ok());
        assert!(matches!(
            DummyCamera::unavailable().acquire().await,
            Err(Error::MediaAcquisition(_))
        ));
    }
}
