//! Real-time transport seam.
//!
//! A [`Transport`] is one peer session with one outgoing data channel. The
//! lifecycle code never touches the WebRTC stack directly; it drives the
//! session through this trait and reacts to [`TransportEvent`]s.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use webrtc::track::track_local::TrackLocal;

use mirra_common::Result;
use mirra_media::FrameSource;

use crate::types::SlotLabel;

pub mod dummy;
pub mod rtc;

pub use self::dummy::{DummyBehaviour, DummyTransport, DummyTransportFactory};
pub use self::rtc::WebRtcTransportFactory;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatheringState {
    New,
    Gathering,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Asynchronous notifications from a transport to the slot that owns it.
pub enum TransportEvent {
    ChannelOpen,
    ChannelClosed,
    /// The remote processed video track arrived.
    RemoteVideo(Arc<dyn FrameSource>),
    StateChanged(LinkState),
}

impl fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChannelOpen => write!(f, "ChannelOpen"),
            Self::ChannelClosed => write!(f, "ChannelClosed"),
            Self::RemoteVideo(_) => write!(f, "RemoteVideo"),
            Self::StateChanged(state) => write!(f, "StateChanged({state:?})"),
        }
    }
}

pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Creates a local offer describing media and data-channel capabilities.
    async fn create_offer(&self) -> Result<String>;
    async fn set_local_description(&self, sdp: String) -> Result<()>;
    fn gathering_state(&self) -> GatheringState;
    /// Resolves once candidate gathering reaches completion.
    async fn gathering_complete(&self) -> Result<()>;
    /// The current local description, including gathered candidates.
    async fn local_description(&self) -> Result<String>;
    async fn set_remote_description(&self, answer_sdp: String) -> Result<()>;
    fn is_channel_open(&self) -> bool;
    async fn send_text(&self, text: String) -> Result<()>;
    /// Tears down the session and its channel.
    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Allocates a session bound to `media`. Candidate gathering may start
    /// immediately; events are delivered on `events` for the session's life.
    async fn open(
        &self,
        label: SlotLabel,
        media: &LocalMedia,
        events: EventSender,
    ) -> Result<Arc<dyn Transport>>;
}

/// Background task feeding a local track. Stops when the last handle drops.
pub struct MediaFeed {
    task: JoinHandle<()>,
}

impl MediaFeed {
    pub fn new(task: JoinHandle<()>) -> Self {
        Self { task }
    }
}

impl Drop for MediaFeed {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// The camera's tracks, shared by every slot for the session's lifetime.
#[derive(Clone, Default)]
pub struct LocalMedia {
    pub tracks: Vec<Arc<dyn TrackLocal + Send + Sync>>,
    /// Decoded local preview, used for still-image analysis.
    pub preview: Option<Arc<dyn FrameSource>>,
    pub feeds: Vec<Arc<MediaFeed>>,
}

impl fmt::Debug for LocalMedia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalMedia")
            .field("tracks", &self.tracks.len())
            .field("preview", &self.preview.is_some())
            .field("feeds", &self.feeds.len())
            .finish()
    }
}
