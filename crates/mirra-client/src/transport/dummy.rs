//! In-process transport with no network underneath.
//!
//! Used by the lifecycle tests and by the CLI's `--dry-run` mode. Every
//! session it opens is recorded so callers can inspect what was sent and
//! drive channel/video events by hand.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::debug;

use mirra_common::{decode_parameter_push, Error, MakeupParams, Result};
use mirra_media::{FrameSource, Resolution, SolidColorSource};

use super::{
    EventSender, GatheringState, LinkState, LocalMedia, Transport, TransportEvent,
    TransportFactory,
};
use crate::types::SlotLabel;

#[derive(Debug, Clone)]
pub struct DummyBehaviour {
    pub fail_open: bool,
    pub fail_offer: bool,
    /// Gathering completes inside `set_local_description`.
    pub gathering_already_complete: bool,
    pub gathering_delay: Duration,
    /// Open the data channel as soon as the answer is applied.
    pub open_channel_on_answer: bool,
    /// Attach a solid-color remote stream when the answer is applied.
    pub remote_video: Option<(Resolution, [u8; 3])>,
}

impl Default for DummyBehaviour {
    fn default() -> Self {
        Self {
            fail_open: false,
            fail_offer: false,
            gathering_already_complete: false,
            gathering_delay: Duration::from_millis(50),
            open_channel_on_answer: true,
            remote_video: Some((Resolution::new(640, 480), [0xC8, 0x78, 0x8C])),
        }
    }
}

impl DummyBehaviour {
    /// Sessions that negotiate but never open a channel or attach video.
    pub fn silent() -> Self {
        Self {
            open_channel_on_answer: false,
            remote_video: None,
            ..Self::default()
        }
    }
}

#[derive(Clone, Default)]
pub struct DummyTransportFactory {
    inner: Arc<FactoryInner>,
}

#[derive(Default)]
struct FactoryInner {
    behaviour: Mutex<DummyBehaviour>,
    opened: Mutex<Vec<Arc<DummyTransport>>>,
}

impl DummyTransportFactory {
    pub fn new(behaviour: DummyBehaviour) -> Self {
        let factory = Self::default();
        factory.set_behaviour(behaviour);
        factory
    }

    /// Applies to sessions opened from now on.
    pub fn set_behaviour(&self, behaviour: DummyBehaviour) {
        if let Ok(mut current) = self.inner.behaviour.lock() {
            *current = behaviour;
        }
    }

    fn behaviour(&self) -> DummyBehaviour {
        self.inner
            .behaviour
            .lock()
            .map(|b| b.clone())
            .unwrap_or_default()
    }

    /// Every session opened so far, oldest first.
    pub fn transports(&self) -> Vec<Arc<DummyTransport>> {
        self.inner
            .opened
            .lock()
            .map(|opened| opened.clone())
            .unwrap_or_default()
    }

    pub fn latest(&self, label: SlotLabel) -> Option<Arc<DummyTransport>> {
        self.transports()
            .into_iter()
            .rev()
            .find(|t| t.label() == label)
    }

    pub fn opened_count(&self) -> usize {
        self.transports().len()
    }
}

#[async_trait]
impl TransportFactory for DummyTransportFactory {
    async fn open(
        &self,
        label: SlotLabel,
        _media: &LocalMedia,
        events: EventSender,
    ) -> Result<Arc<dyn Transport>> {
        let behaviour = self.behaviour();
        if behaviour.fail_open {
            return Err(Error::transport(format!(
                "dummy session for slot {label} refused to open"
            )));
        }
        let Ok(mut opened) = self.inner.opened.lock() else {
            return Err(Error::internal("dummy factory registry poisoned"));
        };
        let transport = Arc::new(DummyTransport::new(label, opened.len(), behaviour, events));
        opened.push(Arc::clone(&transport));
        Ok(transport)
    }
}

pub struct DummyTransport {
    label: SlotLabel,
    serial: usize,
    behaviour: DummyBehaviour,
    events: EventSender,
    gathering: Arc<watch::Sender<GatheringState>>,
    gathering_waits: AtomicUsize,
    local: Mutex<Option<String>>,
    remote: Mutex<Option<String>>,
    channel_open: AtomicBool,
    closed: AtomicBool,
    sent: Mutex<Vec<String>>,
}

impl DummyTransport {
    fn new(label: SlotLabel, serial: usize, behaviour: DummyBehaviour, events: EventSender) -> Self {
        let (gathering, _) = watch::channel(GatheringState::New);
        Self {
            label,
            serial,
            behaviour,
            events,
            gathering: Arc::new(gathering),
            gathering_waits: AtomicUsize::new(0),
            local: Mutex::new(None),
            remote: Mutex::new(None),
            channel_open: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn label(&self) -> SlotLabel {
        self.label
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// How many times a caller had to wait on gathering completion.
    pub fn gathering_waits(&self) -> usize {
        self.gathering_waits.load(Ordering::Acquire)
    }

    pub fn remote_description(&self) -> Option<String> {
        self.remote.lock().ok().and_then(|r| r.clone())
    }

    /// Raw texts written to the data channel.
    pub fn sent_texts(&self) -> Vec<String> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Data channel pushes decoded back into parameters.
    pub fn sent(&self) -> Vec<MakeupParams> {
        self.sent_texts()
            .iter()
            .filter_map(|text| decode_parameter_push(text).ok())
            .collect()
    }

    pub fn open_channel(&self) {
        if self.is_closed() || self.channel_open.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(slot = %self.label, serial = self.serial, "dummy channel open");
        let _ = self.events.send(TransportEvent::ChannelOpen);
    }

    pub fn close_channel(&self) {
        if self.channel_open.swap(false, Ordering::AcqRel) {
            let _ = self.events.send(TransportEvent::ChannelClosed);
        }
    }

    pub fn attach_remote_video(&self, source: Arc<dyn FrameSource>) {
        if !self.is_closed() {
            let _ = self.events.send(TransportEvent::RemoteVideo(source));
        }
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::closed(format!("dummy session for slot {} is closed", self.label)));
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for DummyTransport {
    async fn create_offer(&self) -> Result<String> {
        self.ensure_live()?;
        if self.behaviour.fail_offer {
            return Err(Error::negotiation("dummy offer rejected"));
        }
        Ok(format!(
            "v=0\r\no=- {} 2 IN IP4 127.0.0.1\r\ns=mirra-{}\r\nt=0 0\r\nm=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\n",
            self.serial, self.label
        ))
    }

    async fn set_local_description(&self, sdp: String) -> Result<()> {
        self.ensure_live()?;
        if let Ok(mut local) = self.local.lock() {
            *local = Some(sdp);
        }
        if self.behaviour.gathering_already_complete {
            self.gathering.send_replace(GatheringState::Complete);
            return Ok(());
        }
        self.gathering.send_replace(GatheringState::Gathering);
        let gathering = Arc::clone(&self.gathering);
        let delay = self.behaviour.gathering_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            gathering.send_replace(GatheringState::Complete);
        });
        Ok(())
    }

    fn gathering_state(&self) -> GatheringState {
        *self.gathering.borrow()
    }

    async fn gathering_complete(&self) -> Result<()> {
        self.gathering_waits.fetch_add(1, Ordering::AcqRel);
        let mut rx = self.gathering.subscribe();
        rx.wait_for(|state| *state == GatheringState::Complete)
            .await
            .map(|_| ())
            .map_err(|_| Error::closed("gathering state dropped"))
    }

    async fn local_description(&self) -> Result<String> {
        let local = self
            .local
            .lock()
            .ok()
            .and_then(|l| l.clone())
            .ok_or_else(|| Error::negotiation("local description is not set"))?;
        if self.gathering_state() == GatheringState::Complete {
            Ok(format!(
                "{local}a=candidate:1 1 udp 2130706431 127.0.0.1 {} typ host\r\n",
                50_000 + self.serial
            ))
        } else {
            Ok(local)
        }
    }

    async fn set_remote_description(&self, answer_sdp: String) -> Result<()> {
        self.ensure_live()?;
        if let Ok(mut remote) = self.remote.lock() {
            *remote = Some(answer_sdp);
        }
        let _ = self.events.send(TransportEvent::StateChanged(LinkState::Connected));
        if self.behaviour.open_channel_on_answer {
            self.open_channel();
        }
        if let Some((resolution, rgb)) = self.behaviour.remote_video {
            self.attach_remote_video(Arc::new(SolidColorSource::new(resolution, rgb)));
        }
        Ok(())
    }

    fn is_channel_open(&self) -> bool {
        !self.is_closed() && self.channel_open.load(Ordering::Acquire)
    }

    async fn send_text(&self, text: String) -> Result<()> {
        if !self.is_channel_open() {
            return Err(Error::closed("data channel is not open"));
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(text);
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.channel_open.store(false, Ordering::Release);
        debug!(slot = %self.label, serial = self.serial, "dummy session closed");
        let _ = self.events.send(TransportEvent::StateChanged(LinkState::Closed));
        Ok(())
    }
}
