//! One occupancy of a slot label: one session, one outgoing data channel,
//! one incoming stream.
//!
//! Slots are never reused. Retiring a slot closes its session and aborts
//! every task it owns; the next occupancy of the label is a fresh
//! [`ConnectionSlot`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use mirra_common::{Error, Result};
use mirra_media::{FallbackFrame, FallbackFrameCapture, FrameSource, VideoFrame};

use crate::signaling::SignalingExchange;
use crate::store::ParameterStore;
use crate::sync;
use crate::transport::{LinkState, LocalMedia, Transport, TransportEvent, TransportFactory};
use crate::types::SlotLabel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    New,
    Negotiating,
    Connected,
    Failed,
    Closed,
}

/// What a slot currently puts on screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayedFrame {
    Live(VideoFrame),
    Fallback(FallbackFrame),
    Blank,
}

pub struct ConnectionSlot {
    label: SlotLabel,
    generation: u64,
    transport: Option<Arc<dyn Transport>>,
    state: Mutex<SignalingState>,
    incoming: Mutex<Option<Arc<dyn FrameSource>>>,
    fallback: Mutex<Option<FallbackFrame>>,
    active: AtomicBool,
    closed: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ConnectionSlot {
    /// Opens a session for `label` bound to `media`.
    ///
    /// Never fails: if the session cannot be created the slot comes back in
    /// [`SignalingState::Failed`] with no transport, and the error is logged.
    pub async fn create(
        label: SlotLabel,
        generation: u64,
        factory: &dyn TransportFactory,
        media: &LocalMedia,
        store: ParameterStore,
        resend_delays: Vec<Duration>,
    ) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let transport = match factory.open(label, media, events_tx).await {
            Ok(transport) => transport,
            Err(e) => {
                warn!(slot = %label, generation, "failed to create session: {}", e);
                return Arc::new(Self::new(label, generation, None, SignalingState::Failed));
            }
        };

        let slot = Arc::new(Self::new(
            label,
            generation,
            Some(transport),
            SignalingState::New,
        ));
        let pump = tokio::spawn(pump_events(
            Arc::downgrade(&slot),
            events_rx,
            store,
            resend_delays,
        ));
        slot.track(pump);
        info!(slot = %label, generation, "session created");
        slot
    }

    fn new(
        label: SlotLabel,
        generation: u64,
        transport: Option<Arc<dyn Transport>>,
        state: SignalingState,
    ) -> Self {
        Self {
            label,
            generation,
            transport,
            state: Mutex::new(state),
            incoming: Mutex::new(None),
            fallback: Mutex::new(None),
            active: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn label(&self) -> SlotLabel {
        self.label
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn state(&self) -> SignalingState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(SignalingState::Failed)
    }

    fn set_state(&self, next: SignalingState) {
        if let Ok(mut state) = self.state.lock() {
            if *state == SignalingState::Closed {
                return;
            }
            if *state != next {
                debug!(slot = %self.label, generation = self.generation, from = ?*state, to = ?next, "signaling state");
            }
            *state = next;
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn is_channel_open(&self) -> bool {
        !self.is_closed()
            && self
                .transport
                .as_ref()
                .is_some_and(|transport| transport.is_channel_open())
    }

    /// Pushes the store's current value. `Ok(false)` when the channel is not
    /// open; nothing is queued.
    pub async fn send_params(&self, store: &ParameterStore) -> Result<bool> {
        match (&self.transport, self.is_closed()) {
            (Some(transport), false) => sync::push_snapshot(transport.as_ref(), store).await,
            _ => Ok(false),
        }
    }

    /// Starts the handshake in a task owned by this slot. A timeout, when
    /// given, marks the slot failed once it elapses.
    pub fn spawn_negotiation(
        self: &Arc<Self>,
        exchange: SignalingExchange,
        store: ParameterStore,
        timeout: Option<Duration>,
    ) {
        let Some(transport) = self.transport.clone() else {
            return;
        };
        self.set_state(SignalingState::Negotiating);

        let slot = Arc::downgrade(self);
        let label = self.label;
        let generation = self.generation;
        let task = tokio::spawn(async move {
            let exchange = exchange.run(label, transport.as_ref(), &store);
            let result = match timeout {
                Some(limit) => tokio::time::timeout(limit, exchange)
                    .await
                    .unwrap_or_else(|_| {
                        Err(Error::timeout(format!("negotiation exceeded {:?}", limit)))
                    }),
                None => exchange.await,
            };
            let Some(slot) = slot.upgrade() else {
                return;
            };
            match result {
                Ok(()) => slot.set_state(SignalingState::Connected),
                Err(e) => {
                    warn!(slot = %label, generation, "negotiation failed: {}", e);
                    slot.set_state(SignalingState::Failed);
                }
            }
        });
        self.track(task);
    }

    pub fn incoming(&self) -> Option<Arc<dyn FrameSource>> {
        self.incoming.lock().ok().and_then(|s| s.clone())
    }

    pub fn has_incoming(&self) -> bool {
        self.incoming().is_some()
    }

    fn attach_incoming(&self, source: Arc<dyn FrameSource>) {
        if let Ok(mut incoming) = self.incoming.lock() {
            *incoming = Some(source);
        }
        let had_fallback = self.fallback.lock().ok().and_then(|mut f| f.take()).is_some();
        info!(slot = %self.label, generation = self.generation, had_fallback, "remote video attached");
    }

    pub fn fallback(&self) -> Option<FallbackFrame> {
        self.fallback.lock().ok().and_then(|f| f.clone())
    }

    pub fn set_fallback(&self, frame: Option<FallbackFrame>) {
        if let Ok(mut fallback) = self.fallback.lock() {
            *fallback = frame;
        }
    }

    /// Snapshot of the incoming stream, if it has a ready frame.
    pub fn capture_fallback(&self) -> Option<FallbackFrame> {
        let source = self.incoming()?;
        FallbackFrameCapture::capture(source.as_ref())
    }

    pub fn display(&self) -> DisplayedFrame {
        if let Some(frame) = self.incoming().and_then(|s| s.latest_frame()) {
            return DisplayedFrame::Live(frame);
        }
        match self.fallback() {
            Some(fallback) => DisplayedFrame::Fallback(fallback),
            None => DisplayedFrame::Blank,
        }
    }

    fn track(&self, task: JoinHandle<()>) {
        if self.is_closed() {
            task.abort();
            return;
        }
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.retain(|t| !t.is_finished());
            tasks.push(task);
        }
    }

    fn abort_tasks(&self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }

    /// Tears down the session. Closing twice is a no-op.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.set_active(false);
        self.abort_tasks();
        if let Ok(mut state) = self.state.lock() {
            *state = SignalingState::Closed;
        }
        if let Some(transport) = &self.transport {
            if let Err(e) = transport.close().await {
                warn!(slot = %self.label, generation = self.generation, "error closing session: {}", e);
            }
        }
        info!(slot = %self.label, generation = self.generation, "slot retired");
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        if let Ok(tasks) = self.tasks.get_mut() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}

async fn pump_events(
    slot: Weak<ConnectionSlot>,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    store: ParameterStore,
    resend_delays: Vec<Duration>,
) {
    while let Some(event) = events.recv().await {
        let Some(slot) = slot.upgrade() else {
            break;
        };
        if slot.is_closed() {
            break;
        }
        match event {
            TransportEvent::ChannelOpen => {
                info!(slot = %slot.label, generation = slot.generation, "data channel open");
                if let Some(transport) = slot.transport.clone() {
                    let burst = sync::spawn_open_burst(
                        slot.label,
                        transport,
                        store.clone(),
                        resend_delays.clone(),
                    );
                    slot.track(burst);
                }
            }
            TransportEvent::ChannelClosed => {
                debug!(slot = %slot.label, generation = slot.generation, "data channel closed");
            }
            TransportEvent::RemoteVideo(source) => slot.attach_incoming(source),
            TransportEvent::StateChanged(LinkState::Failed) => {
                warn!(slot = %slot.label, generation = slot.generation, "peer connection failed");
                slot.set_state(SignalingState::Failed);
            }
            TransportEvent::StateChanged(state) => {
                debug!(slot = %slot.label, generation = slot.generation, ?state, "link state");
            }
        }
    }
}
