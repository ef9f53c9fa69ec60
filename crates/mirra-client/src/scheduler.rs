//! Dual-slot handoff cycle.
//!
//! One task runs the cycle as a loop: sleep to the prepare deadline, open
//! and start negotiating the inactive label, sleep to the swap deadline,
//! hand the active flag over and retire the old slot. Deadlines are
//! absolute offsets from the cycle start, and the next cycle starts at the
//! previous swap deadline, so swaps of the same label are exactly one cycle
//! apart.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use mirra_common::Result;

use crate::signaling::{SignalingEndpoint, SignalingExchange};
use crate::slot::{ConnectionSlot, SignalingState};
use crate::store::ParameterStore;
use crate::transport::{LocalMedia, TransportFactory};
use crate::types::{ClientConfig, HandoffTiming, SlotLabel};

/// Both slot occupants and the active label. Kept behind one lock so the
/// active flag is flipped atomically with respect to readers.
#[derive(Default)]
pub struct SlotPair {
    active: SlotLabel,
    a: Option<Arc<ConnectionSlot>>,
    b: Option<Arc<ConnectionSlot>>,
}

pub type SharedSlots = Arc<Mutex<SlotPair>>;

impl SlotPair {
    pub fn active_label(&self) -> SlotLabel {
        self.active
    }

    pub fn get(&self, label: SlotLabel) -> Option<&Arc<ConnectionSlot>> {
        match label {
            SlotLabel::A => self.a.as_ref(),
            SlotLabel::B => self.b.as_ref(),
        }
    }

    fn entry(&mut self, label: SlotLabel) -> &mut Option<Arc<ConnectionSlot>> {
        match label {
            SlotLabel::A => &mut self.a,
            SlotLabel::B => &mut self.b,
        }
    }

    pub fn active_slot(&self) -> Option<&Arc<ConnectionSlot>> {
        self.get(self.active)
    }

    /// Active flags of the A and B occupants.
    pub fn active_flags(&self) -> (bool, bool) {
        (
            self.a.as_ref().is_some_and(|s| s.is_active()),
            self.b.as_ref().is_some_and(|s| s.is_active()),
        )
    }

    /// Occupants that are not yet retired.
    pub fn live_slots(&self) -> Vec<Arc<ConnectionSlot>> {
        [&self.a, &self.b]
            .into_iter()
            .flatten()
            .filter(|s| !s.is_closed())
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandoffEvent {
    /// Bootstrap slot created and activated.
    Activated { label: SlotLabel, at: Duration },
    Preparing {
        label: SlotLabel,
        cycle: u64,
        at: Duration,
    },
    /// The prepared slot's session could not be created; the swap still runs.
    PrepareFailed {
        label: SlotLabel,
        cycle: u64,
        at: Duration,
    },
    Swapped {
        from: SlotLabel,
        to: SlotLabel,
        cycle: u64,
        /// Whether the incoming slot got a fallback frame.
        fallback: bool,
        at: Duration,
    },
    Stopped { at: Duration },
}

pub struct HandoffScheduler {
    timing: HandoffTiming,
    resend_delays: Vec<Duration>,
    negotiation_timeout: Option<Duration>,
    factory: Arc<dyn TransportFactory>,
    exchange: SignalingExchange,
    store: ParameterStore,
    media: LocalMedia,
}

impl HandoffScheduler {
    pub fn new(
        config: &ClientConfig,
        factory: Arc<dyn TransportFactory>,
        endpoint: Arc<dyn SignalingEndpoint>,
        store: ParameterStore,
        media: LocalMedia,
    ) -> Self {
        Self {
            timing: config.timing,
            resend_delays: config.resend_delays.clone(),
            negotiation_timeout: config.negotiation_timeout,
            factory,
            exchange: SignalingExchange::new(endpoint),
            store,
            media,
        }
    }

    /// Bootstraps slot A as active and spawns the cycle.
    pub async fn start(self) -> Result<SchedulerHandle> {
        self.timing.validate()?;

        let slots: SharedSlots = Arc::new(Mutex::new(SlotPair::default()));
        let (events, _) = broadcast::channel(64);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let mut cycle = HandoffCycle {
            config: self,
            slots: Arc::clone(&slots),
            events: events.clone(),
            started: Instant::now(),
            generation: 0,
        };
        cycle.bootstrap().await;
        let task = tokio::spawn(cycle.run(shutdown_rx));

        Ok(SchedulerHandle {
            slots,
            events,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }
}

struct HandoffCycle {
    config: HandoffScheduler,
    slots: SharedSlots,
    events: broadcast::Sender<HandoffEvent>,
    started: Instant,
    generation: u64,
}

impl HandoffCycle {
    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn emit(&self, event: HandoffEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    async fn open_slot(&mut self, label: SlotLabel) -> Arc<ConnectionSlot> {
        self.generation += 1;
        let slot = ConnectionSlot::create(
            label,
            self.generation,
            self.config.factory.as_ref(),
            &self.config.media,
            self.config.store.clone(),
            self.config.resend_delays.clone(),
        )
        .await;
        slot.spawn_negotiation(
            self.config.exchange.clone(),
            self.config.store.clone(),
            self.config.negotiation_timeout,
        );
        slot
    }

    async fn bootstrap(&mut self) {
        let slot = self.open_slot(SlotLabel::A).await;
        slot.set_active(true);
        if let Ok(mut pair) = self.slots.lock() {
            pair.active = SlotLabel::A;
            pair.a = Some(slot);
        }
        info!(slot = %SlotLabel::A, "bootstrap slot active");
        self.emit(HandoffEvent::Activated {
            label: SlotLabel::A,
            at: self.elapsed(),
        });
    }

    async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        let timing = self.config.timing;
        let mut cycle_start = Instant::now();
        let mut cycle = 0u64;
        loop {
            cycle += 1;
            let prepare_at = cycle_start + timing.prepare_after;
            let swap_at = cycle_start + timing.swap_after;

            tokio::select! {
                _ = &mut shutdown => break,
                _ = sleep_until(prepare_at) => {}
            }
            self.prepare(cycle).await;
            tokio::select! {
                _ = &mut shutdown => break,
                _ = sleep_until(swap_at) => {}
            }
            self.swap(cycle).await;
            cycle_start = swap_at;
        }
        self.teardown().await;
    }

    async fn prepare(&mut self, cycle: u64) {
        let target = match self.slots.lock() {
            Ok(pair) => pair.active.other(),
            Err(_) => return,
        };
        info!(slot = %target, cycle, "preparing standby slot");
        self.emit(HandoffEvent::Preparing {
            label: target,
            cycle,
            at: self.elapsed(),
        });

        let stale = self.slots.lock().ok().and_then(|mut pair| pair.entry(target).take());
        if let Some(stale) = stale {
            debug!(slot = %target, generation = stale.generation(), "closing stale standby slot");
            stale.close().await;
        }

        let slot = self.open_slot(target).await;
        if slot.state() == SignalingState::Failed {
            warn!(slot = %target, cycle, "standby slot failed to open, swap will proceed without it");
            self.emit(HandoffEvent::PrepareFailed {
                label: target,
                cycle,
                at: self.elapsed(),
            });
        }
        if let Ok(mut pair) = self.slots.lock() {
            *pair.entry(target) = Some(slot);
        }
    }

    async fn swap(&mut self, cycle: u64) {
        let (from, outgoing, incoming) = match self.slots.lock() {
            Ok(pair) => {
                let from = pair.active;
                (from, pair.get(from).cloned(), pair.get(from.other()).cloned())
            }
            Err(_) => return,
        };

        // Encoding the still happens outside the pair lock. A stream that
        // already attached needs no placeholder.
        let still = match (&outgoing, &incoming) {
            (Some(outgoing), Some(incoming)) if !incoming.has_incoming() => {
                outgoing.capture_fallback()
            }
            _ => None,
        };

        let swapped = match (self.slots.lock(), incoming) {
            (Ok(mut pair), Some(incoming)) => {
                let to = from.other();
                let has_fallback = still.is_some() && !incoming.has_incoming();
                if has_fallback {
                    incoming.set_fallback(still);
                }
                incoming.set_active(true);
                let retired = pair.entry(from).take();
                if let Some(retired) = &retired {
                    retired.set_active(false);
                }
                pair.active = to;
                Some((from, to, has_fallback, retired))
            }
            _ => None,
        };

        let Some((from, to, fallback, retired)) = swapped else {
            warn!(cycle, "no standby slot to swap in, keeping the active slot");
            return;
        };
        if let Some(retired) = retired {
            retired.close().await;
        }
        info!(from = %from, to = %to, cycle, fallback, "active slot swapped");
        self.emit(HandoffEvent::Swapped {
            from,
            to,
            cycle,
            fallback,
            at: self.elapsed(),
        });
    }

    async fn teardown(&mut self) {
        let retired = close_all(&self.slots).await;
        info!(retired, "handoff scheduler stopped");
        self.emit(HandoffEvent::Stopped { at: self.elapsed() });
    }
}

async fn close_all(slots: &SharedSlots) -> usize {
    let retiring: Vec<_> = match slots.lock() {
        Ok(mut pair) => [pair.a.take(), pair.b.take()].into_iter().flatten().collect(),
        Err(_) => Vec::new(),
    };
    let count = retiring.len();
    for slot in retiring {
        slot.close().await;
    }
    count
}

/// Control handle for a running scheduler. Dropping it stops the cycle.
pub struct SchedulerHandle {
    slots: SharedSlots,
    events: broadcast::Sender<HandoffEvent>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<HandoffEvent> {
        self.events.subscribe()
    }

    pub fn slots(&self) -> SharedSlots {
        Arc::clone(&self.slots)
    }

    pub fn active_label(&self) -> Option<SlotLabel> {
        self.slots.lock().ok().map(|pair| pair.active_label())
    }

    pub fn active_slot(&self) -> Option<Arc<ConnectionSlot>> {
        self.slots.lock().ok().and_then(|pair| pair.active_slot().cloned())
    }

    pub fn slot(&self, label: SlotLabel) -> Option<Arc<ConnectionSlot>> {
        self.slots.lock().ok().and_then(|pair| pair.get(label).cloned())
    }

    pub fn active_flags(&self) -> (bool, bool) {
        self.slots
            .lock()
            .map(|pair| pair.active_flags())
            .unwrap_or((false, false))
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Cancels both deadlines and closes both slots. Stopping twice is the
    /// same as stopping once.
    pub async fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("handoff task ended abnormally: {}", e);
            }
        }
        close_all(&self.slots).await;
    }
}
