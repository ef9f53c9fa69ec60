//! Parameter propagation over the slots' data channels.
//!
//! Every send reads the store at send time. Nothing is acknowledged; the
//! open-time burst (immediate plus fixed re-sends) stands in for delivery
//! confirmation while the remote side finishes coming up.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

use mirra_common::{encode_parameter_push, Result};

use crate::scheduler::SharedSlots;
use crate::store::ParameterStore;
use crate::transport::Transport;
use crate::types::SlotLabel;

/// Sends the store's current value if the channel is open.
///
/// Returns `Ok(false)` when the channel is not open.
pub async fn push_snapshot(transport: &dyn Transport, store: &ParameterStore) -> Result<bool> {
    if !transport.is_channel_open() {
        return Ok(false);
    }
    let payload = encode_parameter_push(&store.snapshot())?;
    transport.send_text(payload).await?;
    Ok(true)
}

/// Immediate push on channel open, then one re-send per entry of `delays`
/// (offsets from the open).
pub fn spawn_open_burst(
    label: SlotLabel,
    transport: Arc<dyn Transport>,
    store: ParameterStore,
    delays: Vec<Duration>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let opened = Instant::now();
        send_logged(label, transport.as_ref(), &store).await;
        for delay in delays {
            sleep_until(opened + delay).await;
            send_logged(label, transport.as_ref(), &store).await;
        }
    })
}

async fn send_logged(label: SlotLabel, transport: &dyn Transport, store: &ParameterStore) {
    match push_snapshot(transport, store).await {
        Ok(true) => debug!(slot = %label, revision = store.revision(), "parameters pushed"),
        Ok(false) => debug!(slot = %label, "channel not open, push skipped"),
        Err(e) => debug!(slot = %label, "parameter push dropped: {}", e),
    }
}

/// Fans store changes out to every slot with an open channel.
#[derive(Clone)]
pub struct ParameterSync {
    store: ParameterStore,
    slots: SharedSlots,
}

impl ParameterSync {
    pub fn new(store: ParameterStore, slots: SharedSlots) -> Self {
        Self { store, slots }
    }

    /// Pushes the current value to each open slot. Returns how many
    /// received it.
    pub async fn broadcast(&self) -> usize {
        let targets = match self.slots.lock() {
            Ok(pair) => pair.live_slots(),
            Err(_) => return 0,
        };
        let mut delivered = 0;
        for slot in targets {
            match slot.send_params(&self.store).await {
                Ok(true) => delivered += 1,
                Ok(false) => {}
                Err(e) => debug!(slot = %slot.label(), "parameter push dropped: {}", e),
            }
        }
        delivered
    }

    /// Broadcasts on every store commit until `shutdown` fires or its
    /// sender is dropped.
    pub fn spawn(self, mut shutdown: oneshot::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut changes = self.store.subscribe();
            loop {
                tokio::select! {
                    _ = &mut shutdown => break,
                    changed = changes.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        changes.borrow_and_update();
                        let delivered = self.broadcast().await;
                        debug!(revision = self.store.revision(), delivered, "parameter change fanned out");
                    }
                }
            }
            info!("parameter sync stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{DummyBehaviour, DummyTransportFactory, LocalMedia, TransportFactory};
    use tokio::sync::mpsc;

    #[tokio::test(start_paused = true)]
    async fn test_burst_rereads_store_each_send() {
        let factory = DummyTransportFactory::new(DummyBehaviour::silent());
        let (tx, _rx) = mpsc::unbounded_channel();
        let transport = factory
            .open(SlotLabel::B, &LocalMedia::default(), tx)
            .await
            .expect("open");
        let dummy = factory.latest(SlotLabel::B).expect("dummy");
        dummy.open_channel();

        let store = ParameterStore::default();
        let burst = spawn_open_burst(
            SlotLabel::B,
            transport,
            store.clone(),
            vec![Duration::from_millis(500), Duration::from_millis(1000)],
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(dummy.sent().len(), 1);

        store.set_intensity(0.9);
        burst.await.expect("burst");

        let sent = dummy.sent();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0].blend_intensity.get(), 0.2);
        assert_eq!(sent[1].blend_intensity.get(), 0.9);
        assert_eq!(sent[2].blend_intensity.get(), 0.9);
    }

    #[tokio::test]
    async fn test_push_to_closed_channel_is_skipped() {
        let factory = DummyTransportFactory::new(DummyBehaviour::silent());
        let (tx, _rx) = mpsc::unbounded_channel();
        let transport = factory
            .open(SlotLabel::A, &LocalMedia::default(), tx)
            .await
            .expect("open");
        let sent = push_snapshot(transport.as_ref(), &ParameterStore::default())
            .await
            .expect("skip is not an error");
        assert!(!sent);
        assert!(factory.latest(SlotLabel::A).expect("dummy").sent().is_empty());
    }
}
