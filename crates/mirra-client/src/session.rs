//! The user-facing on/off toggle around the handoff machinery.

use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use mirra_common::{BeautifyResponse, Error, ProductRecommendations, Result};
use mirra_media::{FallbackFrameCapture, FrameSource};

use crate::camera::CameraSource;
use crate::catalog::CatalogClient;
use crate::scheduler::{HandoffEvent, HandoffScheduler, SchedulerHandle};
use crate::signaling::SignalingEndpoint;
use crate::slot::DisplayedFrame;
use crate::store::ParameterStore;
use crate::sync::ParameterSync;
use crate::transport::{LocalMedia, TransportFactory};
use crate::types::ClientConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Off,
    On,
    /// The camera could not be acquired; the toggle is disabled.
    Unavailable,
}

pub struct Session {
    config: ClientConfig,
    factory: Arc<dyn TransportFactory>,
    endpoint: Arc<dyn SignalingEndpoint>,
    catalog: Option<Arc<CatalogClient>>,
    store: ParameterStore,
    suggestion: Arc<StdMutex<Option<BeautifyResponse>>>,
    running: Mutex<Running>,
}

struct Running {
    state: SessionState,
    scheduler: Option<SchedulerHandle>,
    sync_shutdown: Option<oneshot::Sender<()>>,
    sync_task: Option<JoinHandle<()>>,
    background: Vec<JoinHandle<()>>,
    media: Option<LocalMedia>,
}

impl Session {
    pub fn new(
        config: ClientConfig,
        factory: Arc<dyn TransportFactory>,
        endpoint: Arc<dyn SignalingEndpoint>,
        store: ParameterStore,
    ) -> Self {
        Self {
            config,
            factory,
            endpoint,
            catalog: None,
            store,
            suggestion: Arc::new(StdMutex::new(None)),
            running: Mutex::new(Running {
                state: SessionState::Off,
                scheduler: None,
                sync_shutdown: None,
                sync_task: None,
                background: Vec::new(),
                media: None,
            }),
        }
    }

    /// Enables shade seeding, beautify prefetch and product lookups.
    pub fn with_catalog(mut self, catalog: CatalogClient) -> Self {
        self.catalog = Some(Arc::new(catalog));
        self
    }

    pub fn store(&self) -> &ParameterStore {
        &self.store
    }

    pub async fn state(&self) -> SessionState {
        self.running.lock().await.state
    }

    pub async fn events(&self) -> Option<broadcast::Receiver<HandoffEvent>> {
        self.running
            .lock()
            .await
            .scheduler
            .as_ref()
            .map(SchedulerHandle::subscribe)
    }

    /// Acquires the camera and starts the handoff cycle. Turning on an
    /// already running session is a no-op.
    pub async fn turn_on(&self, camera: &dyn CameraSource) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.state == SessionState::On {
            return Ok(());
        }

        let media = match camera.acquire().await {
            Ok(media) => media,
            Err(e) => {
                warn!("camera unavailable, session stays off: {}", e);
                running.state = SessionState::Unavailable;
                return Err(e);
            }
        };

        let scheduler = HandoffScheduler::new(
            &self.config,
            Arc::clone(&self.factory),
            Arc::clone(&self.endpoint),
            self.store.clone(),
            media.clone(),
        )
        .start()
        .await?;

        let (sync_tx, sync_rx) = oneshot::channel();
        let sync_task = ParameterSync::new(self.store.clone(), scheduler.slots()).spawn(sync_rx);

        let mut background = Vec::new();
        if let Some(catalog) = &self.catalog {
            background.push(tokio::spawn(seed_shades(
                Arc::clone(catalog),
                self.store.clone(),
            )));
            if let Some(preview) = media.preview.clone() {
                background.push(tokio::spawn(prefetch_suggestion(
                    Arc::clone(catalog),
                    preview,
                    Arc::clone(&self.suggestion),
                )));
            }
        }

        running.scheduler = Some(scheduler);
        running.sync_shutdown = Some(sync_tx);
        running.sync_task = Some(sync_task);
        running.background = background;
        running.media = Some(media);
        running.state = SessionState::On;
        info!("session on");
        Ok(())
    }

    /// Stops the cycle, closes both slots and releases the camera.
    /// Idempotent.
    pub async fn turn_off(&self) {
        let mut running = self.running.lock().await;
        if let Some(mut scheduler) = running.scheduler.take() {
            scheduler.stop().await;
        }
        if let Some(shutdown) = running.sync_shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = running.sync_task.take() {
            let _ = task.await;
        }
        for task in running.background.drain(..) {
            task.abort();
        }
        running.media = None;
        if running.state == SessionState::On {
            running.state = SessionState::Off;
            info!("session off");
        }
    }

    /// Applies the prefetched suggestion, if one arrived. Eyebrows are left
    /// as they are.
    pub fn beautify(&self) -> bool {
        let suggestion = self.suggestion.lock().ok().and_then(|s| s.clone());
        match suggestion {
            Some(suggestion) => {
                self.store.apply_filter(&suggestion.filter);
                info!(skin_tone = %suggestion.skin_tone, "beautify suggestion applied");
                true
            }
            None => false,
        }
    }

    pub fn suggestion(&self) -> Option<BeautifyResponse> {
        self.suggestion.lock().ok().and_then(|s| s.clone())
    }

    pub async fn product_recommendations(&self) -> Result<ProductRecommendations> {
        let catalog = self
            .catalog
            .as_ref()
            .ok_or_else(|| Error::config("no catalog endpoint configured"))?;
        catalog
            .fetch_product_recommendations(&self.store.snapshot().selected_makeup)
            .await
    }

    /// Live frame of the active slot, else its fallback, else blank.
    pub async fn displayed_frame(&self) -> DisplayedFrame {
        let running = self.running.lock().await;
        running
            .scheduler
            .as_ref()
            .and_then(SchedulerHandle::active_slot)
            .map(|slot| slot.display())
            .unwrap_or(DisplayedFrame::Blank)
    }
}

async fn seed_shades(catalog: Arc<CatalogClient>, store: ParameterStore) {
    match catalog.fetch_unique_shades().await {
        Ok(shades) => {
            store.seed_from_catalog(&shades);
            debug!("initial shades seeded from catalog");
        }
        Err(e) => warn!("could not fetch shade catalog: {}", e),
    }
}

async fn prefetch_suggestion(
    catalog: Arc<CatalogClient>,
    preview: Arc<dyn FrameSource>,
    suggestion: Arc<StdMutex<Option<BeautifyResponse>>>,
) {
    let Some(still) = FallbackFrameCapture::capture(preview.as_ref()) else {
        debug!("no preview frame for beautify analysis");
        return;
    };
    match catalog.analyze_still_image(&still.png).await {
        Ok(response) => {
            if let Ok(mut slot) = suggestion.lock() {
                *slot = Some(response);
            }
        }
        Err(e) => warn!("beautify analysis failed: {}", e),
    }
}
