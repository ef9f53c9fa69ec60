//! Process-wide latest-value holder for the makeup parameters.
//!
//! Single writer (the user-driven edit path), many readers (slot pushes,
//! negotiations). Writes replace the whole snapshot atomically; readers
//! always see the most recently committed value at the moment they read.

use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::watch;
use tracing::debug;

use mirra_common::{BeautifyFilter, Category, Color, Intensity, MakeupParams, Region, ShadeCatalog};

#[derive(Clone)]
pub struct ParameterStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    current: ArcSwap<MakeupParams>,
    revision: watch::Sender<u64>,
}

impl Default for ParameterStore {
    fn default() -> Self {
        Self::new(MakeupParams::default())
    }
}

impl ParameterStore {
    pub fn new(initial: MakeupParams) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(StoreInner {
                current: ArcSwap::from_pointee(initial),
                revision,
            }),
        }
    }

    /// The latest committed parameters.
    pub fn snapshot(&self) -> MakeupParams {
        **self.inner.current.load()
    }

    pub fn revision(&self) -> u64 {
        *self.inner.revision.borrow()
    }

    /// Receiver that wakes on every commit after subscription.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }

    pub fn replace(&self, params: MakeupParams) {
        self.inner.current.store(Arc::new(params));
        self.inner.revision.send_modify(|rev| *rev += 1);
        debug!(
            revision = self.revision(),
            intensity = params.blend_intensity.get(),
            "makeup parameters committed"
        );
    }

    pub fn update(&self, edit: impl FnOnce(&mut MakeupParams)) {
        let mut next = self.snapshot();
        edit(&mut next);
        self.replace(next);
    }

    pub fn set_intensity(&self, value: f32) {
        self.update(|p| p.blend_intensity = Intensity::new(value));
    }

    pub fn set_color(&self, region: Region, color: Color) {
        self.update(|p| p.selected_makeup.set(region, color));
    }

    pub fn apply_category(&self, category: Category, color: Color) {
        self.update(|p| p.selected_makeup.set_category(category, color));
    }

    pub fn apply_filter(&self, filter: &BeautifyFilter) {
        self.update(|p| p.selected_makeup.apply_filter(filter));
    }

    /// Paints each category with its first catalog shade in one commit.
    /// Categories without shades keep their current color.
    pub fn seed_from_catalog(&self, catalog: &ShadeCatalog) {
        self.update(|p| {
            for (category, color) in catalog.first_shades() {
                p.selected_makeup.set_category(category, color);
            }
        });
    }
}
