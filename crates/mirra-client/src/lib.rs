//! Dual-slot real-time session manager.
//!
//! The camera feed is streamed to a processing endpoint over one of two
//! alternating sessions ("slots"). [`HandoffScheduler`] prepares the standby
//! slot ahead of each swap so the rendered output never goes dark, and
//! [`ParameterSync`] keeps every open slot's data channel in step with the
//! [`ParameterStore`].

#![forbid(unsafe_code)]

pub mod camera;
pub mod catalog;
pub mod scheduler;
pub mod session;
pub mod signaling;
pub mod slot;
pub mod store;
pub mod sync;
pub mod transport;
pub mod types;

pub use camera::{CameraSource, DummyCamera, IvfFileCamera};
pub use catalog::CatalogClient;
pub use scheduler::{HandoffEvent, HandoffScheduler, SchedulerHandle, SharedSlots, SlotPair};
pub use session::{Session, SessionState};
pub use signaling::{DummySignaling, HttpSignaling, SignalingEndpoint, SignalingExchange};
pub use slot::{ConnectionSlot, DisplayedFrame, SignalingState};
pub use store::ParameterStore;
pub use sync::ParameterSync;
pub use transport::{
    DummyBehaviour, DummyTransport, DummyTransportFactory, LocalMedia, Transport,
    TransportFactory, WebRtcTransportFactory,
};
pub use types::{ClientConfig, HandoffTiming, SlotLabel};
