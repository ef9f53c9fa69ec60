//! Offer/answer negotiation of one slot against the processing endpoint.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, info};

use mirra_common::{AnswerResponse, Error, OfferRequest, Result, SdpKind};

use crate::store::ParameterStore;
use crate::transport::{GatheringState, Transport};
use crate::types::{ClientConfig, SlotLabel};

/// The remote side of the handshake: one request carrying the complete
/// offer and the initial parameters, one answer back.
#[async_trait]
pub trait SignalingEndpoint: Send + Sync {
    async fn negotiate(&self, request: OfferRequest) -> Result<AnswerResponse>;
}

/// `POST {endpoint}/offer` with a JSON body.
///
/// Only connecting is bounded by `http_timeout`. The answer is awaited for
/// as long as `negotiation_timeout` allows, which by default is forever.
pub struct HttpSignaling {
    client: reqwest::Client,
    url: String,
}

impl HttpSignaling {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder().connect_timeout(config.http_timeout);
        if let Some(limit) = config.negotiation_timeout {
            builder = builder.timeout(limit);
        }
        let client = builder.build().map_err(Error::http)?;
        Ok(Self {
            client,
            url: config.endpoint_url("offer"),
        })
    }
}

#[async_trait]
impl SignalingEndpoint for HttpSignaling {
    async fn negotiate(&self, request: OfferRequest) -> Result<AnswerResponse> {
        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::negotiation(format!("offer request to {} failed: {}", self.url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::negotiation(format!(
                "endpoint rejected offer with {}: {}",
                status, body
            )));
        }

        let answer: AnswerResponse = response
            .json()
            .await
            .map_err(|e| Error::negotiation(format!("malformed answer: {}", e)))?;
        answer.validate()?;
        Ok(answer)
    }
}

/// Answers every offer locally. Records what it was sent.
#[derive(Default)]
pub struct DummySignaling {
    requests: Mutex<Vec<OfferRequest>>,
    fail: AtomicBool,
    hang: AtomicBool,
}

impl DummySignaling {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::Release);
    }

    /// Never answer; the request stays pending until the caller gives up.
    pub fn set_hang(&self, hang: bool) {
        self.hang.store(hang, Ordering::Release);
    }

    pub fn requests(&self) -> Vec<OfferRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SignalingEndpoint for DummySignaling {
    async fn negotiate(&self, request: OfferRequest) -> Result<AnswerResponse> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        if self.hang.load(Ordering::Acquire) {
            std::future::pending::<()>().await;
        }
        if self.fail.load(Ordering::Acquire) {
            return Err(Error::negotiation("dummy endpoint refused the offer"));
        }
        Ok(AnswerResponse {
            sdp: "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=mirra-answer\r\nt=0 0\r\n".to_string(),
            kind: SdpKind::Answer,
        })
    }
}

/// Runs the five handshake steps for a single slot. No trickle ICE: the
/// offer is sent only once candidate gathering has completed.
#[derive(Clone)]
pub struct SignalingExchange {
    endpoint: Arc<dyn SignalingEndpoint>,
}

impl SignalingExchange {
    pub fn new(endpoint: Arc<dyn SignalingEndpoint>) -> Self {
        Self { endpoint }
    }

    pub async fn run(
        &self,
        label: SlotLabel,
        transport: &dyn Transport,
        store: &ParameterStore,
    ) -> Result<()> {
        let offer = transport.create_offer().await?;
        transport.set_local_description(offer).await?;
        debug!(slot = %label, "local offer applied, waiting for ICE gathering");

        wait_for_gathering(transport).await?;

        let sdp = transport.local_description().await?;
        let request = OfferRequest::new(sdp, store.snapshot());
        let answer = self.endpoint.negotiate(request).await?;
        debug!(slot = %label, "answer received");

        transport.set_remote_description(answer.sdp).await?;
        info!(slot = %label, "negotiation complete");
        Ok(())
    }
}

/// Check-then-subscribe: an already complete gathering never registers a
/// listener, so a completion that fired earlier cannot be missed.
pub async fn wait_for_gathering(transport: &dyn Transport) -> Result<()> {
    if transport.gathering_state() == GatheringState::Complete {
        return Ok(());
    }
    transport.gathering_complete().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{DummyBehaviour, DummyTransportFactory, LocalMedia, TransportFactory};
    use mirra_common::Region;
    use tokio::sync::mpsc;

    async fn open(factory: &DummyTransportFactory) -> Arc<dyn Transport> {
        let (tx, _rx) = mpsc::unbounded_channel();
        factory
            .open(SlotLabel::A, &LocalMedia::default(), tx)
            .await
            .expect("open")
    }

    #[tokio::test(start_paused = true)]
    async fn test_exchange_sends_complete_offer_with_snapshot() {
        let factory = DummyTransportFactory::new(DummyBehaviour::silent());
        let transport = open(&factory).await;
        let endpoint = DummySignaling::new();
        let store = ParameterStore::default();
        store.set_intensity(0.7);

        SignalingExchange::new(endpoint.clone())
            .run(SlotLabel::A, transport.as_ref(), &store)
            .await
            .expect("negotiated");

        let requests = endpoint.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].kind, SdpKind::Offer);
        assert!(requests[0].sdp.contains("a=candidate:"));
        assert_eq!(requests[0].makeup.blend_intensity.get(), 0.7);
        assert_eq!(
            requests[0].makeup.selected_makeup.get(Region::Foundation),
            store.snapshot().selected_makeup.get(Region::Foundation)
        );

        let dummy = factory.latest(SlotLabel::A).expect("dummy");
        assert!(dummy.remote_description().is_some());
        assert_eq!(dummy.gathering_waits(), 1);
    }

    #[tokio::test]
    async fn test_already_complete_gathering_skips_listener() {
        let factory = DummyTransportFactory::new(DummyBehaviour {
            gathering_already_complete: true,
            ..DummyBehaviour::silent()
        });
        let transport = open(&factory).await;
        let endpoint = DummySignaling::new();

        SignalingExchange::new(endpoint)
            .run(SlotLabel::A, transport.as_ref(), &ParameterStore::default())
            .await
            .expect("negotiated");

        let dummy = factory.latest(SlotLabel::A).expect("dummy");
        assert_eq!(dummy.gathering_waits(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_endpoint_failure_leaves_slot_unanswered() {
        let factory = DummyTransportFactory::new(DummyBehaviour::silent());
        let transport = open(&factory).await;
        let endpoint = DummySignaling::new();
        endpoint.set_fail(true);

        let result = SignalingExchange::new(endpoint)
            .run(SlotLabel::A, transport.as_ref(), &ParameterStore::default())
            .await;
        assert!(matches!(result, Err(Error::Negotiation(_))));
        let dummy = factory.latest(SlotLabel::A).expect("dummy");
        assert!(dummy.remote_description().is_none());
    }

    #[tokio::test]
    async fn test_offer_failure_stops_before_request() {
        let factory = DummyTransportFactory::new(DummyBehaviour {
            fail_offer: true,
            ..DummyBehaviour::silent()
        });
        let transport = open(&factory).await;
        let endpoint = DummySignaling::new();

        let result = SignalingExchange::new(endpoint.clone())
            .run(SlotLabel::A, transport.as_ref(), &ParameterStore::default())
            .await;
        assert!(result.is_err());
        assert!(endpoint.requests().is_empty());
    }
}
