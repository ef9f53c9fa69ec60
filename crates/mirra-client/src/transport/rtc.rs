use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_gathering_state::RTCIceGatheringState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_remote::TrackRemote;

use mirra_common::{Error, Result};
use mirra_media::{Decoder, LatestFrame};

use super::{
    EventSender, GatheringState, LinkState, LocalMedia, Transport, TransportEvent, TransportFactory,
};
use crate::types::{SlotLabel, DEFAULT_CHANNEL_LABEL, DEFAULT_STUN_SERVER};

/// Builds a decoder for each incoming video track.
pub type DecoderFactory = Arc<dyn Fn() -> Box<dyn Decoder> + Send + Sync>;

/// Opens `webrtc` peer connections, one per slot occupancy.
pub struct WebRtcTransportFactory {
    ice_servers: Vec<String>,
    channel_label: String,
    decoder_factory: Option<DecoderFactory>,
}

impl Default for WebRtcTransportFactory {
    fn default() -> Self {
        Self::new(vec![DEFAULT_STUN_SERVER.to_string()], DEFAULT_CHANNEL_LABEL)
    }
}

impl WebRtcTransportFactory {
    pub fn new(ice_servers: Vec<String>, channel_label: impl Into<String>) -> Self {
        Self {
            ice_servers,
            channel_label: channel_label.into(),
            decoder_factory: None,
        }
    }

    /// Without a decoder, incoming RTP is drained but no frames are produced,
    /// so fallback capture finds nothing to snapshot.
    pub fn with_decoder(mut self, factory: DecoderFactory) -> Self {
        self.decoder_factory = Some(factory);
        self
    }

    pub fn decodes_remote_video(&self) -> bool {
        self.decoder_factory.is_some()
    }

    fn rtc_configuration(&self) -> RTCConfiguration {
        let ice_servers = if self.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };
        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }
}

#[async_trait]
impl TransportFactory for WebRtcTransportFactory {
    async fn open(
        &self,
        label: SlotLabel,
        media: &LocalMedia,
        events: EventSender,
    ) -> Result<Arc<dyn Transport>> {
        let mut m = MediaEngine::default();
        m.register_default_codecs().map_err(Error::transport)?;
        let api = APIBuilder::new().with_media_engine(m).build();

        let pc = Arc::new(
            api.new_peer_connection(self.rtc_configuration())
                .await
                .map_err(Error::transport)?,
        );

        for track in &media.tracks {
            let sender = pc
                .add_track(Arc::clone(track))
                .await
                .map_err(Error::transport)?;
            // RTCP has to be read for interceptors to make progress.
            tokio::spawn(async move {
                let mut rtcp_buf = vec![0u8; 1500];
                while sender.read(&mut rtcp_buf).await.is_ok() {}
            });
        }
        if media.tracks.is_empty() {
            pc.add_transceiver_from_kind(
                RTPCodecType::Video,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                }),
            )
            .await
            .map_err(Error::transport)?;
        }

        let dc = pc
            .create_data_channel(&self.channel_label, None)
            .await
            .map_err(Error::transport)?;
        register_channel_handlers(label, &dc, events.clone());
        register_peer_handlers(label, &pc, events, self.decoder_factory.clone());

        info!(slot = %label, channel = %self.channel_label, "peer connection created");
        Ok(Arc::new(WebRtcTransport { label, pc, dc }))
    }
}

fn register_channel_handlers(label: SlotLabel, dc: &Arc<RTCDataChannel>, events: EventSender) {
    let open_tx = events.clone();
    dc.on_open(Box::new(move || {
        let tx = open_tx.clone();
        Box::pin(async move {
            let _ = tx.send(TransportEvent::ChannelOpen);
        })
    }));

    let close_tx = events;
    dc.on_close(Box::new(move || {
        let tx = close_tx.clone();
        Box::pin(async move {
            let _ = tx.send(TransportEvent::ChannelClosed);
        })
    }));

    dc.on_error(Box::new(move |err| {
        warn!(slot = %label, "data channel error: {}", err);
        Box::pin(async {})
    }));
}

fn register_peer_handlers(
    label: SlotLabel,
    pc: &Arc<RTCPeerConnection>,
    events: EventSender,
    decoder_factory: Option<DecoderFactory>,
) {
    let track_tx = events.clone();
    pc.on_track(Box::new(move |track, _receiver, _transceiver| {
        let tx = track_tx.clone();
        let decoder = decoder_factory.as_ref().map(|make| make());
        Box::pin(async move {
            if track.kind() != RTPCodecType::Video {
                debug!(slot = %label, kind = %track.kind(), "ignoring non-video remote track");
                return;
            }
            info!(slot = %label, ssrc = track.ssrc(), "remote video track arrived");
            let frames = LatestFrame::new();
            let _ = tx.send(TransportEvent::RemoteVideo(frames.clone()));
            tokio::spawn(read_remote_video(label, track, frames, decoder));
        })
    }));

    pc.on_ice_gathering_state_change(Box::new(move |state| {
        debug!(slot = %label, ?state, "ICE gathering state changed");
        Box::pin(async {})
    }));

    let state_tx = events;
    pc.on_peer_connection_state_change(Box::new(move |state| {
        let tx = state_tx.clone();
        Box::pin(async move {
            let _ = tx.send(TransportEvent::StateChanged(link_state(state)));
        })
    }));
}

async fn read_remote_video(
    label: SlotLabel,
    track: Arc<TrackRemote>,
    frames: Arc<LatestFrame>,
    mut decoder: Option<Box<dyn Decoder>>,
) {
    loop {
        let (packet, _) = match track.read_rtp().await {
            Ok(read) => read,
            Err(e) => {
                debug!(slot = %label, "remote video track ended: {}", e);
                break;
            }
        };
        let Some(decoder) = decoder.as_mut() else {
            continue;
        };
        match decoder.decode(&packet.payload, packet.header.timestamp, packet.header.marker) {
            Ok(Some(frame)) => frames.publish(frame),
            Ok(None) => {}
            Err(e) => warn!(slot = %label, "failed to decode remote frame: {}", e),
        }
    }
}

fn link_state(state: RTCPeerConnectionState) -> LinkState {
    match state {
        RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => LinkState::New,
        RTCPeerConnectionState::Connecting => LinkState::Connecting,
        RTCPeerConnectionState::Connected => LinkState::Connected,
        RTCPeerConnectionState::Disconnected => LinkState::Disconnected,
        RTCPeerConnectionState::Failed => LinkState::Failed,
        RTCPeerConnectionState::Closed => LinkState::Closed,
    }
}

pub struct WebRtcTransport {
    label: SlotLabel,
    pc: Arc<RTCPeerConnection>,
    dc: Arc<RTCDataChannel>,
}

#[async_trait]
impl Transport for WebRtcTransport {
    async fn create_offer(&self) -> Result<String> {
        let offer = self.pc.create_offer(None).await.map_err(Error::negotiation)?;
        Ok(offer.sdp)
    }

    async fn set_local_description(&self, sdp: String) -> Result<()> {
        let offer = RTCSessionDescription::offer(sdp).map_err(Error::negotiation)?;
        self.pc
            .set_local_description(offer)
            .await
            .map_err(Error::negotiation)
    }

    fn gathering_state(&self) -> GatheringState {
        match self.pc.ice_gathering_state() {
            RTCIceGatheringState::Complete => GatheringState::Complete,
            RTCIceGatheringState::Gathering => GatheringState::Gathering,
            RTCIceGatheringState::Unspecified | RTCIceGatheringState::New => GatheringState::New,
        }
    }

    async fn gathering_complete(&self) -> Result<()> {
        let mut done = self.pc.gathering_complete_promise().await;
        // The sender is dropped once gathering completes.
        let _ = done.recv().await;
        Ok(())
    }

    async fn local_description(&self) -> Result<String> {
        self.pc
            .local_description()
            .await
            .map(|desc| desc.sdp)
            .ok_or_else(|| Error::negotiation("local description is not set"))
    }

    async fn set_remote_description(&self, answer_sdp: String) -> Result<()> {
        let answer = RTCSessionDescription::answer(answer_sdp).map_err(Error::negotiation)?;
        self.pc
            .set_remote_description(answer)
            .await
            .map_err(Error::negotiation)
    }

    fn is_channel_open(&self) -> bool {
        self.dc.ready_state() == RTCDataChannelState::Open
    }

    async fn send_text(&self, text: String) -> Result<()> {
        self.dc
            .send_text(text)
            .await
            .map(|_| ())
            .map_err(Error::transport)
    }

    async fn close(&self) -> Result<()> {
        debug!(slot = %self.label, "closing peer connection");
        self.pc.close().await.map_err(Error::transport)
    }
}
