//! WebRTC-backed peer transport: construction, non-trickle ICE gathering,
//! and the single ordered data channel.
//!
//! Non-trickle is the enabling property for out-of-band signaling: the
//! local description is published once, after gathering reaches
//! `Complete`, so each side ships exactly one string to the other.

use super::peer::{PeerEvent, PeerFactory, PeerRole, PeerTransport};
use crate::core::config::{ICE_GATHER_TIMEOUT, SCTP_MAX_MESSAGE_SIZE, STUN_SERVERS};
use crate::core::signal::{SignalBlob, SignalKind};
use crate::core::transfer::protocol::ChannelPayload;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::time::timeout;
use tracing::{error, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::{SctpMaxMessageSize, SettingEngine};
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_gathering_state::RTCIceGatheringState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

type SharedDc = Arc<RwLock<Option<Arc<RTCDataChannel>>>>;

/// The production [`PeerFactory`].
pub struct WebRtcFactory;

#[async_trait]
impl PeerFactory for WebRtcFactory {
    async fn create(
        &self,
        role: PeerRole,
        remote_offer: Option<SignalBlob>,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn PeerTransport>> {
        let peer = match role {
            PeerRole::Initiator => WebRtcPeer::initiate(events).await?,
            PeerRole::Responder => {
                let offer =
                    remote_offer.ok_or_else(|| anyhow!("responder requires a remote offer"))?;
                WebRtcPeer::respond(offer, events).await?
            }
        };
        Ok(peer)
    }
}

/// One WebRTC peer connection with its "data" channel.
pub struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
    dc: SharedDc,
    destroyed: AtomicBool,
}

impl WebRtcPeer {
    // ── Construction ──────────────────────────────────────────────────────

    async fn create_api() -> Result<webrtc::api::API> {
        let mut me = MediaEngine::default();
        let reg = register_default_interceptors(Registry::new(), &mut me)?;

        let mut se = SettingEngine::default();
        se.set_sctp_max_message_size_can_send(SctpMaxMessageSize::Bounded(SCTP_MAX_MESSAGE_SIZE));

        Ok(APIBuilder::new()
            .with_setting_engine(se)
            .with_media_engine(me)
            .with_interceptor_registry(reg)
            .build())
    }

    async fn new_peer_connection() -> Result<Arc<RTCPeerConnection>> {
        let api = Self::create_api().await?;
        let ice_servers = STUN_SERVERS
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![(*url).to_owned()],
                ..Default::default()
            })
            .collect();
        Ok(Arc::new(
            api.new_peer_connection(RTCConfiguration {
                ice_servers,
                ..Default::default()
            })
            .await?,
        ))
    }

    /// Build the initiator side: creates the channel, the offer, and
    /// spawns gathering; the bundled offer arrives as a `LocalSignal`.
    async fn initiate(events: mpsc::UnboundedSender<PeerEvent>) -> Result<Arc<Self>> {
        let pc = Self::new_peer_connection().await?;
        monitor_connection_state(&pc, events.clone(), "initiator");

        let dc_slot: SharedDc = Arc::new(RwLock::new(None));
        let dc = pc
            .create_data_channel("data", Some(ordered_dc_init()))
            .await?;
        attach_dc_handlers(&dc, events.clone());
        *dc_slot.write().await = Some(dc);

        let offer = pc.create_offer(None).await?;
        pc.set_local_description(offer).await?;

        spawn_signal_task(Arc::clone(&pc), SignalKind::Offer, events);

        Ok(Arc::new(Self {
            pc,
            dc: dc_slot,
            destroyed: AtomicBool::new(false),
        }))
    }

    /// Build the responder side from a decoded remote offer; the bundled
    /// answer arrives as a `LocalSignal`.
    async fn respond(
        offer: SignalBlob,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<Self>> {
        let pc = Self::new_peer_connection().await?;
        monitor_connection_state(&pc, events.clone(), "responder");

        // The initiator creates the channel; adopt it when it arrives.
        let dc_slot: SharedDc = Arc::new(RwLock::new(None));
        {
            let dc_slot = Arc::clone(&dc_slot);
            let events = events.clone();
            pc.on_data_channel(Box::new(move |dc| {
                let dc_slot = Arc::clone(&dc_slot);
                let events = events.clone();
                Box::pin(async move {
                    attach_dc_handlers(&dc, events);
                    *dc_slot.write().await = Some(dc);
                })
            }));
        }

        let desc = RTCSessionDescription::offer(offer.sdp).context("rejected remote offer")?;
        pc.set_remote_description(desc).await?;

        let answer = pc.create_answer(None).await?;
        pc.set_local_description(answer).await?;

        spawn_signal_task(Arc::clone(&pc), SignalKind::Answer, events);

        Ok(Arc::new(Self {
            pc,
            dc: dc_slot,
            destroyed: AtomicBool::new(false),
        }))
    }

    // ── ICE gathering (non-trickle) ──────────────────────────────────────

    /// Wait for ICE gathering to complete, then return the full local
    /// description with every candidate bundled in.
    async fn gather_local_description(pc: &Arc<RTCPeerConnection>) -> Result<String> {
        // Fast path: already complete.
        if pc.ice_gathering_state() == RTCIceGatheringState::Complete {
            return Self::local_sdp(pc).await;
        }

        let (tx, rx) = oneshot::channel::<()>();
        let tx = Arc::new(std::sync::Mutex::new(Some(tx)));

        pc.on_ice_gathering_state_change(Box::new(move |state| {
            let tx = Arc::clone(&tx);
            Box::pin(async move {
                if state == RTCIceGathererState::Complete {
                    if let Ok(mut guard) = tx.lock() {
                        if let Some(tx) = guard.take() {
                            let _ = tx.send(());
                        }
                    }
                }
            })
        }));

        // Re-check after registering the handler to close the race.
        if pc.ice_gathering_state() == RTCIceGatheringState::Complete {
            return Self::local_sdp(pc).await;
        }

        timeout(ICE_GATHER_TIMEOUT, rx)
            .await
            .context("ICE gathering timeout")?
            .context("ICE gathering channel closed")?;

        Self::local_sdp(pc).await
    }

    async fn local_sdp(pc: &Arc<RTCPeerConnection>) -> Result<String> {
        let desc = pc
            .local_description()
            .await
            .ok_or_else(|| anyhow!("no local description after ICE gathering"))?;
        Ok(desc.sdp)
    }

    async fn channel(&self) -> Result<Arc<RTCDataChannel>> {
        self.dc
            .read()
            .await
            .clone()
            .ok_or_else(|| anyhow!("data channel not available"))
    }
}

#[async_trait]
impl PeerTransport for WebRtcPeer {
    async fn send_text(&self, text: String) -> Result<()> {
        let dc = self.channel().await?;
        dc.send_text(text).await?;
        Ok(())
    }

    async fn send_binary(&self, data: Bytes) -> Result<()> {
        let dc = self.channel().await?;
        dc.send(&data).await?;
        Ok(())
    }

    async fn buffered_amount(&self) -> usize {
        match self.dc.read().await.as_ref() {
            Some(dc) => dc.buffered_amount().await,
            None => 0,
        }
    }

    fn is_alive(&self) -> bool {
        if self.destroyed.load(Ordering::Acquire) {
            return false;
        }
        !matches!(
            self.pc.connection_state(),
            RTCPeerConnectionState::Failed
                | RTCPeerConnectionState::Closed
                | RTCPeerConnectionState::Disconnected
        )
    }

    async fn apply_answer(&self, answer: SignalBlob) -> Result<()> {
        let desc = RTCSessionDescription::answer(answer.sdp).context("rejected remote answer")?;
        self.pc.set_remote_description(desc).await?;
        Ok(())
    }

    async fn close(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = self.pc.close().await {
            warn!(event = "peer_close_failed", error = %e, "Error closing peer connection");
        }
    }
}

// ── Handlers ──────────────────────────────────────────────────────────────

/// Gather in the background and publish the bundled local description.
fn spawn_signal_task(
    pc: Arc<RTCPeerConnection>,
    kind: SignalKind,
    events: mpsc::UnboundedSender<PeerEvent>,
) {
    tokio::spawn(async move {
        match WebRtcPeer::gather_local_description(&pc).await {
            Ok(sdp) => {
                info!(event = "ice_gathered", %kind, sdp_len = sdp.len(), "Local description ready");
                let _ = events.send(PeerEvent::LocalSignal(SignalBlob::new(kind, sdp)));
            }
            Err(e) => {
                error!(event = "ice_gather_failed", %kind, error = %e, "ICE gathering failed");
                let _ = events.send(PeerEvent::Failed(format!("ICE gathering failed: {e}")));
            }
        }
    });
}

fn monitor_connection_state(
    pc: &Arc<RTCPeerConnection>,
    events: mpsc::UnboundedSender<PeerEvent>,
    role: &'static str,
) {
    pc.on_peer_connection_state_change(Box::new(move |s| {
        let events = events.clone();
        Box::pin(async move {
            match s {
                RTCPeerConnectionState::Connected => {
                    info!(event = "peer_connected", role, "Peer connection established");
                }
                RTCPeerConnectionState::Failed => {
                    error!(event = "peer_failed", role, "Peer connection failed");
                    let _ = events.send(PeerEvent::Failed("Ice connection failed".to_owned()));
                }
                RTCPeerConnectionState::Disconnected => {
                    warn!(
                        event = "peer_disconnected",
                        role, "Transient disconnect (ICE may recover)"
                    );
                }
                RTCPeerConnectionState::Closed => {
                    info!(event = "peer_closed", role, "Peer connection closed");
                    let _ = events.send(PeerEvent::Closed);
                }
                _ => {}
            }
        })
    }));
}

/// Ordered, reliable data channel init.
fn ordered_dc_init() -> RTCDataChannelInit {
    RTCDataChannelInit {
        ordered: Some(true),
        ..Default::default()
    }
}

fn attach_dc_handlers(dc: &Arc<RTCDataChannel>, events: mpsc::UnboundedSender<PeerEvent>) {
    {
        let events = events.clone();
        let label = dc.label().to_string();
        dc.on_open(Box::new(move || {
            let events = events.clone();
            let label = label.clone();
            Box::pin(async move {
                info!(event = "dc_open", channel = %label, "Data channel open");
                let _ = events.send(PeerEvent::Connected);
            })
        }));
    }
    {
        let label = dc.label().to_string();
        dc.on_close(Box::new(move || {
            let label = label.clone();
            Box::pin(async move {
                warn!(event = "dc_closed", channel = %label, "Data channel closed by transport");
            })
        }));
    }
    {
        let events = events.clone();
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            let events = events.clone();
            Box::pin(async move {
                let payload = if msg.is_string {
                    match String::from_utf8(msg.data.to_vec()) {
                        Ok(text) => ChannelPayload::Text(text),
                        Err(_) => {
                            warn!(event = "dc_bad_text", "Dropping non-UTF-8 text frame");
                            return;
                        }
                    }
                } else {
                    ChannelPayload::Binary(msg.data)
                };
                let _ = events.send(PeerEvent::Message(payload));
            })
        }));
    }
}
