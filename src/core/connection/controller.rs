//! Connection controller: owns exactly one peer and drives it through
//! the offer/answer handshake.
//!
//! The peer handle follows a destroy-and-replace discipline: every new
//! handshake bumps a generation counter, and events or timers from an
//! older peer are dropped on arrival. Nothing here throws across the
//! view-model boundary; failures become an [`ErrorKey`].

use super::peer::{PeerEvent, PeerFactory, PeerRole, PeerTransport};
use super::{ConnectionState, SignalStatus};
use crate::core::config::CONNECTION_TIMEOUT;
use crate::core::error::ErrorKey;
use crate::core::signal::{self, SignalBlob, SignalKind};
use crate::core::transfer::protocol::ChannelPayload;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Events delivered to the session loop by peers and timers, tagged with
/// the generation that produced them.
#[derive(Debug)]
pub enum ConnEvent {
    Peer { generation: u64, event: PeerEvent },
    Timeout { generation: u64 },
}

/// What the session loop should do after `handle_event`.
#[derive(Debug)]
pub enum ConnOutcome {
    /// Controller state may have changed; republish the view.
    Handled,
    /// The data channel delivered a frame for the transfer engine.
    Inbound(ChannelPayload),
    /// The peer just connected; start draining any queued sends.
    ConnectedNow,
    /// The connection ended (closed or failed); the peer is gone.
    Dropped,
    /// Stale-generation event; nothing happened.
    Ignored,
}

pub struct ConnectionController {
    factory: Arc<dyn PeerFactory>,
    events: mpsc::UnboundedSender<ConnEvent>,
    peer: Option<Arc<dyn PeerTransport>>,
    role: Option<PeerRole>,
    generation: u64,

    state: ConnectionState,
    signal_status: Option<SignalStatus>,
    local_signal: Option<String>,
    error: Option<ErrorKey>,
}

impl ConnectionController {
    pub fn new(factory: Arc<dyn PeerFactory>, events: mpsc::UnboundedSender<ConnEvent>) -> Self {
        Self {
            factory,
            events,
            peer: None,
            role: None,
            generation: 0,
            state: ConnectionState::Idle,
            signal_status: None,
            local_signal: None,
            error: None,
        }
    }

    // ── Read surface (mirrored into the view) ────────────────────────────

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn signal_status(&self) -> Option<SignalStatus> {
        self.signal_status
    }

    pub fn local_signal(&self) -> Option<&str> {
        self.local_signal.as_deref()
    }

    pub fn error(&self) -> Option<&ErrorKey> {
        self.error.as_ref()
    }

    pub fn peer(&self) -> Option<Arc<dyn PeerTransport>> {
        self.peer.clone()
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    // ── Commands ─────────────────────────────────────────────────────────

    /// Construct the initiator peer and start gathering the offer.
    pub async fn create_offer(&mut self) {
        if self.state != ConnectionState::Idle {
            warn!(event = "create_offer_ignored", state = ?self.state, "createOffer outside idle");
            return;
        }
        self.begin_handshake(PeerRole::Initiator, None, ErrorKey::InvalidOffer)
            .await;
    }

    /// Decode the pasted offer and construct the responder peer.
    pub async fn accept_offer(&mut self, encoded: &str) {
        if self.state != ConnectionState::Idle {
            warn!(event = "accept_offer_ignored", state = ?self.state, "acceptOffer outside idle");
            return;
        }
        let blob = match signal::decode(encoded) {
            Ok(blob) => blob,
            Err(e) => {
                warn!(event = "offer_decode_failed", error = %e, "Pasted offer did not decode");
                self.fail(ErrorKey::InvalidOfferFormat);
                return;
            }
        };
        if blob.kind != SignalKind::Offer {
            self.fail(ErrorKey::InvalidOffer);
            return;
        }
        self.begin_handshake(PeerRole::Responder, Some(blob), ErrorKey::InvalidOffer)
            .await;
    }

    /// Decode the pasted answer and feed it to the initiator peer.
    pub async fn accept_answer(&mut self, encoded: &str) {
        if self.state != ConnectionState::WaitingForPeer || self.role != Some(PeerRole::Initiator) {
            warn!(
                event = "accept_answer_ignored",
                state = ?self.state,
                "acceptAnswer outside waitingForPeer/initiator"
            );
            return;
        }
        let blob = match signal::decode(encoded) {
            Ok(blob) => blob,
            Err(e) => {
                warn!(event = "answer_decode_failed", error = %e, "Pasted answer did not decode");
                self.fail(ErrorKey::InvalidAnswerFormat);
                return;
            }
        };
        if blob.kind != SignalKind::Answer {
            self.fail(ErrorKey::InvalidAnswer);
            return;
        }
        let Some(peer) = self.peer.clone() else {
            self.fail(ErrorKey::InvalidAnswer);
            return;
        };
        if let Err(e) = peer.apply_answer(blob).await {
            self.fail(classify_handshake_error(&e, ErrorKey::InvalidAnswer));
            return;
        }
        self.state = ConnectionState::Connecting;
        self.arm_timeout();
    }

    /// Destroy the peer and return to `Idle`. Idempotent.
    pub async fn disconnect(&mut self) {
        self.generation += 1;
        if let Some(peer) = self.peer.take() {
            peer.close().await;
        }
        self.role = None;
        self.state = ConnectionState::Idle;
        self.signal_status = None;
        self.local_signal = None;
        self.error = None;
        info!(event = "disconnected", "Connection reset to idle");
    }

    // ── Event handling ───────────────────────────────────────────────────

    pub async fn handle_event(&mut self, event: ConnEvent) -> ConnOutcome {
        match event {
            ConnEvent::Peer { generation, event } => {
                if generation != self.generation {
                    return ConnOutcome::Ignored;
                }
                self.handle_peer_event(event).await
            }
            ConnEvent::Timeout { generation } => {
                if generation != self.generation
                    || !matches!(
                        self.state,
                        ConnectionState::Connecting | ConnectionState::WaitingForPeer
                    )
                {
                    return ConnOutcome::Ignored;
                }
                warn!(event = "connect_timeout", "No connection within the deadline");
                self.destroy_peer();
                self.fail(ErrorKey::ConnectionTimeout);
                ConnOutcome::Dropped
            }
        }
    }

    async fn handle_peer_event(&mut self, event: PeerEvent) -> ConnOutcome {
        match event {
            PeerEvent::LocalSignal(blob) => {
                match signal::encode(&blob) {
                    Ok(encoded) => {
                        info!(
                            event = "local_signal_ready",
                            kind = %blob.kind,
                            len = encoded.len(),
                            "Local signal encoded"
                        );
                        self.local_signal = Some(encoded);
                        self.signal_status = Some(SignalStatus::Ready);
                        self.state = ConnectionState::WaitingForPeer;
                    }
                    Err(e) => {
                        self.destroy_peer();
                        self.fail(ErrorKey::Raw(e.to_string()));
                    }
                }
                ConnOutcome::Handled
            }
            PeerEvent::Connected => {
                info!(event = "connected", "Data channel open");
                self.state = ConnectionState::Connected;
                self.signal_status = None;
                self.error = None;
                ConnOutcome::ConnectedNow
            }
            PeerEvent::Message(payload) => ConnOutcome::Inbound(payload),
            PeerEvent::Closed => {
                if matches!(self.state, ConnectionState::Idle | ConnectionState::Error) {
                    return ConnOutcome::Ignored;
                }
                info!(event = "peer_closed", "Peer connection closed");
                self.peer = None;
                self.role = None;
                self.state = ConnectionState::Disconnected;
                self.signal_status = None;
                ConnOutcome::Dropped
            }
            PeerEvent::Failed(msg) => {
                self.destroy_peer();
                self.fail(ErrorKey::from_peer_error(&msg));
                ConnOutcome::Dropped
            }
        }
    }

    // ── Internals ────────────────────────────────────────────────────────

    /// Shared tail of `create_offer` / `accept_offer`: replace the peer,
    /// enter `connecting`, start gathering and the connect deadline.
    async fn begin_handshake(
        &mut self,
        role: PeerRole,
        remote_offer: Option<SignalBlob>,
        reject_key: ErrorKey,
    ) {
        self.generation += 1;
        self.peer = None;
        self.role = Some(role);
        self.error = None;
        self.local_signal = None;
        self.state = ConnectionState::Connecting;
        self.signal_status = Some(SignalStatus::Gathering);

        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        self.spawn_event_forwarder(peer_rx);

        match self.factory.create(role, remote_offer, peer_tx).await {
            Ok(peer) => {
                self.peer = Some(peer);
                self.arm_timeout();
            }
            Err(e) => {
                warn!(event = "peer_create_failed", error = %e, "Peer construction failed");
                self.fail(classify_handshake_error(&e, reject_key));
            }
        }
    }

    /// Tag raw peer events with the owning generation and feed them into
    /// the session loop.
    fn spawn_event_forwarder(&self, mut peer_rx: mpsc::UnboundedReceiver<PeerEvent>) {
        let generation = self.generation;
        let events = self.events.clone();
        tokio::spawn(async move {
            while let Some(event) = peer_rx.recv().await {
                if events.send(ConnEvent::Peer { generation, event }).is_err() {
                    break;
                }
            }
        });
    }

    /// Arm the connect deadline for the current generation.
    fn arm_timeout(&self) {
        let generation = self.generation;
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(CONNECTION_TIMEOUT).await;
            let _ = events.send(ConnEvent::Timeout { generation });
        });
    }

    fn destroy_peer(&mut self) {
        self.generation += 1;
        if let Some(peer) = self.peer.take() {
            tokio::spawn(async move { peer.close().await });
        }
        self.role = None;
    }

    fn fail(&mut self, key: ErrorKey) {
        self.state = ConnectionState::Error;
        self.signal_status = None;
        self.error = Some(key);
    }
}

/// Map a handshake failure to its error key: environment problems win,
/// everything else is the caller's reject key.
fn classify_handshake_error(e: &anyhow::Error, reject_key: ErrorKey) -> ErrorKey {
    match ErrorKey::from_peer_error(&e.to_string()) {
        key @ (ErrorKey::IceFailed | ErrorKey::WebrtcUnsupported) => key,
        _ => reject_key,
    }
}
