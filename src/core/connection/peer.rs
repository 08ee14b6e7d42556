//! Transport seam between the connection controller and the peer library.
//!
//! The controller and the transfer engine speak to the peer only through
//! [`PeerTransport`] and consume its lifecycle through [`PeerEvent`]s, so
//! everything above this line is testable without a network.

use crate::core::signal::SignalBlob;
use crate::core::transfer::protocol::ChannelPayload;
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Which side of the handshake this peer plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    /// Creates the offer and later consumes the answer.
    Initiator,
    /// Consumes the offer and creates the answer.
    Responder,
}

/// Lifecycle and data events pushed by a peer to its owner.
#[derive(Debug)]
pub enum PeerEvent {
    /// The complete local description, emitted exactly once after ICE
    /// gathering finishes (non-trickle: all candidates bundled).
    LocalSignal(SignalBlob),
    /// The data channel is open on both ends.
    Connected,
    /// A frame arrived on the data channel.
    Message(ChannelPayload),
    /// The connection closed.
    Closed,
    /// The connection failed; the message feeds error classification.
    Failed(String),
}

/// Handle to one live peer connection with a single ordered reliable
/// data channel.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Send a UTF-8 text frame (JSON control messages).
    async fn send_text(&self, text: String) -> Result<()>;

    /// Send a binary frame (one file chunk).
    async fn send_binary(&self, data: Bytes) -> Result<()>;

    /// Bytes currently queued in the outbound transport buffer.
    async fn buffered_amount(&self) -> usize;

    /// Whether the connection can still carry data.
    fn is_alive(&self) -> bool;

    /// Apply the remote answer (initiator only).
    async fn apply_answer(&self, answer: SignalBlob) -> Result<()>;

    /// Tear the connection down. Idempotent.
    async fn close(&self);
}

/// Constructs peers. The production factory builds WebRTC peers; tests
/// inject scripted fakes.
#[async_trait]
pub trait PeerFactory: Send + Sync {
    /// Create a peer for `role`. Responders receive the decoded remote
    /// offer. `events` carries the peer's lifecycle back to its owner;
    /// the local signal arrives there once gathering completes.
    async fn create(
        &self,
        role: PeerRole,
        remote_offer: Option<SignalBlob>,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn PeerTransport>>;
}
