//! Connection establishment: the offer/answer state machine and the
//! peer transport it drives.

pub mod controller;
pub mod peer;
pub mod webrtc;

pub use controller::{ConnEvent, ConnOutcome, ConnectionController};

use serde::Serialize;

/// The session's connection lifecycle. Exactly one value at a time;
/// recoverable errors return to `Idle` via explicit reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    #[default]
    Idle,
    WaitingForPeer,
    Connecting,
    Connected,
    Disconnected,
    Error,
}

/// Progress of local signal generation, distinct from [`ConnectionState`]
/// so the shell can show "generating" vs "waiting for the peer's reply".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SignalStatus {
    Gathering,
    Ready,
}
