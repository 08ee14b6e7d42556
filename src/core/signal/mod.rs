//! Out-of-band signaling: the compact offer/answer string.
//!
//! Each side of the handshake produces exactly one session-description
//! blob; this module shrinks it into a string small enough to render as a
//! scannable QR code and restores it losslessly on the other end.

mod codec;

pub use codec::{decode, encode, CodecError};

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Which half of the handshake a signal carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Offer,
    Answer,
}

impl Display for SignalKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalKind::Offer => f.write_str("offer"),
            SignalKind::Answer => f.write_str("answer"),
        }
    }
}

/// A session-description blob, produced once by the local peer after ICE
/// gathering completes and consumed once by the remote peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalBlob {
    pub kind: SignalKind,
    pub sdp: String,
}

impl SignalBlob {
    pub fn new(kind: SignalKind, sdp: impl Into<String>) -> Self {
        Self {
            kind,
            sdp: sdp.into(),
        }
    }
}
