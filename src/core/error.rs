//! Error keys surfaced at the view-model boundary.
//!
//! The UI localizes well-known keys and shows anything else verbatim, so
//! the core never formats user-facing prose: it classifies failures into
//! this enum and lets the shell render them.

use std::fmt::{Display, Formatter};

/// A classified error surfaced through the view-model's `error` field.
///
/// The `Display` form is the stable string key consumed by the UI. Errors
/// are never thrown across the view-model boundary; they become a value
/// here or a status on a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKey {
    /// 180 s elapsed in `connecting` without reaching `connected`.
    ConnectionTimeout,
    /// The peer library reported an ICE failure.
    IceFailed,
    /// The host environment cannot provide a WebRTC peer.
    WebrtcUnsupported,
    /// The pasted offer decoded but the peer rejected it.
    InvalidOffer,
    /// The pasted offer failed base64 / inflate / JSON decoding.
    InvalidOfferFormat,
    /// The pasted answer decoded but the peer rejected it.
    InvalidAnswer,
    /// The pasted answer failed base64 / inflate / JSON decoding.
    InvalidAnswerFormat,
    /// Anything unclassified: the raw message passes through verbatim.
    Raw(String),
}

impl ErrorKey {
    /// Classify a peer-library error message into a key.
    pub fn from_peer_error(msg: &str) -> Self {
        if msg.contains("Ice connection") || msg.contains("ICE") {
            ErrorKey::IceFailed
        } else if msg.to_ascii_lowercase().contains("unsupported")
            || msg.to_ascii_lowercase().contains("not supported")
        {
            ErrorKey::WebrtcUnsupported
        } else {
            ErrorKey::Raw(msg.to_owned())
        }
    }
}

impl Display for ErrorKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKey::ConnectionTimeout => f.write_str("connectionTimeout"),
            ErrorKey::IceFailed => f.write_str("iceFailed"),
            ErrorKey::WebrtcUnsupported => f.write_str("webrtcUnsupported"),
            ErrorKey::InvalidOffer => f.write_str("invalidOffer"),
            ErrorKey::InvalidOfferFormat => f.write_str("invalidOfferFormat"),
            ErrorKey::InvalidAnswer => f.write_str("invalidAnswer"),
            ErrorKey::InvalidAnswerFormat => f.write_str("invalidAnswerFormat"),
            ErrorKey::Raw(msg) => f.write_str(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_keys_render_stable_strings() {
        assert_eq!(ErrorKey::ConnectionTimeout.to_string(), "connectionTimeout");
        assert_eq!(ErrorKey::InvalidOfferFormat.to_string(), "invalidOfferFormat");
        assert_eq!(ErrorKey::Raw("boom".into()).to_string(), "boom");
    }

    #[test]
    fn test_peer_error_classification() {
        assert_eq!(
            ErrorKey::from_peer_error("Ice connection failed: no candidates"),
            ErrorKey::IceFailed
        );
        assert_eq!(
            ErrorKey::from_peer_error("ICE failed"),
            ErrorKey::IceFailed
        );
        assert_eq!(
            ErrorKey::from_peer_error("WebRTC is not supported here"),
            ErrorKey::WebrtcUnsupported
        );
        assert_eq!(
            ErrorKey::from_peer_error("something else"),
            ErrorKey::Raw("something else".into())
        );
    }
}
