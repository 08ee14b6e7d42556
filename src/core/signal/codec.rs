//! Signal codec: SDP minification + DEFLATE + base64.
//!
//! Encoding pipeline: minify the SDP (drop media-section attribute lines
//! that the data-channel-only session never uses), shorten the JSON keys
//! (`type` -> `t`, `sdp` -> `s`), serialize, DEFLATE, base64. Decoding
//! reverses each step and restores CRLF line endings — the peer library
//! silently rejects descriptions whose lines are not CRLF-terminated.

use super::{SignalBlob, SignalKind};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::io::{Read, Write};

/// SDP line prefixes dropped during minification. These only describe
/// audio/video media sections; the lone data channel never references
/// them. `a=msid:` carries the trailing colon so `a=msid-semantic:`
/// (which the peer library does require) is retained.
const STRIP_PREFIXES: [&str; 6] = [
    "a=rtpmap",
    "a=fmtp",
    "a=rtcp-fb",
    "a=ssrc",
    "a=extmap",
    "a=msid:",
];

/// Where in the decode pipeline a signal string failed.
///
/// The connection controller maps any variant to the `invalid*Format`
/// error keys; the distinction exists for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Not valid base64 (standard alphabet, padded).
    Base64,
    /// Base64 decoded but the payload would not inflate.
    Inflate,
    /// Inflated (or raw, for legacy blobs) bytes are not the expected JSON.
    Json,
}

impl Display for CodecError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecError::Base64 => f.write_str("signal is not valid base64"),
            CodecError::Inflate => f.write_str("signal payload failed to inflate"),
            CodecError::Json => f.write_str("signal payload is not a session description"),
        }
    }
}

impl std::error::Error for CodecError {}

/// On-wire JSON shape: single-letter keys keep the QR payload small.
/// `alias` accepts the long-key form emitted by legacy builds.
#[derive(Serialize, Deserialize)]
struct WireBlob {
    #[serde(alias = "type")]
    t: SignalKind,
    #[serde(alias = "sdp")]
    s: String,
}

/// Encode a signal blob into a compact URL-safe ASCII string.
pub fn encode(blob: &SignalBlob) -> Result<String, CodecError> {
    let wire = WireBlob {
        t: blob.kind,
        s: minify_sdp(&blob.sdp),
    };
    let json = serde_json::to_vec(&wire).map_err(|_| CodecError::Json)?;

    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(&json).map_err(|_| CodecError::Inflate)?;
    let compressed = encoder.finish().map_err(|_| CodecError::Inflate)?;

    Ok(BASE64.encode(compressed))
}

/// Decode a signal string back into a blob with CRLF-correct SDP.
///
/// Falls back once to plain base64-of-JSON to tolerate legacy blobs that
/// skipped the DEFLATE stage.
pub fn decode(encoded: &str) -> Result<SignalBlob, CodecError> {
    let raw = BASE64
        .decode(encoded.trim())
        .map_err(|_| CodecError::Base64)?;

    let wire = match inflate(&raw) {
        Ok(json) => serde_json::from_slice::<WireBlob>(&json).map_err(|_| CodecError::Json)?,
        // Legacy blobs: base64 directly over JSON, long or short keys.
        Err(_) => serde_json::from_slice::<WireBlob>(&raw).map_err(|_| CodecError::Json)?,
    };

    Ok(SignalBlob {
        kind: wire.t,
        sdp: restore_crlf(&wire.s),
    })
}

fn inflate(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut decoder = DeflateDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|_| CodecError::Inflate)?;
    Ok(out)
}

/// Drop every SDP line the data-channel session does not need.
///
/// Lines are trimmed, empty lines and strip-list lines removed, the rest
/// kept verbatim, rejoined with CRLF and a trailing CRLF.
fn minify_sdp(sdp: &str) -> String {
    let mut out = String::with_capacity(sdp.len());
    for line in sdp.replace("\r\n", "\n").split('\n') {
        let line = line.trim();
        if line.is_empty() || STRIP_PREFIXES.iter().any(|p| line.starts_with(p)) {
            continue;
        }
        out.push_str(line);
        out.push_str("\r\n");
    }
    out
}

/// Normalize every line terminator to CRLF and guarantee the blob ends
/// with one. The peer library rejects anything else without an error.
fn restore_crlf(sdp: &str) -> String {
    let mut out = sdp.replace("\r\n", "\n").replace('\n', "\r\n");
    if !out.ends_with("\r\n") {
        out.push_str("\r\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A realistic minimal data-channel SDP: ICE credentials, fingerprint,
    /// candidates, plus media-section noise that minification must drop.
    const SAMPLE_SDP: &str = "v=0\r\n\
        o=- 5498186869896684180 2 IN IP4 127.0.0.1\r\n\
        s=-\r\n\
        t=0 0\r\n\
        a=group:BUNDLE 0\r\n\
        a=msid-semantic: WMS\r\n\
        m=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\n\
        c=IN IP4 0.0.0.0\r\n\
        a=ice-ufrag:4ZcD\r\n\
        a=ice-pwd:2/1muCWoOi3uLifh0NuRHlkL\r\n\
        a=fingerprint:sha-256 49:66:12:17:0D:1C:91:AE:57:4C:C6:36:DD:D5:97:D2\r\n\
        a=setup:actpass\r\n\
        a=mid:0\r\n\
        a=sctp-port:5000\r\n\
        a=candidate:1467250027 1 udp 2122260223 192.168.0.196 46243 typ host\r\n\
        a=rtpmap:111 opus/48000/2\r\n\
        a=fmtp:111 minptime=10\r\n\
        a=rtcp-fb:111 transport-cc\r\n\
        a=ssrc:1234 cname:foo\r\n\
        a=extmap:1 urn:ietf:params:rtp-hdrext:ssrc-audio-level\r\n\
        a=msid:stream track\r\n";

    #[test]
    fn test_round_trip_keeps_needed_lines() {
        let blob = SignalBlob::new(SignalKind::Offer, SAMPLE_SDP);
        let decoded = decode(&encode(&blob).unwrap()).unwrap();

        assert_eq!(decoded.kind, SignalKind::Offer);
        for kept in [
            "a=ice-ufrag:4ZcD",
            "a=ice-pwd:2/1muCWoOi3uLifh0NuRHlkL",
            "a=fingerprint:sha-256",
            "a=setup:actpass",
            "a=mid:0",
            "a=sctp-port:5000",
            "a=candidate:1467250027",
            "a=msid-semantic: WMS",
        ] {
            assert!(decoded.sdp.contains(kept), "missing line: {kept}");
        }
    }

    #[test]
    fn test_round_trip_strips_media_noise() {
        let blob = SignalBlob::new(SignalKind::Answer, SAMPLE_SDP);
        let decoded = decode(&encode(&blob).unwrap()).unwrap();

        for dropped in [
            "a=rtpmap",
            "a=fmtp",
            "a=rtcp-fb",
            "a=ssrc",
            "a=extmap",
            "a=msid:stream",
        ] {
            assert!(!decoded.sdp.contains(dropped), "should drop: {dropped}");
        }
    }

    #[test]
    fn test_every_restored_line_ends_with_crlf() {
        let blob = SignalBlob::new(SignalKind::Offer, SAMPLE_SDP);
        let decoded = decode(&encode(&blob).unwrap()).unwrap();

        assert!(decoded.sdp.ends_with("\r\n"));
        for line in decoded.sdp.split_inclusive("\r\n") {
            assert!(line.ends_with("\r\n"));
            // No bare LF may survive inside a line.
            assert!(!line.trim_end_matches("\r\n").contains('\n'));
        }
    }

    #[test]
    fn test_encode_is_deterministic_and_compact() {
        let blob = SignalBlob::new(SignalKind::Offer, SAMPLE_SDP);
        let a = encode(&blob).unwrap();
        let b = encode(&blob).unwrap();
        assert_eq!(a, b);
        assert!(a.len() < SAMPLE_SDP.len());
        assert!(a.is_ascii());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_eq!(decode("not base64!").unwrap_err(), CodecError::Base64);
        // Valid base64, but neither deflate nor JSON.
        assert_eq!(decode("AAAA").unwrap_err(), CodecError::Json);
        assert!(decode("").is_err());
    }

    #[test]
    fn test_legacy_plain_base64_fallback() {
        let json = r#"{"type":"answer","sdp":"v=0\na=mid:0"}"#;
        let encoded = BASE64.encode(json);
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded.kind, SignalKind::Answer);
        assert_eq!(decoded.sdp, "v=0\r\na=mid:0\r\n");
    }

    #[test]
    fn test_minify_trims_and_drops_empty_lines() {
        let messy = "v=0\n\n  a=mid:0  \n\na=setup:active\n";
        let blob = SignalBlob::new(SignalKind::Offer, messy);
        let decoded = decode(&encode(&blob).unwrap()).unwrap();
        assert_eq!(decoded.sdp, "v=0\r\na=mid:0\r\na=setup:active\r\n");
    }
}
