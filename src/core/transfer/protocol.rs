//! Wire protocol for the data channel.
//!
//! One ordered reliable stream multiplexes JSON control messages and raw
//! binary file chunks. JSON goes out as UTF-8 text frames; chunks as
//! binary frames. Inbound frames are discriminated by a successful JSON
//! parse — chunks are the default when parsing fails.

use anyhow::{anyhow, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Control messages exchanged on the data channel, JSON-tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlMessage {
    /// Announces the next file; sent once before its chunks.
    FileMeta {
        id: Uuid,
        name: String,
        size: u64,
        #[serde(rename = "totalChunks")]
        total_chunks: u32,
    },
    /// All chunks of the current file have been sent.
    ///
    /// `id` is always emitted by this implementation; absent ids from
    /// older peers resolve to the currently assembling transfer.
    FileComplete {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<Uuid>,
    },
    /// Abort the transfer with this id, in either direction.
    FileCancel { id: Uuid },
    /// Short text message.
    Chat { text: String, timestamp: u64 },
}

impl ControlMessage {
    /// Serialize for the wire. Control messages are always sent as text.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// A raw frame as delivered by the transport.
#[derive(Debug, Clone)]
pub enum ChannelPayload {
    Text(String),
    Binary(Bytes),
}

/// A classified inbound frame.
#[derive(Debug, Clone)]
pub enum InboundFrame {
    Control(ControlMessage),
    Chunk(Bytes),
}

/// Discriminate an inbound payload.
///
/// Text frames must parse as a control message. Binary frames that look
/// like UTF-8 JSON (`{`...`}`) are tried as control messages too — some
/// transports deliver text as bytes — and fall back to being chunks.
pub fn classify(payload: ChannelPayload) -> Result<InboundFrame> {
    match payload {
        ChannelPayload::Text(text) => serde_json::from_str(&text)
            .map(InboundFrame::Control)
            .map_err(|e| anyhow!("unparseable control message: {e}")),
        ChannelPayload::Binary(bytes) => {
            if looks_like_json(&bytes) {
                if let Ok(ctrl) = serde_json::from_slice(&bytes) {
                    return Ok(InboundFrame::Control(ctrl));
                }
            }
            Ok(InboundFrame::Chunk(bytes))
        }
    }
}

fn looks_like_json(bytes: &[u8]) -> bool {
    bytes.first() == Some(&b'{')
        && bytes.last() == Some(&b'}')
        && std::str::from_utf8(bytes).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_meta_wire_shape() {
        let id = Uuid::new_v4();
        let msg = ControlMessage::FileMeta {
            id,
            name: "a.bin".into(),
            size: 1024,
            total_chunks: 1,
        };
        let json: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "file-meta");
        assert_eq!(json["name"], "a.bin");
        assert_eq!(json["size"], 1024);
        assert_eq!(json["totalChunks"], 1);
        assert_eq!(json["id"], id.to_string());
    }

    #[test]
    fn test_file_complete_id_is_optional_on_receive() {
        let msg: ControlMessage = serde_json::from_str(r#"{"type":"file-complete"}"#).unwrap();
        assert_eq!(msg, ControlMessage::FileComplete { id: None });
    }

    #[test]
    fn test_tags_round_trip() {
        for msg in [
            ControlMessage::FileCancel { id: Uuid::new_v4() },
            ControlMessage::Chat {
                text: "hello".into(),
                timestamp: 1_700_000_000_000,
            },
            ControlMessage::FileComplete {
                id: Some(Uuid::new_v4()),
            },
        ] {
            let back: ControlMessage = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
            assert_eq!(back, msg);
        }
    }

    #[test]
    fn test_classify_text_control() {
        let frame = classify(ChannelPayload::Text(
            r#"{"type":"chat","text":"hi","timestamp":1}"#.into(),
        ))
        .unwrap();
        assert!(matches!(
            frame,
            InboundFrame::Control(ControlMessage::Chat { .. })
        ));
    }

    #[test]
    fn test_classify_json_bytes_as_control() {
        let bytes = Bytes::from_static(br#"{"type":"file-complete"}"#);
        let frame = classify(ChannelPayload::Binary(bytes)).unwrap();
        assert!(matches!(
            frame,
            InboundFrame::Control(ControlMessage::FileComplete { .. })
        ));
    }

    #[test]
    fn test_classify_binary_defaults_to_chunk() {
        // Brace-wrapped but not valid JSON: still a chunk.
        let ambiguous = Bytes::from_static(b"{\x00\x01\xff}");
        assert!(matches!(
            classify(ChannelPayload::Binary(ambiguous)).unwrap(),
            InboundFrame::Chunk(_)
        ));

        let plain = Bytes::from_static(&[0u8; 32]);
        assert!(matches!(
            classify(ChannelPayload::Binary(plain)).unwrap(),
            InboundFrame::Chunk(_)
        ));
    }

    #[test]
    fn test_classify_rejects_garbage_text() {
        assert!(classify(ChannelPayload::Text("not json".into())).is_err());
    }
}
