//! Transfer engine state and the receive path.
//!
//! The engine owns the send queue, the single in-progress receive
//! assembly, and the cancelled-id set. The session worker drives it from
//! one task; only the send pump (see [`super::sender`]) runs elsewhere,
//! and it talks back exclusively through [`EngineEvent`]s.

use super::progress::{ProgressSample, ProgressTracker};
use super::protocol::{ControlMessage, InboundFrame};
use super::{EngineShared, FileSource, SendQueueEntry};
use crate::core::connection::peer::PeerTransport;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Events the engine publishes to the session worker.
#[derive(Debug)]
pub enum EngineEvent {
    SendStarted { id: Uuid },
    ReceiveStarted { id: Uuid, name: String, size: u64 },
    Progress { id: Uuid, sample: ProgressSample },
    SendCompleted { id: Uuid },
    ReceiveCompleted { id: Uuid },
    Cancelled { id: Uuid },
    Failed { id: Uuid, reason: String },
    /// A new `file-meta` arrived while this assembly was still open;
    /// the prior transfer is truncated.
    Truncated { id: Uuid },
    Chat { text: String, timestamp: u64 },
    /// The send pump exited (queue drained, peer gone, or cancelled out).
    PumpIdle,
}

/// A fully received file, held in memory until the shell saves it.
#[derive(Debug, Clone)]
pub struct ReceivedFile {
    pub name: String,
    pub bytes: Bytes,
}

/// The single in-progress receive. Created on `file-meta`, destroyed on
/// `file-complete` / `file-cancel` / truncation.
struct IncomingAssembly {
    id: Uuid,
    name: String,
    size: u64,
    total_chunks: u32,
    chunks: Vec<Bytes>,
    received_bytes: u64,
    tracker: ProgressTracker,
}

pub struct TransferEngine {
    shared: Arc<EngineShared>,
    assembly: Option<IncomingAssembly>,
    /// Completed receives, keyed by transfer id; shared with the session
    /// handle so the shell can take them without round-tripping the worker.
    received: Arc<Mutex<HashMap<Uuid, ReceivedFile>>>,
    events: mpsc::UnboundedSender<EngineEvent>,
}

impl TransferEngine {
    pub fn new(events: mpsc::UnboundedSender<EngineEvent>) -> Self {
        Self {
            shared: Arc::new(EngineShared::new()),
            assembly: None,
            received: Arc::new(Mutex::new(HashMap::new())),
            events,
        }
    }

    pub(crate) fn shared(&self) -> Arc<EngineShared> {
        Arc::clone(&self.shared)
    }

    /// Handle to the completed-receive store, for the session facade.
    pub fn received_store(&self) -> Arc<Mutex<HashMap<Uuid, ReceivedFile>>> {
        Arc::clone(&self.received)
    }

    // ── Send side ─────────────────────────────────────────────────────────

    /// Append a file to the send queue.
    pub fn enqueue(&self, id: Uuid, source: Arc<dyn FileSource>) {
        self.shared.push(SendQueueEntry { id, source });
    }

    /// Start the send pump if it is not already running. Re-entry while a
    /// pump is active is a no-op: the running pump drains new entries.
    pub fn start_pump(&self, peer: Arc<dyn PeerTransport>) {
        super::sender::spawn_pump(self.shared(), peer, self.events.clone());
    }

    pub fn is_sending(&self) -> bool {
        self.shared.is_sending()
    }

    pub fn queue_is_empty(&self) -> bool {
        self.shared.queue_is_empty()
    }

    pub fn has_assembly(&self) -> bool {
        self.assembly.is_some()
    }

    /// True when the incoming assembly is for `id`.
    pub fn is_assembling(&self, id: Uuid) -> bool {
        self.assembly.as_ref().is_some_and(|a| a.id == id)
    }

    /// Cancel a still-queued send. Returns whether it was dequeued; no
    /// wire message is emitted in that case.
    pub fn cancel_queued(&self, id: Uuid) -> bool {
        self.shared.remove_queued(id)
    }

    /// Flag an in-flight send for cancellation; the pump observes the
    /// flag before its next chunk and emits the `file-cancel`.
    pub fn cancel_inflight_send(&self, id: Uuid) {
        self.shared.mark_cancelled(id);
    }

    /// Cancel the in-progress receive for `id`: notify the peer, discard
    /// the assembly.
    pub async fn cancel_receive(&mut self, id: Uuid, peer: Option<&Arc<dyn PeerTransport>>) {
        if !self.is_assembling(id) {
            return;
        }
        self.assembly = None;
        if let Some(peer) = peer {
            send_control(peer, &ControlMessage::FileCancel { id }).await;
        }
        let _ = self.events.send(EngineEvent::Cancelled { id });
    }

    /// Hard reset: queue, cancelled set, assembly, and received files.
    pub fn clear(&mut self) {
        self.shared.clear();
        self.assembly = None;
        self.received.lock().unwrap().clear();
    }

    // ── Receive side ──────────────────────────────────────────────────────

    /// Dispatch one classified inbound frame.
    pub async fn handle_inbound(&mut self, frame: InboundFrame, peer: &Arc<dyn PeerTransport>) {
        match frame {
            InboundFrame::Control(ctrl) => self.handle_control(ctrl, peer).await,
            InboundFrame::Chunk(bytes) => self.handle_chunk(bytes),
        }
    }

    async fn handle_control(&mut self, ctrl: ControlMessage, _peer: &Arc<dyn PeerTransport>) {
        match ctrl {
            ControlMessage::FileMeta {
                id,
                name,
                size,
                total_chunks,
            } => {
                // A second meta with an open assembly means the sender
                // abandoned the prior file without closing it.
                if let Some(prev) = self.assembly.take() {
                    warn!(
                        event = "assembly_truncated",
                        prior = %prev.id,
                        next = %id,
                        "New file-meta while assembling; prior transfer truncated"
                    );
                    let _ = self.events.send(EngineEvent::Truncated { id: prev.id });
                }
                info!(event = "recv_start", %id, %name, size, total_chunks, "Incoming file");
                self.assembly = Some(IncomingAssembly {
                    id,
                    name: name.clone(),
                    size,
                    total_chunks,
                    chunks: Vec::with_capacity(total_chunks as usize),
                    received_bytes: 0,
                    tracker: ProgressTracker::new(size),
                });
                let _ = self
                    .events
                    .send(EngineEvent::ReceiveStarted { id, name, size });
            }
            ControlMessage::FileComplete { id } => {
                let Some(assembly) = self.assembly.take() else {
                    warn!(event = "stray_file_complete", "file-complete with no open assembly");
                    return;
                };
                // An absent id resolves to the one open assembly.
                if let Some(id) = id {
                    if id != assembly.id {
                        warn!(
                            event = "file_complete_mismatch",
                            got = %id, assembling = %assembly.id,
                            "file-complete for a different id; dropping assembly"
                        );
                        return;
                    }
                }
                // A cancel raced the final chunks: honor it over completion.
                if self.shared.take_cancelled(assembly.id) {
                    let _ = self
                        .events
                        .send(EngineEvent::Cancelled { id: assembly.id });
                    return;
                }
                let id = assembly.id;
                let mut bytes = Vec::with_capacity(assembly.size as usize);
                for chunk in &assembly.chunks {
                    bytes.extend_from_slice(chunk);
                }
                info!(
                    event = "recv_complete",
                    %id,
                    name = %assembly.name,
                    bytes = bytes.len(),
                    "File received"
                );
                self.received.lock().unwrap().insert(
                    id,
                    ReceivedFile {
                        name: assembly.name,
                        bytes: Bytes::from(bytes),
                    },
                );
                let _ = self.events.send(EngineEvent::ReceiveCompleted { id });
            }
            ControlMessage::FileCancel { id } => {
                info!(event = "remote_cancel", %id, "Peer cancelled transfer");
                if self.is_assembling(id) {
                    self.assembly = None;
                }
                // If it names one of our in-flight sends, the pump stops
                // at its next chunk boundary.
                self.shared.mark_cancelled(id);
                self.shared.remove_queued(id);
                let _ = self.events.send(EngineEvent::Cancelled { id });
            }
            ControlMessage::Chat { text, timestamp } => {
                let _ = self.events.send(EngineEvent::Chat { text, timestamp });
            }
        }
    }

    fn handle_chunk(&mut self, bytes: Bytes) {
        let Some(assembly) = self.assembly.as_mut() else {
            warn!(
                event = "stray_chunk",
                len = bytes.len(),
                "Binary chunk with no open assembly; dropping"
            );
            return;
        };
        assembly.received_bytes += bytes.len() as u64;
        assembly.tracker.add(bytes.len() as u64);
        assembly.chunks.push(bytes);

        let last = assembly.chunks.len() as u32 >= assembly.total_chunks
            || assembly.received_bytes >= assembly.size;
        if assembly.tracker.should_emit(last) {
            let _ = self.events.send(EngineEvent::Progress {
                id: assembly.id,
                sample: assembly.tracker.sample(),
            });
        }
    }
}

/// Best-effort control send; failures surface via the peer's own events.
pub(crate) async fn send_control(peer: &Arc<dyn PeerTransport>, msg: &ControlMessage) {
    match msg.to_json() {
        Ok(json) => {
            if let Err(e) = peer.send_text(json).await {
                warn!(event = "control_send_failed", error = %e, "Failed to send control message");
            }
        }
        Err(e) => warn!(event = "control_encode_failed", error = %e, "Failed to encode control message"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testutil::FakePeer;

    fn engine() -> (TransferEngine, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (TransferEngine::new(tx), rx)
    }

    fn peer_pair() -> (Arc<FakePeer>, Arc<dyn PeerTransport>) {
        let fake = FakePeer::shared();
        let transport: Arc<dyn PeerTransport> = fake.clone();
        (fake, transport)
    }

    fn meta(id: Uuid, name: &str, size: u64, total_chunks: u32) -> InboundFrame {
        InboundFrame::Control(ControlMessage::FileMeta {
            id,
            name: name.into(),
            size,
            total_chunks,
        })
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<EngineEvent>) -> Vec<EngineEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[tokio::test]
    async fn test_receive_assembles_file() {
        let (mut eng, mut rx) = engine();
        let (_fake, peer) = peer_pair();
        let id = Uuid::new_v4();

        eng.handle_inbound(meta(id, "a.bin", 1024, 1), &peer).await;
        eng.handle_inbound(InboundFrame::Chunk(Bytes::from(vec![0u8; 1024])), &peer)
            .await;
        eng.handle_inbound(
            InboundFrame::Control(ControlMessage::FileComplete { id: Some(id) }),
            &peer,
        )
        .await;

        let events = drain(&mut rx);
        assert!(matches!(events[0], EngineEvent::ReceiveStarted { id: e, .. } if e == id));
        assert!(events
            .iter()
            .any(|e| matches!(e, EngineEvent::ReceiveCompleted { id: e } if *e == id)));

        let store = eng.received_store();
        let file = store.lock().unwrap().remove(&id).unwrap();
        assert_eq!(file.name, "a.bin");
        assert_eq!(file.bytes.len(), 1024);
        assert!(!eng.has_assembly());
    }

    #[tokio::test]
    async fn test_file_complete_without_id_uses_open_assembly() {
        let (mut eng, mut rx) = engine();
        let (_fake, peer) = peer_pair();
        let id = Uuid::new_v4();

        eng.handle_inbound(meta(id, "x", 4, 1), &peer).await;
        eng.handle_inbound(InboundFrame::Chunk(Bytes::from_static(b"abcd")), &peer)
            .await;
        eng.handle_inbound(
            InboundFrame::Control(ControlMessage::FileComplete { id: None }),
            &peer,
        )
        .await;

        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, EngineEvent::ReceiveCompleted { id: e } if *e == id)));
        assert_eq!(
            eng.received_store().lock().unwrap()[&id].bytes.as_ref(),
            b"abcd"
        );
    }

    #[tokio::test]
    async fn test_remote_cancel_discards_assembly() {
        let (mut eng, mut rx) = engine();
        let (_fake, peer) = peer_pair();
        let id = Uuid::new_v4();

        eng.handle_inbound(meta(id, "big", 1 << 20, 16), &peer).await;
        eng.handle_inbound(InboundFrame::Chunk(Bytes::from(vec![1u8; 65536])), &peer)
            .await;
        eng.handle_inbound(
            InboundFrame::Control(ControlMessage::FileCancel { id }),
            &peer,
        )
        .await;

        assert!(!eng.has_assembly());
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, EngineEvent::Cancelled { id: e } if *e == id)));
        assert!(eng.received_store().lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_second_meta_truncates_prior_assembly() {
        let (mut eng, mut rx) = engine();
        let (_fake, peer) = peer_pair();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        eng.handle_inbound(meta(first, "one", 100, 1), &peer).await;
        eng.handle_inbound(meta(second, "two", 100, 1), &peer).await;

        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, EngineEvent::Truncated { id } if *id == first)));
        assert!(eng.is_assembling(second));
    }

    #[tokio::test]
    async fn test_local_receive_cancel_notifies_peer() {
        let (mut eng, mut rx) = engine();
        let (fake, peer) = peer_pair();
        let id = Uuid::new_v4();

        eng.handle_inbound(meta(id, "doc", 2048, 1), &peer).await;
        eng.cancel_receive(id, Some(&peer)).await;

        assert!(!eng.has_assembly());
        let sent = fake.sent_texts();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("file-cancel"));
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, EngineEvent::Cancelled { id: e } if *e == id)));
    }

    #[tokio::test]
    async fn test_chat_passes_through() {
        let (mut eng, mut rx) = engine();
        let (_fake, peer) = peer_pair();
        eng.handle_inbound(
            InboundFrame::Control(ControlMessage::Chat {
                text: "hello".into(),
                timestamp: 42,
            }),
            &peer,
        )
        .await;
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [EngineEvent::Chat { text, timestamp: 42 }] if text == "hello"
        ));
    }

    #[tokio::test]
    async fn test_stray_frames_are_ignored() {
        let (mut eng, mut rx) = engine();
        let (_fake, peer) = peer_pair();
        eng.handle_inbound(InboundFrame::Chunk(Bytes::from_static(b"junk")), &peer)
            .await;
        eng.handle_inbound(
            InboundFrame::Control(ControlMessage::FileComplete { id: None }),
            &peer,
        )
        .await;
        assert!(drain(&mut rx).is_empty());
    }
}
