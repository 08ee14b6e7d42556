//! The send pump: one cooperative loop draining the outbound queue.
//!
//! Exactly one pump runs at a time, guarded by the shared `is_sending`
//! flag; a second `send_files` while the pump is active only appends to
//! the queue. The loop re-checks peer liveness and the cancelled set
//! after every suspension point (slice read, back-pressure sleep, send,
//! inter-file pause).

use super::engine::EngineEvent;
use super::protocol::ControlMessage;
use super::{EngineShared, SendQueueEntry};
use crate::core::config::{BACKPRESSURE_POLL, CHUNK_SIZE, HIGH_WATER_MARK, INTER_FILE_PAUSE};
use crate::core::connection::peer::PeerTransport;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Start the pump unless one is already running.
pub(crate) fn spawn_pump(
    shared: Arc<EngineShared>,
    peer: Arc<dyn PeerTransport>,
    events: mpsc::UnboundedSender<EngineEvent>,
) {
    if !shared.claim_pump() {
        debug!(event = "pump_already_running", "Send pump active; queue will drain");
        return;
    }
    tokio::spawn(async move {
        pump(&shared, &peer, &events).await;
        shared.release_pump();
        let _ = events.send(EngineEvent::PumpIdle);
    });
}

async fn pump(
    shared: &Arc<EngineShared>,
    peer: &Arc<dyn PeerTransport>,
    events: &mpsc::UnboundedSender<EngineEvent>,
) {
    while peer.is_alive() {
        let Some(entry) = shared.pop_front() else {
            break;
        };
        send_one(shared, peer, events, entry).await;
        // Give the receiver a window to finalize before the next meta.
        tokio::time::sleep(INTER_FILE_PAUSE).await;
    }
}

/// Outcome of one file; the pump proceeds to the next entry regardless,
/// exiting only when the peer itself is gone.
async fn send_one(
    shared: &Arc<EngineShared>,
    peer: &Arc<dyn PeerTransport>,
    events: &mpsc::UnboundedSender<EngineEvent>,
    entry: SendQueueEntry,
) {
    let SendQueueEntry { id, source } = entry;
    let size = source.len();
    let total_chunks = size.div_ceil(CHUNK_SIZE as u64) as u32;

    let _ = events.send(EngineEvent::SendStarted { id });
    info!(event = "send_start", %id, name = %source.name(), size, total_chunks, "Sending file");

    let meta = ControlMessage::FileMeta {
        id,
        name: source.name().to_owned(),
        size,
        total_chunks,
    };
    if !send_text(peer, events, id, &meta).await {
        return;
    }

    let mut tracker = super::progress::ProgressTracker::new(size);

    for i in 0..total_chunks as u64 {
        // Cancellation is checked first so it is bounded by one chunk.
        if shared.take_cancelled(id) {
            info!(event = "send_cancelled", %id, chunk = i, "Transfer cancelled locally");
            send_text(peer, events, id, &ControlMessage::FileCancel { id }).await;
            let _ = events.send(EngineEvent::Cancelled { id });
            return;
        }
        if !peer.is_alive() {
            fail(events, id, "peer connection lost");
            return;
        }

        let offset = i * CHUNK_SIZE as u64;
        let end = (offset + CHUNK_SIZE as u64).min(size);
        let chunk = match source.slice(offset, end).await {
            Ok(bytes) => bytes,
            Err(e) => {
                fail(events, id, &format!("read failed: {e}"));
                return;
            }
        };

        // Back-pressure: yield until the transport drains.
        while peer.buffered_amount().await > HIGH_WATER_MARK {
            if !peer.is_alive() {
                fail(events, id, "peer connection lost");
                return;
            }
            tokio::time::sleep(BACKPRESSURE_POLL).await;
        }

        let sent = chunk.len() as u64;
        if let Err(e) = peer.send_binary(chunk).await {
            fail(events, id, &format!("send failed: {e}"));
            return;
        }

        tracker.add(sent);
        let last = i + 1 == total_chunks as u64;
        if tracker.should_emit(last) {
            let _ = events.send(EngineEvent::Progress {
                id,
                sample: tracker.sample(),
            });
        }
    }

    if !send_text(peer, events, id, &ControlMessage::FileComplete { id: Some(id) }).await {
        return;
    }
    info!(event = "send_complete", %id, bytes = size, "File sent");
    let _ = events.send(EngineEvent::SendCompleted { id });
}

/// Send a control message; on failure mark the transfer failed and
/// report `false` so the caller abandons this file.
async fn send_text(
    peer: &Arc<dyn PeerTransport>,
    events: &mpsc::UnboundedSender<EngineEvent>,
    id: Uuid,
    msg: &ControlMessage,
) -> bool {
    let json = match msg.to_json() {
        Ok(json) => json,
        Err(e) => {
            fail(events, id, &format!("encode failed: {e}"));
            return false;
        }
    };
    if let Err(e) = peer.send_text(json).await {
        fail(events, id, &format!("send failed: {e}"));
        return false;
    }
    true
}

fn fail(events: &mpsc::UnboundedSender<EngineEvent>, id: Uuid, reason: &str) {
    warn!(event = "send_failed", %id, reason, "Transfer errored");
    let _ = events.send(EngineEvent::Failed {
        id,
        reason: reason.to_owned(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testutil::{FakePeer, SentFrame};
    use crate::core::transfer::MemorySource;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    struct Rig {
        shared: Arc<EngineShared>,
        fake: Arc<FakePeer>,
        peer: Arc<dyn PeerTransport>,
        events_tx: mpsc::UnboundedSender<EngineEvent>,
        events_rx: mpsc::UnboundedReceiver<EngineEvent>,
    }

    fn rig() -> Rig {
        let fake = FakePeer::shared();
        let peer: Arc<dyn PeerTransport> = fake.clone();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Rig {
            shared: Arc::new(EngineShared::new()),
            fake,
            peer,
            events_tx,
            events_rx,
        }
    }

    fn enqueue(rig: &Rig, id: Uuid, name: &str, bytes: Vec<u8>) {
        rig.shared.push(SendQueueEntry {
            id,
            source: Arc::new(MemorySource::new(name, bytes)),
        });
    }

    async fn run_pump(rig: &Rig) {
        pump(&rig.shared, &rig.peer, &rig.events_tx).await;
    }

    fn drain(rig: &mut Rig) -> Vec<EngineEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rig.events_rx.try_recv() {
            out.push(ev);
        }
        out
    }

    fn meta_json(frames: &[SentFrame], idx: usize) -> serde_json::Value {
        match &frames[idx] {
            SentFrame::Text(t) => serde_json::from_str(t).unwrap(),
            SentFrame::Binary(_) => panic!("expected text frame at {idx}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_kib_file_wire_shape() {
        let mut r = rig();
        let id = Uuid::new_v4();
        enqueue(&r, id, "a.bin", vec![0u8; 1024]);
        run_pump(&r).await;

        let frames = r.fake.sent_frames();
        assert_eq!(frames.len(), 3, "meta + chunk + complete");
        let meta = meta_json(&frames, 0);
        assert_eq!(meta["type"], "file-meta");
        assert_eq!(meta["size"], 1024);
        assert_eq!(meta["totalChunks"], 1);
        assert!(matches!(&frames[1], SentFrame::Binary(b) if b.len() == 1024));
        assert_eq!(meta_json(&frames, 2)["type"], "file-complete");

        let events = drain(&mut r);
        assert!(matches!(events.first(), Some(EngineEvent::SendStarted { .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, EngineEvent::SendCompleted { id: e } if *e == id)));
        let last_progress = events
            .iter()
            .rev()
            .find_map(|e| match e {
                EngineEvent::Progress { sample, .. } => Some(*sample),
                _ => None,
            })
            .unwrap();
        assert_eq!(last_progress.progress, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_96_kib_file_splits_into_two_chunks() {
        let mut r = rig();
        enqueue(&r, Uuid::new_v4(), "b.bin", vec![7u8; 98_304]);
        run_pump(&r).await;

        let meta = meta_json(&r.fake.sent_frames(), 0);
        assert_eq!(meta["totalChunks"], 2);
        assert_eq!(r.fake.sent_binary_lens(), vec![65_536, 32_768]);
        assert!(drain(&mut r)
            .iter()
            .any(|e| matches!(e, EngineEvent::SendCompleted { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_files_are_strictly_sequential() {
        let r = rig();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        enqueue(&r, a, "a", vec![1u8; 70_000]);
        enqueue(&r, b, "b", vec![2u8; 100]);
        run_pump(&r).await;

        // Wire order: meta_a, chunk, chunk, complete_a, meta_b, chunk, complete_b.
        let frames = r.fake.sent_frames();
        assert_eq!(frames.len(), 7);
        assert_eq!(meta_json(&frames, 0)["id"], a.to_string());
        assert_eq!(meta_json(&frames, 3)["type"], "file-complete");
        assert_eq!(meta_json(&frames, 3)["id"], a.to_string());
        assert_eq!(meta_json(&frames, 4)["id"], b.to_string());
        assert_eq!(meta_json(&frames, 6)["id"], b.to_string());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_flight_emits_one_file_cancel() {
        let mut r = rig();
        let id = Uuid::new_v4();
        // 10 chunks; cancel once three have been sent.
        enqueue(&r, id, "big", vec![0u8; 10 * 65_536]);
        {
            let shared = Arc::clone(&r.shared);
            *r.fake.on_binary.lock().unwrap() = Some(Box::new(move |n| {
                if n == 3 {
                    shared.mark_cancelled(id);
                }
            }));
        }
        run_pump(&r).await;

        let frames = r.fake.sent_frames();
        let cancels: Vec<_> = frames
            .iter()
            .filter(|f| matches!(f, SentFrame::Text(t) if t.contains("file-cancel")))
            .collect();
        assert_eq!(cancels.len(), 1);
        assert_eq!(r.fake.sent_binary_lens().len(), 3, "no chunks after cancel");
        assert!(drain(&mut r)
            .iter()
            .any(|e| matches!(e, EngineEvent::Cancelled { id: e } if *e == id)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_file_does_not_block_next_queued() {
        let r = rig();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        enqueue(&r, a, "a", vec![0u8; 65_536]);
        enqueue(&r, b, "b", vec![0u8; 64]);
        // Cancel A before the pump reaches it.
        r.shared.mark_cancelled(a);
        run_pump(&r).await;

        let frames = r.fake.sent_frames();
        // A: meta then file-cancel, no chunks. B: meta, chunk, complete.
        assert_eq!(meta_json(&frames, 0)["id"], a.to_string());
        assert!(matches!(&frames[1], SentFrame::Text(t) if t.contains("file-cancel")));
        assert_eq!(meta_json(&frames, 2)["id"], b.to_string());
        assert!(matches!(&frames[4], SentFrame::Text(t) if t.contains("file-complete")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backpressure_stalls_without_error() {
        let mut r = rig();
        enqueue(&r, Uuid::new_v4(), "x", vec![0u8; 1024]);
        r.fake.buffered.store(HIGH_WATER_MARK + 1, Ordering::Release);

        let shared = Arc::clone(&r.shared);
        let peer = Arc::clone(&r.peer);
        let tx = r.events_tx.clone();
        let handle = tokio::spawn(async move {
            pump(&shared, &peer, &tx).await;
        });

        // Well past many poll intervals: still stalled, nothing sent.
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(r.fake.sent_binary_lens().is_empty());
        assert!(!drain(&mut r)
            .iter()
            .any(|e| matches!(e, EngineEvent::Failed { .. })));

        // Drain the buffer: the chunk goes out and the file completes.
        r.fake.buffered.store(0, Ordering::Release);
        handle.await.unwrap();
        assert_eq!(r.fake.sent_binary_lens(), vec![1024]);
        assert!(drain(&mut r)
            .iter()
            .any(|e| matches!(e, EngineEvent::SendCompleted { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_peer_fails_transfer_and_exits() {
        let mut r = rig();
        let id = Uuid::new_v4();
        enqueue(&r, id, "x", vec![0u8; 65_536 * 2]);
        {
            let fake = Arc::clone(&r.fake);
            *r.fake.on_binary.lock().unwrap() = Some(Box::new(move |n| {
                if n == 1 {
                    fake.kill();
                }
            }));
        }
        run_pump(&r).await;

        assert!(drain(&mut r).iter().any(
            |e| matches!(e, EngineEvent::Failed { id: e, reason } if *e == id && reason.contains("lost"))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_error_marks_transfer_failed() {
        let mut r = rig();
        let id = Uuid::new_v4();
        enqueue(&r, id, "x", vec![0u8; 16]);
        r.fake.fail_sends.store(true, Ordering::Release);
        run_pump(&r).await;

        assert!(drain(&mut r)
            .iter()
            .any(|e| matches!(e, EngineEvent::Failed { id: e, .. } if *e == id)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_pump_is_single_flight() {
        let r = rig();
        enqueue(&r, Uuid::new_v4(), "x", vec![0u8; 16]);
        assert!(r.shared.claim_pump());
        // Second claim fails: a running pump owns the queue.
        assert!(!r.shared.claim_pump());
        r.shared.release_pump();
        assert!(r.shared.claim_pump());
    }
}
