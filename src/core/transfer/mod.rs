//! Chunked transfer engine: queueing, back-pressure, progress, cancel.
//!
//! One file is in flight at a time; control messages (chat, cancel)
//! interleave between chunks on the same ordered channel. No transfer
//! logic lives outside this module.

pub mod engine;
pub mod progress;
pub mod protocol;
pub mod sender;
pub mod source;

pub use engine::{EngineEvent, ReceivedFile, TransferEngine};
pub use source::{DiskSource, FileSource, MemorySource};

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// One queued outbound file.
pub struct SendQueueEntry {
    pub id: Uuid,
    pub source: Arc<dyn FileSource>,
}

/// State shared between the session worker and the send pump task.
///
/// The pump re-reads the cancelled set and queue after every suspension,
/// so both sides only ever hold these locks for short, non-awaiting
/// critical sections.
pub(crate) struct EngineShared {
    queue: Mutex<VecDeque<SendQueueEntry>>,
    cancelled: Mutex<HashSet<Uuid>>,
    is_sending: AtomicBool,
}

impl EngineShared {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            cancelled: Mutex::new(HashSet::new()),
            is_sending: AtomicBool::new(false),
        }
    }

    pub fn push(&self, entry: SendQueueEntry) {
        self.queue.lock().unwrap().push_back(entry);
    }

    pub fn pop_front(&self) -> Option<SendQueueEntry> {
        self.queue.lock().unwrap().pop_front()
    }

    /// Remove a still-queued entry. Returns whether it was present —
    /// if so, no wire message is needed (the peer never learned of it).
    pub fn remove_queued(&self, id: Uuid) -> bool {
        let mut queue = self.queue.lock().unwrap();
        let before = queue.len();
        queue.retain(|e| e.id != id);
        queue.len() != before
    }

    pub fn queue_is_empty(&self) -> bool {
        self.queue.lock().unwrap().is_empty()
    }

    pub fn mark_cancelled(&self, id: Uuid) {
        self.cancelled.lock().unwrap().insert(id);
    }

    /// Consume a pending cancellation for `id`.
    pub fn take_cancelled(&self, id: Uuid) -> bool {
        self.cancelled.lock().unwrap().remove(&id)
    }

    pub fn is_sending(&self) -> bool {
        self.is_sending.load(Ordering::Acquire)
    }

    /// Claim the pump guard; `false` means a pump is already running and
    /// the caller's entries will be drained by it.
    pub fn claim_pump(&self) -> bool {
        self.is_sending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn release_pump(&self) {
        self.is_sending.store(false, Ordering::Release);
    }

    /// Hard reset on disconnect.
    pub fn clear(&self) {
        self.queue.lock().unwrap().clear();
        self.cancelled.lock().unwrap().clear();
    }
}
