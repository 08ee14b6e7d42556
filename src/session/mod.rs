//! The session: reactive view-model plus imperative commands.
//!
//! [`Session`] is the single entry point for a shell (TUI, desktop, CLI):
//! commands are synchronous to dispatch and all effects propagate through
//! the watched [`ViewState`]. Internally one worker task owns every state
//! mutation; see [`worker`].

pub mod state;
mod worker;

pub use state::{
    ChatMessage, Direction, FileTransfer, MessageSender, TransferStatus, ViewState,
};

use crate::core::connection::controller::ConnectionController;
use crate::core::connection::peer::PeerFactory;
use crate::core::connection::webrtc::WebRtcFactory;
use crate::core::transfer::{FileSource, ReceivedFile, TransferEngine};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;
use worker::Worker;

/// Host wake-lock hook: held while transfers are active so the device
/// does not sleep mid-transfer. Acquisition failure is non-fatal.
pub trait WakeLock: Send + Sync {
    /// Try to acquire; `false` means unavailable and is tolerated.
    fn acquire(&self) -> bool;
    fn release(&self);
}

/// Commands dispatched from the facade into the worker loop.
pub(crate) enum Command {
    CreateOffer,
    AcceptOffer(String),
    AcceptAnswer(String),
    SendFiles(Vec<Arc<dyn FileSource>>),
    CancelTransfer(Uuid),
    SendMessage(String),
    Disconnect,
    ClearError,
    SetBackgrounded(bool),
}

/// Handle to a running session.
///
/// Cheap to clone-read: `snapshot()` returns the current view, `watch()`
/// a change-notified receiver. Dropping the last handle tears the
/// session down.
pub struct Session {
    commands: mpsc::UnboundedSender<Command>,
    view: watch::Receiver<ViewState>,
    received: Arc<Mutex<HashMap<Uuid, ReceivedFile>>>,
}

impl Session {
    /// Build a session over a custom peer factory (tests, embedding).
    pub fn new(factory: Arc<dyn PeerFactory>, wake_lock: Option<Arc<dyn WakeLock>>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (conn_tx, conn_rx) = mpsc::unbounded_channel();
        let (engine_tx, engine_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(ViewState::default());

        let controller = ConnectionController::new(factory, conn_tx);
        let engine = TransferEngine::new(engine_tx);
        let received = engine.received_store();

        let worker = Worker {
            commands: cmd_rx,
            conn_events: conn_rx,
            engine_events: engine_rx,
            controller,
            engine,
            view_tx,
            wake_lock,
            transfers: Vec::new(),
            messages: Vec::new(),
            backgrounded: false,
            wake_held: false,
        };
        tokio::spawn(worker.run());

        Self {
            commands: cmd_tx,
            view: view_rx,
            received,
        }
    }

    /// Build the production session backed by WebRTC.
    pub fn with_webrtc() -> Self {
        Self::new(Arc::new(WebRtcFactory), None)
    }

    // ── Reactive surface ─────────────────────────────────────────────────

    /// The current view snapshot.
    pub fn snapshot(&self) -> ViewState {
        self.view.borrow().clone()
    }

    /// A receiver notified on every published change.
    pub fn watch(&self) -> watch::Receiver<ViewState> {
        self.view.clone()
    }

    /// Take a completed receive out of the session (the shell saves it).
    pub fn take_received_file(&self, id: Uuid) -> Option<ReceivedFile> {
        self.received.lock().unwrap().remove(&id)
    }

    // ── Commands ─────────────────────────────────────────────────────────

    pub fn create_offer(&self) {
        self.dispatch(Command::CreateOffer);
    }

    pub fn accept_offer(&self, encoded: impl Into<String>) {
        self.dispatch(Command::AcceptOffer(encoded.into()));
    }

    pub fn accept_answer(&self, encoded: impl Into<String>) {
        self.dispatch(Command::AcceptAnswer(encoded.into()));
    }

    pub fn send_files(&self, sources: Vec<Arc<dyn FileSource>>) {
        self.dispatch(Command::SendFiles(sources));
    }

    pub fn cancel_transfer(&self, id: Uuid) {
        self.dispatch(Command::CancelTransfer(id));
    }

    pub fn send_message(&self, text: impl Into<String>) {
        self.dispatch(Command::SendMessage(text.into()));
    }

    /// Destroy the peer, clear queues, transfers, and messages; return to
    /// idle. Idempotent.
    pub fn disconnect(&self) {
        self.dispatch(Command::Disconnect);
    }

    /// Alias of [`Session::disconnect`].
    pub fn reset_connection(&self) {
        self.disconnect();
    }

    pub fn clear_error(&self) {
        self.dispatch(Command::ClearError);
    }

    /// Inform the session of host visibility; while signaling, a warning
    /// is surfaced because a backgrounded host may miss the handshake.
    pub fn set_backgrounded(&self, value: bool) {
        self.dispatch(Command::SetBackgrounded(value));
    }

    fn dispatch(&self, cmd: Command) {
        // The worker outlives every facade handle; a send can only fail
        // during runtime shutdown, where dropping the command is fine.
        let _ = self.commands.send(cmd);
    }
}
