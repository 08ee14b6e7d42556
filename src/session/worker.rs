//! The session event loop: one task owning all state mutations.
//!
//! Commands from the facade, connection events from peers/timers, and
//! engine events from the send pump all drain into this loop; after each
//! event the fresh [`ViewState`] is published through the watch channel.

use super::state::{
    now_ms, ChatMessage, Direction, FileTransfer, MessageSender, TransferStatus, ViewState,
};
use super::{Command, WakeLock};
use crate::core::connection::controller::{ConnEvent, ConnOutcome, ConnectionController};
use crate::core::connection::ConnectionState;
use crate::core::transfer::engine::EngineEvent;
use crate::core::transfer::protocol::{self, ControlMessage};
use crate::core::transfer::{FileSource, TransferEngine};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};
use uuid::Uuid;

pub(crate) struct Worker {
    pub commands: mpsc::UnboundedReceiver<Command>,
    pub conn_events: mpsc::UnboundedReceiver<ConnEvent>,
    pub engine_events: mpsc::UnboundedReceiver<EngineEvent>,
    pub controller: ConnectionController,
    pub engine: TransferEngine,
    pub view_tx: watch::Sender<ViewState>,
    pub wake_lock: Option<Arc<dyn WakeLock>>,

    pub transfers: Vec<FileTransfer>,
    pub messages: Vec<ChatMessage>,
    pub backgrounded: bool,
    pub wake_held: bool,
}

impl Worker {
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                cmd = self.commands.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd).await,
                        // Facade dropped: tear down and exit.
                        None => {
                            self.controller.disconnect().await;
                            break;
                        }
                    }
                }
                Some(event) = self.conn_events.recv() => self.handle_conn_event(event).await,
                Some(event) = self.engine_events.recv() => self.handle_engine_event(event),
            }
            self.update_wake_lock();
            self.publish();
        }
    }

    // ── Commands ─────────────────────────────────────────────────────────

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::CreateOffer => self.controller.create_offer().await,
            Command::AcceptOffer(encoded) => self.controller.accept_offer(&encoded).await,
            Command::AcceptAnswer(encoded) => self.controller.accept_answer(&encoded).await,
            Command::SendFiles(sources) => self.send_files(sources),
            Command::CancelTransfer(id) => self.cancel_transfer(id).await,
            Command::SendMessage(text) => self.send_message(text).await,
            Command::Disconnect => {
                self.controller.disconnect().await;
                self.engine.clear();
                self.transfers.clear();
                self.messages.clear();
            }
            Command::ClearError => self.controller.clear_error(),
            Command::SetBackgrounded(value) => self.backgrounded = value,
        }
    }

    fn send_files(&mut self, sources: Vec<Arc<dyn FileSource>>) {
        for source in sources {
            let id = Uuid::new_v4();
            self.transfers
                .push(FileTransfer::queued_send(id, source.name(), source.len()));
            self.engine.enqueue(id, source);
        }
        self.maybe_start_pump();
    }

    async fn cancel_transfer(&mut self, id: Uuid) {
        let Some(transfer) = self.transfers.iter().find(|t| t.id == id) else {
            warn!(event = "cancel_unknown_transfer", %id, "Cancel for unknown id");
            return;
        };
        if transfer.status.is_terminal() {
            return;
        }
        let direction = transfer.direction;
        match direction {
            Direction::Send => {
                if self.engine.cancel_queued(id) {
                    // Never hit the wire; nothing to tell the peer.
                    self.finish_transfer(id, TransferStatus::Cancelled);
                } else {
                    // In flight: the pump observes the flag before its
                    // next chunk and emits the file-cancel.
                    self.engine.cancel_inflight_send(id);
                }
            }
            Direction::Receive => {
                let peer = self.controller.peer();
                self.engine.cancel_receive(id, peer.as_ref()).await;
            }
        }
    }

    async fn send_message(&mut self, text: String) {
        let Some(peer) = self.controller.peer() else {
            warn!(event = "chat_without_peer", "sendMessage while not connected");
            return;
        };
        if self.controller.state() != ConnectionState::Connected {
            warn!(event = "chat_not_connected", "sendMessage before connected");
            return;
        }
        let timestamp = now_ms();
        crate::core::transfer::engine::send_control(
            &peer,
            &ControlMessage::Chat {
                text: text.clone(),
                timestamp,
            },
        )
        .await;
        self.messages.push(ChatMessage {
            id: Uuid::new_v4(),
            text,
            sender: MessageSender::Me,
            timestamp,
        });
    }

    // ── Connection events ────────────────────────────────────────────────

    async fn handle_conn_event(&mut self, event: ConnEvent) {
        match self.controller.handle_event(event).await {
            ConnOutcome::Inbound(payload) => match protocol::classify(payload) {
                Ok(frame) => {
                    if let Some(peer) = self.controller.peer() {
                        self.engine.handle_inbound(frame, &peer).await;
                    }
                }
                Err(e) => warn!(event = "inbound_classify_failed", error = %e, "Dropping frame"),
            },
            ConnOutcome::ConnectedNow => self.maybe_start_pump(),
            ConnOutcome::Dropped | ConnOutcome::Handled | ConnOutcome::Ignored => {}
        }
    }

    // ── Engine events ────────────────────────────────────────────────────

    fn handle_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::SendStarted { id } => {
                if let Some(t) = self.transfer_mut(id) {
                    if !t.status.is_terminal() {
                        t.status = TransferStatus::Transferring;
                        t.started_at = Some(now_ms());
                    }
                }
            }
            EngineEvent::ReceiveStarted { id, name, size } => {
                self.transfers
                    .push(FileTransfer::started_receive(id, name, size));
            }
            EngineEvent::Progress { id, sample } => {
                if let Some(t) = self.transfer_mut(id) {
                    if t.status == TransferStatus::Transferring {
                        // Progress never decreases, and 100 is reserved
                        // for the completed status.
                        t.progress = t.progress.max(sample.progress.min(99));
                        t.speed = sample.speed;
                        t.eta = sample.eta;
                    }
                }
            }
            EngineEvent::SendCompleted { id } | EngineEvent::ReceiveCompleted { id } => {
                if let Some(t) = self.transfer_mut(id) {
                    if !t.status.is_terminal() {
                        t.progress = 100;
                    }
                }
                self.finish_transfer(id, TransferStatus::Completed);
            }
            EngineEvent::Cancelled { id } => {
                self.finish_transfer(id, TransferStatus::Cancelled);
            }
            EngineEvent::Failed { id, reason } => {
                debug!(event = "transfer_failed", %id, %reason, "Transfer errored");
                self.finish_transfer(id, TransferStatus::Error);
            }
            EngineEvent::Truncated { id } => {
                self.finish_transfer(id, TransferStatus::Error);
            }
            EngineEvent::Chat { text, timestamp } => {
                self.messages.push(ChatMessage {
                    id: Uuid::new_v4(),
                    text,
                    sender: MessageSender::Peer,
                    timestamp,
                });
            }
            EngineEvent::PumpIdle => {
                // Entries enqueued in the pump's shutdown window restart it.
                self.maybe_start_pump();
            }
        }
    }

    // ── Helpers ──────────────────────────────────────────────────────────

    fn maybe_start_pump(&mut self) {
        if self.controller.state() != ConnectionState::Connected || self.engine.queue_is_empty() {
            return;
        }
        if let Some(peer) = self.controller.peer() {
            self.engine.start_pump(peer);
        }
    }

    fn transfer_mut(&mut self, id: Uuid) -> Option<&mut FileTransfer> {
        self.transfers.iter_mut().find(|t| t.id == id)
    }

    /// Move a transfer into a terminal status, once.
    fn finish_transfer(&mut self, id: Uuid, status: TransferStatus) {
        if let Some(t) = self.transfer_mut(id) {
            if !t.status.is_terminal() {
                t.status = status;
                t.ended_at = Some(now_ms());
            }
        }
    }

    /// Hold the wake lock exactly while transfer activity exists.
    fn update_wake_lock(&mut self) {
        let Some(lock) = self.wake_lock.as_ref() else {
            return;
        };
        let want = self.engine.is_sending() || self.engine.has_assembly();
        if want && !self.wake_held {
            // Failure is non-fatal: proceed without the lock.
            self.wake_held = lock.acquire();
        } else if !want && self.wake_held {
            lock.release();
            self.wake_held = false;
        }
    }

    fn publish(&self) {
        let view = ViewState {
            connection_state: self.controller.state(),
            signal_status: self.controller.signal_status(),
            local_signal: self.controller.local_signal().map(str::to_owned),
            error: self.controller.error().cloned(),
            transfers: self.transfers.clone(),
            messages: self.messages.clone(),
            background_warning: self.backgrounded
                && matches!(
                    self.controller.state(),
                    ConnectionState::Connecting | ConnectionState::WaitingForPeer
                ),
        };
        self.view_tx.send_if_modified(|current| {
            if *current == view {
                false
            } else {
                *current = view;
                true
            }
        });
    }
}
