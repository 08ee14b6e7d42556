//! View-model state: the reactive snapshot consumed by the shell.

use crate::core::connection::{ConnectionState, SignalStatus};
use crate::core::error::ErrorKey;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Which end of the channel a transfer or message originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Send,
    Receive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Queued,
    Transferring,
    Completed,
    Cancelled,
    Error,
}

impl TransferStatus {
    /// Terminal statuses never change again (except `ended_at` stamping).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferStatus::Completed | TransferStatus::Cancelled | TransferStatus::Error
        )
    }
}

/// One transfer record, updated in place for the lifetime of the session.
#[derive(Debug, Clone, PartialEq)]
pub struct FileTransfer {
    pub id: Uuid,
    pub name: String,
    pub size: u64,
    pub direction: Direction,
    pub status: TransferStatus,
    /// 0–100; monotonically non-decreasing while transferring.
    pub progress: u8,
    /// Bytes per second, cumulative average since start.
    pub speed: f64,
    /// Seconds remaining; `None` until there is a measurable rate.
    pub eta: Option<u64>,
    /// Epoch milliseconds.
    pub started_at: Option<u64>,
    pub ended_at: Option<u64>,
}

impl FileTransfer {
    pub fn queued_send(id: Uuid, name: impl Into<String>, size: u64) -> Self {
        Self {
            id,
            name: name.into(),
            size,
            direction: Direction::Send,
            status: TransferStatus::Queued,
            progress: 0,
            speed: 0.0,
            eta: None,
            started_at: None,
            ended_at: None,
        }
    }

    pub fn started_receive(id: Uuid, name: impl Into<String>, size: u64) -> Self {
        Self {
            id,
            name: name.into(),
            size,
            direction: Direction::Receive,
            status: TransferStatus::Transferring,
            progress: 0,
            speed: 0.0,
            eta: None,
            started_at: Some(now_ms()),
            ended_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSender {
    Me,
    Peer,
}

/// One chat line. Append-only; never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub id: Uuid,
    pub text: String,
    pub sender: MessageSender,
    /// Epoch milliseconds.
    pub timestamp: u64,
}

/// The full reactive snapshot published after every state change.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ViewState {
    pub connection_state: ConnectionState,
    pub signal_status: Option<SignalStatus>,
    /// The encoded local offer/answer, ready to render as QR or copy.
    pub local_signal: Option<String>,
    pub error: Option<ErrorKey>,
    /// Ordered by insertion.
    pub transfers: Vec<FileTransfer>,
    /// Ordered by receipt.
    pub messages: Vec<ChatMessage>,
    /// Raised while the host is backgrounded during signaling.
    pub background_warning: bool,
}

impl ViewState {
    pub fn transfer(&self, id: Uuid) -> Option<&FileTransfer> {
        self.transfers.iter().find(|t| t.id == id)
    }

    pub fn transfer_named(&self, name: &str) -> Option<&FileTransfer> {
        self.transfers.iter().find(|t| t.name == name)
    }
}

/// Current time as epoch milliseconds.
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
