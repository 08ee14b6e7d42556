//! In-memory fakes for the peer seam, used by engine, controller, and
//! session tests. No network is involved anywhere in the test suite.

use crate::core::connection::peer::{PeerEvent, PeerFactory, PeerRole, PeerTransport};
use crate::core::signal::SignalBlob;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// A frame captured by [`FakePeer`].
#[derive(Debug, Clone)]
pub enum SentFrame {
    Text(String),
    Binary(Bytes),
}

/// Scriptable in-memory peer.
#[derive(Default)]
pub struct FakePeer {
    alive: AtomicBool,
    /// Value returned by `buffered_amount`.
    pub buffered: AtomicUsize,
    /// When set, every send fails.
    pub fail_sends: AtomicBool,
    sent: Mutex<Vec<SentFrame>>,
    binary_count: AtomicUsize,
    /// Invoked after each successful binary send with the running count;
    /// lets tests trigger mid-transfer actions (e.g. cancellation).
    #[allow(clippy::type_complexity)]
    pub on_binary: Mutex<Option<Box<dyn Fn(usize) + Send>>>,
    /// Answers applied via `apply_answer`.
    pub answers: Mutex<Vec<SignalBlob>>,
}

impl FakePeer {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self {
            alive: AtomicBool::new(true),
            ..Self::default()
        })
    }

    pub fn kill(&self) {
        self.alive.store(false, Ordering::Release);
    }

    pub fn sent_frames(&self) -> Vec<SentFrame> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|f| match f {
                SentFrame::Text(t) => Some(t.clone()),
                SentFrame::Binary(_) => None,
            })
            .collect()
    }

    pub fn sent_binary_lens(&self) -> Vec<usize> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|f| match f {
                SentFrame::Binary(b) => Some(b.len()),
                SentFrame::Text(_) => None,
            })
            .collect()
    }
}

#[async_trait]
impl PeerTransport for FakePeer {
    async fn send_text(&self, text: String) -> Result<()> {
        if self.fail_sends.load(Ordering::Acquire) {
            return Err(anyhow!("send failed"));
        }
        self.sent.lock().unwrap().push(SentFrame::Text(text));
        Ok(())
    }

    async fn send_binary(&self, data: Bytes) -> Result<()> {
        if self.fail_sends.load(Ordering::Acquire) {
            return Err(anyhow!("send failed"));
        }
        self.sent.lock().unwrap().push(SentFrame::Binary(data));
        let n = self.binary_count.fetch_add(1, Ordering::AcqRel) + 1;
        if let Some(hook) = self.on_binary.lock().unwrap().as_ref() {
            hook(n);
        }
        Ok(())
    }

    async fn buffered_amount(&self) -> usize {
        self.buffered.load(Ordering::Acquire)
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    async fn apply_answer(&self, answer: SignalBlob) -> Result<()> {
        self.answers.lock().unwrap().push(answer);
        Ok(())
    }

    async fn close(&self) {
        self.kill();
    }
}

/// A created-peer record the test can drive events through.
pub struct FakeHandshake {
    pub role: PeerRole,
    pub remote_offer: Option<SignalBlob>,
    pub peer: Arc<FakePeer>,
    pub events: mpsc::UnboundedSender<PeerEvent>,
}

/// Factory capturing every created peer so tests can script the
/// handshake from the outside.
#[derive(Default)]
pub struct FakeFactory {
    pub fail_create: AtomicBool,
    pub handshakes: Mutex<Vec<FakeHandshake>>,
}

impl FakeFactory {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn created_count(&self) -> usize {
        self.handshakes.lock().unwrap().len()
    }

    /// The most recent handshake's peer and event sender.
    pub fn last(&self) -> (Arc<FakePeer>, mpsc::UnboundedSender<PeerEvent>) {
        let guard = self.handshakes.lock().unwrap();
        let last = guard.last().expect("no peer created");
        (Arc::clone(&last.peer), last.events.clone())
    }
}

#[async_trait]
impl PeerFactory for FakeFactory {
    async fn create(
        &self,
        role: PeerRole,
        remote_offer: Option<SignalBlob>,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn PeerTransport>> {
        if self.fail_create.load(Ordering::Acquire) {
            return Err(anyhow!("WebRTC is not supported in this environment"));
        }
        let peer = FakePeer::shared();
        self.handshakes.lock().unwrap().push(FakeHandshake {
            role,
            remote_offer,
            peer: Arc::clone(&peer),
            events: events.clone(),
        });
        Ok(peer)
    }
}
