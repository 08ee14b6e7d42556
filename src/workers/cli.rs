//! Headless console driver around the [`Session`].
//!
//! This is the process shell, not a UI: it prints the local signal for
//! the user to ship (QR or clipboard is up to them), reads the pasted
//! remote signal and chat lines from stdin, reports transfer progress,
//! and writes completed receives into the output directory.

use crate::app::{Args, Role};
use qrdrop::core::config::MAX_QR_SIGNAL_LEN;
use qrdrop::core::connection::ConnectionState;
use qrdrop::core::transfer::{DiskSource, FileSource};
use qrdrop::session::{Direction, MessageSender, Session, TransferStatus, ViewState};
use qrdrop::utils::format::{format_eta, format_rate, format_size};
use qrdrop::utils::stop::StopSignal;
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

pub async fn run(args: Args, stop: StopSignal) -> Result<()> {
    let Some(role) = args.role.clone() else {
        return Err(anyhow!(
            "missing subcommand; try `qrdrop offer` or `qrdrop accept <OFFER>`"
        ));
    };

    let session = Session::with_webrtc();
    let mut view_rx = session.watch();

    // One stdin stream: the pasted signal while signaling, chat afterwards.
    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line_tx.send(line).is_err() {
                break;
            }
        }
    });

    let files = match &role {
        Role::Offer { files } => files.clone(),
        Role::Accept { files, .. } => files.clone(),
    };

    match role {
        Role::Offer { .. } => session.create_offer(),
        Role::Accept { offer, .. } => {
            let offer = if offer == "-" {
                println!("Paste the offer and press enter:");
                line_rx
                    .recv()
                    .await
                    .ok_or_else(|| anyhow!("stdin closed before an offer was pasted"))?
            } else {
                offer
            };
            session.accept_offer(offer.trim());
        }
    }

    let mut console = Console::new(args.output_dir());
    let mut files_queued = false;

    loop {
        tokio::select! {
            _ = stop.wait() => {
                session.disconnect();
                println!("Disconnected.");
                break;
            }
            changed = view_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = view_rx.borrow_and_update().clone();
                console.render(&view, &session).await;

                if view.connection_state == ConnectionState::Error {
                    let key = view.error.map(|e| e.to_string()).unwrap_or_default();
                    return Err(anyhow!("connection failed: {key}"));
                }
                if view.connection_state == ConnectionState::Connected && !files_queued {
                    files_queued = true;
                    queue_files(&session, &files).await;
                }
            }
            Some(line) = line_rx.recv() => {
                let line = line.trim().to_owned();
                if line.is_empty() {
                    continue;
                }
                match session.snapshot().connection_state {
                    ConnectionState::WaitingForPeer => session.accept_answer(line),
                    ConnectionState::Connected => session.send_message(line),
                    state => warn!(event = "stdin_ignored", ?state, "Ignoring input in this state"),
                }
            }
        }
    }
    Ok(())
}

async fn queue_files(session: &Session, paths: &[PathBuf]) {
    let mut sources: Vec<Arc<dyn FileSource>> = Vec::with_capacity(paths.len());
    for path in paths {
        match DiskSource::open(path).await {
            Ok(source) => {
                println!(
                    "Queued {} ({})",
                    source.name(),
                    format_size(source.len())
                );
                sources.push(Arc::new(source));
            }
            Err(e) => eprintln!("Skipping {}: {e:#}", path.display()),
        }
    }
    if !sources.is_empty() {
        session.send_files(sources);
    }
}

/// Incremental console renderer: prints only what changed since the
/// previous view snapshot.
struct Console {
    output_dir: PathBuf,
    signal_printed: bool,
    connected_printed: bool,
    progress: HashMap<Uuid, u8>,
    finished: HashMap<Uuid, TransferStatus>,
    messages_shown: usize,
}

impl Console {
    fn new(output_dir: PathBuf) -> Self {
        Self {
            output_dir,
            signal_printed: false,
            connected_printed: false,
            progress: HashMap::new(),
            finished: HashMap::new(),
            messages_shown: 0,
        }
    }

    async fn render(&mut self, view: &ViewState, session: &Session) {
        if let Some(signal) = &view.local_signal {
            if !self.signal_printed {
                self.signal_printed = true;
                println!("Ship this signal to your peer:\n\n{signal}\n");
                if signal.len() > MAX_QR_SIGNAL_LEN {
                    println!("(too long for a QR code; use copy/paste)");
                }
                if view.connection_state == ConnectionState::WaitingForPeer {
                    println!("Waiting for the peer's reply. Paste it here when you have it.");
                }
            }
        }

        if view.connection_state == ConnectionState::Connected && !self.connected_printed {
            self.connected_printed = true;
            println!("Connected. Type to chat.");
        }

        for transfer in &view.transfers {
            self.render_transfer(transfer, session).await;
        }

        let start = self.messages_shown.min(view.messages.len());
        for message in &view.messages[start..] {
            if message.sender == MessageSender::Peer {
                println!("peer: {}", message.text);
            }
        }
        self.messages_shown = view.messages.len();

        if view.background_warning {
            eprintln!("warning: app is backgrounded while connecting; the handshake may stall");
        }
    }

    async fn render_transfer(&mut self, t: &qrdrop::session::FileTransfer, session: &Session) {
        if t.status == TransferStatus::Transferring {
            let last = self.progress.entry(t.id).or_insert(0);
            // Console cadence: every 10 points is plenty.
            if t.progress >= *last + 10 {
                *last = t.progress;
                println!(
                    "{} {}: {}% of {} at {} (eta {})",
                    direction_arrow(t.direction),
                    t.name,
                    t.progress,
                    format_size(t.size),
                    format_rate(t.speed),
                    format_eta(t.eta),
                );
            }
            return;
        }

        if t.status.is_terminal() && self.finished.get(&t.id) != Some(&t.status) {
            self.finished.insert(t.id, t.status);
            match t.status {
                TransferStatus::Completed => {
                    if t.direction == Direction::Receive {
                        self.save_received(t.id, session).await;
                    } else {
                        println!("Sent {} ({})", t.name, format_size(t.size));
                    }
                }
                TransferStatus::Cancelled => println!("Cancelled {}", t.name),
                TransferStatus::Error => println!("Failed {}", t.name),
                _ => {}
            }
        }
    }

    async fn save_received(&self, id: Uuid, session: &Session) {
        let Some(file) = session.take_received_file(id) else {
            return;
        };
        let path = self.output_dir.join(safe_file_name(&file.name));
        match tokio::fs::write(&path, &file.bytes).await {
            Ok(()) => println!(
                "Received {} ({}) -> {}",
                file.name,
                format_size(file.bytes.len() as u64),
                path.display()
            ),
            Err(e) => eprintln!("Failed to save {}: {e}", file.name),
        }
    }
}

fn direction_arrow(direction: Direction) -> &'static str {
    match direction {
        Direction::Send => "->",
        Direction::Receive => "<-",
    }
}

/// Keep only the final path component of a peer-supplied name.
fn safe_file_name(name: &str) -> String {
    Path::new(&name.replace('\\', "/"))
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty() && n != "." && n != "..")
        .unwrap_or_else(|| "file".to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_file_name_strips_directories() {
        assert_eq!(safe_file_name("report.pdf"), "report.pdf");
        assert_eq!(safe_file_name("../../etc/passwd"), "passwd");
        assert_eq!(safe_file_name("dir\\evil.exe"), "evil.exe");
        assert_eq!(safe_file_name(""), "file");
        assert_eq!(safe_file_name(".."), "file");
    }
}
