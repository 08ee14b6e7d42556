//! Centralized configuration constants for qrdrop.
//!
//! All protocol tunables live here so they can be reviewed and adjusted
//! in a single place. Wire-format details (message tags, key names) stay
//! in their respective modules.

use std::time::Duration;

// ── Transfer / Chunking ──────────────────────────────────────────────────────

/// File chunk size in bytes (64 KiB).
///
/// One binary data-channel message per chunk. Sized to the SCTP message
/// boundary so a chunk never needs application-level fragmentation.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// High water mark for the data channel's outbound buffer (1 MiB).
/// When `buffered_amount` exceeds this, the sender pauses until the
/// transport drains.
pub const HIGH_WATER_MARK: usize = 1024 * 1024;

/// Poll interval while waiting for the outbound buffer to drain.
pub const BACKPRESSURE_POLL: Duration = Duration::from_millis(20);

/// Minimum interval between progress updates for a single transfer.
/// The final chunk always emits regardless of the throttle.
pub const PROGRESS_THROTTLE: Duration = Duration::from_millis(80);

/// Pause between finishing one file and starting the next queued one.
/// Gives the receiver a window to finalize before the next `file-meta`.
pub const INTER_FILE_PAUSE: Duration = Duration::from_millis(200);

// ── Connection / ICE ─────────────────────────────────────────────────────────

/// Deadline from entering `connecting` to reaching `connected`.
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(180);

/// Timeout for ICE candidate gathering. With non-trickle ICE the local
/// signal cannot be published before gathering completes, so this bounds
/// how long offer/answer generation may take.
pub const ICE_GATHER_TIMEOUT: Duration = Duration::from_secs(15);

/// STUN servers used for ICE gathering. No TURN: if a direct path cannot
/// be found the connection fails rather than relaying.
pub const STUN_SERVERS: [&str; 5] = [
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
    "stun:stun2.l.google.com:19302",
    "stun:stun.cloudflare.com:3478",
    "stun:global.stun.twilio.com:3478",
];

/// Explicit large SCTP max message size (1 MiB).
/// A concrete value instead of Unbounded (0) because some WebRTC
/// implementations interpret 0 as "use default 64 KB" rather than unlimited.
pub const SCTP_MAX_MESSAGE_SIZE: u32 = 1024 * 1024;

// ── Signaling ────────────────────────────────────────────────────────────────

/// Encoded signal strings longer than this will not fit a scannable QR
/// code; the shell falls back to copy/paste-only display above it.
pub const MAX_QR_SIGNAL_LEN: usize = 2000;
