//! Crate-wide constants.
//!
//! Centralizes the buffer sizes, protocol identifiers and timeouts used by
//! the process and port-forward layers so they can be tuned in one place.
//!
//! # Categories
//!
//! - **Buffers**: read sizes for local pipes and caller-side scratch space
//! - **Protocol**: WebSocket subprotocol and exit-status values
//! - **Timeouts**: connect and shutdown bounds

// Rust guideline compliant 2026-02

use std::time::Duration;

// ============================================================================
// Buffers
// ============================================================================

/// Bytes requested per read from a local stdout/stderr pipe.
///
/// Also the default chunk size callers use when they do not supply their
/// own buffers (read-to-end helpers, the CLI driver).
pub const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Initial capacity of a decode buffer's text window.
///
/// One decoded chunk rarely exceeds a read buffer's worth of characters,
/// so the window is sized to match and only grows for unusually large frames.
pub const DECODE_WINDOW_CAPACITY: usize = READ_BUFFER_SIZE;

// ============================================================================
// Protocol
// ============================================================================

/// WebSocket subprotocol for exec and port-forward sessions.
///
/// Version 4 carries the structured JSON exit status on the status channel.
pub const CHANNEL_SUBPROTOCOL: &str = "v4.channel.k8s.io";

/// Exit code reported when the remote status is a failure without a
/// parseable `ExitCode` cause, or when the session ends without any status.
pub const UNKNOWN_EXIT_CODE: i32 = -1;

/// Length of the port header prefixed to the first message of each
/// port-forward channel.
pub const PORT_HEADER_LEN: usize = 2;

// ============================================================================
// Timeouts
// ============================================================================

/// Default bound on the WebSocket handshake for exec/port-forward sessions.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Grace period for a local child to exit after it has been killed on dispose.
pub const KILL_WAIT_TIMEOUT: Duration = Duration::from_secs(5);
