//! Error types for process and port-forward operations.
//!
//! Errors fall into four groups:
//!
//! - **Usage**: the caller broke the read contract (mixed read modes, read
//!   after exit or disposal, re-enabled a skipped channel, passed an empty
//!   buffer). Reported synchronously and never retried.
//! - **Cancellation**: the caller's token fired while a call was suspended.
//!   Buffered state is untouched, so the call may be re-issued.
//! - **Transport**: local I/O failures, WebSocket failures, protocol
//!   violations, malformed session requests. Returned as produced by the
//!   transport; the process is unusable afterwards except for disposal.
//! - **Handler**: a read-to-end callback or sink failed.

// Rust guideline compliant 2026-02

use thiserror::Error;

use crate::framing::OutputChannel;

/// Errors that can occur while driving a process or a forwarded port.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The operation is not valid in the current state.
    #[error("Invalid operation: {0}")]
    InvalidOperation(&'static str),

    /// The process has been disposed.
    #[error("Process has been disposed")]
    Disposed,

    /// The caller opted out of this channel earlier and cannot opt back in.
    #[error("Channel {0} is being skipped")]
    ChannelSkipped(OutputChannel),

    /// A caller-supplied buffer had zero capacity.
    #[error("Read buffer must not be empty")]
    EmptyBuffer,

    /// The cancellation token fired while the call was suspended.
    #[error("Operation cancelled")]
    Cancelled,

    /// Local pipe or socket I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The WebSocket connection failed.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    /// The remote side closed the connection while data was still expected.
    #[error("Connection closed")]
    Closed,

    /// The remote side violated the channel protocol.
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// A session request could not be built (bad URL, header or query).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The remote end of a forwarded port reported an error.
    #[error("Remote error: {0}")]
    RemoteError(String),

    /// A read-to-end handler or sink failed.
    #[error("Output handler failed: {0}")]
    Handler(#[source] anyhow::Error),
}

impl ProcessError {
    /// Returns `true` for errors caused by misuse of the read/write contract.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidOperation(_) | Self::Disposed | Self::ChannelSkipped(_) | Self::EmptyBuffer
        )
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ProcessError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

/// Result type for process operations.
pub type Result<T> = std::result::Result<T, ProcessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_errors_classified() {
        assert!(ProcessError::InvalidOperation("x").is_usage_error());
        assert!(ProcessError::Disposed.is_usage_error());
        assert!(ProcessError::ChannelSkipped(OutputChannel::Stderr).is_usage_error());
        assert!(ProcessError::EmptyBuffer.is_usage_error());
    }

    #[test]
    fn test_transport_errors_not_usage() {
        assert!(!ProcessError::Cancelled.is_usage_error());
        assert!(!ProcessError::Closed.is_usage_error());
        assert!(!ProcessError::Protocol("bad".into()).is_usage_error());
    }

    #[test]
    fn test_skipped_channel_message() {
        let err = ProcessError::ChannelSkipped(OutputChannel::Stderr);
        assert_eq!(err.to_string(), "Channel stderr is being skipped");
    }

    #[test]
    fn test_io_source_preserved() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err = ProcessError::from(io);
        match err {
            ProcessError::Io(inner) => assert_eq!(inner.kind(), std::io::ErrorKind::BrokenPipe),
            other => panic!("expected Io, got {other:?}"),
        }
    }
}
