//! Remote exec transport over one channel-multiplexed session.
//!
//! Stdout, stderr and the exit status share a single duplex message stream
//! (see [`crate::framing`] for the tag layout). [`ExecTransport`] turns that
//! stream into [`Chunk`]s; [`ExecStdin`] prefixes every outbound write with
//! the stdin tag.
//!
//! The last message of a session is the exit status on tag `0x03`, a JSON
//! document:
//!
//! ```json
//! {"status": "Failure",
//!  "details": {"causes": [{"reason": "ExitCode", "message": "137"}]}}
//! ```
//!
//! `Success` maps to exit code 0. A failure without a parseable `ExitCode`
//! cause, an unparseable document, or a stream that closes without any
//! status all map to [`UNKNOWN_EXIT_CODE`].

// Rust guideline compliant 2026-02

use async_trait::async_trait;
use log::{debug, error, trace, warn};
use serde::Deserialize;

use super::{Chunk, FrameSink, FrameSource, StdinSink, Transport};
use crate::constants::UNKNOWN_EXIT_CODE;
use crate::error::{ProcessError, Result};
use crate::framing::{self, channel_tag, Frame};

/// Cause reason that carries the numeric exit code.
const EXIT_CODE_REASON: &str = "ExitCode";

/// Decoded exit status of a remote command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// The command exited with code 0.
    Success,
    /// The command failed; `exit_code` is `None` when the document did not
    /// carry a usable `ExitCode` cause.
    Failure {
        /// Exit code extracted from the status causes.
        exit_code: Option<i32>,
    },
}

impl ExitStatus {
    /// Decode a status document. Never fails: malformed input is a failure
    /// with an unknown code.
    pub fn from_document(document: &[u8]) -> Self {
        let parsed: StatusDocument = match serde_json::from_slice(document) {
            Ok(doc) => doc,
            Err(e) => {
                warn!("[Exec] Unparseable exit status document: {e}");
                return Self::Failure { exit_code: None };
            }
        };

        if parsed.status.as_deref() == Some("Success") {
            return Self::Success;
        }

        let exit_code = parsed.details.and_then(|details| {
            details
                .causes
                .into_iter()
                .filter(|cause| cause.reason.as_deref() == Some(EXIT_CODE_REASON))
                .find_map(|cause| cause.message.and_then(|m| m.trim().parse::<i32>().ok()))
        });
        if exit_code.is_none() {
            warn!(
                "[Exec] Failure status without {EXIT_CODE_REASON} cause, reporting {UNKNOWN_EXIT_CODE}"
            );
        }
        Self::Failure { exit_code }
    }

    /// Numeric exit code, using [`UNKNOWN_EXIT_CODE`] when none is known.
    pub fn code(&self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Failure { exit_code } => exit_code.unwrap_or(UNKNOWN_EXIT_CODE),
        }
    }

    /// Returns `true` for [`ExitStatus::Success`].
    pub fn success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

#[derive(Debug, Deserialize)]
struct StatusDocument {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    details: Option<StatusDetails>,
}

#[derive(Debug, Deserialize)]
struct StatusDetails {
    #[serde(default)]
    causes: Vec<StatusCause>,
}

#[derive(Debug, Deserialize)]
struct StatusCause {
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Read side of a remote exec session.
#[derive(Debug)]
pub struct ExecTransport<S> {
    /// Message source; `None` once the transport has been shut down.
    source: Option<S>,
    /// Exit code once the session has finished.
    exit_code: Option<i32>,
}

impl<S: FrameSource> ExecTransport<S> {
    /// Wrap the read half of an exec session.
    pub fn new(source: S) -> Self {
        Self {
            source: Some(source),
            exit_code: None,
        }
    }

    /// Decoded exit code, once the status message has been received.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    fn finish(&mut self, code: i32) -> Chunk {
        self.exit_code = Some(code);
        Chunk::Exited(code)
    }
}

#[async_trait]
impl<S: FrameSource> Transport for ExecTransport<S> {
    async fn receive(&mut self) -> Result<Chunk> {
        if let Some(code) = self.exit_code {
            return Ok(Chunk::Exited(code));
        }

        loop {
            let source = self.source.as_mut().ok_or(ProcessError::Closed)?;
            let Some(message) = source.recv_frame().await? else {
                warn!("[Exec] Session closed without exit status");
                return Ok(self.finish(UNKNOWN_EXIT_CODE));
            };

            let frame = framing::decode(message).inspect_err(|e| {
                error!("[Exec] {e}");
            })?;

            match frame {
                Frame::Empty => {
                    trace!("[Exec] Skipping tag-only message");
                }
                Frame::Output { channel, data } => {
                    trace!("[Exec] {} bytes on {channel}", data.len());
                    return Ok(Chunk::Data(channel, data));
                }
                Frame::Status(document) => {
                    let status = ExitStatus::from_document(&document);
                    debug!("[Exec] Remote command finished: {status:?}");
                    return Ok(self.finish(status.code()));
                }
            }
        }
    }

    async fn shutdown(&mut self) {
        if self.source.take().is_some() {
            debug!("[Exec] Read side released");
        }
    }
}

/// Write side of a remote exec session.
#[derive(Debug)]
pub struct ExecStdin<K> {
    sink: K,
    closed: bool,
}

impl<K: FrameSink> ExecStdin<K> {
    /// Wrap the write half of an exec session.
    pub fn new(sink: K) -> Self {
        Self {
            sink,
            closed: false,
        }
    }
}

#[async_trait]
impl<K: FrameSink> StdinSink for ExecStdin<K> {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(ProcessError::InvalidOperation("standard input is closed"));
        }
        self.sink
            .send_frame(framing::encode(channel_tag::STDIN, data))
            .await
    }

    /// Closes the session's sending direction.
    ///
    /// The channel protocol has no separate end-of-input signal, so this
    /// closes the WebSocket for writing; the remote side typically ends the
    /// command shortly after.
    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.sink.close().await
    }
}
