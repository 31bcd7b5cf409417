//! Wire protocol codec for channel-multiplexed sessions.
//!
//! Every WebSocket message carries exactly one logical channel:
//!
//! ```text
//! [u8 channel tag] [payload: rest of the message]
//! ```
//!
//! Channel tags:
//! - `0x00`: standard input (client→remote) / forwarded data (port-forward)
//! - `0x01`: standard output (remote→client) / forwarded error (port-forward)
//! - `0x02`: standard error (remote→client)
//! - `0x03`: exit status, a JSON status document (remote→client)
//!
//! Port-forward sessions reuse the tag layout, but the first message on each
//! channel additionally starts with a two-byte port header (see
//! [`crate::port_forward`]).

// Rust guideline compliant 2026-02

use bytes::Bytes;

use crate::error::{ProcessError, Result};

/// Channel tag constants.
pub mod channel_tag {
    /// Standard input (client → remote).
    pub const STDIN: u8 = 0x00;
    /// Standard output (remote → client).
    pub const STDOUT: u8 = 0x01;
    /// Standard error (remote → client).
    pub const STDERR: u8 = 0x02;
    /// Exit status document (remote → client).
    pub const STATUS: u8 = 0x03;

    /// Forwarded port data (both directions).
    pub const PORT_DATA: u8 = 0x00;
    /// Forwarded port error text (remote → client).
    pub const PORT_ERROR: u8 = 0x01;
}

/// A readable output stream of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputChannel {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

impl OutputChannel {
    /// Both output channels, in tie-break order.
    pub const ALL: [OutputChannel; 2] = [OutputChannel::Stdout, OutputChannel::Stderr];

    /// Slot index used for per-channel bookkeeping arrays.
    pub(crate) fn index(self) -> usize {
        match self {
            OutputChannel::Stdout => 0,
            OutputChannel::Stderr => 1,
        }
    }

    /// Wire tag of this channel on exec sessions.
    pub fn tag(self) -> u8 {
        match self {
            OutputChannel::Stdout => channel_tag::STDOUT,
            OutputChannel::Stderr => channel_tag::STDERR,
        }
    }
}

impl std::fmt::Display for OutputChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputChannel::Stdout => write!(f, "stdout"),
            OutputChannel::Stderr => write!(f, "stderr"),
        }
    }
}

/// A decoded exec-session message.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Output bytes for stdout or stderr.
    Output {
        /// Channel that produced the bytes.
        channel: OutputChannel,
        /// Raw output bytes.
        data: Bytes,
    },

    /// Exit status document (raw JSON bytes, decoded by the exec transport).
    Status(Bytes),

    /// A message that carried only its tag byte.
    ///
    /// Some servers emit these as keep-alive wrappers; they carry no data.
    Empty,
}

/// Encode an outbound message: `[tag][payload]`.
pub fn encode(tag: u8, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + payload.len());
    buf.push(tag);
    buf.extend_from_slice(payload);
    buf
}

/// Decode an inbound exec-session message.
///
/// # Errors
///
/// Returns [`ProcessError::Protocol`] for a message without a tag byte or
/// with a tag that is not valid in the remote→client direction.
pub fn decode(message: Bytes) -> Result<Frame> {
    let Some(&tag) = message.first() else {
        return Err(ProcessError::Protocol(
            "message without channel tag".to_string(),
        ));
    };
    let payload = message.slice(1..);

    if payload.is_empty() && tag <= channel_tag::STATUS {
        return Ok(Frame::Empty);
    }

    if tag == channel_tag::STATUS {
        return Ok(Frame::Status(payload));
    }
    match OutputChannel::ALL.into_iter().find(|channel| channel.tag() == tag) {
        Some(channel) => Ok(Frame::Output {
            channel,
            data: payload,
        }),
        None => Err(ProcessError::Protocol(format!(
            "unexpected channel tag: 0x{tag:02x}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_prefixes_tag() {
        assert_eq!(encode(channel_tag::STDIN, b"ls\n"), b"\x00ls\n".to_vec());
    }

    #[test]
    fn test_encode_empty_payload() {
        assert_eq!(encode(channel_tag::STDIN, b""), vec![0x00]);
    }

    #[test]
    fn test_decode_stdout() {
        let frame = decode(Bytes::from_static(b"\x01hello")).unwrap();
        assert_eq!(
            frame,
            Frame::Output {
                channel: OutputChannel::Stdout,
                data: Bytes::from_static(b"hello"),
            }
        );
    }

    #[test]
    fn test_decode_stderr() {
        let frame = decode(Bytes::from_static(b"\x02oops")).unwrap();
        assert_eq!(
            frame,
            Frame::Output {
                channel: OutputChannel::Stderr,
                data: Bytes::from_static(b"oops"),
            }
        );
    }

    #[test]
    fn test_output_channel_tags_match_wire() {
        assert_eq!(OutputChannel::Stdout.tag(), channel_tag::STDOUT);
        assert_eq!(OutputChannel::Stderr.tag(), channel_tag::STDERR);
        for channel in OutputChannel::ALL {
            let message = Bytes::from(encode(channel.tag(), b"x"));
            match decode(message).unwrap() {
                Frame::Output { channel: got, .. } => assert_eq!(got, channel),
                other => panic!("expected output frame, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_decode_status() {
        let frame = decode(Bytes::from_static(b"\x03{\"status\":\"Success\"}")).unwrap();
        assert_eq!(
            frame,
            Frame::Status(Bytes::from_static(b"{\"status\":\"Success\"}"))
        );
    }

    #[test]
    fn test_decode_tag_only_is_empty() {
        for tag in [0x00u8, 0x01, 0x02, 0x03] {
            assert_eq!(decode(Bytes::copy_from_slice(&[tag])).unwrap(), Frame::Empty);
        }
    }

    #[test]
    fn test_decode_missing_tag_rejected() {
        let err = decode(Bytes::new()).unwrap_err();
        assert!(matches!(err, ProcessError::Protocol(_)));
    }

    #[test]
    fn test_decode_unknown_tag_rejected() {
        let err = decode(Bytes::from_static(b"\x07data")).unwrap_err();
        assert!(matches!(err, ProcessError::Protocol(_)));
    }

    #[test]
    fn test_decode_stdin_tag_from_remote_rejected() {
        let err = decode(Bytes::from_static(b"\x00echo")).unwrap_err();
        assert!(matches!(err, ProcessError::Protocol(_)));
    }

    #[test]
    fn test_output_channel_display() {
        assert_eq!(OutputChannel::Stdout.to_string(), "stdout");
        assert_eq!(OutputChannel::Stderr.to_string(), "stderr");
    }
}
