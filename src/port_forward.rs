//! Forwarded-port byte streams.
//!
//! A port-forward session speaks the same tagged-message protocol as exec,
//! with two channels:
//!
//! | Tag | Direction | Meaning |
//! |-----|-----------|---------|
//! | `0` | both      | Connection data |
//! | `1` | inbound   | Error text from the remote end |
//!
//! The first inbound message on each channel starts with a 2-byte port
//! header. It is stripped exactly once per channel and never interpreted.
//! Outbound data always goes out on tag `0` with no header.
//!
//! Unlike [`Process`](crate::process::Process) there is no line mode and no
//! exit status: a [`PortForward`] is a plain bidirectional byte stream.

// Rust guideline compliant 2026-02

use bytes::{Buf, Bytes};
use log::{debug, info, trace, warn};
use std::future::Future;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::constants::{PORT_HEADER_LEN, READ_BUFFER_SIZE};
use crate::error::{ProcessError, Result};
use crate::framing::{self, channel_tag};
use crate::transport::{FrameSink, FrameSource};

/// A forwarded connection to one remote port.
#[derive(Debug)]
pub struct PortForward {
    reader: PortForwardReader,
    writer: PortForwardWriter,
}

impl PortForward {
    /// Wrap the two halves of a port-forward session.
    pub fn new(source: impl FrameSource + 'static, sink: impl FrameSink + 'static) -> Self {
        Self {
            reader: PortForwardReader {
                source: Box::new(source),
                pending: Bytes::new(),
                header_pending: [true; 2],
                eof: false,
            },
            writer: PortForwardWriter {
                sink: Box::new(sink),
                closed: false,
            },
        }
    }

    /// Read bytes from the remote port. See [`PortForwardReader::read`].
    pub async fn read(&mut self, buf: &mut [u8], cancel: &CancellationToken) -> Result<usize> {
        self.reader.read(buf, cancel).await
    }

    /// Write bytes to the remote port. See [`PortForwardWriter::write`].
    pub async fn write(&mut self, data: &[u8], cancel: &CancellationToken) -> Result<()> {
        self.writer.write(data, cancel).await
    }

    /// Close the connection's sending direction.
    pub async fn close(&mut self) -> Result<()> {
        self.writer.close().await
    }

    /// Split into independently owned read and write halves.
    pub fn into_split(self) -> (PortForwardReader, PortForwardWriter) {
        (self.reader, self.writer)
    }

    /// Pump bytes between `stream` and the remote port until the remote side
    /// closes, either direction fails, or `cancel` fires.
    ///
    /// End of input from the local side closes the forwarded connection for
    /// writing; replies already on their way are still delivered.
    ///
    /// Returns the number of bytes sent upstream and received downstream.
    pub async fn bridge(self, stream: TcpStream, cancel: &CancellationToken) -> Result<(u64, u64)> {
        let (mut reader, mut writer) = self.into_split();
        let (mut local_read, mut local_write) = stream.into_split();
        let mut sent = 0u64;
        let mut received = 0u64;

        let upstream = async {
            let mut buf = vec![0u8; READ_BUFFER_SIZE];
            loop {
                let n = local_read.read(&mut buf).await?;
                if n == 0 {
                    trace!("[PortForward] Local side closed");
                    return writer.close().await;
                }
                writer.write(&buf[..n], cancel).await?;
                sent += n as u64;
            }
        };

        let downstream = async {
            let mut buf = vec![0u8; READ_BUFFER_SIZE];
            loop {
                let n = reader.read(&mut buf, cancel).await?;
                if n == 0 {
                    trace!("[PortForward] Remote side closed");
                    local_write.shutdown().await?;
                    return Ok::<(), ProcessError>(());
                }
                local_write.write_all(&buf[..n]).await?;
                received += n as u64;
            }
        };

        let outcome = {
            tokio::pin!(upstream);
            tokio::pin!(downstream);
            tokio::select! {
                result = &mut upstream => match result {
                    Ok(()) => (&mut downstream).await,
                    Err(e) => Err(e),
                },
                result = &mut downstream => result,
            }
        };
        if let Err(e) = writer.close().await {
            debug!("[PortForward] Close after bridge failed: {e}");
        }
        outcome?;
        Ok((sent, received))
    }
}

/// Read half of a [`PortForward`].
pub struct PortForwardReader {
    source: Box<dyn FrameSource>,
    /// Data received but not yet returned.
    pending: Bytes,
    /// Per channel (data, error): the port header has not been seen yet.
    header_pending: [bool; 2],
    eof: bool,
}

impl std::fmt::Debug for PortForwardReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortForwardReader")
            .field("pending", &self.pending.len())
            .field("header_pending", &self.header_pending)
            .field("eof", &self.eof)
            .finish_non_exhaustive()
    }
}

impl PortForwardReader {
    /// Read up to `buf.len()` bytes. Returns `Ok(0)` once the remote side
    /// has closed.
    ///
    /// # Errors
    ///
    /// - [`ProcessError::EmptyBuffer`] if `buf` is empty
    /// - [`ProcessError::RemoteError`] if the remote end reported an error
    /// - [`ProcessError::Protocol`] for unknown tags or a truncated header
    /// - [`ProcessError::Cancelled`] if `cancel` fires first; nothing is lost
    pub async fn read(&mut self, buf: &mut [u8], cancel: &CancellationToken) -> Result<usize> {
        if buf.is_empty() {
            return Err(ProcessError::EmptyBuffer);
        }
        loop {
            if !self.pending.is_empty() {
                let len = buf.len().min(self.pending.len());
                buf[..len].copy_from_slice(&self.pending[..len]);
                self.pending.advance(len);
                return Ok(len);
            }
            if self.eof {
                return Ok(0);
            }

            let message = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(ProcessError::Cancelled),
                message = self.source.recv_frame() => message?,
            };
            let Some(mut message) = message else {
                debug!("[PortForward] Stream closed");
                self.eof = true;
                return Ok(0);
            };
            if message.is_empty() {
                return Err(ProcessError::Protocol("message without channel tag".into()));
            }

            let tag = message.get_u8();
            let slot = match tag {
                channel_tag::PORT_DATA => 0,
                channel_tag::PORT_ERROR => 1,
                other => {
                    return Err(ProcessError::Protocol(format!(
                        "unexpected port-forward channel tag: 0x{other:02x}"
                    )))
                }
            };
            if self.header_pending[slot] {
                if message.len() < PORT_HEADER_LEN {
                    return Err(ProcessError::Protocol(format!(
                        "truncated port header on channel {tag}"
                    )));
                }
                message.advance(PORT_HEADER_LEN);
                self.header_pending[slot] = false;
            }
            if message.is_empty() {
                continue;
            }

            if tag == channel_tag::PORT_ERROR {
                let text = String::from_utf8_lossy(&message).into_owned();
                warn!("[PortForward] Remote error: {text}");
                return Err(ProcessError::RemoteError(text));
            }
            trace!("[PortForward] {} bytes received", message.len());
            self.pending = message;
        }
    }
}

/// Write half of a [`PortForward`].
pub struct PortForwardWriter {
    sink: Box<dyn FrameSink>,
    closed: bool,
}

impl std::fmt::Debug for PortForwardWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortForwardWriter")
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl PortForwardWriter {
    /// Send `data` to the remote port as one data-channel message.
    pub async fn write(&mut self, data: &[u8], cancel: &CancellationToken) -> Result<()> {
        if self.closed {
            return Err(ProcessError::InvalidOperation("port-forward connection is closed"));
        }
        if data.is_empty() {
            return Ok(());
        }
        let frame = framing::encode(channel_tag::PORT_DATA, data);
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(ProcessError::Cancelled),
            sent = self.sink.send_frame(frame) => sent,
        }
    }

    /// Close the sending direction. Repeated calls are no-ops.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.sink.close().await
    }
}

/// Accept local TCP connections and bridge each through a fresh
/// forwarded connection from `connect`, until `cancel` fires.
///
/// A failed `connect` drops that one local connection and keeps serving.
///
/// # Errors
///
/// Returns [`ProcessError::Io`] if accepting fails.
pub async fn serve_local<F, Fut>(
    listener: TcpListener,
    mut connect: F,
    cancel: CancellationToken,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<PortForward>>,
{
    if let Ok(addr) = listener.local_addr() {
        info!("[PortForward] Listening on {addr}");
    }
    loop {
        let (stream, peer) = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            accepted = listener.accept() => accepted?,
        };
        debug!("[PortForward] Accepted {peer}");

        let forward = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            forward = connect() => forward,
        };
        let forward = match forward {
            Ok(forward) => forward,
            Err(e) => {
                warn!("[PortForward] Could not open forwarded connection for {peer}: {e}");
                continue;
            }
        };

        let cancel = cancel.child_token();
        tokio::spawn(async move {
            match forward.bridge(stream, &cancel).await {
                Ok((sent, received)) => {
                    debug!("[PortForward] {peer} done: {sent} bytes up, {received} bytes down");
                }
                Err(ProcessError::Cancelled) => {}
                Err(e) => warn!("[PortForward] {peer} failed: {e}"),
            }
        });
    }
}
