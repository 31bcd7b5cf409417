//! Transport abstraction underneath [`Process`](crate::process::Process).
//!
//! A process is driven through two independent halves:
//!
//! ```text
//! Process
//!  ├── Box<dyn Transport>   (read side: next tagged output chunk / exit)
//!  └── Box<dyn StdinSink>   (write side: bytes for standard input)
//! ```
//!
//! Implementations:
//! - [`local::LocalTransport`] - two OS pipes plus the child's exit status
//! - [`exec::ExecTransport`] - one tagged-frame WebSocket session
//!
//! Message-oriented transports are written against [`FrameSource`] and
//! [`FrameSink`] rather than a concrete WebSocket type, so tests can drive
//! them with in-memory channels.
//!
//! # Cancel safety
//!
//! [`Transport::receive`] must be cancel safe: if the returned future is
//! dropped before completion, no output may be lost. The process core races
//! it against a cancellation token.

// Rust guideline compliant 2026-02

pub mod exec;
pub mod local;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{ProcessError, Result};
use crate::framing::OutputChannel;

/// One unit of output produced by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    /// Bytes produced on an output channel.
    Data(OutputChannel, Bytes),
    /// The process finished with this exit code. No chunks follow.
    Exited(i32),
}

/// Read side of a process transport.
#[async_trait]
pub trait Transport: Send {
    /// Receive the next chunk of output, or the exit signal.
    ///
    /// Must be cancel safe. After [`Chunk::Exited`] has been returned the
    /// transport is not polled again.
    async fn receive(&mut self) -> Result<Chunk>;

    /// Release the underlying pipes, sockets or child process.
    ///
    /// Called on dispose; must tolerate repeated calls.
    async fn shutdown(&mut self);
}

/// Write side of a process transport (standard input).
#[async_trait]
pub trait StdinSink: Send {
    /// Deliver `data` to the process's standard input.
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Signal end of input. Must tolerate repeated calls.
    async fn close(&mut self) -> Result<()>;
}

/// Source of whole binary messages (one WebSocket message each).
#[async_trait]
pub trait FrameSource: Send {
    /// Receive the next message. `Ok(None)` means the peer closed the stream.
    ///
    /// Must be cancel safe.
    async fn recv_frame(&mut self) -> Result<Option<Bytes>>;
}

/// Sink for whole binary messages.
#[async_trait]
pub trait FrameSink: Send {
    /// Send one message.
    async fn send_frame(&mut self, frame: Vec<u8>) -> Result<()>;

    /// Close the sending direction.
    async fn close(&mut self) -> Result<()>;
}

#[async_trait]
impl FrameSource for mpsc::Receiver<Bytes> {
    async fn recv_frame(&mut self) -> Result<Option<Bytes>> {
        Ok(self.recv().await)
    }
}

#[async_trait]
impl FrameSource for mpsc::UnboundedReceiver<Bytes> {
    async fn recv_frame(&mut self) -> Result<Option<Bytes>> {
        Ok(self.recv().await)
    }
}

#[async_trait]
impl FrameSink for mpsc::Sender<Vec<u8>> {
    async fn send_frame(&mut self, frame: Vec<u8>) -> Result<()> {
        self.send(frame).await.map_err(|_closed| ProcessError::Closed)
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl FrameSink for mpsc::UnboundedSender<Vec<u8>> {
    async fn send_frame(&mut self, frame: Vec<u8>) -> Result<()> {
        self.send(frame).map_err(|_closed| ProcessError::Closed)
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
