//! Unified process I/O over any [`Transport`].
//!
//! A [`Process`] is the single entry point for reading a process's output
//! and writing its input, whether the process is a local child or a command
//! running in a remote container.
//!
//! # Read modes
//!
//! The first read fixes the mode for the lifetime of the process:
//!
//! - **Bytes** - [`Process::read`], [`Process::read_to_end`],
//!   [`Process::read_to_end_with`], [`Process::read_to_end_into`]
//! - **Lines** - [`Process::read_line`], [`Process::lines`]
//!
//! Mixing them is a usage error.
//!
//! # Skipping channels
//!
//! Each read says which of stdout/stderr the caller wants. Opting out of a
//! channel is permanent: its output is discarded from then on, and asking
//! for it again is [`ProcessError::ChannelSkipped`]. This keeps the process
//! from buffering output nobody will read.
//!
//! # Delayed exit
//!
//! In line mode, the exit signal may arrive while a channel still holds an
//! unterminated last line. The exit is remembered and surfaced only after
//! every wanted channel has yielded its final partial line.
//!
//! # Cancellation
//!
//! Every read and write takes a [`CancellationToken`]. A cancelled call
//! returns [`ProcessError::Cancelled`] and leaves all buffered output in
//! place, so re-issuing the call sees no lost or duplicated bytes.

// Rust guideline compliant 2026-02

mod state;
mod stdin;

pub use state::ProcessState;
pub use stdin::ProcessStdin;

use bytes::{Buf, Bytes};
use futures_util::Stream;
use log::{debug, trace, warn};
use std::borrow::Cow;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::constants::READ_BUFFER_SIZE;
use crate::decode::DecodeBuffer;
use crate::error::{ProcessError, Result};
use crate::framing::OutputChannel;
use crate::transport::{Chunk, StdinSink, Transport};
use state::Operation;

/// Result of one byte-level read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `len` bytes were written into the buffer for `channel`.
    Data {
        /// Channel the bytes belong to.
        channel: OutputChannel,
        /// Number of bytes written into the caller's buffer.
        len: usize,
    },
    /// The process exited; no more output follows.
    Exited,
}

/// One decoded line of output, without its terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    /// Channel the line was read from.
    pub channel: OutputChannel,
    /// Line text.
    pub text: String,
}

impl Line {
    /// Returns `true` if the line came from stderr.
    pub fn is_error(&self) -> bool {
        self.channel == OutputChannel::Stderr
    }
}

/// Everything a process wrote, collected by [`Process::read_to_end`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    /// Bytes written to stdout.
    pub stdout: Vec<u8>,
    /// Bytes written to stderr.
    pub stderr: Vec<u8>,
    /// Exit code of the process.
    pub exit_code: i32,
}

impl Output {
    /// Returns `true` if the exit code is 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout decoded as UTF-8, replacing invalid sequences.
    pub fn stdout_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    /// Stderr decoded as UTF-8, replacing invalid sequences.
    pub fn stderr_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr)
    }
}

/// Whether the caller reads a channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum ChannelUse {
    #[default]
    Undecided,
    Wanted,
    Skipped,
}

/// Per-channel bookkeeping.
#[derive(Debug, Default)]
struct ChannelSlot {
    usage: ChannelUse,
    /// Bytes received but not yet copied to a caller (byte mode).
    pending: Bytes,
    /// Line decoder, created on first line read (line mode).
    decoder: Option<DecodeBuffer>,
}

/// A running local or remote process.
pub struct Process {
    state: ProcessState,
    transport: Box<dyn Transport>,
    stdin: Option<ProcessStdin>,
    pid: Option<u32>,
    /// Set once, when the exit is surfaced to the caller.
    exit_code: Option<i32>,
    /// Exit observed in line mode but not yet surfaced.
    delayed_exit: Option<i32>,
    channels: [ChannelSlot; 2],
    /// Per-channel buffer size used by the read-to-end helpers.
    read_buffer_size: usize,
}

impl std::fmt::Debug for Process {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Process")
            .field("state", &self.state)
            .field("pid", &self.pid)
            .field("exit_code", &self.exit_code)
            .finish_non_exhaustive()
    }
}

impl Process {
    /// Attach a process to its transport halves.
    pub fn new(transport: Box<dyn Transport>, stdin: Box<dyn StdinSink>) -> Self {
        Self {
            state: ProcessState::Initial,
            transport,
            stdin: Some(ProcessStdin::new(stdin)),
            pid: None,
            exit_code: None,
            delayed_exit: None,
            channels: Default::default(),
            read_buffer_size: READ_BUFFER_SIZE,
        }
    }

    /// Set the per-channel buffer size used by the read-to-end helpers.
    ///
    /// A size of zero falls back to the default.
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = if size == 0 { READ_BUFFER_SIZE } else { size };
        self
    }

    /// Record the OS process id (local processes only).
    pub fn with_pid(mut self, pid: Option<u32>) -> Self {
        self.pid = pid;
        self
    }

    /// OS process id, for local processes.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Exit code of the process.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::InvalidOperation`] until a read or
    /// [`wait_for_exit`](Self::wait_for_exit) has observed the exit.
    pub fn exit_code(&self) -> Result<i32> {
        self.state.begin(Operation::ExitCode)?;
        self.exit_code
            .ok_or(ProcessError::InvalidOperation("process has not exited"))
    }

    /// Take the standard-input writer so it can be driven concurrently
    /// with reads. Returns `None` if it was already taken or disposed.
    pub fn take_stdin(&mut self) -> Option<ProcessStdin> {
        self.stdin.take()
    }

    /// Read the next piece of output into the buffer of whichever channel
    /// produces data next.
    ///
    /// Pass `None` for a channel to skip it; see the module docs for the
    /// rules. Returns [`ReadOutcome::Exited`] once the process has finished.
    pub async fn read(
        &mut self,
        stdout: Option<&mut [u8]>,
        stderr: Option<&mut [u8]>,
        cancel: &CancellationToken,
    ) -> Result<ReadOutcome> {
        let next = self.state.begin(Operation::ReadBytes)?;
        if stdout.as_ref().is_some_and(|b| b.is_empty())
            || stderr.as_ref().is_some_and(|b| b.is_empty())
        {
            return Err(ProcessError::EmptyBuffer);
        }
        self.select_channels([stdout.is_some(), stderr.is_some()])?;
        self.state = next;

        let mut buffers = [stdout, stderr];
        loop {
            for channel in OutputChannel::ALL {
                let slot = &mut self.channels[channel.index()];
                let Some(buf) = buffers[channel.index()].as_deref_mut() else {
                    continue;
                };
                if slot.pending.is_empty() {
                    continue;
                }
                let len = buf.len().min(slot.pending.len());
                buf[..len].copy_from_slice(&slot.pending[..len]);
                slot.pending.advance(len);
                return Ok(ReadOutcome::Data { channel, len });
            }

            match self.next_chunk(cancel).await? {
                Chunk::Data(channel, data) => {
                    let slot = &mut self.channels[channel.index()];
                    if slot.usage == ChannelUse::Wanted {
                        slot.pending = data;
                    } else {
                        trace!("[Process] Discarding {} bytes of skipped {channel}", data.len());
                    }
                }
                Chunk::Exited(code) => {
                    self.mark_exited(code);
                    return Ok(ReadOutcome::Exited);
                }
            }
        }
    }

    /// Read the next line from whichever wanted channel completes one first.
    ///
    /// Returns `Ok(None)` once the process has exited and every wanted
    /// channel has been drained, including unterminated last lines.
    pub async fn read_line(
        &mut self,
        want_stdout: bool,
        want_stderr: bool,
        cancel: &CancellationToken,
    ) -> Result<Option<Line>> {
        let next = self.state.begin(Operation::ReadChars)?;
        self.select_channels([want_stdout, want_stderr])?;
        self.state = next;

        loop {
            if let Some(line) = self.take_buffered_line(false) {
                return Ok(Some(line));
            }
            if let Some(code) = self.delayed_exit {
                if let Some(line) = self.take_buffered_line(true) {
                    return Ok(Some(line));
                }
                self.delayed_exit = None;
                self.mark_exited(code);
                return Ok(None);
            }

            match self.next_chunk(cancel).await? {
                Chunk::Data(channel, data) => {
                    let slot = &mut self.channels[channel.index()];
                    if slot.usage == ChannelUse::Wanted {
                        slot.decoder
                            .get_or_insert_with(DecodeBuffer::new)
                            .append(&data);
                    } else {
                        trace!("[Process] Discarding {} bytes of skipped {channel}", data.len());
                    }
                }
                Chunk::Exited(code) => {
                    self.delayed_exit = Some(code);
                }
            }
        }
    }

    /// Lazily read lines until the process exits.
    ///
    /// The cursor is single-pass: once it has returned `None` it stays
    /// exhausted.
    pub fn lines(&mut self, want_stdout: bool, want_stderr: bool) -> Lines<'_> {
        Lines {
            process: self,
            want_stdout,
            want_stderr,
            done: false,
        }
    }

    /// Drain both channels to completion, passing each chunk to `handler`.
    ///
    /// If the handler fails, the process enters
    /// [`ProcessState::ReadException`] and the error is returned as
    /// [`ProcessError::Handler`]; only [`wait_for_exit`](Self::wait_for_exit)
    /// and disposal remain possible.
    pub async fn read_to_end_with<F>(
        &mut self,
        mut handler: F,
        cancel: &CancellationToken,
    ) -> Result<i32>
    where
        F: FnMut(OutputChannel, &[u8]) -> anyhow::Result<()>,
    {
        let mut out = vec![0u8; self.read_buffer_size];
        let mut err = vec![0u8; self.read_buffer_size];
        loop {
            match self
                .read(Some(out.as_mut_slice()), Some(err.as_mut_slice()), cancel)
                .await?
            {
                ReadOutcome::Data { channel, len } => {
                    let data = match channel {
                        OutputChannel::Stdout => &out[..len],
                        OutputChannel::Stderr => &err[..len],
                    };
                    if let Err(e) = handler(channel, data) {
                        warn!("[Process] Output handler failed: {e}");
                        self.state = ProcessState::ReadException;
                        return Err(ProcessError::Handler(e));
                    }
                }
                ReadOutcome::Exited => return self.exit_code(),
            }
        }
    }

    /// Drain both channels into memory.
    pub async fn read_to_end(&mut self, cancel: &CancellationToken) -> Result<Output> {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let exit_code = self
            .read_to_end_with(
                |channel, data| {
                    match channel {
                        OutputChannel::Stdout => stdout.extend_from_slice(data),
                        OutputChannel::Stderr => stderr.extend_from_slice(data),
                    }
                    Ok(())
                },
                cancel,
            )
            .await?;
        Ok(Output {
            stdout,
            stderr,
            exit_code,
        })
    }

    /// Drain both channels into two async sinks, flushing them at the end.
    ///
    /// A sink failure is treated like a failing handler.
    pub async fn read_to_end_into<O, E>(
        &mut self,
        stdout: &mut O,
        stderr: &mut E,
        cancel: &CancellationToken,
    ) -> Result<i32>
    where
        O: AsyncWrite + Unpin + Send,
        E: AsyncWrite + Unpin + Send,
    {
        let mut out = vec![0u8; self.read_buffer_size];
        let mut err = vec![0u8; self.read_buffer_size];
        loop {
            let written = match self
                .read(Some(out.as_mut_slice()), Some(err.as_mut_slice()), cancel)
                .await?
            {
                ReadOutcome::Data {
                    channel: OutputChannel::Stdout,
                    len,
                } => stdout.write_all(&out[..len]).await,
                ReadOutcome::Data {
                    channel: OutputChannel::Stderr,
                    len,
                } => stderr.write_all(&err[..len]).await,
                ReadOutcome::Exited => {
                    let flushed = match stdout.flush().await {
                        Ok(()) => stderr.flush().await,
                        Err(e) => Err(e),
                    };
                    if let Err(e) = flushed {
                        return Err(ProcessError::Handler(e.into()));
                    }
                    return self.exit_code();
                }
            };
            if let Err(e) = written {
                warn!("[Process] Output sink failed: {e}");
                self.state = ProcessState::ReadException;
                return Err(ProcessError::Handler(e.into()));
            }
        }
    }

    /// Wait for the process to finish, discarding any unread output.
    ///
    /// Valid in every state except disposed, including after a failed
    /// read-to-end handler.
    pub async fn wait_for_exit(&mut self, cancel: &CancellationToken) -> Result<i32> {
        let state = self.state.begin(Operation::WaitForExit)?;
        if state == ProcessState::Exited {
            return self.exit_code();
        }
        if let Some(code) = self.delayed_exit.take() {
            self.mark_exited(code);
            return Ok(code);
        }

        loop {
            match self.next_chunk(cancel).await? {
                Chunk::Data(channel, data) => {
                    trace!("[Process] Discarding {} bytes of {channel} while waiting", data.len());
                }
                Chunk::Exited(code) => {
                    self.mark_exited(code);
                    return Ok(code);
                }
            }
        }
    }

    /// Write raw bytes to standard input.
    pub async fn write(&mut self, data: &[u8], cancel: &CancellationToken) -> Result<()> {
        self.stdin_mut()?.write(data, cancel).await
    }

    /// Write text to standard input.
    pub async fn write_str(&mut self, text: &str, cancel: &CancellationToken) -> Result<()> {
        self.stdin_mut()?.write_str(text, cancel).await
    }

    /// Write a line (text plus `\n`) to standard input.
    pub async fn write_line(&mut self, line: &str, cancel: &CancellationToken) -> Result<()> {
        self.stdin_mut()?.write_line(line, cancel).await
    }

    /// Signal end of input on standard input.
    pub async fn close_stdin(&mut self) -> Result<()> {
        self.stdin_mut()?.close().await
    }

    /// Release the transport. Safe to call repeatedly; every later
    /// operation fails with [`ProcessError::Disposed`].
    pub async fn dispose(&mut self) {
        if self.state == ProcessState::Disposed {
            return;
        }
        self.state = ProcessState::Disposed;
        if let Some(mut stdin) = self.stdin.take() {
            if let Err(e) = stdin.close().await {
                debug!("[Process] Closing stdin on dispose failed: {e}");
            }
        }
        self.transport.shutdown().await;
        self.channels = Default::default();
        self.delayed_exit = None;
        debug!("[Process] Disposed (pid {:?})", self.pid);
    }

    fn stdin_mut(&mut self) -> Result<&mut ProcessStdin> {
        self.state.begin(Operation::Write)?;
        self.stdin
            .as_mut()
            .ok_or(ProcessError::InvalidOperation("standard input has been taken"))
    }

    /// Apply the caller's channel choices, enforcing that a skipped channel
    /// stays skipped. Validates before mutating anything.
    fn select_channels(&mut self, wants: [bool; 2]) -> Result<()> {
        for channel in OutputChannel::ALL {
            if wants[channel.index()] && self.channels[channel.index()].usage == ChannelUse::Skipped
            {
                return Err(ProcessError::ChannelSkipped(channel));
            }
        }
        for channel in OutputChannel::ALL {
            let slot = &mut self.channels[channel.index()];
            if wants[channel.index()] {
                slot.usage = ChannelUse::Wanted;
            } else if slot.usage != ChannelUse::Skipped {
                debug!("[Process] Skipping {channel} from now on");
                slot.usage = ChannelUse::Skipped;
                slot.pending = Bytes::new();
                slot.decoder = None;
            }
        }
        Ok(())
    }

    fn take_buffered_line(&mut self, is_final: bool) -> Option<Line> {
        for channel in OutputChannel::ALL {
            let slot = &mut self.channels[channel.index()];
            if slot.usage != ChannelUse::Wanted {
                continue;
            }
            if let Some(text) = slot.decoder.as_mut().and_then(|d| d.try_read_line(is_final)) {
                return Some(Line { channel, text });
            }
        }
        None
    }

    /// Receive the next chunk, racing the transport against `cancel`.
    ///
    /// Transport failures leave the process unusable except for
    /// `wait_for_exit` and disposal.
    async fn next_chunk(&mut self, cancel: &CancellationToken) -> Result<Chunk> {
        let received = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ProcessError::Cancelled),
            received = self.transport.receive() => received,
        };
        if let Err(e) = &received {
            warn!("[Process] Transport failed: {e}");
            self.state = ProcessState::ReadException;
        }
        received
    }

    fn mark_exited(&mut self, code: i32) {
        debug!("[Process] Exited with code {code}");
        self.exit_code = Some(code);
        self.state = ProcessState::Exited;
        for slot in &mut self.channels {
            slot.pending = Bytes::new();
            slot.decoder = None;
        }
    }
}

/// Single-pass line cursor returned by [`Process::lines`].
#[derive(Debug)]
pub struct Lines<'a> {
    process: &'a mut Process,
    want_stdout: bool,
    want_stderr: bool,
    done: bool,
}

impl<'a> Lines<'a> {
    /// Next line, or `None` once the process has exited and been drained.
    pub async fn next_line(&mut self, cancel: &CancellationToken) -> Result<Option<Line>> {
        if self.done {
            return Ok(None);
        }
        let line = self
            .process
            .read_line(self.want_stdout, self.want_stderr, cancel)
            .await;
        if !matches!(line, Ok(Some(_))) {
            self.done = true;
        }
        line
    }

    /// Adapt the cursor into a [`Stream`]. The stream ends after the first
    /// error.
    pub fn into_stream(self, cancel: CancellationToken) -> impl Stream<Item = Result<Line>> + 'a {
        futures_util::stream::unfold((self, cancel), |(mut lines, cancel)| async move {
            match lines.next_line(&cancel).await {
                Ok(Some(line)) => Some((Ok(line), (lines, cancel))),
                Ok(None) => None,
                Err(e) => Some((Err(e), (lines, cancel))),
            }
        })
    }
}
