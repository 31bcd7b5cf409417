//! Local child-process transport.
//!
//! Adapts a child's stdout and stderr pipes to the one-chunk-per-call
//! [`Transport`] contract:
//!
//! - Both pipes are read concurrently; whichever produces data first wins.
//!   When both are ready at once, stdout is taken first.
//! - End-of-stream on one pipe is not process exit. Only after both pipes
//!   are exhausted does the transport wait for the child and report its
//!   exit code.
//! - Reads go through `AsyncReadExt::read_buf`, which is cancel safe, so a
//!   dropped `receive` loses nothing.
//!
//! [`LocalCommand`] is the launch builder; it returns a ready
//! [`Process`](crate::process::Process).

// Rust guideline compliant 2026-02

use async_trait::async_trait;
use bytes::BytesMut;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

use super::{Chunk, StdinSink, Transport};
use crate::constants::{KILL_WAIT_TIMEOUT, READ_BUFFER_SIZE, UNKNOWN_EXIT_CODE};
use crate::error::{ProcessError, Result};
use crate::framing::OutputChannel;
use crate::process::Process;

/// Builder for launching a local process.
#[derive(Debug, Clone)]
pub struct LocalCommand {
    program: OsString,
    args: Vec<OsString>,
    /// Environment overrides; `None` removes the variable.
    env: HashMap<OsString, Option<OsString>>,
    current_dir: Option<PathBuf>,
}

impl LocalCommand {
    /// Start building a launch of `program`.
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: HashMap::new(),
            current_dir: None,
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable for the child (added to the parent env).
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.insert(key.into(), Some(value.into()));
        self
    }

    /// Remove an inherited environment variable.
    pub fn env_remove(mut self, key: impl Into<OsString>) -> Self {
        self.env.insert(key.into(), None);
        self
    }

    /// Set the working directory.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Launch the program with all three standard streams piped.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::Io`] if the program cannot be started.
    pub fn spawn(&self) -> Result<Process> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &self.env {
            match value {
                Some(value) => command.env(key, value),
                None => command.env_remove(key),
            };
        }
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn()?;
        info!(
            "[Local] Started {} (pid {:?})",
            self.program.to_string_lossy(),
            child.id()
        );

        let stdin = child.stdin.take();
        let transport = LocalTransport::new(child);
        let pid = transport.pid();
        Ok(
            Process::new(Box::new(transport), Box::new(LocalStdin::new(stdin)))
                .with_pid(pid),
        )
    }
}

/// Read side of a local child process.
#[derive(Debug)]
pub struct LocalTransport {
    child: Child,
    pid: Option<u32>,
    /// `None` once the pipe reached end-of-stream.
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    stdout_buf: BytesMut,
    stderr_buf: BytesMut,
    exit_code: Option<i32>,
}

impl LocalTransport {
    /// Take ownership of a spawned child's stdout/stderr pipes.
    pub fn new(mut child: Child) -> Self {
        let pid = child.id();
        Self {
            stdout: child.stdout.take(),
            stderr: child.stderr.take(),
            child,
            pid,
            stdout_buf: BytesMut::with_capacity(READ_BUFFER_SIZE),
            stderr_buf: BytesMut::with_capacity(READ_BUFFER_SIZE),
            exit_code: None,
        }
    }

    /// OS process id of the child.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    async fn wait_for_child(&mut self) -> Result<i32> {
        let status = self.child.wait().await?;
        let code = exit_code_of(status);
        debug!("[Local] pid {:?} exited with {code}", self.pid);
        self.exit_code = Some(code);
        Ok(code)
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn receive(&mut self) -> Result<Chunk> {
        if let Some(code) = self.exit_code {
            return Ok(Chunk::Exited(code));
        }

        loop {
            if self.stdout.is_none() && self.stderr.is_none() {
                return self.wait_for_child().await.map(Chunk::Exited);
            }

            let (channel, read) = tokio::select! {
                biased;
                read = read_pipe(&mut self.stdout, &mut self.stdout_buf) => (OutputChannel::Stdout, read),
                read = read_pipe(&mut self.stderr, &mut self.stderr_buf) => (OutputChannel::Stderr, read),
            };

            if read? == 0 {
                debug!("[Local] {channel} reached end of stream");
                match channel {
                    OutputChannel::Stdout => self.stdout = None,
                    OutputChannel::Stderr => self.stderr = None,
                }
                continue;
            }

            let buf = match channel {
                OutputChannel::Stdout => &mut self.stdout_buf,
                OutputChannel::Stderr => &mut self.stderr_buf,
            };
            let data = buf.split().freeze();
            buf.reserve(READ_BUFFER_SIZE);
            return Ok(Chunk::Data(channel, data));
        }
    }

    async fn shutdown(&mut self) {
        self.stdout = None;
        self.stderr = None;
        if self.exit_code.is_some() {
            return;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.exit_code = Some(exit_code_of(status));
            }
            Ok(None) => {
                debug!("[Local] Killing pid {:?} on dispose", self.pid);
                if let Err(e) = self.child.start_kill() {
                    warn!("[Local] Failed to kill pid {:?}: {e}", self.pid);
                    return;
                }
                match tokio::time::timeout(KILL_WAIT_TIMEOUT, self.child.wait()).await {
                    Ok(Ok(status)) => self.exit_code = Some(exit_code_of(status)),
                    Ok(Err(e)) => warn!("[Local] Error waiting for pid {:?}: {e}", self.pid),
                    Err(_elapsed) => warn!("[Local] Timeout waiting for pid {:?} to exit", self.pid),
                }
            }
            Err(e) => warn!("[Local] Failed to poll pid {:?}: {e}", self.pid),
        }
    }
}

/// Read from a pipe if it is still open; pends forever otherwise so the
/// other `select!` branch decides.
async fn read_pipe<R: AsyncRead + Unpin>(pipe: &mut Option<R>, buf: &mut BytesMut) -> Result<usize> {
    match pipe.as_mut() {
        Some(reader) => Ok(reader.read_buf(buf).await?),
        None => std::future::pending().await,
    }
}

/// Map an OS exit status to a single code.
///
/// On Unix a signal-terminated child reports `128 + signal`, the shell
/// convention.
fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    UNKNOWN_EXIT_CODE
}

/// Write side of a local child process.
#[derive(Debug)]
pub struct LocalStdin {
    stdin: Option<ChildStdin>,
}

impl LocalStdin {
    /// Wrap the child's stdin pipe (if it was piped).
    pub fn new(stdin: Option<ChildStdin>) -> Self {
        Self { stdin }
    }
}

#[async_trait]
impl StdinSink for LocalStdin {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or(ProcessError::InvalidOperation("standard input is closed"))?;
        stdin.write_all(data).await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stdin) = self.stdin.take() {
            stdin.shutdown().await?;
        }
        Ok(())
    }
}
