//! Standard-input writer for a process.

use tokio_util::sync::CancellationToken;

use crate::error::{ProcessError, Result};
use crate::transport::StdinSink;

/// Write side of a [`Process`](super::Process).
///
/// Obtained from [`Process::take_stdin`](super::Process::take_stdin) when
/// writes must run concurrently with reads. Text is encoded as UTF-8 and
/// every call is delivered immediately; nothing is buffered across calls.
///
/// Errors are the transport's own (a broken pipe surfaces as
/// [`ProcessError::Io`], a dropped session as [`ProcessError::WebSocket`] or
/// [`ProcessError::Closed`]).
///
/// A write cancelled mid-flight may have delivered a prefix of its data.
pub struct ProcessStdin {
    sink: Box<dyn StdinSink>,
}

impl std::fmt::Debug for ProcessStdin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessStdin").finish_non_exhaustive()
    }
}

impl ProcessStdin {
    pub(crate) fn new(sink: Box<dyn StdinSink>) -> Self {
        Self { sink }
    }

    /// Write raw bytes.
    pub async fn write(&mut self, data: &[u8], cancel: &CancellationToken) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(ProcessError::Cancelled),
            sent = self.sink.send(data) => sent,
        }
    }

    /// Write text without a terminator.
    pub async fn write_str(&mut self, text: &str, cancel: &CancellationToken) -> Result<()> {
        self.write(text.as_bytes(), cancel).await
    }

    /// Write `line` followed by `\n`, as a single send.
    pub async fn write_line(&mut self, line: &str, cancel: &CancellationToken) -> Result<()> {
        let mut data = Vec::with_capacity(line.len() + 1);
        data.extend_from_slice(line.as_bytes());
        data.push(b'\n');
        self.write(&data, cancel).await
    }

    /// Signal end of input. Repeated calls are no-ops.
    pub async fn close(&mut self) -> Result<()> {
        self.sink.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    #[derive(Default, Clone)]
    struct Recorder {
        sent: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    #[async_trait]
    impl StdinSink for Recorder {
        async fn send(&mut self, data: &[u8]) -> Result<()> {
            self.sent.lock().unwrap().push(data.to_vec());
            Ok(())
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    struct Broken;

    #[async_trait]
    impl StdinSink for Broken {
        async fn send(&mut self, _data: &[u8]) -> Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone").into())
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_write_line_is_one_send() {
        let recorder = Recorder::default();
        let mut stdin = ProcessStdin::new(Box::new(recorder.clone()));
        let cancel = CancellationToken::new();

        stdin.write_line("touch /tmp/alive", &cancel).await.unwrap();
        stdin.write_str("ab", &cancel).await.unwrap();
        stdin.write(b"", &cancel).await.unwrap();

        let sent = recorder.sent.lock().unwrap();
        assert_eq!(
            *sent,
            vec![b"touch /tmp/alive\n".to_vec(), b"ab".to_vec()]
        );
    }

    #[tokio::test]
    async fn test_transport_error_not_wrapped() {
        let mut stdin = ProcessStdin::new(Box::new(Broken));
        let err = stdin
            .write_line("x", &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            ProcessError::Io(inner) => assert_eq!(inner.kind(), std::io::ErrorKind::BrokenPipe),
            other => panic!("expected Io, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancelled_write() {
        let recorder = Recorder::default();
        let mut stdin = ProcessStdin::new(Box::new(recorder.clone()));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = stdin.write(b"data", &cancel).await.unwrap_err();
        assert!(matches!(err, ProcessError::Cancelled));
        assert!(recorder.sent.lock().unwrap().is_empty());
    }
}
