//! Integration tests for remote exec sessions.
//!
//! Most tests drive a [`Process`] over in-memory frame channels. The last
//! group runs a minimal WebSocket API server on localhost and goes through
//! [`ClusterClient`] end to end.

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use podpipe::framing::{self, channel_tag};
use podpipe::transport::exec::{ExecStdin, ExecTransport};
use podpipe::{ClusterClient, Config, ExecOptions, OutputChannel, Process, ProcessError};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

fn exit_status(code: i32) -> Vec<u8> {
    let document = if code == 0 {
        r#"{"metadata":{},"status":"Success"}"#.to_string()
    } else {
        format!(
            r#"{{"metadata":{{}},"status":"Failure","message":"command terminated with non-zero exit code","reason":"NonZeroExitCode","details":{{"causes":[{{"reason":"ExitCode","message":"{code}"}}]}}}}"#
        )
    };
    framing::encode(channel_tag::STATUS, document.as_bytes())
}

struct Remote {
    frames: mpsc::UnboundedSender<Bytes>,
    stdin: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl Remote {
    fn send(&self, tag: u8, payload: &[u8]) {
        self.frames
            .send(Bytes::from(framing::encode(tag, payload)))
            .unwrap();
    }

    fn exit(&self, code: i32) {
        self.frames.send(Bytes::from(exit_status(code))).unwrap();
    }
}

fn session() -> (Remote, Process) {
    let (frames, rx) = mpsc::unbounded_channel();
    let (stdin_tx, stdin) = mpsc::unbounded_channel();
    let process = Process::new(
        Box::new(ExecTransport::new(rx)),
        Box::new(ExecStdin::new(stdin_tx)),
    );
    (Remote { frames, stdin }, process)
}

#[tokio::test]
async fn test_delayed_exit_last_line() {
    let (remote, mut process) = session();
    remote.send(channel_tag::STDOUT, b"last line");
    remote.exit(0);
    let cancel = CancellationToken::new();

    let line = process.read_line(true, true, &cancel).await.unwrap().unwrap();
    assert_eq!(line.text, "last line");
    assert!(matches!(
        process.exit_code(),
        Err(ProcessError::InvalidOperation(_))
    ));
    assert_eq!(process.read_line(true, true, &cancel).await.unwrap(), None);
    assert_eq!(process.exit_code().unwrap(), 0);
}

#[tokio::test]
async fn test_exit_codes() {
    for (code, expected) in [(0, 0), (137, 137), (2, 2)] {
        let (remote, mut process) = session();
        remote.exit(code);
        let got = process.wait_for_exit(&CancellationToken::new()).await.unwrap();
        assert_eq!(got, expected);
    }
}

#[tokio::test]
async fn test_failure_without_exit_code_cause() {
    let (remote, mut process) = session();
    remote.send(channel_tag::STATUS, br#"{"status":"Failure","message":"pod not found"}"#);
    let output = process.read_to_end(&CancellationToken::new()).await.unwrap();
    assert_eq!(output.exit_code, -1);
}

#[tokio::test]
async fn test_session_closed_without_status() {
    let (remote, mut process) = session();
    remote.send(channel_tag::STDERR, b"boom\n");
    drop(remote);
    let output = process.read_to_end(&CancellationToken::new()).await.unwrap();
    assert_eq!(output.stderr, b"boom\n");
    assert_eq!(output.exit_code, -1);
}

#[tokio::test]
async fn test_skip_is_permanent() {
    let (remote, mut process) = session();
    remote.send(channel_tag::STDERR, b"warning\n");
    remote.send(channel_tag::STDOUT, b"result\n");
    remote.exit(0);
    let cancel = CancellationToken::new();

    let line = process.read_line(true, false, &cancel).await.unwrap().unwrap();
    assert_eq!(line.channel, OutputChannel::Stdout);
    assert_eq!(line.text, "result");

    let err = process.read_line(true, true, &cancel).await.unwrap_err();
    assert!(matches!(err, ProcessError::ChannelSkipped(OutputChannel::Stderr)));

    // Narrowing further is still allowed.
    assert_eq!(process.read_line(true, false, &cancel).await.unwrap(), None);
}

#[tokio::test]
async fn test_read_modes_are_exclusive() {
    let (remote, mut process) = session();
    remote.send(channel_tag::STDOUT, b"abc\n");
    let cancel = CancellationToken::new();

    let mut buf = [0u8; 2];
    process.read(Some(&mut buf[..]), None, &cancel).await.unwrap();
    let err = process.read_line(true, false, &cancel).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Invalid operation: cannot read text after reading raw bytes"
    );

    // The byte stream carries on where it left off.
    let n = match process.read(Some(&mut buf[..]), None, &cancel).await.unwrap() {
        podpipe::ReadOutcome::Data { len, .. } => len,
        podpipe::ReadOutcome::Exited => panic!("unexpected exit"),
    };
    assert_eq!(&buf[..n], b"c\n");
}

#[tokio::test]
async fn test_stdin_frames_carry_tag() {
    let (mut remote, mut process) = session();
    let cancel = CancellationToken::new();
    process.write_line("ls /", &cancel).await.unwrap();
    process.write(b"\x01\x02", &cancel).await.unwrap();
    assert_eq!(remote.stdin.recv().await.unwrap(), b"\x00ls /\n".to_vec());
    assert_eq!(remote.stdin.recv().await.unwrap(), b"\x00\x01\x02".to_vec());
}

#[tokio::test]
async fn test_protocol_violation_surfaces_and_blocks_reads() {
    let (remote, mut process) = session();
    remote.frames.send(Bytes::from_static(b"\x07??")).unwrap();
    remote.exit(1);
    let cancel = CancellationToken::new();

    let err = process.read_line(true, true, &cancel).await.unwrap_err();
    assert!(matches!(err, ProcessError::Protocol(_)));
    assert!(process.read_line(true, true, &cancel).await.is_err());
    assert_eq!(process.wait_for_exit(&cancel).await.unwrap(), 1);
}

#[tokio::test]
async fn test_lines_stream_over_exec() {
    let (remote, mut process) = session();
    remote.send(channel_tag::STDOUT, b"one\ntw");
    remote.send(channel_tag::STDOUT, b"o\r");
    remote.send(channel_tag::STDOUT, b"\nthree");
    remote.exit(0);

    let texts: Vec<String> = process
        .lines(true, true)
        .into_stream(CancellationToken::new())
        .map(|line| line.unwrap().text)
        .collect()
        .await;
    assert_eq!(texts, ["one", "two", "three"]);
}

/// Minimal API server: accepts one exec connection, checks the request,
/// echoes stdin frames back on stdout, and exits when it sees "exit\n".
async fn fake_api_server(listener: TcpListener) -> String {
    let (tcp, _) = listener.accept().await.unwrap();
    let mut request_uri = String::new();
    let callback = |req: &Request, mut resp: Response| -> Result<Response, ErrorResponse> {
        request_uri = req.uri().to_string();
        assert_eq!(
            req.headers().get("Sec-WebSocket-Protocol").unwrap(),
            "v4.channel.k8s.io"
        );
        assert_eq!(req.headers().get("Authorization").unwrap(), "Bearer s3cret");
        resp.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_static("v4.channel.k8s.io"),
        );
        Ok(resp)
    };
    let mut ws = tokio_tungstenite::accept_hdr_async(tcp, callback).await.unwrap();

    ws.send(Message::Binary(framing::encode(channel_tag::STDERR, b"ready\n")))
        .await
        .unwrap();
    while let Some(Ok(message)) = ws.next().await {
        let Message::Binary(frame) = message else {
            continue;
        };
        assert_eq!(frame[0], channel_tag::STDIN);
        let input = &frame[1..];
        if input == b"exit\n" {
            break;
        }
        ws.send(Message::Binary(framing::encode(channel_tag::STDOUT, input)))
            .await
            .unwrap();
    }
    ws.send(Message::Binary(exit_status(42))).await.unwrap();
    ws.close(None).await.unwrap();
    request_uri
}

#[tokio::test]
async fn test_cluster_client_exec_end_to_end() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(fake_api_server(listener));

    let client = ClusterClient::new(Config {
        server_url: format!("http://{addr}"),
        namespace: "ops".to_string(),
        token: "s3cret".to_string(),
        ..Config::default()
    });
    let mut process = client
        .exec("shell-0", Some("main"), &["sh"], ExecOptions { stdin: true })
        .await
        .unwrap();
    let cancel = CancellationToken::new();

    let ready = process.read_line(true, true, &cancel).await.unwrap().unwrap();
    assert!(ready.is_error());
    assert_eq!(ready.text, "ready");

    process.write_line("echo hi", &cancel).await.unwrap();
    let echoed = process.read_line(true, true, &cancel).await.unwrap().unwrap();
    assert_eq!(echoed.channel, OutputChannel::Stdout);
    assert_eq!(echoed.text, "echo hi");

    process.write_line("exit", &cancel).await.unwrap();
    assert_eq!(process.read_line(true, true, &cancel).await.unwrap(), None);
    assert_eq!(process.exit_code().unwrap(), 42);
    process.dispose().await;

    let uri = server.await.unwrap();
    assert_eq!(
        uri,
        "/api/v1/namespaces/ops/pods/shell-0/exec?command=sh&container=main&stdin=true&stdout=true&stderr=true"
    );
}
