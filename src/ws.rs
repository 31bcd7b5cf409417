//! WebSocket plumbing for channel-multiplexed API sessions.
//!
//! Exec and port-forward sessions both ride on a binary WebSocket carrying
//! tagged frames. This module owns the `tokio-tungstenite` connection and
//! hands out frame-level reader/writer halves.
//!
//! # Architecture
//!
//! A single [`connect`] function handles request building, header
//! insertion, the subprotocol offer, TLS negotiation and the handshake
//! timeout. It returns a ([`WsWriter`], [`WsReader`]) pair. The halves
//! implement [`FrameSink`] and [`FrameSource`], so the transports above
//! never see tungstenite types.

// Rust guideline compliant 2026-02

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, trace};
use std::time::Duration;
use tokio_tungstenite::tungstenite;
use url::Url;

use crate::error::{ProcessError, Result};
use crate::transport::{FrameSink, FrameSource};

/// Concrete WebSocket stream type (avoids repeating the generic everywhere).
type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Write half of a WebSocket connection.
#[derive(Debug)]
pub struct WsWriter {
    sink: futures_util::stream::SplitSink<WsStream, tungstenite::Message>,
    closed: bool,
}

/// Read half of a WebSocket connection.
#[derive(Debug)]
pub struct WsReader {
    stream: futures_util::stream::SplitStream<WsStream>,
}

#[async_trait]
impl FrameSink for WsWriter {
    async fn send_frame(&mut self, frame: Vec<u8>) -> Result<()> {
        if self.closed {
            return Err(ProcessError::Closed);
        }
        self.sink.send(tungstenite::Message::Binary(frame)).await?;
        Ok(())
    }

    /// Send a close frame and flush. Repeated calls are no-ops.
    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        match self.sink.close().await {
            Ok(()) | Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl FrameSource for WsReader {
    /// Next binary message; `None` once the peer closes.
    ///
    /// Ping/pong and raw frames are skipped (tungstenite answers pings
    /// itself). Text messages are not part of the channel protocol.
    async fn recv_frame(&mut self) -> Result<Option<Bytes>> {
        loop {
            match self.stream.next().await {
                Some(Ok(tungstenite::Message::Binary(data))) => return Ok(Some(Bytes::from(data))),
                Some(Ok(tungstenite::Message::Text(text))) => {
                    return Err(ProcessError::Protocol(format!(
                        "unexpected text message ({} bytes)",
                        text.len()
                    )));
                }
                Some(Ok(tungstenite::Message::Ping(_) | tungstenite::Message::Pong(_))) => {
                    trace!("[Ws] Control frame");
                }
                Some(Ok(tungstenite::Message::Frame(_))) => {}
                Some(Ok(tungstenite::Message::Close(frame))) => {
                    debug!("[Ws] Peer closed: {frame:?}");
                    return Ok(None);
                }
                Some(Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed))
                | None => return Ok(None),
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }
}

/// Connect to a WebSocket URL, offering `subprotocol` and sending `headers`.
///
/// The handshake is abandoned after `timeout`.
///
/// # Errors
///
/// - [`ProcessError::InvalidRequest`] for malformed URLs or header values
/// - [`ProcessError::Io`] with `TimedOut` when the handshake takes too long
/// - [`ProcessError::WebSocket`] if the handshake fails
pub async fn connect(
    url: &Url,
    subprotocol: &str,
    headers: &[(&str, &str)],
    timeout: Duration,
) -> Result<(WsWriter, WsReader)> {
    use tungstenite::client::IntoClientRequest;
    use tungstenite::http::{HeaderName, HeaderValue};

    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| ProcessError::InvalidRequest(format!("invalid WebSocket URL {url}: {e}")))?;

    let protocol = HeaderValue::from_str(subprotocol)
        .map_err(|e| ProcessError::InvalidRequest(format!("invalid subprotocol: {e}")))?;
    request
        .headers_mut()
        .insert(tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL, protocol);

    for &(name, value) in headers {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ProcessError::InvalidRequest(format!("invalid header name {name}: {e}")))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|e| ProcessError::InvalidRequest(format!("invalid header value for {name}: {e}")))?;
        request.headers_mut().insert(header_name, header_value);
    }

    info!("[Ws] Connecting to {url}");
    let (ws_stream, _response) =
        tokio::time::timeout(timeout, tokio_tungstenite::connect_async(request))
            .await
            .map_err(|_elapsed| {
                std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("WebSocket handshake with {url} timed out after {timeout:?}"),
                )
            })??;

    let (sink, stream) = ws_stream.split();
    Ok((
        WsWriter {
            sink,
            closed: false,
        },
        WsReader { stream },
    ))
}

/// Convert an HTTP(S) URL to the WS(S) scheme in place.
///
/// Leaves `ws://` and `wss://` unchanged.
///
/// # Errors
///
/// Returns [`ProcessError::InvalidRequest`] for any other scheme.
pub fn http_to_ws_scheme(url: &mut Url) -> Result<()> {
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(ProcessError::InvalidRequest(format!(
                "unsupported URL scheme: {other}"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| ProcessError::InvalidRequest(format!("cannot use scheme {scheme} for {url}")))
}
