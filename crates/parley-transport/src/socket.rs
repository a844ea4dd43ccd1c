use std::future::Future;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::wire::{ClientFrame, ServerFrame};

/// A duplex realtime socket, abstracted so the connection manager can be
/// driven against an in-memory transport in tests.
pub trait SocketTransport: Send + 'static {
    type Sink: SocketSink;
    type Stream: SocketStream;

    fn connect(
        url: &str,
        bearer: &str,
    ) -> impl Future<Output = Result<Self, TransportError>> + Send
    where
        Self: Sized;

    /// Splits into independently owned halves so sending and receiving can
    /// run on separate tasks.
    fn split(self) -> (Self::Sink, Self::Stream);
}

pub trait SocketSink: Send + 'static {
    fn send(&mut self, frame: ClientFrame)
        -> impl Future<Output = Result<(), TransportError>> + Send;

    fn close(&mut self) -> impl Future<Output = Result<(), TransportError>> + Send;
}

pub trait SocketStream: Send + 'static {
    /// Next decoded frame. `None` means the connection is gone; a decode
    /// error applies to a single frame and leaves the stream usable.
    fn next_frame(
        &mut self,
    ) -> impl Future<Output = Option<Result<ServerFrame, TransportError>>> + Send;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// `SocketTransport` over tokio-tungstenite with bearer authentication on
/// the handshake request.
pub struct WebSocketTransport {
    inner: WsStream,
}

pub struct WebSocketSink {
    inner: SplitSink<WsStream, Message>,
}

pub struct WebSocketFrames {
    inner: SplitStream<WsStream>,
}

impl SocketTransport for WebSocketTransport {
    type Sink = WebSocketSink;
    type Stream = WebSocketFrames;

    async fn connect(url: &str, bearer: &str) -> Result<Self, TransportError> {
        let mut request = url
            .into_client_request()
            .map_err(|e| TransportError::InvalidUrl(format!("{url}: {e}")))?;
        let header = format!("Bearer {bearer}")
            .parse()
            .map_err(|_| TransportError::Handshake("bearer token is not a valid header value".into()))?;
        request.headers_mut().insert(AUTHORIZATION, header);

        let (stream, response) = connect_async(request)
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        debug!(status = %response.status(), "websocket handshake complete");

        Ok(Self { inner: stream })
    }

    fn split(self) -> (Self::Sink, Self::Stream) {
        let (sink, stream) = self.inner.split();
        (WebSocketSink { inner: sink }, WebSocketFrames { inner: stream })
    }
}

impl SocketSink for WebSocketSink {
    async fn send(&mut self, frame: ClientFrame) -> Result<(), TransportError> {
        let text = serde_json::to_string(&frame)?;
        self.inner
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.inner
            .close()
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }
}

impl SocketStream for WebSocketFrames {
    async fn next_frame(&mut self) -> Option<Result<ServerFrame, TransportError>> {
        loop {
            match self.inner.next().await? {
                Ok(Message::Text(text)) => {
                    return Some(serde_json::from_str(&text).map_err(TransportError::from));
                }
                Ok(Message::Close(_)) => return None,
                // Pings and pongs are handled by tungstenite itself.
                Ok(_) => continue,
                Err(e) => {
                    warn!(error = %e, "websocket read failed, treating connection as lost");
                    return None;
                }
            }
        }
    }
}
