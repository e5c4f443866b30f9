//! Socket transport used by the connection manager.
//!
//! [`Connector`] turns a URL into a stream of inbound text frames. A
//! successful `connect` is the socket's open event; the stream ending is
//! its close event; an `Err` item is a socket error, after which the
//! stream is dropped. Dropping the stream closes the underlying socket,
//! so aborting the driver task on teardown is enough to close it.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Inbound text frames from one open socket.
pub type FrameStream = BoxStream<'static, Result<String, TransportError>>;

/// Opens job status sockets.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<FrameStream, TransportError>;
}

/// Errors raised by a [`Connector`] or its frame stream.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The socket could not be opened.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A protocol-level error on an already-open socket.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// How long a dropped socket may spend sending its close frame.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// [`Connector`] backed by `tokio-tungstenite`.
///
/// Receive-only: protocol pings are answered by tungstenite, binary
/// frames are ignored, and a close frame ends the stream. Dropping the
/// stream before the server closes sends a normal (1000) close frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<FrameStream, TransportError> {
        let (ws_stream, _response) = connect_async(url)
            .await
            .map_err(|e| TransportError::Connection(format!("Failed to connect to {url}: {e}")))?;

        tracing::debug!(url, "Job socket handshake complete");
        Ok(text_frames(ws_stream))
    }
}

type JobSocket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Read half of an open socket. Keeps the write half until the socket
/// is closed so that a client-side drop can still say goodbye.
struct SocketReader {
    frames: SplitStream<JobSocket>,
    writer: Option<SplitSink<JobSocket, Message>>,
}

impl Drop for SocketReader {
    fn drop(&mut self) {
        let Some(mut writer) = self.writer.take() else {
            return;
        };
        // Dropped outside a runtime: the socket just goes away.
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };

        runtime.spawn(async move {
            let close = Message::Close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "".into(),
            }));
            match tokio::time::timeout(CLOSE_TIMEOUT, writer.send(close)).await {
                Ok(Ok(())) => tracing::debug!("Job socket closed by client"),
                Ok(Err(e)) => tracing::debug!(error = %e, "Failed to send close frame"),
                Err(_) => tracing::debug!("Timed out sending close frame"),
            }
        });
    }
}

fn text_frames(ws_stream: JobSocket) -> FrameStream {
    let (writer, frames) = ws_stream.split();
    let reader = SocketReader {
        frames,
        writer: Some(writer),
    };

    stream::unfold(reader, |mut reader| async move {
        loop {
            match reader.frames.next().await {
                Some(Ok(Message::Text(text))) => return Some((Ok(text), reader)),
                Some(Ok(Message::Close(frame))) => {
                    // tungstenite already answered the close handshake.
                    reader.writer = None;
                    tracing::debug!(?frame, "Job socket closed by server");
                    return None;
                }
                Some(Ok(Message::Binary(_))) => {
                    tracing::trace!("Ignoring binary frame on job socket");
                }
                // Pings are answered by tungstenite; raw frames never surface on read.
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Err(e)) => {
                    reader.writer = None;
                    return Some((Err(TransportError::Protocol(e.to_string())), reader));
                }
                None => {
                    reader.writer = None;
                    return None;
                }
            }
        }
    })
    .boxed()
}
