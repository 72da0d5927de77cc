//! WebSocket channel
//!
//! Outgoing frames go through an unbounded queue to a writer task so `send`
//! never blocks the event loop; incoming frames are read directly from the
//! stream half, which keeps `recv` cancel-safe.

use async_trait::async_trait;
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, trace, warn};

use tabsync_core::{Channel, ConnectivityError, Connector};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Dials `ws://` urls
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Channel>, ConnectivityError> {
        let (stream, _) = connect_async(url)
            .await
            .map_err(|e| ConnectivityError::ConnectFailed(e.to_string()))?;
        debug!(url, "WebSocket connected");
        Ok(Box::new(WsChannel::new(stream)))
    }
}

/// An open WebSocket carrying text frames
pub struct WsChannel {
    outgoing: Option<mpsc::UnboundedSender<String>>,
    incoming: SplitStream<WsStream>,
    writer: JoinHandle<()>,
    closed: bool,
}

impl WsChannel {
    fn new(stream: WsStream) -> Self {
        let (mut sink, incoming) = stream.split();
        let (outgoing, mut rx) = mpsc::unbounded_channel::<String>();

        let writer = tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                if let Err(e) = sink.send(Message::Text(text)).await {
                    warn!(error = %e, "WebSocket write failed");
                    return;
                }
            }
            // Sender dropped: close politely
            let _ = sink.close().await;
        });

        Self {
            outgoing: Some(outgoing),
            incoming,
            writer,
            closed: false,
        }
    }
}

#[async_trait]
impl Channel for WsChannel {
    fn send(&mut self, frame: String) -> Result<(), ConnectivityError> {
        if self.writer.is_finished() {
            return Err(ConnectivityError::Closed);
        }
        let outgoing = self.outgoing.as_ref().ok_or(ConnectivityError::Closed)?;
        outgoing
            .send(frame)
            .map_err(|e| ConnectivityError::SendFailed(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, ConnectivityError>> {
        if self.closed {
            return None;
        }
        loop {
            match self.incoming.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(data)) => match String::from_utf8(data) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => warn!("Dropping non-UTF-8 binary frame"),
                },
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "WebSocket closed by server");
                    self.closed = true;
                    return None;
                }
                Ok(other) => trace!(?other, "Ignoring control frame"),
                Err(e) => {
                    self.closed = true;
                    return Some(Err(ConnectivityError::ReceiveFailed(e.to_string())));
                }
            }
        }
    }

    fn close(&mut self) {
        self.closed = true;
        // Dropping the sender lets the writer send a close frame and exit
        self.outgoing = None;
    }
}

impl Drop for WsChannel {
    fn drop(&mut self) {
        self.outgoing = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_server_is_connect_failure() {
        // Port 9 (discard) on localhost is essentially never a WebSocket server
        let result = WsConnector::new().connect("ws://127.0.0.1:9/orders").await;
        assert!(matches!(result, Err(ConnectivityError::ConnectFailed(_))));
    }

    #[tokio::test]
    async fn test_invalid_url_is_connect_failure() {
        let result = WsConnector::new().connect("not a url").await;
        assert!(matches!(result, Err(ConnectivityError::ConnectFailed(_))));
    }
}
