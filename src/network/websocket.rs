//! WebSocket links over tokio-tungstenite

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::{FutureExt, Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::config::NetworkConfig;
use crate::error::NetworkError;
use crate::network::{Connector, Link, Message};

/// A WebSocket frame type that can carry a [`Message`]
pub trait Frame: Sized + Send + 'static {
    fn from_message(message: Message) -> Self;

    /// `None` for control frames
    fn into_message(self) -> Option<Message>;
}

impl Frame for WsMessage {
    fn from_message(message: Message) -> Self {
        match message {
            Message::Binary(data) => WsMessage::Binary(data.to_vec()),
            Message::Text(text) => WsMessage::Text(text),
        }
    }

    fn into_message(self) -> Option<Message> {
        match self {
            WsMessage::Binary(data) => Some(Message::Binary(Bytes::from(data))),
            WsMessage::Text(text) => Some(Message::Text(text)),
            _ => None,
        }
    }
}

/// Client connector for `ws://` URLs
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    outbound_queue: usize,
    inbound_queue: usize,
}

impl WebSocketConnector {
    pub fn new(config: &NetworkConfig) -> Self {
        Self {
            outbound_queue: config.outbound_queue.max(1),
            inbound_queue: config.inbound_queue.max(1),
        }
    }
}

impl Connector for WebSocketConnector {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<Link, NetworkError>> {
        let url = url.to_string();
        let (outbound_queue, inbound_queue) = (self.outbound_queue, self.inbound_queue);

        async move {
            let (socket, _) = tokio_tungstenite::connect_async(url.as_str())
                .await
                .map_err(|e| NetworkError::ConnectionFailed(format!("{}: {}", url, e)))?;
            tracing::debug!("WebSocket connected to {}", url);

            let (sink, stream) = socket.split();
            Ok(spawn_pumps(sink, stream, outbound_queue, inbound_queue))
        }
        .boxed()
    }
}

/// Pump a split WebSocket through a [`Link`]
///
/// Used by the client connector and by the relay for accepted sockets.
/// Must be called inside a tokio runtime.
pub fn spawn_pumps<F, S, R, E>(mut sink: S, mut stream: R, outbound_queue: usize, inbound_queue: usize) -> Link
where
    F: Frame,
    S: Sink<F> + Unpin + Send + 'static,
    S::Error: std::fmt::Display,
    R: Stream<Item = Result<F, E>> + Unpin + Send + 'static,
    E: std::fmt::Display + Send,
{
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(outbound_queue);
    let (inbound_tx, inbound_rx) = mpsc::channel::<Message>(inbound_queue);

    tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if let Err(e) = sink.send(F::from_message(message)).await {
                tracing::debug!("WebSocket write failed: {}", e);
                break;
            }
        }
        let _ = sink.close().await;
    });

    tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(frame) => {
                    let Some(message) = frame.into_message() else {
                        continue;
                    };
                    if inbound_tx.send(message).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!("WebSocket read failed: {}", e);
                    break;
                }
            }
        }
    });

    Link {
        outbound: outbound_tx,
        inbound: inbound_rx,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_mapping() {
        let frame = WsMessage::from_message(Message::Binary(Bytes::from_static(&[1, 2])));
        assert_eq!(frame, WsMessage::Binary(vec![1, 2]));
        assert_eq!(
            WsMessage::Text("hi".into()).into_message(),
            Some(Message::Text("hi".into()))
        );
        assert_eq!(WsMessage::Ping(vec![]).into_message(), None);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let connector = WebSocketConnector::new(&NetworkConfig::default());
        // port 9 on loopback has no listener
        let result = connector.connect("ws://127.0.0.1:9").await;
        assert!(matches!(result, Err(NetworkError::ConnectionFailed(_))));
    }
}
