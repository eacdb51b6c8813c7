//! Relay HTTP server
//!
//! WebSocket upgrades on `/` join the hub; `/api/status` and `/api/clients`
//! report on it. Any other path gets a JSON 404.

use axum::extract::ws::{Message as AxumMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use futures_util::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::config::RelayConfig;
use crate::error::NetworkError;
use crate::network::websocket::{spawn_pumps, Frame};
use crate::network::Message;
use crate::relay::handlers;
use crate::relay::hub::RelayHub;

/// Per-client queue depth between the socket and the hub
const CLIENT_QUEUE: usize = 64;

impl Frame for AxumMessage {
    fn from_message(message: Message) -> Self {
        match message {
            Message::Binary(data) => AxumMessage::Binary(data.to_vec()),
            Message::Text(text) => AxumMessage::Text(text),
        }
    }

    fn into_message(self) -> Option<Message> {
        match self {
            AxumMessage::Binary(data) => Some(Message::Binary(Bytes::from(data))),
            AxumMessage::Text(text) => Some(Message::Text(text)),
            _ => None,
        }
    }
}

pub fn router(hub: Arc<RelayHub>) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/api/status", get(handlers::get_status))
        .route("/api/clients", get(handlers::get_clients))
        .fallback(handlers::not_found)
        .with_state(hub)
}

async fn ws_handler(ws: WebSocketUpgrade, State(hub): State<Arc<RelayHub>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

async fn handle_socket(socket: WebSocket, hub: Arc<RelayHub>) {
    let (sink, stream) = socket.split();
    let link = spawn_pumps(sink, stream, CLIENT_QUEUE, CLIENT_QUEUE);
    hub.serve(link).await;
}

/// A bound relay, ready to serve
pub struct RelayServer {
    listener: TcpListener,
    hub: Arc<RelayHub>,
}

impl RelayServer {
    pub async fn bind(config: &RelayConfig) -> crate::Result<Self> {
        let addr = format!("{}:{}", config.bind_address, config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| NetworkError::BindFailed(format!("{}: {}", addr, e)))?;

        Ok(Self {
            listener,
            hub: Arc::new(RelayHub::new(config.broadcast_capacity)),
        })
    }

    pub fn local_addr(&self) -> crate::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn hub(&self) -> Arc<RelayHub> {
        self.hub.clone()
    }

    /// Serve until the process ends
    pub async fn run(self) -> crate::Result<()> {
        tracing::info!("Relay listening on ws://{}", self.listener.local_addr()?);
        axum::serve(self.listener, router(self.hub)).await?;
        Ok(())
    }
}
