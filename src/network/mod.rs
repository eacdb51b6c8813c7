//! Message-oriented transport
//!
//! A [`Connector`] produces [`Link`]s: a bounded pair of message queues whose
//! far ends are pumped by background tasks. [`TransportChannel`] owns the
//! current link and applies the reconnect policy.

pub mod channel;
pub mod memory;
pub mod websocket;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use tokio::sync::mpsc;

use crate::error::NetworkError;

pub use channel::{ChannelOptions, ChannelState, ChannelStats, ReconnectPolicy, TransportChannel};
pub use memory::MemoryConnector;
pub use websocket::WebSocketConnector;

/// One transport message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A wire chunk
    Binary(Bytes),
    /// Control text such as the greeting
    Text(String),
}

impl Message {
    pub fn len(&self) -> usize {
        match self {
            Message::Binary(data) => data.len(),
            Message::Text(text) => text.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An established connection
///
/// Dropping `outbound` closes the connection; `inbound` yields `None` once
/// the far end is gone.
pub struct Link {
    pub outbound: mpsc::Sender<Message>,
    pub inbound: mpsc::Receiver<Message>,
}

/// Opens connections to a URL
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<Link, NetworkError>>;
}
