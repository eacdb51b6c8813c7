//! In-process links
//!
//! Every connect creates a fresh pair of queues and hands the far end to
//! whoever holds the accept receiver. Used for tests and for wiring both
//! ends of a stream inside one process.

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::NetworkError;
use crate::network::{Connector, Link};

/// Two links wired back to back
pub fn link_pair(capacity: usize) -> (Link, Link) {
    let (a_tx, a_rx) = mpsc::channel(capacity.max(1));
    let (b_tx, b_rx) = mpsc::channel(capacity.max(1));
    (
        Link {
            outbound: a_tx,
            inbound: b_rx,
        },
        Link {
            outbound: b_tx,
            inbound: a_rx,
        },
    )
}

#[derive(Clone)]
pub struct MemoryConnector {
    accept_tx: mpsc::UnboundedSender<(String, Link)>,
    refuse: Arc<AtomicBool>,
    attempts: Arc<AtomicUsize>,
    capacity: usize,
}

impl MemoryConnector {
    /// Connector plus the receiver of accepted far ends, tagged with the URL
    pub fn new(capacity: usize) -> (Self, mpsc::UnboundedReceiver<(String, Link)>) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        let connector = Self {
            accept_tx,
            refuse: Arc::new(AtomicBool::new(false)),
            attempts: Arc::new(AtomicUsize::new(0)),
            capacity,
        };
        (connector, accept_rx)
    }

    /// Make further connects fail
    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Connector for MemoryConnector {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<Link, NetworkError>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let result = if self.refuse.load(Ordering::SeqCst) {
            Err(NetworkError::ConnectionFailed(format!("{}: refused", url)))
        } else {
            let (near, far) = link_pair(self.capacity);
            self.accept_tx
                .send((url.to_string(), far))
                .map(|_| near)
                .map_err(|_| NetworkError::ConnectionFailed(format!("{}: nobody listening", url)))
        };
        async move { result }.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Message;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_connect_hands_far_end_to_acceptor() {
        let (connector, mut accepted) = MemoryConnector::new(4);
        let mut near = connector.connect("mem://a").await.unwrap();
        let (url, mut far) = accepted.recv().await.unwrap();
        assert_eq!(url, "mem://a");

        near.outbound.send(Message::Binary(Bytes::from_static(b"x"))).await.unwrap();
        assert_eq!(far.inbound.recv().await, Some(Message::Binary(Bytes::from_static(b"x"))));

        drop(far);
        assert_eq!(near.inbound.recv().await, None);
    }

    #[tokio::test]
    async fn test_refused_connect_counts_attempt() {
        let (connector, _accepted) = MemoryConnector::new(4);
        connector.set_refuse(true);
        assert!(connector.connect("mem://a").await.is_err());
        assert_eq!(connector.attempts(), 1);
    }
}
