//! Message fan-out between connected clients
//!
//! Every message a client sends is published to every other client. The hub
//! does not look inside messages; chunks and greetings alike are forwarded.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::broadcast;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

use crate::network::{Link, Message};

#[derive(Debug, Clone)]
struct Envelope {
    from: Uuid,
    message: Message,
}

/// A connected client
#[derive(Debug, Clone, Serialize)]
pub struct ClientInfo {
    pub id: Uuid,
    pub connected_at: DateTime<Utc>,
    pub messages_in: u64,
    pub bytes_in: u64,
    /// Messages not delivered to this client because it fell behind
    pub dropped_out: u64,
}

/// Totals since the hub started
#[derive(Debug, Clone, Serialize)]
pub struct RelayStats {
    pub started_at: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub clients: usize,
    pub messages: u64,
    pub bytes: u64,
    pub longest_message: usize,
    pub dropped: u64,
}

pub struct RelayHub {
    tx: broadcast::Sender<Envelope>,
    clients: DashMap<Uuid, ClientInfo>,
    started_at: DateTime<Utc>,
    messages: AtomicU64,
    bytes: AtomicU64,
    longest: AtomicUsize,
    dropped: AtomicU64,
}

impl RelayHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            clients: DashMap::new(),
            started_at: Utc::now(),
            messages: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            longest: AtomicUsize::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Relay for one client until either side goes away
    pub async fn serve(&self, link: Link) {
        let id = Uuid::new_v4();
        let Link { outbound, mut inbound } = link;
        let mut published = self.tx.subscribe();

        self.clients.insert(
            id,
            ClientInfo {
                id,
                connected_at: Utc::now(),
                messages_in: 0,
                bytes_in: 0,
                dropped_out: 0,
            },
        );
        tracing::info!("Client {} connected ({} total)", id, self.clients.len());

        loop {
            tokio::select! {
                message = inbound.recv() => {
                    let Some(message) = message else { break };
                    self.publish(id, message);
                }
                envelope = published.recv() => match envelope {
                    Ok(envelope) if envelope.from == id => {}
                    Ok(envelope) => match outbound.try_send(envelope.message) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => self.count_drop(id, 1),
                        Err(TrySendError::Closed(_)) => break,
                    },
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Client {} lagged, skipped {} messages", id, skipped);
                        self.count_drop(id, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        self.clients.remove(&id);
        tracing::info!("Client {} disconnected ({} left)", id, self.clients.len());
    }

    fn publish(&self, from: Uuid, message: Message) {
        let len = message.len();
        self.messages.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(len as u64, Ordering::Relaxed);
        self.longest.fetch_max(len, Ordering::Relaxed);

        if let Some(mut client) = self.clients.get_mut(&from) {
            client.messages_in += 1;
            client.bytes_in += len as u64;
        }
        if let Message::Text(text) = &message {
            tracing::info!("Client {} says {:?}", from, text);
        }

        // no subscribers is not an error
        let _ = self.tx.send(Envelope { from, message });
    }

    fn count_drop(&self, id: Uuid, count: u64) {
        self.dropped.fetch_add(count, Ordering::Relaxed);
        if let Some(mut client) = self.clients.get_mut(&id) {
            client.dropped_out += count;
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn clients(&self) -> Vec<ClientInfo> {
        let mut clients: Vec<ClientInfo> = self.clients.iter().map(|c| c.value().clone()).collect();
        clients.sort_by_key(|c| c.connected_at);
        clients
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            started_at: self.started_at,
            uptime_seconds: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
            clients: self.clients.len(),
            messages: self.messages.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            longest_message: self.longest.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}
