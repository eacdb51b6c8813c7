//! Transport channel with drop-and-reconnect
//!
//! ```text
//!            connect ok
//!  Connecting ─────────► Open
//!      ▲  │                │ peer gone / write failed
//!      │  └─ failed ──┐    ▼
//!      └── send() ─── Closed
//! ```
//!
//! Nothing is buffered while the channel is not `Open`: sends return zero
//! and the data is gone. With [`ReconnectPolicy::OnDemand`] a send on a
//! closed channel starts exactly one connection attempt; sends made while
//! that attempt is running start none. [`ReconnectPolicy::Backoff`] keeps a
//! supervisor task reconnecting on its own with a doubling delay.

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};

use crate::config::NetworkConfig;
use crate::error::NetworkError;
use crate::network::{Connector, Message};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChannelState {
    Connecting = 0,
    Open = 1,
    Closed = 2,
}

impl ChannelState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Open,
            _ => Self::Closed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPolicy {
    /// Reconnect only when a send finds the channel closed
    OnDemand,
    /// Reconnect in the background, doubling the delay up to `max`
    Backoff { initial: Duration, max: Duration },
}

impl ReconnectPolicy {
    pub fn backoff(config: &NetworkConfig) -> Self {
        let initial = Duration::from_millis(config.reconnect_initial_ms.max(1));
        Self::Backoff {
            initial,
            max: Duration::from_millis(config.reconnect_max_ms).max(initial),
        }
    }
}

/// Settings for one channel
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    pub url: String,
    pub policy: ReconnectPolicy,
    /// Text sent first on every new connection
    pub greeting: Option<String>,
    pub inbound_queue: usize,
}

impl ChannelOptions {
    /// Capture side: reconnect on demand, no greeting
    pub fn capture(config: &NetworkConfig, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            policy: ReconnectPolicy::OnDemand,
            greeting: None,
            inbound_queue: config.inbound_queue,
        }
    }

    /// Playback side: reconnect with backoff and greet the peer
    pub fn playback(config: &NetworkConfig, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            policy: ReconnectPolicy::backoff(config),
            greeting: config.greeting.clone(),
            inbound_queue: config.inbound_queue,
        }
    }
}

#[derive(Debug, Default)]
pub struct ChannelStats {
    pub attempts: AtomicU64,
    pub connects: AtomicU64,
    pub messages_sent: AtomicU64,
    pub bytes_sent: AtomicU64,
    /// Sends discarded because the channel was not open or the queue was full
    pub dropped: AtomicU64,
}

struct Shared {
    options: ChannelOptions,
    connector: Arc<dyn Connector>,
    runtime: Handle,
    state: AtomicU8,
    /// Bumped on every successful connect so stale links cannot close a newer one
    generation: AtomicU64,
    outbound: Mutex<Option<mpsc::Sender<Message>>>,
    inbound: mpsc::Sender<Message>,
    shutdown: watch::Sender<bool>,
    stats: ChannelStats,
}

/// One logical connection that survives reconnects
#[derive(Clone)]
pub struct TransportChannel {
    shared: Arc<Shared>,
}

impl TransportChannel {
    /// Channel plus the receiver of inbound messages from every connection it makes
    pub fn new(
        options: ChannelOptions,
        connector: Arc<dyn Connector>,
        runtime: Handle,
    ) -> (Self, mpsc::Receiver<Message>) {
        let (inbound_tx, inbound_rx) = mpsc::channel(options.inbound_queue.max(1));
        let (shutdown, _) = watch::channel(false);

        let shared = Arc::new(Shared {
            options,
            connector,
            runtime,
            state: AtomicU8::new(ChannelState::Closed as u8),
            generation: AtomicU64::new(0),
            outbound: Mutex::new(None),
            inbound: inbound_tx,
            shutdown,
            stats: ChannelStats::default(),
        });
        (Self { shared }, inbound_rx)
    }

    /// Start connecting
    pub fn open(&self) {
        match self.shared.options.policy {
            ReconnectPolicy::OnDemand => {
                self.reconnect();
            }
            ReconnectPolicy::Backoff { initial, max } => {
                if self.shared.transition(ChannelState::Closed, ChannelState::Connecting) {
                    let shared = self.shared.clone();
                    self.shared.runtime.spawn(supervise(shared, initial, max));
                }
            }
        }
    }

    /// Send one binary message, returning the bytes accepted
    ///
    /// Returns 0 and drops `data` unless the channel is open. Never blocks.
    pub fn send(&self, data: Bytes) -> usize {
        match self.state() {
            ChannelState::Open => {}
            ChannelState::Connecting => {
                self.shared.stats.dropped.fetch_add(1, Ordering::Relaxed);
                return 0;
            }
            ChannelState::Closed => {
                self.shared.stats.dropped.fetch_add(1, Ordering::Relaxed);
                if self.shared.options.policy == ReconnectPolicy::OnDemand {
                    self.reconnect();
                }
                return 0;
            }
        }

        let len = data.len();
        let result = match self.shared.outbound.lock().as_ref() {
            Some(tx) => tx.try_send(Message::Binary(data)),
            None => Err(mpsc::error::TrySendError::Closed(Message::Binary(data))),
        };

        match result {
            Ok(()) => {
                self.shared.stats.messages_sent.fetch_add(1, Ordering::Relaxed);
                self.shared.stats.bytes_sent.fetch_add(len as u64, Ordering::Relaxed);
                len
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.shared.stats.dropped.fetch_add(1, Ordering::Relaxed);
                0
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.shared.stats.dropped.fetch_add(1, Ordering::Relaxed);
                let generation = self.shared.generation.load(Ordering::SeqCst);
                self.shared.mark_closed(generation);
                if self.shared.options.policy == ReconnectPolicy::OnDemand {
                    self.reconnect();
                }
                0
            }
        }
    }

    /// Start one connection attempt if the channel is closed
    fn reconnect(&self) -> bool {
        if !self.shared.transition(ChannelState::Closed, ChannelState::Connecting) {
            return false;
        }
        let shared = self.shared.clone();
        self.shared.runtime.spawn(async move {
            match establish(&shared).await {
                Ok((generation, inbound)) => pump_inbound(&shared, generation, inbound).await,
                Err(e) => {
                    tracing::warn!("{}", e);
                    shared.state.store(ChannelState::Closed as u8, Ordering::SeqCst);
                }
            }
        });
        true
    }

    /// Drop the current connection and stop reconnecting
    pub fn close(&self) {
        let _ = self.shared.shutdown.send(true);
        self.shared.outbound.lock().take();
        self.shared.state.store(ChannelState::Closed as u8, Ordering::SeqCst);
    }

    pub fn state(&self) -> ChannelState {
        ChannelState::from_u8(self.shared.state.load(Ordering::SeqCst))
    }

    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    pub fn url(&self) -> &str {
        &self.shared.options.url
    }

    pub fn stats(&self) -> &ChannelStats {
        &self.shared.stats
    }
}

impl Shared {
    fn transition(&self, from: ChannelState, to: ChannelState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Close the connection of `generation` if it is still the current one
    fn mark_closed(&self, generation: u64) {
        let mut outbound = self.outbound.lock();
        if self.generation.load(Ordering::SeqCst) == generation {
            outbound.take();
            self.state.store(ChannelState::Closed as u8, Ordering::SeqCst);
        }
    }
}

async fn establish(shared: &Arc<Shared>) -> Result<(u64, mpsc::Receiver<Message>), NetworkError> {
    shared.stats.attempts.fetch_add(1, Ordering::Relaxed);
    let url = &shared.options.url;
    tracing::debug!("Connecting to {}", url);

    let link = shared.connector.connect(url).await?;

    if let Some(greeting) = &shared.options.greeting {
        link.outbound
            .send(Message::Text(greeting.clone()))
            .await
            .map_err(|_| NetworkError::ConnectionClosed)?;
    }

    let generation = {
        let mut outbound = shared.outbound.lock();
        if shared.is_shut_down() {
            return Err(NetworkError::ConnectionClosed);
        }
        *outbound = Some(link.outbound);
        let generation = shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        shared.state.store(ChannelState::Open as u8, Ordering::SeqCst);
        generation
    };

    shared.stats.connects.fetch_add(1, Ordering::Relaxed);
    tracing::info!("Connected to {}", url);
    Ok((generation, link.inbound))
}

/// Forward messages from one connection until it ends
async fn pump_inbound(shared: &Arc<Shared>, generation: u64, mut inbound: mpsc::Receiver<Message>) {
    let mut shutdown = shared.shutdown.subscribe();
    while !*shutdown.borrow() {
        tokio::select! {
            message = inbound.recv() => match message {
                Some(message) => {
                    if shared.inbound.send(message).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            _ = shutdown.changed() => break,
        }
    }
    shared.mark_closed(generation);
    if !shared.is_shut_down() {
        tracing::info!("Connection to {} closed", shared.options.url);
    }
}

async fn supervise(shared: Arc<Shared>, initial: Duration, max: Duration) {
    let mut shutdown = shared.shutdown.subscribe();
    let mut delay = initial;

    while !shared.is_shut_down() {
        shared.state.store(ChannelState::Connecting as u8, Ordering::SeqCst);
        match establish(&shared).await {
            Ok((generation, inbound)) => {
                delay = initial;
                pump_inbound(&shared, generation, inbound).await;
            }
            Err(e) => {
                tracing::warn!("{}", e);
                shared.state.store(ChannelState::Closed as u8, Ordering::SeqCst);
            }
        }

        if shared.is_shut_down() {
            break;
        }
        tracing::info!("Reconnecting to {} in {:?}", shared.options.url, delay);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => break,
        }
        delay = (delay * 2).min(max);
    }
    shared.state.store(ChannelState::Closed as u8, Ordering::SeqCst);
}
