//! Decompress task
//!
//! Consumes inbound transport messages on the runtime. Binary messages are
//! wire chunks: decoded, decompressed into a recycled block and handed to
//! the output callback. Text messages are control chatter and only logged.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::audio::playback::PlaybackQueue;
use crate::codec::{open_decompressor, Decompressor, DecompressorConfig};
use crate::config::{AppConfig, AudioConfig, EncoderConfig, NetworkConfig};
use crate::network::{ChannelOptions, Connector, Message, TransportChannel};
use crate::pipeline::{fault, status_channel, stopped, TaskStatus};
use crate::protocol::{ControlMessage, StartRequest, WireChunk};

#[derive(Debug, Default)]
pub struct DecompressStats {
    pub chunks: AtomicU64,
    pub delta_chunks: AtomicU64,
    /// Binary messages shorter than a wire header
    pub malformed: AtomicU64,
    pub text_messages: AtomicU64,
    pub blocks_delivered: AtomicU64,
    /// Blocks dropped because the playback inbox was full
    pub blocks_dropped: AtomicU64,
    /// Decoder resets after the transport reconnected
    pub resets: AtomicU64,
}

/// Playback-side task: wire chunks in, decoded blocks out
pub struct DecompressTask {
    audio: AudioConfig,
    encoder: EncoderConfig,
    network: NetworkConfig,
    connector: Arc<dyn Connector>,
    runtime: Handle,
    queue: PlaybackQueue,
    started: bool,
    worker: Option<JoinHandle<()>>,
    transport: Option<TransportChannel>,
    status: Arc<watch::Sender<TaskStatus>>,
    stats: Arc<DecompressStats>,
}

impl DecompressTask {
    pub fn new(config: &AppConfig, queue: PlaybackQueue, connector: Arc<dyn Connector>, runtime: Handle) -> Self {
        Self {
            audio: config.audio.clone(),
            encoder: config.encoder.clone(),
            network: config.network.clone(),
            connector,
            runtime,
            queue,
            started: false,
            worker: None,
            transport: None,
            status: Arc::new(status_channel()),
            stats: Arc::new(DecompressStats::default()),
        }
    }

    pub fn handle(&mut self, message: &ControlMessage) -> crate::Result<()> {
        match message {
            ControlMessage::Start(request) => self.start(request),
            ControlMessage::Stop => {
                self.stop();
                Ok(())
            }
        }
    }

    /// Configure the decompressor and connect to the destination
    ///
    /// Only the first call does anything; later calls log a warning.
    pub fn start(&mut self, request: &StartRequest) -> crate::Result<()> {
        if self.started {
            tracing::warn!("Decompress task already started, ignoring start");
            return Ok(());
        }
        self.started = true;

        let decompressor = match open_decompressor(
            self.encoder.codec,
            self.encoder.allow_fallback,
            &DecompressorConfig::from(&self.audio),
        ) {
            Ok(decompressor) => decompressor,
            Err(e) => {
                tracing::error!("Decompress task failed to start: {}", e);
                fault(&self.status, e.to_string());
                return Err(e.into());
            }
        };

        let url = request.destination(&self.network);
        let (transport, inbound) = TransportChannel::new(
            ChannelOptions::playback(&self.network, url.clone()),
            self.connector.clone(),
            self.runtime.clone(),
        );
        transport.open();
        tracing::info!("Decompressing with {}, receiving from {}", decompressor.name(), url);

        self.status.send_replace(TaskStatus::Running);
        self.worker = Some(self.runtime.spawn(run(
            inbound,
            transport.clone(),
            decompressor,
            self.queue.clone(),
            self.status.clone(),
            self.stats.clone(),
        )));
        self.transport = Some(transport);
        Ok(())
    }

    /// Stop receiving, drop the connection and clear the playback queue
    pub fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
        if let Some(transport) = self.transport.take() {
            transport.close();
        }
        self.queue.request_stop();
        if self.started {
            stopped(&self.status);
        }
    }

    pub fn status(&self) -> watch::Receiver<TaskStatus> {
        self.status.subscribe()
    }

    pub fn stats(&self) -> &DecompressStats {
        &self.stats
    }

    pub fn transport(&self) -> Option<&TransportChannel> {
        self.transport.as_ref()
    }
}

impl Drop for DecompressTask {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run(
    mut inbound: mpsc::Receiver<Message>,
    transport: TransportChannel,
    mut decompressor: Box<dyn Decompressor>,
    queue: PlaybackQueue,
    status: Arc<watch::Sender<TaskStatus>>,
    stats: Arc<DecompressStats>,
) {
    // a new connection carries a new stream; decoder state must not leak across
    let mut connection = 0;
    while let Some(message) = inbound.recv().await {
        let data = match message {
            Message::Binary(data) => data,
            Message::Text(text) => {
                stats.text_messages.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Text message from peer: {}", text);
                continue;
            }
        };

        let chunk = match WireChunk::decode(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                let count = stats.malformed.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!("Discarding message ({} so far): {}", count, e);
                continue;
            }
        };
        stats.chunks.fetch_add(1, Ordering::Relaxed);

        let connects = transport.stats().connects.load(Ordering::Relaxed);
        if connects != connection {
            if connection != 0 {
                if let Err(e) = decompressor.reset() {
                    tracing::error!("Decompressor reset failed, stopping: {}", e);
                    fault(&status, e.to_string());
                    return;
                }
                stats.resets.fetch_add(1, Ordering::Relaxed);
                tracing::info!("Reconnected, decoder state reset");
            }
            connection = connects;
        }
        if !chunk.is_key() {
            stats.delta_chunks.fetch_add(1, Ordering::Relaxed);
        }

        let mut block = queue.block();
        if let Err(e) = decompressor.submit(&chunk, &mut block) {
            tracing::error!("Decompressor failed, stopping: {}", e);
            fault(&status, e.to_string());
            return;
        }

        if queue.deliver(block) {
            stats.blocks_delivered.fetch_add(1, Ordering::Relaxed);
        } else {
            stats.blocks_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CodecKind, PlaybackConfig};
    use crate::network::MemoryConnector;
    use bytes::Bytes;
    use std::time::Duration;

    fn pcm_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.encoder.codec = CodecKind::Pcm16;
        config.audio.channels = 1;
        config
    }

    async fn settle<F: Fn() -> bool>(done: F) {
        for _ in 0..200 {
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition never reached");
    }

    #[tokio::test]
    async fn test_greets_and_decodes_binary() {
        let config = pcm_config();
        let queue = PlaybackQueue::new(&PlaybackConfig {
            watermark: 0,
            ..PlaybackConfig::default()
        });
        let mut processor = queue.processor();
        let (connector, mut accepted) = MemoryConnector::new(8);
        let mut task = DecompressTask::new(&config, queue, Arc::new(connector), Handle::current());
        task.start(&StartRequest::default()).unwrap();

        let (_, mut relay) = accepted.recv().await.unwrap();
        assert_eq!(
            relay.inbound.recv().await,
            Some(Message::Text("hello from decoder".into()))
        );

        // one mono frame of two samples: 16384, -16384
        let chunk = WireChunk::key(60_000, 60_000, Bytes::from_static(&[0x40, 0x00, 0xc0, 0x00]));
        relay.outbound.send(Message::Binary(chunk.encode())).await.unwrap();
        relay.outbound.send(Message::Text("start-decode".into())).await.unwrap();
        relay.outbound.send(Message::Binary(Bytes::from_static(&[0; 5]))).await.unwrap();

        let stats = task.stats.clone();
        settle(|| stats.malformed.load(Ordering::Relaxed) == 1).await;
        assert_eq!(stats.blocks_delivered.load(Ordering::Relaxed), 1);
        assert_eq!(stats.text_messages.load(Ordering::Relaxed), 1);

        let mut out = [0.0f32; 2];
        assert_eq!(processor.process(&mut out, 1), 2);
        assert!((out[0] - 16384.0 / 32767.0).abs() < 1e-6);
        assert!((out[1] + 16384.0 / 32767.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_codec_fault_is_reported() {
        let config = pcm_config();
        let queue = PlaybackQueue::new(&PlaybackConfig::default());
        let (connector, mut accepted) = MemoryConnector::new(8);
        let mut task = DecompressTask::new(&config, queue, Arc::new(connector), Handle::current());
        task.start(&StartRequest::default()).unwrap();
        let mut status = task.status();

        let (_, relay) = accepted.recv().await.unwrap();
        // odd payload length cannot be 16-bit samples
        let chunk = WireChunk::key(0, 0, Bytes::from_static(&[1, 2, 3]));
        relay.outbound.send(Message::Binary(chunk.encode())).await.unwrap();

        status.wait_for(|s| s.is_faulted()).await.unwrap();
        task.stop();
        assert!(task.status().borrow().is_faulted());
    }

    #[tokio::test]
    async fn test_reconnect_resets_decoder() {
        let mut config = pcm_config();
        config.network.reconnect_initial_ms = 5;
        let queue = PlaybackQueue::new(&PlaybackConfig::default());
        let (connector, mut accepted) = MemoryConnector::new(8);
        let mut task = DecompressTask::new(&config, queue, Arc::new(connector), Handle::current());
        task.start(&StartRequest::default()).unwrap();
        let stats = task.stats.clone();
        let chunk = WireChunk::key(0, 0, Bytes::from_static(&[0, 0])).encode();

        let (_, first) = accepted.recv().await.unwrap();
        first.outbound.send(Message::Binary(chunk.clone())).await.unwrap();
        settle(|| stats.blocks_delivered.load(Ordering::Relaxed) == 1).await;
        assert_eq!(stats.resets.load(Ordering::Relaxed), 0);

        drop(first);
        let (_, second) = accepted.recv().await.unwrap();
        let transport = task.transport().unwrap().clone();
        settle(|| transport.stats().connects.load(Ordering::Relaxed) == 2).await;
        second.outbound.send(Message::Binary(chunk.clone())).await.unwrap();
        second.outbound.send(Message::Binary(chunk)).await.unwrap();
        settle(|| stats.blocks_delivered.load(Ordering::Relaxed) == 3).await;

        assert_eq!(stats.resets.load(Ordering::Relaxed), 1);
        assert!(!task.status().borrow().is_faulted());
        task.stop();
    }

    #[tokio::test]
    async fn test_second_start_is_ignored() {
        let config = pcm_config();
        let queue = PlaybackQueue::new(&PlaybackConfig::default());
        let (connector, _accepted) = MemoryConnector::new(8);
        let mut task = DecompressTask::new(&config, queue, Arc::new(connector), Handle::current());

        task.start(&StartRequest::default()).unwrap();
        task.start(&StartRequest {
            destination: Some("ws://other:1".into()),
            ..StartRequest::default()
        })
        .unwrap();
        assert_eq!(task.transport().map(|t| t.url()), Some(NetworkConfig::default().url.as_str()));
    }
}
