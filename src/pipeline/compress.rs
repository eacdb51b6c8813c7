//! Compress task
//!
//! Runs on its own thread, pulling sealed frames from the capture hand-off,
//! compressing them and sending one wire chunk per compressor output. When
//! the transport is not open the output is dropped and the compressor is
//! flushed, so nothing queues up while disconnected.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;
use tokio::runtime::Handle;
use tokio::sync::watch;

use crate::audio::capture::FrameReceiver;
use crate::audio::frame::AccumulatedFrame;
use crate::codec::{open_compressor, Compressor, CompressorConfig};
use crate::config::{AppConfig, AudioConfig, EncoderConfig, NetworkConfig};
use crate::error::{AudioError, CodecError, Error};
use crate::network::{ChannelOptions, Connector, TransportChannel};
use crate::pipeline::{fault, status_channel, stopped, TaskStatus};
use crate::protocol::{ControlMessage, StartRequest, WireChunk};

/// How often the worker rechecks the running flag while idle
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Default)]
pub struct CompressStats {
    pub frames: AtomicU64,
    pub chunks_sent: AtomicU64,
    pub chunks_dropped: AtomicU64,
    pub bytes_sent: AtomicU64,
    /// Flushes issued because the transport was down
    pub flushes: AtomicU64,
}

/// Compressor and transport of one started session
pub struct CompressSession {
    compressor: Box<dyn Compressor>,
    transport: TransportChannel,
    stats: Arc<CompressStats>,
}

impl CompressSession {
    pub fn new(compressor: Box<dyn Compressor>, transport: TransportChannel, stats: Arc<CompressStats>) -> Self {
        Self {
            compressor,
            transport,
            stats,
        }
    }

    /// Compress one frame and send its chunks in compressor order
    pub fn process(&mut self, frame: &AccumulatedFrame) -> Result<(), CodecError> {
        self.stats.frames.fetch_add(1, Ordering::Relaxed);

        let transport = &self.transport;
        let stats = &self.stats;
        let mut disconnected = false;

        self.compressor.submit(frame, &mut |chunk| {
            if disconnected {
                stats.chunks_dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
            // the stream clock wraps like the 32-bit wire field
            let wire = WireChunk::key(chunk.timestamp_us as u32, chunk.duration_us, chunk.data);
            let sent = transport.send(wire.encode());
            if sent > 0 {
                stats.chunks_sent.fetch_add(1, Ordering::Relaxed);
                stats.bytes_sent.fetch_add(sent as u64, Ordering::Relaxed);
            } else {
                stats.chunks_dropped.fetch_add(1, Ordering::Relaxed);
                disconnected = !transport.is_open();
            }
        })?;

        if disconnected {
            self.compressor.flush()?;
            self.stats.flushes.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    pub fn transport(&self) -> &TransportChannel {
        &self.transport
    }
}

/// Capture-side task: accumulated frames in, wire chunks out
pub struct CompressTask {
    audio: AudioConfig,
    encoder: EncoderConfig,
    network: NetworkConfig,
    connector: Arc<dyn Connector>,
    runtime: Handle,
    frames: Option<FrameReceiver>,
    started: bool,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    transport: Option<TransportChannel>,
    status: Arc<watch::Sender<TaskStatus>>,
    stats: Arc<CompressStats>,
}

impl CompressTask {
    pub fn new(config: &AppConfig, frames: FrameReceiver, connector: Arc<dyn Connector>, runtime: Handle) -> Self {
        Self {
            audio: config.audio.clone(),
            encoder: config.encoder.clone(),
            network: config.network.clone(),
            connector,
            runtime,
            frames: Some(frames),
            started: false,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
            transport: None,
            status: Arc::new(status_channel()),
            stats: Arc::new(CompressStats::default()),
        }
    }

    /// Apply a control message
    pub fn handle(&mut self, message: &ControlMessage) -> crate::Result<()> {
        match message {
            ControlMessage::Start(request) => self.start(request),
            ControlMessage::Stop => {
                self.stop();
                Ok(())
            }
        }
    }

    /// Configure the compressor, open the transport and start the worker
    ///
    /// Only the first call does anything; later calls log a warning.
    pub fn start(&mut self, request: &StartRequest) -> crate::Result<()> {
        if self.started {
            tracing::warn!("Compress task already started, ignoring start");
            return Ok(());
        }
        self.started = true;

        match self.launch(request) {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::error!("Compress task failed to start: {}", e);
                fault(&self.status, e.to_string());
                Err(e)
            }
        }
    }

    fn launch(&mut self, request: &StartRequest) -> crate::Result<()> {
        let encoder = request.encoder_config(&self.encoder);
        let codec_config = CompressorConfig::new(&self.audio, &encoder)?;
        let compressor = open_compressor(encoder.codec, encoder.allow_fallback, &codec_config)?;
        let frames = self.frames.take().ok_or_else(|| {
            Error::Audio(AudioError::StreamError("capture hand-off already taken".to_string()))
        })?;

        let url = request.destination(&self.network);
        let (transport, mut inbound) = TransportChannel::new(
            ChannelOptions::capture(&self.network, url.clone()),
            self.connector.clone(),
            self.runtime.clone(),
        );
        // peers' traffic is of no use here, but must not back up the link
        self.runtime.spawn(async move {
            while let Some(message) = inbound.recv().await {
                tracing::trace!("Ignoring {} byte inbound message", message.len());
            }
        });
        transport.open();

        tracing::info!(
            "Compressing with {} at {} bps, {} us frames, sending to {}",
            compressor.name(),
            codec_config.bitrate,
            codec_config.frame_duration.as_micros(),
            url
        );

        let session = CompressSession::new(compressor, transport.clone(), self.stats.clone());
        let running = self.running.clone();
        let status = self.status.clone();
        running.store(true, Ordering::SeqCst);
        self.status.send_replace(TaskStatus::Running);

        let worker = thread::Builder::new()
            .name("compress".to_string())
            .spawn(move || run(session, frames, running, status))?;

        self.transport = Some(transport);
        self.worker = Some(worker);
        Ok(())
    }

    /// Stop the worker and drop the connection
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        if let Some(transport) = self.transport.take() {
            transport.close();
        }
        if self.started {
            stopped(&self.status);
        }
    }

    pub fn status(&self) -> watch::Receiver<TaskStatus> {
        self.status.subscribe()
    }

    pub fn stats(&self) -> &CompressStats {
        &self.stats
    }

    pub fn transport(&self) -> Option<&TransportChannel> {
        self.transport.as_ref()
    }
}

impl Drop for CompressTask {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(
    mut session: CompressSession,
    frames: FrameReceiver,
    running: Arc<AtomicBool>,
    status: Arc<watch::Sender<TaskStatus>>,
) {
    while running.load(Ordering::SeqCst) {
        let frame = match frames.frames.recv_timeout(POLL_INTERVAL) {
            Ok(frame) => frame,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let result = session.process(&frame);
        frames.pool.give(frame);

        if let Err(e) = result {
            tracing::error!("Compressor failed, stopping: {}", e);
            fault(&status, e.to_string());
            running.store(false, Ordering::SeqCst);
            return;
        }
    }
    tracing::debug!("Compress worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::capture::CaptureProcessor;
    use crate::codec::EncodedChunk;
    use crate::config::CodecKind;
    use crate::network::MemoryConnector;

    /// Compressor that fails on the second frame
    struct Flaky(u32);

    impl Compressor for Flaky {
        fn name(&self) -> &'static str {
            "flaky"
        }

        fn configure(&mut self, _config: &CompressorConfig) -> Result<(), CodecError> {
            Ok(())
        }

        fn submit(&mut self, frame: &AccumulatedFrame, out: &mut dyn FnMut(EncodedChunk)) -> Result<(), CodecError> {
            self.0 += 1;
            if self.0 > 1 {
                return Err(CodecError::EncodingFailed("boom".into()));
            }
            out(EncodedChunk {
                timestamp_us: frame.timestamp_us,
                duration_us: 60_000,
                data: bytes::Bytes::from_static(b"x"),
            });
            Ok(())
        }

        fn flush(&mut self) -> Result<(), CodecError> {
            Ok(())
        }
    }

    fn pcm_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.encoder.codec = CodecKind::Pcm16;
        config
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_second_start_is_ignored() {
        let config = pcm_config();
        let (_processor, frames) = CaptureProcessor::new(&config.audio);
        let (connector, _accepted) = MemoryConnector::new(8);
        let mut task = CompressTask::new(&config, frames, Arc::new(connector), Handle::current());

        task.start(&StartRequest::default()).unwrap();
        let transport_url = task.transport().map(|t| t.url().to_string());
        task.start(&StartRequest {
            destination: Some("ws://elsewhere:1".into()),
            ..StartRequest::default()
        })
        .unwrap();

        assert_eq!(task.transport().map(|t| t.url().to_string()), transport_url);
        assert_eq!(*task.status().borrow(), TaskStatus::Running);
        task.stop();
        assert_eq!(*task.status().borrow(), TaskStatus::Stopped);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_invalid_duration_faults() {
        let config = pcm_config();
        let (_processor, frames) = CaptureProcessor::new(&config.audio);
        let (connector, _accepted) = MemoryConnector::new(8);
        let mut task = CompressTask::new(&config, frames, Arc::new(connector), Handle::current());

        let request = StartRequest {
            frame_duration_micros: Some(120_000),
            ..StartRequest::default()
        };
        assert!(task.start(&request).is_err());
        assert!(task.status().borrow().is_faulted());
    }

    #[tokio::test]
    async fn test_oversized_bitrate_faults() {
        let config = AppConfig::default();
        let (_processor, frames) = CaptureProcessor::new(&config.audio);
        let (connector, _accepted) = MemoryConnector::new(8);
        let mut task = CompressTask::new(&config, frames, Arc::new(connector), Handle::current());

        let message = ControlMessage::parse(r#"{"type":"start","bitratePerChannel":3000000000}"#).unwrap();
        assert!(task.handle(&message).is_err());
        assert!(task.status().borrow().is_faulted());
        assert!(task.transport().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_closed_transport_flushes_and_drops() {
        let (connector, _accepted) = MemoryConnector::new(8);
        connector.set_refuse(true);
        let (transport, _inbound) = TransportChannel::new(
            ChannelOptions::capture(&NetworkConfig::default(), "mem://relay"),
            Arc::new(connector),
            Handle::current(),
        );
        let stats = Arc::new(CompressStats::default());
        let mut session = CompressSession::new(Box::new(Flaky(0)), transport, stats.clone());

        session.process(&AccumulatedFrame::new(4, 2)).unwrap();
        assert_eq!(stats.chunks_dropped.load(Ordering::Relaxed), 1);
        assert_eq!(stats.flushes.load(Ordering::Relaxed), 1);

        assert!(session.process(&AccumulatedFrame::new(4, 2)).is_err());
    }
}
