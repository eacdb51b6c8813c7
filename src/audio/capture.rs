//! Audio capture from an input device
//!
//! The cpal stream lives on its own thread, like every device stream here.
//! Its data callback drives a [`CaptureProcessor`], which accumulates frames
//! and hands each sealed frame to the compress task through a bounded
//! channel without blocking or allocating.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::accumulator::FrameAccumulator;
use crate::audio::buffer::{BufferPool, SharedBufferPool};
use crate::audio::device::{resolve_device, Direction};
use crate::audio::frame::{AccumulatedFrame, SampleBlock};
use crate::config::AudioConfig;
use crate::error::AudioError;

/// Frames kept ready in the pool beyond the hand-off queue
const POOL_HEADROOM: usize = 4;

/// Counters updated from the input callback
#[derive(Debug, Default)]
pub struct CaptureStats {
    pub blocks: AtomicU64,
    pub frames_sealed: AtomicU64,
    /// Frames dropped because the compress task fell behind
    pub frames_dropped: AtomicU64,
}

/// Receiving end of the capture hand-off
pub struct FrameReceiver {
    pub frames: Receiver<AccumulatedFrame>,
    /// Give consumed frames back here
    pub pool: SharedBufferPool<AccumulatedFrame>,
}

/// The real-time half of capture: feed it every hardware block
pub struct CaptureProcessor {
    accumulator: FrameAccumulator,
    frames_tx: Sender<AccumulatedFrame>,
    pool: SharedBufferPool<AccumulatedFrame>,
    active: Arc<AtomicBool>,
    stats: Arc<CaptureStats>,
}

impl CaptureProcessor {
    /// Processor plus the receiving end for the compress task
    pub fn new(config: &AudioConfig) -> (Self, FrameReceiver) {
        let (frames_tx, frames_rx) = bounded(config.frame_queue.max(1));
        let capacity = config.frame_queue + POOL_HEADROOM;
        let pool = Arc::new(BufferPool::prefilled(capacity, capacity, || {
            AccumulatedFrame::new(config.frame_capacity, config.channels)
        }));
        let accumulator = FrameAccumulator::with_pool(
            config.frame_capacity,
            config.channels,
            config.sample_rate,
            pool.clone(),
        );

        let processor = Self {
            accumulator,
            frames_tx,
            pool: pool.clone(),
            active: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(CaptureStats::default()),
        };
        (processor, FrameReceiver { frames: frames_rx, pool })
    }

    /// Flag gating whether blocks are accumulated
    pub fn active_flag(&self) -> Arc<AtomicBool> {
        self.active.clone()
    }

    pub fn stats(&self) -> Arc<CaptureStats> {
        self.stats.clone()
    }

    /// Handle one interleaved block from the input callback
    pub fn process(&mut self, data: &[f32], channels: u16) {
        if !self.active.load(Ordering::Relaxed) {
            return;
        }
        self.stats.blocks.fetch_add(1, Ordering::Relaxed);

        let frames_tx = &self.frames_tx;
        let pool = &self.pool;
        let stats = &self.stats;
        self.accumulator
            .on_samples(&SampleBlock::interleaved(data, channels), |frame| {
                match frames_tx.try_send(frame) {
                    Ok(()) => {
                        stats.frames_sealed.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(TrySendError::Full(frame)) | Err(TrySendError::Disconnected(frame)) => {
                        stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                        pool.give(frame);
                    }
                }
            });
    }
}

/// Capture from one input device on a dedicated thread
pub struct AudioCapture {
    device_id: Option<String>,
    config: StreamConfig,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    error_rx: Option<Receiver<AudioError>>,
    processor: Option<CaptureProcessor>,
    active: Arc<AtomicBool>,
    stats: Arc<CaptureStats>,
}

impl AudioCapture {
    pub fn new(config: &AudioConfig, processor: CaptureProcessor) -> Self {
        let stream_config = StreamConfig {
            channels: config.channels,
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size: match config.buffer_size {
                Some(size) => cpal::BufferSize::Fixed(size),
                None => cpal::BufferSize::Default,
            },
        };

        Self {
            device_id: config.input_device.clone(),
            config: stream_config,
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
            error_rx: None,
            active: processor.active_flag(),
            stats: processor.stats(),
            processor: Some(processor),
        }
    }

    /// Open the device and start delivering blocks
    pub fn start(&mut self) -> Result<(), AudioError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }
        let Some(mut processor) = self.processor.take() else {
            return Err(AudioError::StreamError("capture cannot be restarted".to_string()));
        };

        let device = resolve_device(self.device_id.as_deref(), Direction::Input)?;
        tracing::info!("Opening input device {}", device.name);

        let (error_tx, error_rx) = bounded::<AudioError>(16);
        self.error_rx = Some(error_rx);

        let running = self.running.clone();
        let config = self.config.clone();
        let channels = self.config.channels;
        running.store(true, Ordering::SeqCst);
        self.active.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("capture".to_string())
            .spawn(move || {
                let cpal_device = device.into_inner();
                let stream = cpal_device.build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        processor.process(data, channels);
                    },
                    move |err| {
                        let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
                    },
                    None,
                );

                match stream {
                    Ok(stream) => {
                        if let Err(e) = stream.play() {
                            tracing::error!("Failed to start input stream: {}", e);
                            running.store(false, Ordering::SeqCst);
                            return;
                        }
                        while running.load(Ordering::Relaxed) {
                            thread::sleep(Duration::from_millis(10));
                        }
                    }
                    Err(e) => {
                        tracing::error!("Failed to build input stream: {}", e);
                        running.store(false, Ordering::SeqCst);
                    }
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        self.thread_handle = Some(handle);
        Ok(())
    }

    /// Stop delivering frames and close the device
    pub fn stop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> &CaptureStats {
        &self.stats
    }

    /// Next stream error reported by the device, if any
    pub fn check_errors(&self) -> Option<AudioError> {
        self.error_rx.as_ref().and_then(|rx| rx.try_recv().ok())
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> AudioConfig {
        AudioConfig {
            frame_capacity: 256,
            frame_queue: 2,
            ..AudioConfig::default()
        }
    }

    #[test]
    fn test_inactive_processor_ignores_blocks() {
        let (mut processor, receiver) = CaptureProcessor::new(&small_config());
        processor.process(&[0.5; 512 * 2], 2);
        assert!(receiver.frames.try_recv().is_err());
        assert_eq!(processor.stats().blocks.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_sealed_frames_reach_receiver() {
        let (mut processor, receiver) = CaptureProcessor::new(&small_config());
        processor.active_flag().store(true, Ordering::SeqCst);

        for _ in 0..4 {
            processor.process(&[0.25; 128 * 2], 2);
        }

        let first = receiver.frames.try_recv().unwrap();
        let second = receiver.frames.try_recv().unwrap();
        assert_eq!(first.timestamp_us, 0);
        assert_eq!(second.timestamp_us, 256 * 1_000_000 / 48_000);
        assert_eq!(first.capacity(), 256);
        assert!(receiver.frames.try_recv().is_err());
    }

    #[test]
    fn test_full_queue_drops_and_recycles() {
        let (mut processor, receiver) = CaptureProcessor::new(&small_config());
        processor.active_flag().store(true, Ordering::SeqCst);
        let stats = processor.stats();

        processor.process(&vec![0.0; 256 * 2 * 3], 2);

        assert_eq!(stats.frames_sealed.load(Ordering::Relaxed), 2);
        assert_eq!(stats.frames_dropped.load(Ordering::Relaxed), 1);
        assert_eq!(receiver.frames.len(), 2);
    }
}
