//! Audio playback to an output device
//!
//! Decoded blocks arrive through a lock-free inbox filled by the decompress
//! task. The output callback moves them into a [`JitterBuffer`] it owns and
//! renders from there. Played blocks go back to the decompress task through
//! a recycle pool.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{bounded, Receiver};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::{create_shared_buffer, BufferPool, SharedBufferPool, SharedRingBuffer};
use crate::audio::device::{resolve_device, Direction};
use crate::audio::frame::DecodedBlock;
use crate::audio::jitter::{JitterBuffer, JitterStats, PlaybackState};
use crate::config::{AudioConfig, PlaybackConfig};
use crate::error::AudioError;

/// Sequencer state published by the output callback
#[derive(Debug, Default)]
pub struct PlaybackMonitor {
    state: AtomicU8,
    pending: AtomicUsize,
    overflows: AtomicU64,
    underruns: AtomicU64,
    frames_played: AtomicU64,
}

/// Plain copy of [`PlaybackMonitor`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackSnapshot {
    pub state: PlaybackState,
    pub pending: usize,
    pub overflows: u64,
    pub underruns: u64,
    pub frames_played: u64,
}

impl PlaybackMonitor {
    fn publish(&self, stats: &JitterStats) {
        self.state.store(stats.state as u8, Ordering::Relaxed);
        self.pending.store(stats.pending, Ordering::Relaxed);
        self.overflows.store(stats.overflows, Ordering::Relaxed);
        self.underruns.store(stats.underruns, Ordering::Relaxed);
        self.frames_played.store(stats.frames_played, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        PlaybackSnapshot {
            state: PlaybackState::from_u8(self.state.load(Ordering::Relaxed)),
            pending: self.pending.load(Ordering::Relaxed),
            overflows: self.overflows.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
            frames_played: self.frames_played.load(Ordering::Relaxed),
        }
    }
}

/// Producer side of playback, shared with the decompress task
#[derive(Clone)]
pub struct PlaybackQueue {
    inbox: SharedRingBuffer<DecodedBlock>,
    recycle: SharedBufferPool<DecodedBlock>,
    stop_requested: Arc<AtomicBool>,
    monitor: Arc<PlaybackMonitor>,
    watermark: usize,
    capacity: usize,
}

impl PlaybackQueue {
    pub fn new(config: &PlaybackConfig) -> Self {
        // the ring, the inbox and the block being decoded can all be out at once
        let pooled = config.queue_capacity + config.inbox_capacity + 1;
        Self {
            inbox: create_shared_buffer(config.inbox_capacity),
            recycle: Arc::new(BufferPool::new(pooled)),
            stop_requested: Arc::new(AtomicBool::new(false)),
            monitor: Arc::new(PlaybackMonitor::default()),
            watermark: config.watermark,
            capacity: config.queue_capacity,
        }
    }

    /// A block to decode into, recycled when one is available
    pub fn block(&self) -> DecodedBlock {
        self.recycle.take_or(|| DecodedBlock::new(0, 0, 0))
    }

    /// Hand a decoded block to the output callback
    ///
    /// False when the inbox is full or playback was stopped; the block goes
    /// back to the recycle pool.
    pub fn deliver(&self, block: DecodedBlock) -> bool {
        if self.stop_requested.load(Ordering::Acquire) {
            self.recycle.give(block);
            return false;
        }
        match self.inbox.push(block) {
            Ok(()) => true,
            Err(block) => {
                self.recycle.give(block);
                false
            }
        }
    }

    /// Ask the output callback to stop and clear its queue. Final.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }

    pub fn monitor(&self) -> &PlaybackMonitor {
        &self.monitor
    }

    /// Blocks rejected because the inbox was full
    pub fn inbox_overflows(&self) -> usize {
        self.inbox.overflow_count()
    }

    /// The consumer half, to be owned by the output callback
    pub fn processor(&self) -> PlaybackProcessor {
        PlaybackProcessor {
            jitter: JitterBuffer::new(self.capacity, self.watermark).with_recycle(self.recycle.clone()),
            inbox: self.inbox.clone(),
            recycle: self.recycle.clone(),
            stop_requested: self.stop_requested.clone(),
            monitor: self.monitor.clone(),
        }
    }
}

/// The real-time half of playback: call it once per hardware block
pub struct PlaybackProcessor {
    jitter: JitterBuffer,
    inbox: SharedRingBuffer<DecodedBlock>,
    recycle: SharedBufferPool<DecodedBlock>,
    stop_requested: Arc<AtomicBool>,
    monitor: Arc<PlaybackMonitor>,
}

impl PlaybackProcessor {
    /// Fill one interleaved output block, returning the frames of real audio
    pub fn process(&mut self, output: &mut [f32], channels: usize) -> usize {
        if self.stop_requested.load(Ordering::Acquire) {
            // a decode racing the stop may still land in the inbox
            self.jitter.stop();
            while let Some(block) = self.inbox.try_pop() {
                self.recycle.give(block);
            }
            output.fill(0.0);
            self.monitor.publish(&self.jitter.stats());
            return 0;
        }

        while let Some(block) = self.inbox.try_pop() {
            if let Err(block) = self.jitter.push(block) {
                self.recycle.give(block);
            }
        }

        let written = self.jitter.render(output, channels);
        self.monitor.publish(&self.jitter.stats());
        written
    }

    pub fn jitter(&self) -> &JitterBuffer {
        &self.jitter
    }
}

/// Playback on one output device on a dedicated thread
pub struct AudioPlayback {
    device_id: Option<String>,
    config: StreamConfig,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    error_rx: Option<Receiver<AudioError>>,
    processor: Option<PlaybackProcessor>,
}

impl AudioPlayback {
    pub fn new(config: &AudioConfig, processor: PlaybackProcessor) -> Self {
        let stream_config = StreamConfig {
            channels: config.channels,
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size: match config.buffer_size {
                Some(size) => cpal::BufferSize::Fixed(size),
                None => cpal::BufferSize::Default,
            },
        };

        Self {
            device_id: config.output_device.clone(),
            config: stream_config,
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
            error_rx: None,
            processor: Some(processor),
        }
    }

    /// Open the device and start rendering
    pub fn start(&mut self) -> Result<(), AudioError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }
        let Some(mut processor) = self.processor.take() else {
            return Err(AudioError::StreamError("playback cannot be restarted".to_string()));
        };

        let device = resolve_device(self.device_id.as_deref(), Direction::Output)?;
        tracing::info!("Opening output device {}", device.name);

        let (error_tx, error_rx) = bounded::<AudioError>(16);
        self.error_rx = Some(error_rx);

        let running = self.running.clone();
        let config = self.config.clone();
        let channels = self.config.channels as usize;
        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("playback".to_string())
            .spawn(move || {
                let cpal_device = device.into_inner();
                let stream = cpal_device.build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
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
                            tracing::error!("Failed to start output stream: {}", e);
                            running.store(false, Ordering::SeqCst);
                            return;
                        }
                        while running.load(Ordering::Relaxed) {
                            thread::sleep(Duration::from_millis(10));
                        }
                    }
                    Err(e) => {
                        tracing::error!("Failed to build output stream: {}", e);
                        running.store(false, Ordering::SeqCst);
                    }
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        self.thread_handle = Some(handle);
        Ok(())
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Next stream error reported by the device, if any
    pub fn check_errors(&self) -> Option<AudioError> {
        self.error_rx.as_ref().and_then(|rx| rx.try_recv().ok())
    }
}

impl Drop for AudioPlayback {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(watermark: usize) -> PlaybackConfig {
        PlaybackConfig {
            watermark,
            queue_capacity: 8,
            inbox_capacity: 4,
        }
    }

    fn filled(queue: &PlaybackQueue, timestamp_us: u64, value: f32, frames: usize) -> DecodedBlock {
        let mut block = queue.block();
        block.reset(timestamp_us, frames, 1);
        block.plane_mut(0).fill(value);
        block
    }

    #[test]
    fn test_processor_plays_after_watermark() {
        let queue = PlaybackQueue::new(&config(1));
        let mut processor = queue.processor();
        let mut out = vec![1.0f32; 8];

        assert!(queue.deliver(filled(&queue, 0, 0.5, 4)));
        assert_eq!(processor.process(&mut out, 2), 0);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(queue.monitor().snapshot().state, PlaybackState::Buffering);

        assert!(queue.deliver(filled(&queue, 1, 0.25, 4)));
        assert_eq!(processor.process(&mut out, 2), 4);
        assert!(out.iter().all(|&s| s == 0.5));

        let snapshot = queue.monitor().snapshot();
        assert_eq!(snapshot.state, PlaybackState::Playing);
        assert_eq!(snapshot.frames_played, 4);
    }

    #[test]
    fn test_full_inbox_rejects_and_recycles() {
        let queue = PlaybackQueue::new(&config(1));
        for i in 0..4 {
            assert!(queue.deliver(filled(&queue, i, 0.0, 4)));
        }
        assert!(!queue.deliver(filled(&queue, 4, 0.0, 4)));
        assert_eq!(queue.inbox_overflows(), 1);

        // the rejected block is reused for the next decode
        let reused = queue.block();
        assert_eq!(reused.timestamp_us, 4);
    }

    #[test]
    fn test_stop_request_clears_everything() {
        let queue = PlaybackQueue::new(&config(1));
        let mut processor = queue.processor();
        let mut out = vec![0.0f32; 4];

        for i in 0..3 {
            queue.deliver(filled(&queue, i, 0.5, 4));
        }
        processor.process(&mut out, 1);
        queue.deliver(filled(&queue, 3, 0.5, 4));
        queue.request_stop();

        out.fill(1.0);
        assert_eq!(processor.process(&mut out, 1), 0);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(processor.jitter().pending(), 0);
        assert_eq!(queue.monitor().snapshot().state, PlaybackState::Stopped);
    }

    #[test]
    fn test_late_delivery_after_stop_is_discarded() {
        let queue = PlaybackQueue::new(&config(0));
        let mut processor = queue.processor();
        let mut out = vec![1.0f32; 4];

        queue.request_stop();
        processor.process(&mut out, 1);

        // a decode that was already running when the stop arrived
        let late = filled(&queue, 0, 0.5, 4);
        assert!(!queue.deliver(late));
        assert_eq!(queue.recycle.available(), 1);

        queue.inbox.push(filled(&queue, 1, 0.5, 4)).unwrap();
        out.fill(1.0);
        assert_eq!(processor.process(&mut out, 1), 0);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(processor.jitter().pending(), 0);
        assert_eq!(queue.recycle.available(), 1);
        assert_eq!(queue.monitor().snapshot().state, PlaybackState::Stopped);
    }

    #[test]
    fn test_pool_holds_every_block_in_flight() {
        let queue = PlaybackQueue::new(&config(1));
        let mut processor = queue.processor();

        // fill the ring without playing anything out of it
        for i in 0..8 {
            assert!(queue.deliver(filled(&queue, i, 0.5, 4)));
            processor.process(&mut [], 2);
        }
        assert_eq!(processor.jitter().pending(), 8);
        for i in 8..12 {
            assert!(queue.deliver(filled(&queue, i, 0.5, 4)));
        }
        let decoding = filled(&queue, 12, 0.5, 4);
        assert_eq!(queue.recycle.allocations(), 13);

        queue.request_stop();
        processor.process(&mut [], 2);
        queue.recycle.give(decoding);

        assert_eq!(queue.recycle.available(), 13);
    }
}
