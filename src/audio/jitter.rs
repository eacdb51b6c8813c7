//! Jitter buffer and playback sequencer
//!
//! Decoded blocks are queued in a fixed ring of slots and played strictly in
//! arrival order. Playback only starts once more than `watermark` blocks are
//! pending, and stops the moment the queue runs dry; it then has to cross the
//! watermark again before resuming, so it never stutters around the
//! threshold.
//!
//! Three monotonic indices walk the ring:
//!
//! ```text
//!   head          current         tail
//!    │  consumed   │   pending     │   free
//!    ▼             ▼               ▼
//!  ┌───┬───┬───┬───┬───┬───┬───┬───┬───┬───┐
//!  │ c │ c │ c │ r │ p │ p │ p │   │   │   │
//!  └───┴───┴───┴───┴───┴───┴───┴───┴───┴───┘
//! ```
//!
//! `render` only moves `current` and the in-item cursor. Consumed slots are
//! reclaimed on the next `push` (or `stop`), outside the per-sample loop.
//!
//! Everything here is bounded-time and allocation-free; it is meant to be
//! owned by the output callback.

use crate::audio::buffer::SharedBufferPool;
use crate::audio::frame::DecodedBlock;

/// Playback state of the sequencer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PlaybackState {
    /// Nothing received yet
    Idle = 0,
    /// Queueing until the watermark is exceeded
    Buffering = 1,
    Playing = 2,
    /// Queue ran dry or playback was stopped
    Stopped = 3,
}

impl PlaybackState {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Buffering,
            2 => Self::Playing,
            3 => Self::Stopped,
            _ => Self::Idle,
        }
    }
}

/// Counters snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JitterStats {
    pub state: PlaybackState,
    pub pending: usize,
    pub capacity: usize,
    pub pushed: u64,
    pub overflows: u64,
    pub underruns: u64,
    pub frames_played: u64,
}

pub struct JitterBuffer {
    slots: Vec<Option<DecodedBlock>>,
    capacity: usize,
    watermark: usize,
    /// Oldest slot not yet reclaimed
    head: usize,
    /// Item being played
    current: usize,
    /// Next slot to write
    tail: usize,
    /// Frames of the current item already played
    cursor: usize,
    state: PlaybackState,
    recycle: Option<SharedBufferPool<DecodedBlock>>,
    pushed: u64,
    overflows: u64,
    underruns: u64,
    frames_played: u64,
}

impl JitterBuffer {
    /// `capacity` is raised to `watermark + 1` if needed so playback can start
    pub fn new(capacity: usize, watermark: usize) -> Self {
        let capacity = capacity.max(watermark + 1);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);

        Self {
            slots,
            capacity,
            watermark,
            head: 0,
            current: 0,
            tail: 0,
            cursor: 0,
            state: PlaybackState::Idle,
            recycle: None,
            pushed: 0,
            overflows: 0,
            underruns: 0,
            frames_played: 0,
        }
    }

    /// Reclaimed blocks are handed to `pool` for the decompress task to reuse
    pub fn with_recycle(mut self, pool: SharedBufferPool<DecodedBlock>) -> Self {
        self.recycle = Some(pool);
        self
    }

    /// Queue a decoded block. Returns it back when every slot is occupied.
    pub fn push(&mut self, block: DecodedBlock) -> Result<(), DecodedBlock> {
        self.reclaim();

        if self.tail - self.head == self.capacity {
            self.overflows += 1;
            return Err(block);
        }

        let index = self.tail % self.capacity;
        self.slots[index] = Some(block);
        self.tail += 1;
        self.pushed += 1;

        if matches!(self.state, PlaybackState::Idle | PlaybackState::Stopped) {
            self.state = PlaybackState::Buffering;
        }
        self.poll_watermark();
        Ok(())
    }

    /// Fill an interleaved output block, returning the frames written
    ///
    /// Slots not covered by queued audio are set to silence. Item channels
    /// map onto output channels by index; a mono item feeds every output
    /// channel.
    pub fn render(&mut self, output: &mut [f32], channels: usize) -> usize {
        self.poll_watermark();

        if self.state != PlaybackState::Playing || channels == 0 {
            output.fill(0.0);
            return 0;
        }

        let frames_out = output.len() / channels;
        let mut written = 0;
        let mut exhausted = false;

        while written < frames_out {
            if self.current >= self.tail {
                exhausted = true;
                break;
            }
            let Some(item) = self.slots[self.current % self.capacity].as_ref() else {
                exhausted = true;
                break;
            };

            let item_frames = item.frames();
            let item_channels = item.channels();
            if item_frames == 0 || item_channels == 0 {
                self.cursor = 0;
                self.current += 1;
                continue;
            }

            let n = (item_frames - self.cursor).min(frames_out - written);
            for i in 0..n {
                let start = (written + i) * channels;
                for (channel, out) in output[start..start + channels].iter_mut().enumerate() {
                    *out = item.sample(channel.min(item_channels - 1), self.cursor + i);
                }
            }
            written += n;
            self.cursor += n;

            if self.cursor >= item_frames {
                self.cursor = 0;
                self.current += 1;
                if self.current >= self.tail {
                    exhausted = true;
                    break;
                }
            }
        }

        self.frames_played += written as u64;
        output[written * channels..].fill(0.0);

        if exhausted {
            self.state = PlaybackState::Stopped;
            self.underruns += 1;
        }
        written
    }

    /// Stop playback and discard everything queued
    pub fn stop(&mut self) {
        self.state = PlaybackState::Stopped;
        self.current = self.tail;
        self.cursor = 0;
        self.reclaim();
    }

    fn poll_watermark(&mut self) {
        if self.state == PlaybackState::Buffering && self.pending() > self.watermark {
            self.state = PlaybackState::Playing;
        }
    }

    /// Release consumed slots `[head, current)`
    fn reclaim(&mut self) {
        while self.head < self.current {
            let index = self.head % self.capacity;
            if let Some(block) = self.slots[index].take() {
                if let Some(pool) = &self.recycle {
                    pool.give(block);
                }
            }
            self.head += 1;
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// Blocks queued but not fully played, including the one in progress
    pub fn pending(&self) -> usize {
        self.tail - self.current
    }

    /// Frames of the current item already played
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn watermark(&self) -> usize {
        self.watermark
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Timestamp of the block currently playing
    pub fn current_timestamp(&self) -> Option<u64> {
        if self.current >= self.tail {
            return None;
        }
        self.slots[self.current % self.capacity]
            .as_ref()
            .map(|item| item.timestamp_us)
    }

    pub fn stats(&self) -> JitterStats {
        JitterStats {
            state: self.state,
            pending: self.pending(),
            capacity: self.capacity,
            pushed: self.pushed,
            overflows: self.overflows,
            underruns: self.underruns,
            frames_played: self.frames_played,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::BufferPool;
    use std::sync::Arc;

    fn ramp(timestamp_us: u64, start: f32, frames: usize) -> DecodedBlock {
        let plane: Vec<f32> = (0..frames).map(|i| start + i as f32).collect();
        DecodedBlock::from_planes(timestamp_us, &[&plane])
    }

    #[test]
    fn test_watermark_is_strictly_greater() {
        let mut jitter = JitterBuffer::new(64, 8);
        assert_eq!(jitter.state(), PlaybackState::Idle);

        for i in 0..8 {
            jitter.push(ramp(i, 0.0, 10)).unwrap();
        }
        assert_eq!(jitter.state(), PlaybackState::Buffering);

        let mut out = [1.0f32; 8];
        assert_eq!(jitter.render(&mut out, 2), 0);
        assert!(out.iter().all(|&s| s == 0.0));

        jitter.push(ramp(8, 0.0, 10)).unwrap();
        assert_eq!(jitter.state(), PlaybackState::Playing);
    }

    #[test]
    fn test_sample_accurate_across_items() {
        let mut jitter = JitterBuffer::new(8, 1);
        jitter.push(ramp(0, 0.0, 100)).unwrap();
        jitter.push(ramp(1, 1000.0, 50)).unwrap();
        assert_eq!(jitter.state(), PlaybackState::Playing);

        let mut out = vec![0.0f32; 60];
        assert_eq!(jitter.render(&mut out, 1), 60);
        let expected: Vec<f32> = (0..60).map(|i| i as f32).collect();
        assert_eq!(out, expected);
        assert_eq!(jitter.cursor(), 60);

        assert_eq!(jitter.render(&mut out, 1), 60);
        let expected: Vec<f32> = (60..100)
            .map(|i| i as f32)
            .chain((0..20).map(|i| 1000.0 + i as f32))
            .collect();
        assert_eq!(out, expected);
        assert_eq!(jitter.current_timestamp(), Some(1));
        assert_eq!(jitter.cursor(), 20);
        assert_eq!(jitter.pending(), 1);
        assert_eq!(jitter.state(), PlaybackState::Playing);
    }

    #[test]
    fn test_underrun_stops_and_silences_rest() {
        let mut jitter = JitterBuffer::new(8, 1);
        jitter.push(ramp(0, 1.0, 10)).unwrap();
        jitter.push(ramp(1, 11.0, 10)).unwrap();

        let mut out = vec![-1.0f32; 25];
        assert_eq!(jitter.render(&mut out, 1), 20);
        assert_eq!(out[19], 20.0);
        assert!(out[20..].iter().all(|&s| s == 0.0));
        assert_eq!(jitter.state(), PlaybackState::Stopped);
        assert_eq!(jitter.stats().underruns, 1);

        assert_eq!(jitter.render(&mut out, 1), 0);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_restart_requires_watermark_again() {
        let mut jitter = JitterBuffer::new(16, 2);
        for i in 0..3 {
            jitter.push(ramp(i, 0.0, 4)).unwrap();
        }
        let mut out = vec![0.0f32; 32];
        jitter.render(&mut out, 1);
        assert_eq!(jitter.state(), PlaybackState::Stopped);

        jitter.push(ramp(3, 0.0, 4)).unwrap();
        jitter.push(ramp(4, 0.0, 4)).unwrap();
        assert_eq!(jitter.state(), PlaybackState::Buffering);
        assert_eq!(jitter.render(&mut out, 1), 0);

        jitter.push(ramp(5, 0.0, 4)).unwrap();
        assert_eq!(jitter.state(), PlaybackState::Playing);
    }

    #[test]
    fn test_mono_item_feeds_all_output_channels() {
        let mut jitter = JitterBuffer::new(4, 0);
        jitter.push(DecodedBlock::from_planes(0, &[&[0.5, -0.5]])).unwrap();

        let mut out = [0.0f32; 4];
        assert_eq!(jitter.render(&mut out, 2), 2);
        assert_eq!(out, [0.5, 0.5, -0.5, -0.5]);
    }

    #[test]
    fn test_stereo_item_planes() {
        let mut jitter = JitterBuffer::new(4, 0);
        jitter
            .push(DecodedBlock::from_planes(0, &[&[0.1, 0.2, 0.3], &[-0.1, -0.2, -0.3]]))
            .unwrap();
        jitter.push(ramp(1, 0.0, 8)).unwrap();

        let mut out = [0.0f32; 4];
        assert_eq!(jitter.render(&mut out, 2), 2);
        assert_eq!(out, [0.1, -0.1, 0.2, -0.2]);
    }

    #[test]
    fn test_consumed_items_reclaimed_on_push() {
        let pool = Arc::new(BufferPool::new(8));
        let mut jitter = JitterBuffer::new(8, 1).with_recycle(pool.clone());
        jitter.push(ramp(0, 0.0, 4)).unwrap();
        jitter.push(ramp(1, 0.0, 4)).unwrap();
        jitter.push(ramp(2, 0.0, 4)).unwrap();

        let mut out = vec![0.0f32; 6];
        jitter.render(&mut out, 1);
        assert_eq!(pool.available(), 0);

        jitter.push(ramp(3, 0.0, 4)).unwrap();
        assert_eq!(pool.available(), 1);
        assert_eq!(jitter.pending(), 3);
    }

    #[test]
    fn test_overflow_returns_block() {
        let mut jitter = JitterBuffer::new(2, 1);
        jitter.push(ramp(0, 0.0, 4)).unwrap();
        jitter.push(ramp(1, 0.0, 4)).unwrap();

        let rejected = jitter.push(ramp(2, 0.0, 4)).unwrap_err();
        assert_eq!(rejected.timestamp_us, 2);
        assert_eq!(jitter.stats().overflows, 1);

        // consuming the first item frees its slot for the next push
        let mut out = vec![0.0f32; 4];
        jitter.render(&mut out, 1);
        assert!(jitter.push(rejected).is_ok());
    }

    #[test]
    fn test_stop_clears_queue() {
        let pool = Arc::new(BufferPool::new(8));
        let mut jitter = JitterBuffer::new(8, 1).with_recycle(pool.clone());
        for i in 0..4 {
            jitter.push(ramp(i, 0.0, 4)).unwrap();
        }
        jitter.stop();

        assert_eq!(jitter.state(), PlaybackState::Stopped);
        assert_eq!(jitter.pending(), 0);
        assert_eq!(pool.available(), 4);

        let mut out = vec![1.0f32; 4];
        assert_eq!(jitter.render(&mut out, 1), 0);
        assert!(out.iter().all(|&s| s == 0.0));
    }
}
