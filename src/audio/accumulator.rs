//! Fixed-size frame accumulation on the capture side
//!
//! Runs inside the input callback. Hardware blocks of any size are copied
//! into the open frame, converted to 16-bit; each time the frame fills it is
//! sealed, handed to the caller's sink and replaced by a buffer from the pool.
//! Blocks that straddle a frame boundary are split, so no sample is lost or
//! duplicated.

use crate::audio::buffer::SharedBufferPool;
use crate::audio::frame::{f32_to_i16, AccumulatedFrame, SampleBlock};

pub struct FrameAccumulator {
    open: AccumulatedFrame,
    capacity: usize,
    channels: u16,
    sample_rate: u32,
    /// Write index into the open frame
    index: usize,
    /// Samples per channel sealed so far
    frame_counter: u64,
    frames_emitted: u64,
    pool: Option<SharedBufferPool<AccumulatedFrame>>,
}

impl FrameAccumulator {
    pub fn new(capacity: usize, channels: u16, sample_rate: u32) -> Self {
        Self {
            open: AccumulatedFrame::new(capacity, channels),
            capacity,
            channels,
            sample_rate,
            index: 0,
            frame_counter: 0,
            frames_emitted: 0,
            pool: None,
        }
    }

    /// Replacement frames come from `pool` instead of fresh allocations
    pub fn with_pool(
        capacity: usize,
        channels: u16,
        sample_rate: u32,
        pool: SharedBufferPool<AccumulatedFrame>,
    ) -> Self {
        let mut accumulator = Self::new(capacity, channels, sample_rate);
        accumulator.pool = Some(pool);
        accumulator
    }

    /// Append one hardware block, calling `on_frame_ready` for every frame it completes
    ///
    /// A mono block feeding a stereo frame is copied to both planes; extra
    /// block channels beyond the frame's are ignored.
    pub fn on_samples<F>(&mut self, block: &SampleBlock<'_>, mut on_frame_ready: F)
    where
        F: FnMut(AccumulatedFrame),
    {
        let frames = block.frames();
        if frames == 0 || self.capacity == 0 {
            return;
        }
        let last_source = block.channels() - 1;

        let mut offset = 0;
        while offset < frames {
            let n = (self.capacity - self.index).min(frames - offset);
            for channel in 0..self.channels as usize {
                let source = channel.min(last_source);
                for i in 0..n {
                    let value = f32_to_i16(block.sample(source, offset + i));
                    self.open.set(channel, self.index + i, value);
                }
            }
            self.index += n;
            offset += n;

            if self.index == self.capacity {
                self.seal(&mut on_frame_ready);
            }
        }
    }

    fn seal<F: FnMut(AccumulatedFrame)>(&mut self, on_frame_ready: &mut F) {
        let fresh = self.fresh_frame();
        let mut sealed = std::mem::replace(&mut self.open, fresh);
        sealed.timestamp_us = self.frame_counter * 1_000_000 / self.sample_rate as u64;

        self.frame_counter += self.capacity as u64;
        self.frames_emitted += 1;
        self.index = 0;

        on_frame_ready(sealed);
    }

    fn fresh_frame(&self) -> AccumulatedFrame {
        let make = || AccumulatedFrame::new(self.capacity, self.channels);
        match &self.pool {
            Some(pool) => {
                let frame = pool.take_or(make);
                if frame.capacity() == self.capacity && frame.channels() == self.channels as usize {
                    frame
                } else {
                    make()
                }
            }
            None => make(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples per channel waiting in the open frame
    pub fn buffered(&self) -> usize {
        self.index
    }

    pub fn frames_emitted(&self) -> u64 {
        self.frames_emitted
    }
}
