//! Sample containers passed between the audio domains

use crate::constants::SAMPLE_SCALE;

/// How samples of a [`SampleBlock`] are arranged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleLayout {
    /// `L0 R0 L1 R1 ...`, what cpal hands to callbacks
    Interleaved,
    /// Each channel's plane back to back
    Planar,
}

/// A block of normalized f32 samples borrowed from a real-time callback
#[derive(Debug, Clone, Copy)]
pub struct SampleBlock<'a> {
    data: &'a [f32],
    channels: usize,
    layout: SampleLayout,
}

impl<'a> SampleBlock<'a> {
    pub fn interleaved(data: &'a [f32], channels: u16) -> Self {
        Self {
            data,
            channels: channels as usize,
            layout: SampleLayout::Interleaved,
        }
    }

    pub fn planar(data: &'a [f32], channels: u16) -> Self {
        Self {
            data,
            channels: channels as usize,
            layout: SampleLayout::Planar,
        }
    }

    /// Samples per channel
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.data.len() / self.channels
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn layout(&self) -> SampleLayout {
        self.layout
    }

    pub fn is_empty(&self) -> bool {
        self.frames() == 0
    }

    #[inline]
    pub fn sample(&self, channel: usize, frame: usize) -> f32 {
        match self.layout {
            SampleLayout::Interleaved => self.data[frame * self.channels + channel],
            SampleLayout::Planar => self.data[channel * self.frames() + frame],
        }
    }
}

/// Float to signed 16-bit, scaled by 32767 and truncated toward zero
#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    // `as` saturates out-of-range values
    (sample * SAMPLE_SCALE) as i16
}

#[inline]
pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / SAMPLE_SCALE
}

/// A fixed-size frame of planar 16-bit samples
///
/// Filled by the accumulator, then handed off whole. Consumers only get
/// shared access; the buffer goes back to the pool once they are done.
#[derive(Debug, Clone, PartialEq)]
pub struct AccumulatedFrame {
    samples: Vec<i16>,
    capacity: usize,
    channels: usize,
    /// Stream position of the first sample in microseconds
    pub timestamp_us: u64,
}

impl AccumulatedFrame {
    pub fn new(capacity: usize, channels: u16) -> Self {
        Self {
            samples: vec![0; capacity * channels as usize],
            capacity,
            channels: channels as usize,
            timestamp_us: 0,
        }
    }

    /// Samples per channel
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn plane(&self, channel: usize) -> &[i16] {
        let start = channel * self.capacity;
        &self.samples[start..start + self.capacity]
    }

    /// All planes back to back
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    #[inline]
    pub(crate) fn set(&mut self, channel: usize, frame: usize, value: i16) {
        self.samples[channel * self.capacity + frame] = value;
    }

    /// Interleaved copy of frames `range`, appended to `out`
    pub fn interleave_into(&self, range: std::ops::Range<usize>, out: &mut Vec<i16>) {
        out.reserve(range.len() * self.channels);
        for frame in range {
            for channel in 0..self.channels {
                out.push(self.samples[channel * self.capacity + frame]);
            }
        }
    }

    pub fn duration_us(&self, sample_rate: u32) -> u64 {
        self.capacity as u64 * 1_000_000 / sample_rate as u64
    }
}

/// Decoded planar f32 samples ready for playback
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedBlock {
    pub timestamp_us: u64,
    frames: usize,
    channels: usize,
    samples: Vec<f32>,
}

impl DecodedBlock {
    pub fn new(timestamp_us: u64, frames: usize, channels: usize) -> Self {
        Self {
            timestamp_us,
            frames,
            channels,
            samples: vec![0.0; frames * channels],
        }
    }

    /// Build from per-channel planes of equal length
    pub fn from_planes(timestamp_us: u64, planes: &[&[f32]]) -> Self {
        let frames = planes.first().map_or(0, |p| p.len());
        let mut block = Self::new(timestamp_us, frames, planes.len());
        for (channel, plane) in planes.iter().enumerate() {
            block.plane_mut(channel).copy_from_slice(&plane[..frames]);
        }
        block
    }

    /// Reshape for reuse. Only grows the allocation when the new shape is larger.
    pub fn reset(&mut self, timestamp_us: u64, frames: usize, channels: usize) {
        self.timestamp_us = timestamp_us;
        self.frames = frames;
        self.channels = channels;
        self.samples.clear();
        self.samples.resize(frames * channels, 0.0);
    }

    /// Samples per channel
    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn plane(&self, channel: usize) -> &[f32] {
        let start = channel * self.frames;
        &self.samples[start..start + self.frames]
    }

    pub fn plane_mut(&mut self, channel: usize) -> &mut [f32] {
        let start = channel * self.frames;
        &mut self.samples[start..start + self.frames]
    }

    #[inline]
    pub fn sample(&self, channel: usize, frame: usize) -> f32 {
        self.samples[channel * self.frames + frame]
    }

    /// Fill the planes from interleaved f32 samples
    pub fn deinterleave_from(&mut self, interleaved: &[f32]) {
        let channels = self.channels;
        for (frame, chunk) in interleaved.chunks_exact(channels).take(self.frames).enumerate() {
            for (channel, &sample) in chunk.iter().enumerate() {
                self.samples[channel * self.frames + frame] = sample;
            }
        }
    }
}
