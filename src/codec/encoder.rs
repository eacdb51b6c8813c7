//! Opus compressor
//!
//! Constant-bitrate Opus. Accumulated frames are staged interleaved and cut
//! into codec frames of the configured duration; samples left over at the end
//! of one accumulated frame carry into the next.

use bytes::Bytes;
use opus::{Application, Channels, Encoder};

use crate::audio::frame::AccumulatedFrame;
use crate::codec::{Compressor, CompressorConfig, EncodedChunk};
use crate::error::CodecError;

/// Largest packet Opus produces for one frame
const MAX_PACKET: usize = 4000;

struct Session {
    encoder: Encoder,
    config: CompressorConfig,
    frame_samples: usize,
}

/// Opus compressor, unconfigured until [`Compressor::configure`]
pub struct OpusCompressor {
    session: Option<Session>,
    /// Interleaved samples not yet encoded
    staging: Vec<i16>,
    /// Stream time of the first staged sample
    staged_timestamp_us: u64,
    /// Encoding buffer (reused to avoid allocations)
    encode_buffer: Vec<u8>,
    frames_encoded: u64,
    bytes_produced: u64,
}

impl OpusCompressor {
    pub fn new() -> Self {
        Self {
            session: None,
            staging: Vec::new(),
            staged_timestamp_us: 0,
            encode_buffer: vec![0u8; MAX_PACKET],
            frames_encoded: 0,
            bytes_produced: 0,
        }
    }

    fn build_encoder(config: &CompressorConfig) -> Result<Encoder, CodecError> {
        let channels = match config.channels {
            1 => Channels::Mono,
            2 => Channels::Stereo,
            n => return Err(CodecError::UnsupportedChannels(n)),
        };

        let mut encoder = Encoder::new(config.sample_rate, channels, Application::Audio)
            .map_err(|e| CodecError::EncoderInit(e.to_string()))?;

        let bitrate = i32::try_from(config.bitrate)
            .map_err(|_| CodecError::EncoderInit(format!("bitrate {} bps out of range", config.bitrate)))?;
        encoder
            .set_bitrate(opus::Bitrate::Bits(bitrate))
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set bitrate: {}", e)))?;

        // Hard CBR: every chunk of a given duration has the same size
        encoder
            .set_vbr(false)
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set CBR: {}", e)))?;

        Ok(encoder)
    }

    pub fn stats(&self) -> EncoderStats {
        EncoderStats {
            frames_encoded: self.frames_encoded,
            bytes_produced: self.bytes_produced,
            average_frame_size: if self.frames_encoded > 0 {
                self.bytes_produced as f32 / self.frames_encoded as f32
            } else {
                0.0
            },
        }
    }
}

impl Default for OpusCompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl Compressor for OpusCompressor {
    fn name(&self) -> &'static str {
        "opus"
    }

    fn configure(&mut self, config: &CompressorConfig) -> Result<(), CodecError> {
        let encoder = Self::build_encoder(config)?;
        let frame_samples = config.frame_duration.samples(config.sample_rate);

        self.staging.clear();
        self.staging.reserve(frame_samples * config.channels as usize);
        self.session = Some(Session {
            encoder,
            config: *config,
            frame_samples,
        });
        Ok(())
    }

    fn submit(
        &mut self,
        frame: &AccumulatedFrame,
        out: &mut dyn FnMut(EncodedChunk),
    ) -> Result<(), CodecError> {
        let session = self.session.as_mut().ok_or(CodecError::NotConfigured)?;
        if frame.channels() != session.config.channels as usize {
            return Err(CodecError::UnsupportedChannels(frame.channels() as u16));
        }

        if self.staging.is_empty() {
            self.staged_timestamp_us = frame.timestamp_us;
        }
        frame.interleave_into(0..frame.capacity(), &mut self.staging);

        let chunk_len = session.frame_samples * session.config.channels as usize;
        let duration_us = session.config.frame_duration.as_micros();
        let mut consumed = 0;

        while self.staging.len() - consumed >= chunk_len {
            let input = &self.staging[consumed..consumed + chunk_len];
            let size = session
                .encoder
                .encode(input, &mut self.encode_buffer)
                .map_err(|e| CodecError::EncodingFailed(e.to_string()))?;

            self.frames_encoded += 1;
            self.bytes_produced += size as u64;
            out(EncodedChunk {
                timestamp_us: self.staged_timestamp_us,
                duration_us,
                data: Bytes::copy_from_slice(&self.encode_buffer[..size]),
            });

            consumed += chunk_len;
            self.staged_timestamp_us += duration_us as u64;
        }

        self.staging.drain(..consumed);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), CodecError> {
        self.staging.clear();
        if let Some(session) = self.session.as_mut() {
            session
                .encoder
                .reset_state()
                .map_err(|e| CodecError::EncodingFailed(e.to_string()))?;
        }
        Ok(())
    }
}

/// Encoder statistics
#[derive(Debug, Clone)]
pub struct EncoderStats {
    pub frames_encoded: u64,
    pub bytes_produced: u64,
    pub average_frame_size: f32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::accumulator::FrameAccumulator;
    use crate::audio::frame::SampleBlock;
    use crate::config::FrameDuration;

    fn config(channels: u16, duration_us: u32) -> CompressorConfig {
        CompressorConfig {
            sample_rate: 48_000,
            channels,
            bitrate: 48_000 * channels as u32,
            frame_duration: FrameDuration::new(duration_us, channels).unwrap(),
        }
    }

    fn sine_frames(capacity: usize, count: usize) -> Vec<AccumulatedFrame> {
        let samples: Vec<f32> = (0..capacity * count)
            .flat_map(|i| {
                let v = (i as f32 / 48_000.0 * 440.0 * std::f32::consts::TAU).sin() * 0.5;
                [v, v]
            })
            .collect();
        let mut acc = FrameAccumulator::new(capacity, 2, 48_000);
        let mut frames = Vec::new();
        acc.on_samples(&SampleBlock::interleaved(&samples, 2), |f| frames.push(f));
        frames
    }

    #[test]
    fn test_submit_before_configure() {
        let mut compressor = OpusCompressor::new();
        let frame = AccumulatedFrame::new(2880, 2);
        let result = compressor.submit(&frame, &mut |_| {});
        assert_eq!(result, Err(CodecError::NotConfigured));
    }

    #[test]
    fn test_cbr_chunk_size() {
        let mut compressor = OpusCompressor::new();
        compressor.configure(&config(2, 60_000)).unwrap();

        let mut chunks = Vec::new();
        for frame in sine_frames(2880, 3) {
            compressor.submit(&frame, &mut |c| chunks.push(c)).unwrap();
        }

        assert_eq!(chunks.len(), 3);
        let stamps: Vec<u64> = chunks.iter().map(|c| c.timestamp_us).collect();
        assert_eq!(stamps, vec![0, 60_000, 120_000]);
        assert!(chunks.iter().all(|c| c.duration_us == 60_000));
        let size = chunks[0].data.len();
        assert!(size > 0 && size <= 720);
        assert!(chunks.iter().all(|c| c.data.len() == size));
    }

    #[test]
    fn test_frames_are_resliced_by_duration() {
        let mut compressor = OpusCompressor::new();
        compressor.configure(&config(2, 20_000)).unwrap();

        let mut chunks = Vec::new();
        for frame in sine_frames(2880, 1) {
            compressor.submit(&frame, &mut |c| chunks.push(c)).unwrap();
        }

        let stamps: Vec<u64> = chunks.iter().map(|c| c.timestamp_us).collect();
        assert_eq!(stamps, vec![0, 20_000, 40_000]);
        assert_eq!(compressor.stats().frames_encoded, 3);
    }

    #[test]
    fn test_partial_frames_carry_over() {
        let mut compressor = OpusCompressor::new();
        compressor.configure(&config(2, 40_000)).unwrap();

        let mut chunks = Vec::new();
        for frame in sine_frames(1440, 3) {
            compressor.submit(&frame, &mut |c| chunks.push(c)).unwrap();
        }

        // 90 ms of input yields two 40 ms chunks, 10 ms stays staged
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].timestamp_us, 40_000);

        compressor.flush().unwrap();
        assert!(compressor.staging.is_empty());
    }

    #[test]
    fn test_rejects_unsupported_channels() {
        let mut compressor = OpusCompressor::new();
        let result = compressor.configure(&CompressorConfig {
            channels: 3,
            ..config(2, 60_000)
        });
        assert_eq!(result, Err(CodecError::UnsupportedChannels(3)));
    }
}
