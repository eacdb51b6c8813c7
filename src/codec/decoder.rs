//! Opus decompressor

use opus::{Channels, Decoder};

use crate::audio::frame::DecodedBlock;
use crate::codec::{Decompressor, DecompressorConfig};
use crate::error::CodecError;
use crate::protocol::WireChunk;

/// Longest Opus frame in milliseconds
const MAX_FRAME_MS: usize = 120;

struct Session {
    decoder: Decoder,
    channels: usize,
}

/// Opus decompressor, unconfigured until [`Decompressor::configure`]
pub struct OpusDecompressor {
    session: Option<Session>,
    /// Interleaved decode output (reused to avoid allocations)
    decode_buffer: Vec<f32>,
    frames_decoded: u64,
    samples_produced: u64,
}

impl OpusDecompressor {
    pub fn new() -> Self {
        Self {
            session: None,
            decode_buffer: Vec::new(),
            frames_decoded: 0,
            samples_produced: 0,
        }
    }

    pub fn stats(&self) -> DecoderStats {
        DecoderStats {
            frames_decoded: self.frames_decoded,
            samples_produced: self.samples_produced,
        }
    }
}

impl Default for OpusDecompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl Decompressor for OpusDecompressor {
    fn name(&self) -> &'static str {
        "opus"
    }

    fn configure(&mut self, config: &DecompressorConfig) -> Result<(), CodecError> {
        let opus_channels = match config.channels {
            1 => Channels::Mono,
            2 => Channels::Stereo,
            n => return Err(CodecError::UnsupportedChannels(n)),
        };

        let decoder = Decoder::new(config.sample_rate, opus_channels)
            .map_err(|e| CodecError::DecoderInit(e.to_string()))?;

        let max_frame = config.sample_rate as usize * MAX_FRAME_MS / 1000;
        self.decode_buffer = vec![0.0; max_frame * config.channels as usize];
        self.session = Some(Session {
            decoder,
            channels: config.channels as usize,
        });
        Ok(())
    }

    fn submit(&mut self, chunk: &WireChunk, out: &mut DecodedBlock) -> Result<(), CodecError> {
        let session = self.session.as_mut().ok_or(CodecError::NotConfigured)?;

        let frames = session
            .decoder
            .decode_float(&chunk.payload, &mut self.decode_buffer, false)
            .map_err(|e| CodecError::DecodingFailed(e.to_string()))?;

        let total = frames * session.channels;
        out.reset(chunk.timestamp_us as u64, frames, session.channels);
        out.deinterleave_from(&self.decode_buffer[..total]);

        self.frames_decoded += 1;
        self.samples_produced += total as u64;
        Ok(())
    }

    fn reset(&mut self) -> Result<(), CodecError> {
        match self.session.as_mut() {
            Some(session) => session
                .decoder
                .reset_state()
                .map_err(|e| CodecError::DecoderInit(e.to_string())),
            None => Ok(()),
        }
    }
}

/// Decoder statistics
#[derive(Debug, Clone)]
pub struct DecoderStats {
    pub frames_decoded: u64,
    pub samples_produced: u64,
}
