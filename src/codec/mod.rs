//! Compressor and decompressor variants
//!
//! Opus is the default on both ends. 16-bit PCM is the software fallback,
//! used when Opus cannot be initialised and fallback is allowed. The wire
//! format carries no codec id, so both ends must be configured alike.

pub mod decoder;
pub mod encoder;
pub mod pcm;

use bytes::Bytes;

use crate::audio::frame::{AccumulatedFrame, DecodedBlock};
use crate::config::{AudioConfig, CodecKind, EncoderConfig, FrameDuration};
use crate::error::{CodecError, ConfigError};
use crate::protocol::WireChunk;

pub use decoder::OpusDecompressor;
pub use encoder::OpusCompressor;
pub use pcm::{Pcm16Compressor, Pcm16Decompressor};

/// One unit of compressor output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChunk {
    pub timestamp_us: u64,
    pub duration_us: u32,
    pub data: Bytes,
}

/// Compressor settings derived from the audio and encoder configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressorConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Total constant bitrate in bits per second
    pub bitrate: u32,
    pub frame_duration: FrameDuration,
}

impl CompressorConfig {
    pub fn new(audio: &AudioConfig, encoder: &EncoderConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            sample_rate: audio.sample_rate,
            channels: audio.channels,
            bitrate: encoder.bitrate(audio.channels)?,
            frame_duration: encoder.frame_duration(audio.channels)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecompressorConfig {
    pub sample_rate: u32,
    pub channels: u16,
}

impl From<&AudioConfig> for DecompressorConfig {
    fn from(audio: &AudioConfig) -> Self {
        Self {
            sample_rate: audio.sample_rate,
            channels: audio.channels,
        }
    }
}

/// Turns accumulated frames into compressed chunks
pub trait Compressor: Send {
    fn name(&self) -> &'static str;

    /// (Re)initialise for constant-bitrate output
    fn configure(&mut self, config: &CompressorConfig) -> Result<(), CodecError>;

    /// Compress one frame. Output chunks are passed to `out` in order.
    fn submit(
        &mut self,
        frame: &AccumulatedFrame,
        out: &mut dyn FnMut(EncodedChunk),
    ) -> Result<(), CodecError>;

    /// Discard staged input and reset codec state
    fn flush(&mut self) -> Result<(), CodecError>;
}

/// Turns wire chunks back into sample blocks
pub trait Decompressor: Send {
    fn name(&self) -> &'static str;

    fn configure(&mut self, config: &DecompressorConfig) -> Result<(), CodecError>;

    /// Decode one chunk into `out`, which is reshaped as needed
    fn submit(&mut self, chunk: &WireChunk, out: &mut DecodedBlock) -> Result<(), CodecError>;

    fn reset(&mut self) -> Result<(), CodecError>;
}

/// Build and configure the compressor for `kind`
///
/// With `allow_fallback`, a failure to initialise Opus falls back to PCM.
pub fn open_compressor(
    kind: CodecKind,
    allow_fallback: bool,
    config: &CompressorConfig,
) -> Result<Box<dyn Compressor>, CodecError> {
    let mut compressor: Box<dyn Compressor> = match kind {
        CodecKind::Opus => Box::new(OpusCompressor::new()),
        CodecKind::Pcm16 => Box::new(Pcm16Compressor::new()),
    };

    match compressor.configure(config) {
        Ok(()) => Ok(compressor),
        Err(e) if allow_fallback && kind != CodecKind::Pcm16 => {
            tracing::warn!("{} compressor unavailable ({}), falling back to pcm16", compressor.name(), e);
            let mut fallback = Pcm16Compressor::new();
            fallback.configure(config)?;
            Ok(Box::new(fallback))
        }
        Err(e) => Err(e),
    }
}

/// Build and configure the decompressor for `kind`
pub fn open_decompressor(
    kind: CodecKind,
    allow_fallback: bool,
    config: &DecompressorConfig,
) -> Result<Box<dyn Decompressor>, CodecError> {
    let mut decompressor: Box<dyn Decompressor> = match kind {
        CodecKind::Opus => Box::new(OpusDecompressor::new()),
        CodecKind::Pcm16 => Box::new(Pcm16Decompressor::new()),
    };

    match decompressor.configure(config) {
        Ok(()) => Ok(decompressor),
        Err(e) if allow_fallback && kind != CodecKind::Pcm16 => {
            tracing::warn!("{} decompressor unavailable ({}), falling back to pcm16", decompressor.name(), e);
            let mut fallback = Pcm16Decompressor::new();
            fallback.configure(config)?;
            Ok(Box::new(fallback))
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compressor_config(channels: u16) -> CompressorConfig {
        let audio = AudioConfig {
            channels,
            ..AudioConfig::default()
        };
        CompressorConfig::new(&audio, &EncoderConfig::default()).unwrap()
    }

    #[test]
    fn test_compressor_config_bitrate() {
        let config = compressor_config(2);
        assert_eq!(config.bitrate, 96_000);
        assert_eq!(config.frame_duration.as_micros(), 60_000);
    }

    #[test]
    fn test_three_channels_fall_back_to_pcm() {
        let config = compressor_config(3);
        assert!(open_compressor(CodecKind::Opus, false, &config).is_err());

        let compressor = open_compressor(CodecKind::Opus, true, &config).unwrap();
        assert_eq!(compressor.name(), "pcm16");
    }

    #[test]
    fn test_opens_requested_kind() {
        let config = compressor_config(2);
        assert_eq!(open_compressor(CodecKind::Pcm16, false, &config).unwrap().name(), "pcm16");

        let config = DecompressorConfig::from(&AudioConfig::default());
        assert_eq!(open_decompressor(CodecKind::Pcm16, false, &config).unwrap().name(), "pcm16");
    }
}
