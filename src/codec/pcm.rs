//! Uncompressed 16-bit PCM
//!
//! Each chunk carries one accumulated frame as its channel planes back to
//! back, big-endian. Needs no native library, so it is always available.

use bytes::{Buf, BufMut, BytesMut};

use crate::audio::frame::{i16_to_f32, AccumulatedFrame, DecodedBlock};
use crate::codec::{Compressor, CompressorConfig, DecompressorConfig, EncodedChunk, Decompressor};
use crate::error::CodecError;
use crate::protocol::WireChunk;

#[derive(Default)]
pub struct Pcm16Compressor {
    config: Option<CompressorConfig>,
}

impl Pcm16Compressor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Compressor for Pcm16Compressor {
    fn name(&self) -> &'static str {
        "pcm16"
    }

    fn configure(&mut self, config: &CompressorConfig) -> Result<(), CodecError> {
        if config.channels == 0 {
            return Err(CodecError::UnsupportedChannels(0));
        }
        self.config = Some(*config);
        Ok(())
    }

    fn submit(
        &mut self,
        frame: &AccumulatedFrame,
        out: &mut dyn FnMut(EncodedChunk),
    ) -> Result<(), CodecError> {
        let config = self.config.as_ref().ok_or(CodecError::NotConfigured)?;
        if frame.channels() != config.channels as usize {
            return Err(CodecError::UnsupportedChannels(frame.channels() as u16));
        }

        let mut buf = BytesMut::with_capacity(frame.samples().len() * 2);
        for &sample in frame.samples() {
            buf.put_i16(sample);
        }

        out(EncodedChunk {
            timestamp_us: frame.timestamp_us,
            duration_us: frame.duration_us(config.sample_rate) as u32,
            data: buf.freeze(),
        });
        Ok(())
    }

    fn flush(&mut self) -> Result<(), CodecError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct Pcm16Decompressor {
    channels: Option<usize>,
}

impl Pcm16Decompressor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decompressor for Pcm16Decompressor {
    fn name(&self) -> &'static str {
        "pcm16"
    }

    fn configure(&mut self, config: &DecompressorConfig) -> Result<(), CodecError> {
        if config.channels == 0 {
            return Err(CodecError::UnsupportedChannels(0));
        }
        self.channels = Some(config.channels as usize);
        Ok(())
    }

    fn submit(&mut self, chunk: &WireChunk, out: &mut DecodedBlock) -> Result<(), CodecError> {
        let channels = self.channels.ok_or(CodecError::NotConfigured)?;
        let bytes_per_frame = 2 * channels;
        if chunk.payload.len() % bytes_per_frame != 0 {
            return Err(CodecError::DecodingFailed(format!(
                "{} byte payload is not a whole number of {} channel frames",
                chunk.payload.len(),
                channels
            )));
        }

        let frames = chunk.payload.len() / bytes_per_frame;
        out.reset(chunk.timestamp_us as u64, frames, channels);

        let mut payload = &chunk.payload[..];
        for channel in 0..channels {
            for sample in out.plane_mut(channel) {
                *sample = i16_to_f32(payload.get_i16());
            }
        }
        Ok(())
    }

    fn reset(&mut self) -> Result<(), CodecError> {
        Ok(())
    }
}
