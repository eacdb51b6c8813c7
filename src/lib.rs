//! # WS Audio Stream
//!
//! Live audio streaming between a capture endpoint and a playback endpoint
//! over a message-oriented WebSocket link.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────── CAPTURE ────────────────────────────────┐
//! │  cpal input callback (real-time)                                         │
//! │     │  f32 blocks                                                        │
//! │     ▼                                                                    │
//! │  FrameAccumulator (audio::accumulator)  ──►  sealed i16 frames           │
//! │                                               │ crossbeam channel        │
//! │                                               ▼                          │
//! │  CompressTask thread (pipeline::compress)                                │
//! │     Compressor (codec: opus | pcm16) ─► WireChunk (protocol::wire)       │
//! │                                               │                          │
//! │  TransportChannel (network::channel)  drop + reconnect when not open     │
//! └───────────────────────────────────────────────┼──────────────────────────┘
//!                                                 │ ws://  one chunk per message
//!                                      relay (relay::server) fan-out
//!                                                 │
//! ┌───────────────────────────────────────────────┼──────── PLAYBACK ────────┐
//! │  TransportChannel  ─► inbound binary messages                           │
//! │                                               ▼                          │
//! │  DecompressTask (pipeline::decompress)                                   │
//! │     WireChunk::decode ─► Decompressor ─► DecodedBlock                    │
//! │                                               │ lock-free inbox          │
//! │                                               ▼                          │
//! │  cpal output callback (real-time)                                        │
//! │     JitterBuffer (audio::jitter): Buffering ─(> watermark)─► Playing     │
//! │                                   Playing ─(exhausted)─► Stopped         │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Buffers cross between the real-time, background and network domains by
//! ownership transfer only. Consumed buffers come back through recycle queues
//! so the audio callbacks do not allocate in steady state.

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod network;
pub mod pipeline;
pub mod protocol;
pub mod relay;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Sample rate of both hardware ends
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

    /// Default channel count (stereo)
    pub const DEFAULT_CHANNELS: u16 = 2;

    /// Default constant bitrate per channel in bits per second
    pub const DEFAULT_BITRATE_PER_CHANNEL: u32 = 48_000;

    /// Default compressor frame duration in microseconds
    pub const DEFAULT_FRAME_DURATION_US: u32 = 60_000;

    /// Samples per channel in one accumulated frame (60 ms at 48 kHz)
    pub const DEFAULT_FRAME_CAPACITY: usize = 2880;

    /// Float to 16-bit scale factor
    pub const SAMPLE_SCALE: f32 = 32767.0;

    /// Queued blocks that must be exceeded before playback starts
    pub const DEFAULT_WATERMARK: usize = 8;

    /// Slots in the jitter ring
    pub const DEFAULT_JITTER_CAPACITY: usize = 64;

    /// Default relay port
    pub const DEFAULT_RELAY_PORT: u16 = 3000;

    /// Text sent by the playback side when its connection opens
    pub const DECODER_GREETING: &str = "hello from decoder";
}
