//! Application configuration
//!
//! Every section is a plain `serde` struct with defaults, so a partial TOML
//! file only overrides what it names. The file lives in the platform config
//! directory unless a path is given explicitly.

use std::fs;
use std::io;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::{ConfigError, Result};

/// Top-level configuration shared by the sender, receiver and relay
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub encoder: EncoderConfig,
    pub playback: PlaybackConfig,
    pub network: NetworkConfig,
    pub relay: RelayConfig,
}

/// Hardware-facing audio settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Samples per channel in one accumulated frame
    pub frame_capacity: usize,
    /// Device id (`input:<name>`), default input when unset
    pub input_device: Option<String>,
    /// Device id (`output:<name>`), default output when unset
    pub output_device: Option<String>,
    /// Fixed hardware block size, device default when unset
    pub buffer_size: Option<u32>,
    /// Sealed frames that may wait for the compress task
    pub frame_queue: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            frame_capacity: DEFAULT_FRAME_CAPACITY,
            input_device: None,
            output_device: None,
            buffer_size: None,
            frame_queue: 32,
        }
    }
}

/// Codec variant used on both ends of a stream
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    #[default]
    Opus,
    /// Uncompressed 16-bit planar PCM
    Pcm16,
}

/// Compressor settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EncoderConfig {
    pub codec: CodecKind,
    pub bitrate_per_channel: u32,
    pub frame_duration_us: u32,
    /// Fall back to PCM when the preferred codec cannot initialise
    pub allow_fallback: bool,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            codec: CodecKind::Opus,
            bitrate_per_channel: DEFAULT_BITRATE_PER_CHANNEL,
            frame_duration_us: DEFAULT_FRAME_DURATION_US,
            allow_fallback: false,
        }
    }
}

impl EncoderConfig {
    /// Per-channel bitrates Opus can encode at, in bits per second
    pub const BITRATE_RANGE: RangeInclusive<u32> = 6_000..=256_000;

    /// Total constant bitrate for `channels`
    pub fn bitrate(&self, channels: u16) -> std::result::Result<u32, ConfigError> {
        if !Self::BITRATE_RANGE.contains(&self.bitrate_per_channel) {
            return Err(ConfigError::InvalidValue {
                field: "encoder.bitrate_per_channel",
                reason: format!(
                    "{} bps (expected {}..={})",
                    self.bitrate_per_channel,
                    Self::BITRATE_RANGE.start(),
                    Self::BITRATE_RANGE.end()
                ),
            });
        }
        self.bitrate_per_channel
            .checked_mul(channels as u32)
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "encoder.bitrate_per_channel",
                reason: format!("{} bps over {} channels overflows", self.bitrate_per_channel, channels),
            })
    }

    /// Validated frame duration for `channels`
    pub fn frame_duration(&self, channels: u16) -> std::result::Result<FrameDuration, ConfigError> {
        FrameDuration::new(self.frame_duration_us, channels)
    }

    /// Compressed payload size of one chunk at constant bitrate
    pub fn payload_bytes(&self, channels: u16) -> std::result::Result<usize, ConfigError> {
        let bits = self.bitrate(channels)? as u64 * self.frame_duration_us as u64 / 1_000_000;
        Ok((bits / 8) as usize)
    }

    /// Payload plus wire header
    pub fn chunk_size(&self, channels: u16) -> std::result::Result<usize, ConfigError> {
        Ok(self.payload_bytes(channels)? + crate::protocol::wire::HEADER_SIZE)
    }
}

/// A compressor frame duration in microseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameDuration(u32);

impl FrameDuration {
    /// Durations usable with any channel count
    pub const SUPPORTED: [u32; 6] = [2_500, 5_000, 10_000, 20_000, 40_000, 60_000];

    /// Only valid for mono streams
    pub const MONO_ONLY: u32 = 120_000;

    pub fn new(micros: u32, channels: u16) -> std::result::Result<Self, ConfigError> {
        if Self::SUPPORTED.contains(&micros) {
            return Ok(Self(micros));
        }
        if micros == Self::MONO_ONLY {
            return if channels == 1 {
                Ok(Self(micros))
            } else {
                Err(ConfigError::MonoOnlyFrameDuration(micros))
            };
        }
        Err(ConfigError::InvalidFrameDuration(micros))
    }

    pub fn as_micros(self) -> u32 {
        self.0
    }

    /// Samples per channel covered at `sample_rate`
    pub fn samples(self, sample_rate: u32) -> usize {
        (sample_rate as u64 * self.0 as u64 / 1_000_000) as usize
    }
}

/// Jitter buffer settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Playback starts once more than this many blocks are queued
    pub watermark: usize,
    /// Slots in the jitter ring
    pub queue_capacity: usize,
    /// Decoded blocks in flight between the decompress task and playback
    pub inbox_capacity: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            watermark: DEFAULT_WATERMARK,
            queue_capacity: DEFAULT_JITTER_CAPACITY,
            inbox_capacity: 64,
        }
    }
}

/// Transport settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// WebSocket url of the relay
    pub url: String,
    /// Text sent by the playback side whenever a connection opens
    pub greeting: Option<String>,
    /// Messages waiting for the socket writer before sends are dropped
    pub outbound_queue: usize,
    /// Messages waiting for the decompress task
    pub inbound_queue: usize,
    pub reconnect_initial_ms: u64,
    pub reconnect_max_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            url: format!("ws://127.0.0.1:{}", DEFAULT_RELAY_PORT),
            greeting: Some(DECODER_GREETING.to_string()),
            outbound_queue: 32,
            inbound_queue: 256,
            reconnect_initial_ms: 250,
            reconnect_max_ms: 5_000,
        }
    }
}

/// Relay server settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    pub bind_address: String,
    pub port: u16,
    /// Messages a slow client may lag behind before it skips ahead
    pub broadcast_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: DEFAULT_RELAY_PORT,
            broadcast_capacity: 256,
        }
    }
}

impl AppConfig {
    /// Platform config file location
    pub fn default_path() -> std::result::Result<PathBuf, ConfigError> {
        ProjectDirs::from("", "", "ws-audio-stream")
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Load from `path`, falling back to defaults when the file does not exist
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(text) => {
                let config = Self::from_toml_str(&text)?;
                tracing::info!("Loaded config from {}", path.display());
                Ok(config)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!("No config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Load from the platform config directory
    pub fn load_default() -> Result<Self> {
        let path = Self::default_path()?;
        Self::load(&path)
    }

    pub fn from_toml_str(text: &str) -> std::result::Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(self).map_err(ConfigError::from)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, text)?;
        Ok(())
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if !matches!(self.audio.channels, 1 | 2) {
            return Err(ConfigError::InvalidValue {
                field: "audio.channels",
                reason: format!("{} (expected 1 or 2)", self.audio.channels),
            });
        }
        if self.audio.frame_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "audio.frame_capacity",
                reason: "must be non-zero".to_string(),
            });
        }
        if self.playback.watermark >= self.playback.queue_capacity {
            return Err(ConfigError::InvalidValue {
                field: "playback.watermark",
                reason: format!(
                    "{} must be below queue_capacity {}",
                    self.playback.watermark, self.playback.queue_capacity
                ),
            });
        }
        self.encoder.bitrate(self.audio.channels)?;
        self.encoder.frame_duration(self.audio.channels)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_chunk_size() {
        let encoder = EncoderConfig::default();
        assert_eq!(encoder.bitrate(2).unwrap(), 96_000);
        assert_eq!(encoder.payload_bytes(2).unwrap(), 720);
        assert_eq!(encoder.chunk_size(2).unwrap(), 732);
    }

    #[test]
    fn test_bitrate_out_of_range_rejected() {
        let zero = EncoderConfig {
            bitrate_per_channel: 0,
            ..EncoderConfig::default()
        };
        assert!(matches!(
            zero.bitrate(2),
            Err(ConfigError::InvalidValue { field: "encoder.bitrate_per_channel", .. })
        ));

        let huge = EncoderConfig {
            bitrate_per_channel: 3_000_000_000,
            ..EncoderConfig::default()
        };
        assert!(huge.bitrate(2).is_err());
        assert!(huge.payload_bytes(2).is_err());

        let result = AppConfig::from_toml_str(
            r#"
            [encoder]
            bitrate_per_channel = 0
            "#,
        );
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { field: "encoder.bitrate_per_channel", .. })
        ));
    }

    #[test]
    fn test_frame_duration_validation() {
        assert!(FrameDuration::new(20_000, 2).is_ok());
        assert!(FrameDuration::new(120_000, 1).is_ok());
        assert!(matches!(
            FrameDuration::new(120_000, 2),
            Err(ConfigError::MonoOnlyFrameDuration(120_000))
        ));
        assert!(matches!(
            FrameDuration::new(15_000, 2),
            Err(ConfigError::InvalidFrameDuration(15_000))
        ));

        let sixty = FrameDuration::new(60_000, 2).unwrap();
        assert_eq!(sixty.samples(48_000), 2880);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AppConfig::from_toml_str(
            r#"
            [encoder]
            bitrate_per_channel = 24000
            codec = "pcm16"

            [playback]
            watermark = 4
            "#,
        )
        .unwrap();

        assert_eq!(config.encoder.bitrate_per_channel, 24_000);
        assert_eq!(config.encoder.codec, CodecKind::Pcm16);
        assert_eq!(config.encoder.frame_duration_us, 60_000);
        assert_eq!(config.playback.watermark, 4);
        assert_eq!(config.audio.sample_rate, 48_000);
    }

    #[test]
    fn test_invalid_watermark_rejected() {
        let result = AppConfig::from_toml_str(
            r#"
            [playback]
            watermark = 64
            queue_capacity = 64
            "#,
        );
        assert!(matches!(result, Err(ConfigError::InvalidValue { field: "playback.watermark", .. })));
    }

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir().join(format!("ws-audio-stream-{}", uuid::Uuid::new_v4()));
        let path = dir.join("config.toml");

        let mut config = AppConfig::default();
        config.network.url = "ws://10.0.0.2:3000".to_string();
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded, config);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_missing_file_is_default() {
        let path = std::env::temp_dir().join("ws-audio-stream-does-not-exist.toml");
        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config, AppConfig::default());
    }
}
