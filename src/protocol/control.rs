//! Start/stop control messages
//!
//! Serialized as JSON objects tagged by `type`, e.g.
//! `{"type":"start","bitratePerChannel":24000}` or `{"type":"stop"}`.

use serde::{Deserialize, Serialize};

use crate::config::{EncoderConfig, NetworkConfig};

/// Control message accepted by the compress and decompress tasks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlMessage {
    Start(StartRequest),
    Stop,
}

/// Optional overrides carried by a start message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StartRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bitrate_per_channel: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_duration_micros: Option<u32>,
    /// Relay url, configured url when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
}

impl StartRequest {
    /// Apply the overrides on top of the configured encoder settings
    pub fn encoder_config(&self, base: &EncoderConfig) -> EncoderConfig {
        EncoderConfig {
            bitrate_per_channel: self.bitrate_per_channel.unwrap_or(base.bitrate_per_channel),
            frame_duration_us: self.frame_duration_micros.unwrap_or(base.frame_duration_us),
            ..base.clone()
        }
    }

    pub fn destination(&self, base: &NetworkConfig) -> String {
        self.destination.clone().unwrap_or_else(|| base.url.clone())
    }
}

impl ControlMessage {
    /// Parse one JSON control line
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_start_with_overrides() {
        let msg = ControlMessage::parse(
            r#"{"type":"start","bitratePerChannel":24000,"frameDurationMicros":20000,"destination":"ws://host:3000"}"#,
        )
        .unwrap();

        let ControlMessage::Start(req) = msg else {
            panic!("expected start");
        };
        assert_eq!(req.bitrate_per_channel, Some(24_000));
        assert_eq!(req.frame_duration_micros, Some(20_000));

        let encoder = req.encoder_config(&EncoderConfig::default());
        assert_eq!(encoder.bitrate_per_channel, 24_000);
        assert_eq!(encoder.frame_duration_us, 20_000);
        assert_eq!(req.destination(&NetworkConfig::default()), "ws://host:3000");
    }

    #[test]
    fn test_parse_bare_messages() {
        assert_eq!(
            ControlMessage::parse(r#"{"type":"start"}"#).unwrap(),
            ControlMessage::Start(StartRequest::default())
        );
        assert_eq!(ControlMessage::parse(" {\"type\":\"stop\"}\n").unwrap(), ControlMessage::Stop);
        assert!(ControlMessage::parse(r#"{"type":"pause"}"#).is_err());
    }

    #[test]
    fn test_defaults_fill_missing_fields() {
        let req = StartRequest::default();
        let base = EncoderConfig::default();
        assert_eq!(req.encoder_config(&base), base);
        assert_eq!(req.destination(&NetworkConfig::default()), NetworkConfig::default().url);
    }

    #[test]
    fn test_serialize_stop() {
        assert_eq!(serde_json::to_string(&ControlMessage::Stop).unwrap(), r#"{"type":"stop"}"#);
    }
}
