//! Wire chunk framing
//!
//! ```text
//!  0               4               8               12
//! +---------------+---------------+---------------+------------------+
//! | key flag (BE) | timestamp us  | duration us   | payload ...      |
//! | 0 key, 1 delta| (BE u32)      | (BE u32)      | (rest of message)|
//! +---------------+---------------+---------------+------------------+
//! ```
//!
//! There is no length field: the payload runs to the end of the transport
//! message, so this format only works over a message-oriented channel.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::NetworkError;

/// Size of the fixed header preceding every payload
pub const HEADER_SIZE: usize = 12;

const KEY_FLAG: u32 = 0;
const DELTA_FLAG: u32 = 1;

/// Whether a chunk can be decoded on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkType {
    Key,
    Delta,
}

/// One compressed chunk as carried over the network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireChunk {
    pub chunk_type: ChunkType,
    /// Presentation time since stream start, wraps after ~71 minutes
    pub timestamp_us: u32,
    pub duration_us: u32,
    pub payload: Bytes,
}

impl WireChunk {
    /// The capture side always declares its chunks as key chunks
    pub fn key(timestamp_us: u32, duration_us: u32, payload: Bytes) -> Self {
        Self {
            chunk_type: ChunkType::Key,
            timestamp_us,
            duration_us,
            payload,
        }
    }

    pub fn is_key(&self) -> bool {
        self.chunk_type == ChunkType::Key
    }

    /// Encoded size in bytes
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Append the encoded chunk to `buf`
    pub fn encode_into(&self, buf: &mut BytesMut) {
        let flag = match self.chunk_type {
            ChunkType::Key => KEY_FLAG,
            ChunkType::Delta => DELTA_FLAG,
        };
        buf.reserve(self.encoded_len());
        buf.put_u32(flag);
        buf.put_u32(self.timestamp_us);
        buf.put_u32(self.duration_us);
        buf.put_slice(&self.payload);
    }

    /// Parse one transport message. The payload shares `message`'s storage.
    pub fn decode(message: Bytes) -> Result<Self, NetworkError> {
        if message.len() < HEADER_SIZE {
            return Err(NetworkError::MalformedFrame { len: message.len() });
        }

        let mut header = &message[..HEADER_SIZE];
        let chunk_type = if header.get_u32() == KEY_FLAG {
            ChunkType::Key
        } else {
            ChunkType::Delta
        };
        let timestamp_us = header.get_u32();
        let duration_us = header.get_u32();

        Ok(Self {
            chunk_type,
            timestamp_us,
            duration_us,
            payload: message.slice(HEADER_SIZE..),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_header_layout() {
        let chunk = WireChunk::key(0x0102_0304, 60_000, Bytes::from_static(&[0xAA, 0xBB]));
        let encoded = chunk.encode();

        assert_eq!(encoded.len(), 14);
        assert_eq!(&encoded[0..4], &[0, 0, 0, 0]);
        assert_eq!(&encoded[4..8], &[1, 2, 3, 4]);
        assert_eq!(&encoded[8..12], &60_000u32.to_be_bytes());
        assert_eq!(&encoded[12..], &[0xAA, 0xBB]);
    }

    #[test]
    fn test_delta_flag() {
        let mut chunk = WireChunk::key(5, 10, Bytes::new());
        chunk.chunk_type = ChunkType::Delta;
        let encoded = chunk.encode();
        assert_eq!(&encoded[0..4], &[0, 0, 0, 1]);

        let decoded = WireChunk::decode(encoded).unwrap();
        assert!(!decoded.is_key());
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn test_short_messages_are_malformed() {
        for len in 0..HEADER_SIZE {
            let result = WireChunk::decode(Bytes::from(vec![0u8; len]));
            assert_eq!(result, Err(NetworkError::MalformedFrame { len }));
        }
    }

    #[test]
    fn test_default_stream_chunk_size() {
        // 96 kbps over 60 ms of constant bitrate audio
        let chunk = WireChunk::key(0, 60_000, Bytes::from(vec![0u8; 720]));
        assert_eq!(chunk.encode().len(), 732);
    }

    proptest! {
        #[test]
        fn prop_roundtrip(
            is_key in any::<bool>(),
            timestamp_us in any::<u32>(),
            duration_us in any::<u32>(),
            payload in proptest::collection::vec(any::<u8>(), 0..2048),
        ) {
            let chunk = WireChunk {
                chunk_type: if is_key { ChunkType::Key } else { ChunkType::Delta },
                timestamp_us,
                duration_us,
                payload: Bytes::from(payload),
            };
            let encoded = chunk.encode();
            prop_assert_eq!(encoded.len(), chunk.encoded_len());
            prop_assert_eq!(WireChunk::decode(encoded).unwrap(), chunk);
        }
    }
}
