//! Messages exchanged between the pipeline ends
//!
//! `wire` is the binary chunk format carried one-per-message over the
//! transport; `control` is the start/stop vocabulary used by the tasks.

pub mod control;
pub mod wire;

pub use control::{ControlMessage, StartRequest};
pub use wire::{ChunkType, WireChunk, HEADER_SIZE};
