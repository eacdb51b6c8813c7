//! Audio subsystem module

pub mod accumulator;
pub mod buffer;
pub mod capture;
pub mod device;
pub mod frame;
pub mod jitter;
pub mod playback;

pub use accumulator::FrameAccumulator;
pub use buffer::{BufferPool, RingBuffer};
pub use capture::{AudioCapture, CaptureProcessor, FrameReceiver};
pub use device::{list_devices, resolve_device, AudioDevice, DeviceInfo, Direction};
pub use frame::{AccumulatedFrame, DecodedBlock, SampleBlock};
pub use jitter::{JitterBuffer, PlaybackState};
pub use playback::{AudioPlayback, PlaybackProcessor, PlaybackQueue, PlaybackSnapshot};
