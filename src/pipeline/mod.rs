//! Background tasks joining the audio callbacks to the transport

pub mod compress;
pub mod decompress;

use serde::Serialize;
use tokio::sync::watch;

pub use compress::{CompressSession, CompressStats, CompressTask};
pub use decompress::{DecompressStats, DecompressTask};

/// Lifecycle of a pipeline task, observable through a watch channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum TaskStatus {
    Idle,
    Running,
    /// The codec failed; the session is over
    Faulted(String),
    Stopped,
}

impl TaskStatus {
    pub fn is_faulted(&self) -> bool {
        matches!(self, TaskStatus::Faulted(_))
    }
}

pub(crate) fn status_channel() -> watch::Sender<TaskStatus> {
    watch::channel(TaskStatus::Idle).0
}

/// Record a fault unless one is already recorded
pub(crate) fn fault(status: &watch::Sender<TaskStatus>, reason: String) {
    status.send_if_modified(|current| {
        if current.is_faulted() {
            false
        } else {
            *current = TaskStatus::Faulted(reason);
            true
        }
    });
}

/// Mark the task stopped, keeping a recorded fault visible
pub(crate) fn stopped(status: &watch::Sender<TaskStatus>) {
    status.send_if_modified(|current| {
        if current.is_faulted() || *current == TaskStatus::Stopped {
            false
        } else {
            *current = TaskStatus::Stopped;
            true
        }
    });
}
