//! Recording limits, progress accounting and storage checks
//!
//! The `RecordingMonitor` is registered on the encoder pipeline as its
//! `BufferObserver`. It accounts every buffer against the limits captured at
//! Record time, applies backpressure once a limit trips and debounces I/O
//! failures reported by the muxer.

pub mod monitor;
pub mod storage;

pub use monitor::{RecordingMonitor, SIZE_LIMIT_SAFETY_MARGIN};
pub use storage::{volume_dir, FixedStorage, FsStorageInspector, StorageInspector};

use serde::{Deserialize, Serialize};

/// Counters for one recording attempt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingProgress {
    pub bytes_written: u64,
    pub elapsed_ms: u64,
    /// Buffers accepted for writing
    pub frames: u64,
    pub consecutive_io_errors: u32,
    pub size_limit_tripped: bool,
    pub time_limit_tripped: bool,
    pub storage_tripped: bool,
    /// I/O debounce exceeded; the recording is dead
    pub failed: bool,
}

impl RecordingProgress {
    /// True once any limit or fault stopped accepting buffers
    pub fn is_stopped(&self) -> bool {
        self.size_limit_tripped || self.time_limit_tripped || self.storage_tripped || self.failed
    }

    pub fn file_size_kb(&self) -> u64 {
        self.bytes_written / 1024
    }
}
