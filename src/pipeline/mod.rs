//! Media pipeline contract
//!
//! The controller never builds sources, encoders or muxers itself. It drives an
//! external `PipelineAdapter` through state changes and observes buffer flow
//! through a `BufferObserver` the adapter calls for every produced buffer.
//!
//! Pipelines are referred to by `PipelineHandle`, an index into the adapter's
//! own table. The session never owns the adapter's pipeline objects, and the
//! recording monitor only keeps a weak reference to the adapter.
//!
//! # Example
//! ```ignore
//! let handle = adapter.create(PipelineRole::Source, Mode::Video)?;
//! adapter.set_state(handle, State::Ready, Duration::from_secs(5))?;
//! ```

pub mod events;
pub mod mock;

pub use events::PipelineEventSink;

use crate::error::CamResult;
use crate::state_machine::{Mode, State};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Opaque reference to a pipeline living inside the adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PipelineHandle(pub u64);

impl fmt::Display for PipelineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pipeline#{}", self.0)
    }
}

/// Which part of the media graph a pipeline implements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PipelineRole {
    /// Capture source and preview, created at Realize
    Source,
    /// Encoder and muxer, created at Record
    Encoder,
}

/// What the adapter must do with a produced buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BufferAction {
    /// Write the buffer
    Pass,
    /// Discard the buffer; a limit or fault already stopped the recording
    Drop,
    /// Discard; this buffer crossed the size limit
    TripSize,
    /// Discard; this buffer crossed the time limit
    TripTime,
    /// Discard; the target volume ran out of free space
    TripStorage,
}

impl BufferAction {
    pub fn is_pass(self) -> bool {
        self == BufferAction::Pass
    }
}

/// I/O failure reported by the muxer or file sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IoFault {
    Write,
    Seek,
    Read,
}

/// Per-buffer hook registered on an encoder pipeline
pub trait BufferObserver: Send + Sync {
    /// Called for every buffer before it is written
    fn on_buffer(&self, bytes: u64, timestamp_ms: u64) -> BufferAction;

    /// Called for every write/seek/read failure
    fn on_io_error(&self, fault: IoFault);
}

/// External media pipeline
///
/// `set_state` may block waiting for hardware acknowledgement but must give up
/// after `timeout` and return `CamError::Timeout`.
pub trait PipelineAdapter: Send + Sync {
    fn create(&self, role: PipelineRole, mode: Mode) -> CamResult<PipelineHandle>;

    fn set_state(&self, handle: PipelineHandle, target: State, timeout: Duration) -> CamResult<()>;

    fn destroy(&self, handle: PipelineHandle);

    /// Bytes the container still needs for its trailing index/metadata
    fn estimated_trailer_size(&self, handle: PipelineHandle) -> u64;

    fn attach_observer(
        &self,
        handle: PipelineHandle,
        observer: Arc<dyn BufferObserver>,
    ) -> CamResult<()>;

    /// Warm up encoder resources ahead of a recording. `source` is the
    /// source pipeline the encoder will attach to. Runs on the session's
    /// background task thread.
    fn prewarm(&self, _source: PipelineHandle) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_display() {
        assert_eq!(PipelineHandle(7).to_string(), "pipeline#7");
    }

    #[test]
    fn test_buffer_action_is_pass() {
        assert!(BufferAction::Pass.is_pass());
        assert!(!BufferAction::TripSize.is_pass());
        assert!(!BufferAction::Drop.is_pass());
    }
}
