//! Capture session controller
//!
//! Manages the lifecycle of one audio/video capture session on a device whose
//! camera, display overlay and hardware encoder are shared with other
//! processes. The media pipeline and the resource broker are external
//! collaborators reached through `PipelineAdapter` and `ResourceBroker`.

pub mod config;
pub mod error;
pub mod logger;
pub mod message;
pub mod pipeline;
pub mod recording;
pub mod resource;
pub mod session;
pub mod state_machine;
pub mod status;
mod worker;

pub use config::{ProgressGate, RecordingConfig, RecordingLimits, RetryPolicy, SessionConfig};
pub use error::{CamError, CamResult, ErrorKind, Fault};
pub use message::{Message, MessageCallback, MessageEnvelope};
pub use pipeline::{
    BufferAction, BufferObserver, IoFault, PipelineAdapter, PipelineEventSink, PipelineHandle,
    PipelineRole,
};
pub use recording::{RecordingProgress, StorageInspector};
pub use resource::{
    Lease, LeaseSpec, PreemptionReason, ResourceBroker, ResourceCallback, ResourceCategory,
    ResourceSignal,
};
pub use session::{Session, SessionContext};
pub use state_machine::{Command, Mode, State};
pub use status::{DeviceState, DeviceStatus};
