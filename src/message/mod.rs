//! Notifications delivered to the session's registered callback
//!
//! The payload shapes here are the wire contract a test harness or a
//! remote-control layer serializes.

pub mod dispatcher;

pub use dispatcher::{MessageCallback, MessageDispatcher};

use crate::error::ErrorKind;
use crate::state_machine::State;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Message names - centralized for consistency
pub mod message_names {
    pub const STATE_CHANGED: &str = "stateChanged";
    pub const ERROR: &str = "error";
    pub const RECORDING_STATUS: &str = "recordingStatus";
    pub const MAX_SIZE_REACHED: &str = "maxSizeReached";
    pub const NO_FREE_SPACE: &str = "noFreeSpace";
    pub const TIME_LIMIT_REACHED: &str = "timeLimitReached";
    pub const CAPTURED: &str = "captured";
    pub const FOCUS_CHANGED: &str = "focusChanged";
    pub const RESOURCE_READY: &str = "resourceReady";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Message {
    StateChanged {
        previous: State,
        current: State,
        caused_by_system: bool,
    },
    Error {
        kind: ErrorKind,
    },
    RecordingStatus {
        elapsed_ms: u64,
        #[serde(rename = "fileSizeKB")]
        file_size_kb: u64,
        /// Estimated time left before the binding limit, if any limit is set
        remaining_ms: Option<u64>,
    },
    MaxSizeReached,
    NoFreeSpace,
    TimeLimitReached,
    Captured {
        filename: String,
    },
    FocusChanged {
        code: i32,
    },
    /// Resources became available again and no automatic resume applied
    ResourceReady,
}

impl Message {
    pub fn name(&self) -> &'static str {
        match self {
            Message::StateChanged { .. } => message_names::STATE_CHANGED,
            Message::Error { .. } => message_names::ERROR,
            Message::RecordingStatus { .. } => message_names::RECORDING_STATUS,
            Message::MaxSizeReached => message_names::MAX_SIZE_REACHED,
            Message::NoFreeSpace => message_names::NO_FREE_SPACE,
            Message::TimeLimitReached => message_names::TIME_LIMIT_REACHED,
            Message::Captured { .. } => message_names::CAPTURED,
            Message::FocusChanged { .. } => message_names::FOCUS_CHANGED,
            Message::ResourceReady => message_names::RESOURCE_READY,
        }
    }

    pub fn state_changed(previous: State, current: State, caused_by_system: bool) -> Self {
        Message::StateChanged {
            previous,
            current,
            caused_by_system,
        }
    }
}

/// A message as handed to the callback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnvelope {
    pub session_id: Uuid,
    /// Delivery order, starting at 1
    pub sequence: u64,
    pub posted_at: DateTime<Utc>,
    pub message: Message,
}
