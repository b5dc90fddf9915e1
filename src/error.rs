use crate::state_machine::{Command, Mode, State};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

/// Central error type for the capture session controller
#[derive(Error, Debug)]
pub enum CamError {
    // ============================================================================
    // Command Errors
    // ============================================================================
    #[error("{operation} is not allowed in {state:?} state")]
    InvalidState { operation: String, state: State },

    #[error("Another command is already in progress")]
    CommandBusy,

    #[error("{command:?} is not supported in {mode:?} mode")]
    NotSupported { command: Command, mode: Mode },

    #[error("Not enough recording progress: {frames} of {required} frames received")]
    InsufficientProgress { frames: u64, required: u64 },

    #[error("Session has been destroyed")]
    Destroyed,

    // ============================================================================
    // Device Errors
    // ============================================================================
    #[error("Resource request blocked: {0}")]
    ResourceBlocked(String),

    #[error("Pipeline did not reach {target:?} within {timeout_ms} ms")]
    Timeout { target: State, timeout_ms: u64 },

    #[error("Device I/O error: {0}")]
    DeviceIo(String),

    // ============================================================================
    // Storage Errors
    // ============================================================================
    #[error("Out of storage: {available} bytes available, {required} bytes required")]
    OutOfStorage { available: u64, required: u64 },

    #[error("Storage path not found: {0}")]
    StorageNotFound(PathBuf),

    #[error("File write error: {0}")]
    FileWrite(String),

    #[error("File read error: {0}")]
    FileRead(String),

    // ============================================================================
    // Generic/System Errors
    // ============================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Mutex lock error")]
    LockError,

    #[error("Internal error: {0}")]
    Internal(String),
}

// Implement conversion from PoisonError for Mutex locks
impl<T> From<std::sync::PoisonError<T>> for CamError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        CamError::LockError
    }
}

impl CamError {
    pub fn invalid_state(operation: impl Into<String>, state: State) -> Self {
        CamError::InvalidState {
            operation: operation.into(),
            state,
        }
    }

    /// Wire-level classification of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            CamError::InvalidState { .. } | CamError::NotSupported { .. } => {
                ErrorKind::InvalidState
            }
            CamError::InsufficientProgress { .. } => ErrorKind::InvalidState,
            CamError::Destroyed => ErrorKind::InvalidState,
            CamError::CommandBusy => ErrorKind::CommandBusy,
            CamError::ResourceBlocked(_) => ErrorKind::ResourceBlocked,
            CamError::Timeout { .. } => ErrorKind::Timeout,
            CamError::DeviceIo(_) => ErrorKind::DeviceIo,
            CamError::OutOfStorage { .. } | CamError::StorageNotFound(_) => {
                ErrorKind::OutOfStorage
            }
            CamError::FileWrite(_) => ErrorKind::FileWrite,
            CamError::FileRead(_) => ErrorKind::FileRead,
            CamError::Config(_)
            | CamError::Io(_)
            | CamError::Json(_)
            | CamError::LockError
            | CamError::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Error classes carried by `Message::Error`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    InvalidState,
    CommandBusy,
    ResourceBlocked,
    Timeout,
    #[serde(rename = "deviceIO")]
    DeviceIo,
    OutOfStorage,
    FileWrite,
    FileRead,
    Internal,
}

/// Asynchronous fault observed after a command already returned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub kind: ErrorKind,
    pub detail: String,
}

impl Fault {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    /// Convert into the error a synchronous call reports for this fault
    pub fn to_error(&self) -> CamError {
        let detail = self.detail.clone();
        match self.kind {
            ErrorKind::FileWrite => CamError::FileWrite(detail),
            ErrorKind::FileRead => CamError::FileRead(detail),
            ErrorKind::DeviceIo => CamError::DeviceIo(detail),
            ErrorKind::ResourceBlocked => CamError::ResourceBlocked(detail),
            ErrorKind::OutOfStorage => CamError::OutOfStorage {
                available: 0,
                required: 0,
            },
            _ => CamError::Internal(detail),
        }
    }
}

#[derive(Debug, Default)]
struct LatchSlot {
    open: bool,
    fault: Option<Fault>,
}

/// Holds the first fault of a recording until the recording ends.
///
/// Outside a recording nothing is latched and every fault is reported.
#[derive(Debug, Default)]
pub struct FaultLatch {
    slot: Mutex<LatchSlot>,
}

impl FaultLatch {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, LatchSlot> {
        match self.slot.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Start latching for a new recording, dropping any earlier fault.
    pub fn open(&self) {
        *self.slot() = LatchSlot {
            open: true,
            fault: None,
        };
    }

    /// Stop latching and forget the held fault.
    pub fn close(&self) {
        *self.slot() = LatchSlot::default();
    }

    /// Returns `true` when the fault should be reported to the caller.
    ///
    /// While open, only the first fault is kept and reported.
    pub fn record(&self, fault: Fault) -> bool {
        let mut slot = self.slot();
        if !slot.open {
            return true;
        }
        if slot.fault.is_some() {
            return false;
        }
        slot.fault = Some(fault);
        true
    }

    pub fn current(&self) -> Option<Fault> {
        self.slot().fault.clone()
    }
}

// Helper type alias for Results
pub type CamResult<T> = Result<T, CamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CamError::CommandBusy;
        assert_eq!(err.to_string(), "Another command is already in progress");

        let err = CamError::invalid_state("Start", State::Null);
        assert_eq!(err.to_string(), "Start is not allowed in Null state");
    }

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(
            CamError::OutOfStorage {
                available: 1,
                required: 2
            }
            .kind(),
            ErrorKind::OutOfStorage
        );
        assert_eq!(
            CamError::Timeout {
                target: State::Ready,
                timeout_ms: 10
            }
            .kind(),
            ErrorKind::Timeout
        );
        assert_eq!(CamError::LockError.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: CamError = io_err.into();
        assert!(matches!(err, CamError::Io(_)));
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_error_kind_wire_names() {
        let json = serde_json::to_string(&ErrorKind::DeviceIo).unwrap();
        assert_eq!(json, "\"deviceIO\"");
        let json = serde_json::to_string(&ErrorKind::OutOfStorage).unwrap();
        assert_eq!(json, "\"outOfStorage\"");
    }

    #[test]
    fn test_fault_latch_keeps_first_fault() {
        let latch = FaultLatch::new();
        latch.open();
        assert!(latch.record(Fault::new(ErrorKind::FileWrite, "disk full")));
        assert!(!latch.record(Fault::new(ErrorKind::DeviceIo, "sensor lost")));
        assert_eq!(latch.current().unwrap().kind, ErrorKind::FileWrite);

        latch.close();
        assert!(latch.current().is_none());
    }

    #[test]
    fn test_closed_latch_reports_every_fault() {
        let latch = FaultLatch::new();
        assert!(latch.record(Fault::new(ErrorKind::DeviceIo, "sensor lost")));
        assert!(latch.record(Fault::new(ErrorKind::DeviceIo, "sensor lost again")));
        assert!(latch.current().is_none());

        latch.open();
        latch.record(Fault::new(ErrorKind::FileWrite, "disk full"));
        latch.open();
        assert!(latch.current().is_none());
    }

    #[test]
    fn test_fault_to_error() {
        let fault = Fault::new(ErrorKind::FileWrite, "write failed 3 times");
        assert!(matches!(fault.to_error(), CamError::FileWrite(_)));
    }
}
