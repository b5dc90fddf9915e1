//! Coarse device status shared with other components
//!
//! Injected per session instead of living in a process-wide flag, so several
//! sessions (and tests) never observe each other's state.

use crate::state_machine::State;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceState {
    Closed,
    Open,
    Preview,
    Capturing,
    Recording,
    RecordingPaused,
}

impl DeviceState {
    pub fn from_state(state: State) -> Self {
        match state {
            State::None | State::Null => DeviceState::Closed,
            State::Ready => DeviceState::Open,
            State::Prepare => DeviceState::Preview,
            State::Capturing => DeviceState::Capturing,
            State::Recording => DeviceState::Recording,
            State::Paused => DeviceState::RecordingPaused,
        }
    }

    fn to_raw(self) -> u8 {
        match self {
            DeviceState::Closed => 0,
            DeviceState::Open => 1,
            DeviceState::Preview => 2,
            DeviceState::Capturing => 3,
            DeviceState::Recording => 4,
            DeviceState::RecordingPaused => 5,
        }
    }

    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => DeviceState::Open,
            2 => DeviceState::Preview,
            3 => DeviceState::Capturing,
            4 => DeviceState::Recording,
            5 => DeviceState::RecordingPaused,
            _ => DeviceState::Closed,
        }
    }
}

#[derive(Debug)]
pub struct DeviceStatus {
    raw: AtomicU8,
}

impl DeviceStatus {
    pub fn new() -> Self {
        Self {
            raw: AtomicU8::new(DeviceState::Closed.to_raw()),
        }
    }

    pub fn publish(&self, state: State) {
        self.raw
            .store(DeviceState::from_state(state).to_raw(), Ordering::SeqCst);
    }

    pub fn current(&self) -> DeviceState {
        DeviceState::from_raw(self.raw.load(Ordering::SeqCst))
    }
}

impl Default for DeviceStatus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish() {
        let status = DeviceStatus::new();
        assert_eq!(status.current(), DeviceState::Closed);

        status.publish(State::Paused);
        assert_eq!(status.current(), DeviceState::RecordingPaused);

        status.publish(State::Null);
        assert_eq!(status.current(), DeviceState::Closed);
    }
}
