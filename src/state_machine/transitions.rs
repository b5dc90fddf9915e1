/// Legal transition table
///
/// Each command has a fixed precondition set and one postcondition. Commands that
/// only make sense in one family of modes are rejected with `NotSupported` once
/// the precondition holds.
use super::states::{Mode, State};
use crate::error::{CamError, CamResult};
use serde::{Deserialize, Serialize};

/// State-changing operation requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Command {
    Realize,
    Unrealize,
    Start,
    Stop,
    CaptureStart,
    CaptureStop,
    Record,
    Pause,
    Commit,
    Cancel,
}

impl Command {
    pub const ALL: [Command; 10] = [
        Command::Realize,
        Command::Unrealize,
        Command::Start,
        Command::Stop,
        Command::CaptureStart,
        Command::CaptureStop,
        Command::Record,
        Command::Pause,
        Command::Commit,
        Command::Cancel,
    ];

    pub fn preconditions(self) -> &'static [State] {
        match self {
            Command::Realize => &[State::Null],
            Command::Unrealize => &[State::Ready],
            Command::Start => &[State::Ready],
            Command::Stop => &[State::Prepare],
            Command::CaptureStart => &[State::Prepare, State::Recording],
            Command::CaptureStop => &[State::Capturing],
            Command::Record => &[State::Prepare, State::Paused],
            Command::Pause => &[State::Recording],
            Command::Commit | Command::Cancel => &[State::Recording, State::Paused],
        }
    }

    pub fn postcondition(self) -> State {
        match self {
            Command::Realize => State::Ready,
            Command::Unrealize => State::Null,
            Command::Start => State::Prepare,
            Command::Stop => State::Ready,
            Command::CaptureStart => State::Capturing,
            Command::CaptureStop => State::Prepare,
            Command::Record => State::Recording,
            Command::Pause => State::Paused,
            Command::Commit | Command::Cancel => State::Prepare,
        }
    }
}

/// A validated transition, ready to be executed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub command: Command,
    pub from: State,
    /// State the pipeline is driven to while the async window is open
    pub target: State,
    /// State committed on success
    pub commit: State,
}

impl Transition {
    /// Snapshot capture during a recording returns to the recording state
    pub fn is_snapshot(&self) -> bool {
        self.command == Command::CaptureStart && self.from == State::Recording
    }
}

/// Validate `command` against the current state and realized mode.
pub fn plan(command: Command, current: State, mode: Mode) -> CamResult<Transition> {
    if !command.preconditions().contains(&current) {
        return Err(CamError::invalid_state(format!("{:?}", command), current));
    }

    let supported = match command {
        Command::Realize | Command::Unrealize | Command::Start | Command::Stop => true,
        Command::CaptureStart if current == State::Recording => {
            mode.supports_snapshot_while_recording()
        }
        Command::CaptureStart | Command::CaptureStop => mode.supports_capture(),
        Command::Record | Command::Pause | Command::Commit | Command::Cancel => {
            mode.supports_recording()
        }
    };
    if !supported {
        return Err(CamError::NotSupported { command, mode });
    }

    let target = command.postcondition();
    let commit = if command == Command::CaptureStart && current == State::Recording {
        State::Recording
    } else {
        target
    };

    Ok(Transition {
        command,
        from: current,
        target,
        commit,
    })
}
