/// Session state machine
///
/// Holds the canonical `State` and the `TargetState` the controller is moving
/// toward. The pair is guarded by a fine-grained lock that is never held across
/// a call into the pipeline or the resource broker, so `current()` never waits
/// behind a slow hardware transition.
///
/// # Async window
///
/// `state == target` except strictly between `begin()` and `commit()` /
/// `rollback()`. Only one window may be open at a time.
pub mod states;
pub mod transitions;

pub use states::*;
pub use transitions::*;

use crate::error::{CamError, CamResult};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StatePair {
    state: State,
    target: State,
}

/// State/TargetState cell
#[derive(Debug)]
pub struct StateMachine {
    pair: Mutex<StatePair>,
}

impl StateMachine {
    pub fn new(initial: State) -> Self {
        Self {
            pair: Mutex::new(StatePair {
                state: initial,
                target: initial,
            }),
        }
    }

    /// Current committed state
    pub fn current(&self) -> State {
        match self.pair.lock() {
            Ok(pair) => pair.state,
            Err(poisoned) => poisoned.into_inner().state,
        }
    }

    /// Target of the open async window, or the current state if none is open
    pub fn target(&self) -> State {
        match self.pair.lock() {
            Ok(pair) => pair.target,
            Err(poisoned) => poisoned.into_inner().target,
        }
    }

    pub fn in_transition(&self) -> bool {
        let pair = self.snapshot();
        pair.0 != pair.1
    }

    /// `(state, target)` read under one lock
    pub fn snapshot(&self) -> (State, State) {
        let pair = match self.pair.lock() {
            Ok(pair) => *pair,
            Err(poisoned) => *poisoned.into_inner(),
        };
        (pair.state, pair.target)
    }

    /// Open the async window toward `target`.
    ///
    /// `expected` must still be the committed state, otherwise the caller's
    /// precondition check is stale.
    pub fn begin(&self, expected: State, target: State) -> CamResult<()> {
        let mut pair = self.pair.lock()?;
        if pair.state != pair.target {
            return Err(CamError::CommandBusy);
        }
        if pair.state != expected {
            return Err(CamError::invalid_state(
                format!("transition to {:?}", target),
                pair.state,
            ));
        }
        pair.target = target;
        Ok(())
    }

    /// Close the window, committing `state`. Returns the previous state.
    pub fn commit(&self, state: State) -> CamResult<State> {
        let mut pair = self.pair.lock()?;
        let previous = pair.state;
        pair.state = state;
        pair.target = state;
        Ok(previous)
    }

    /// Close the window without changing the committed state.
    pub fn rollback(&self) {
        let mut pair = match self.pair.lock() {
            Ok(pair) => pair,
            Err(poisoned) => poisoned.into_inner(),
        };
        pair.target = pair.state;
    }

    /// Unconditionally set both halves. Used when a session is torn down.
    pub fn force(&self, state: State) {
        let mut pair = match self.pair.lock() {
            Ok(pair) => pair,
            Err(poisoned) => poisoned.into_inner(),
        };
        pair.state = state;
        pair.target = state;
    }
}
