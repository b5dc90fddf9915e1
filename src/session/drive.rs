//! Drive-to-state walk, preemption and resume
//!
//! Forced shutdown and automatic resume are one table walk parameterized by
//! direction. Each step runs through the ordinary command path with bounded
//! retries; a step that keeps failing ends the walk with its last error.

use super::commands::Origin;
use super::{lock, SessionInner};
use crate::app_log;
use crate::error::{CamError, CamResult};
use crate::logger::LogLevel;
use crate::message::Message;
use crate::resource::{PreemptionReason, ResourceSignal};
use crate::state_machine::{Command, State};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    /// Toward `Null`
    Down,
    /// Toward a previous high-water state
    Up(State),
}

/// Highest state an automatic resume returns to
const RESUME_CEILING: State = State::Prepare;

/// Commands that move one step from `current` in `direction`, in order of
/// preference. `None` when the walk is done.
fn next_step(current: State, direction: Direction) -> Option<&'static [Command]> {
    match direction {
        Direction::Down => match current {
            State::None | State::Null => None,
            State::Ready => Some(&[Command::Unrealize]),
            State::Prepare => Some(&[Command::Stop]),
            State::Capturing => Some(&[Command::CaptureStop]),
            State::Recording | State::Paused => Some(&[Command::Commit, Command::Cancel]),
        },
        Direction::Up(target) => {
            if current.rank() >= target.rank() {
                return None;
            }
            match current {
                State::Null => Some(&[Command::Realize]),
                State::Ready => Some(&[Command::Start]),
                _ => None,
            }
        }
    }
}

impl SessionInner {
    /// Walk the state table. The caller must hold the command lock.
    pub(crate) fn drive(&self, direction: Direction) -> CamResult<State> {
        let retry = lock(&self.config).force_retry;

        loop {
            let current = self.machine.current();
            let Some(candidates) = next_step(current, direction) else {
                return Ok(current);
            };

            let mut last_error = None;
            'attempts: for attempt in 1..=retry.max_attempts.max(1) {
                for &command in candidates {
                    match self.execute(command, Origin::System) {
                        Ok(_) => {
                            last_error = None;
                            break 'attempts;
                        }
                        Err(e) => {
                            app_log!(
                                LogLevel::Warn,
                                "session",
                                "{:?} from {:?} failed on attempt {} (session: {}): {}",
                                command,
                                current,
                                attempt,
                                self.id,
                                e
                            );
                            last_error = Some(e);
                        }
                    }
                }
                if attempt < retry.max_attempts {
                    std::thread::sleep(retry.interval());
                }
            }

            if let Some(e) = last_error {
                app_log!(
                    LogLevel::Error,
                    "session",
                    "Giving up {:?} walk at {:?} (session: {})",
                    direction,
                    current,
                    self.id
                );
                return Err(e);
            }
        }
    }

    /// Release everything regardless of pipeline cooperation and settle in
    /// `Null`. The caller must hold the command lock.
    pub(crate) fn force_teardown(&self) {
        let pipelines = std::mem::take(&mut *lock(&self.pipelines));
        self.monitor.disarm();
        for handle in [pipelines.encoder, pipelines.source].into_iter().flatten() {
            self.context.pipeline.destroy(handle);
        }
        self.arbiter.release();

        let previous = self.machine.current();
        if previous != State::Null && previous != State::None {
            self.machine.force(State::Null);
            self.context.status.publish(State::Null);
            self.dispatcher
                .post(Message::state_changed(previous, State::Null, true));
        }
    }

    pub(crate) fn on_resource_signal(weak: &Weak<SessionInner>, signal: ResourceSignal) {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        if inner.is_destroyed() {
            return;
        }

        // A signal raised from inside one of our own commands cannot take the
        // command lock on this thread; run it after the command returns.
        if inner.holds_command() {
            app_log!(
                LogLevel::Debug,
                "resource",
                "Deferring {:?} until the running command finishes (session: {})",
                signal,
                inner.id
            );
            let deferred = Arc::downgrade(&inner);
            let submitted = inner.worker.submit(move || {
                if let Some(inner) = deferred.upgrade() {
                    inner.handle_signal(signal);
                }
            });
            if !submitted {
                app_log!(
                    LogLevel::Warn,
                    "resource",
                    "Dropped {:?}, worker stopped (session: {})",
                    signal,
                    inner.id
                );
            }
            return;
        }

        inner.handle_signal(signal);
    }

    fn handle_signal(&self, signal: ResourceSignal) {
        match signal {
            ResourceSignal::Preempted(reason) => self.preempt(reason),
            ResourceSignal::Available => self.resources_available(),
        }
    }

    /// Force the session down to `Null`. Idempotent.
    pub(crate) fn preempt(&self, reason: PreemptionReason) {
        if self.preempting.swap(true, Ordering::SeqCst) {
            app_log!(
                LogLevel::Debug,
                "resource",
                "Preemption already in progress (session: {})",
                self.id
            );
            return;
        }

        {
            let _guard = self.wait_command();
            if !self.is_destroyed() {
                self.preempt_locked(reason);
            }
        }

        self.preempting.store(false, Ordering::SeqCst);
    }

    fn preempt_locked(&self, reason: PreemptionReason) {
        let from = self.machine.current();
        if from.rank() <= State::Null.rank() {
            app_log!(
                LogLevel::Debug,
                "resource",
                "Preempted ({:?}) while already in {:?} (session: {})",
                reason,
                from,
                self.id
            );
            self.arbiter.release();
            return;
        }

        app_log!(
            LogLevel::Warn,
            "resource",
            "Preempted ({:?}) in {:?}, shutting down (session: {})",
            reason,
            from,
            self.id
        );
        *lock(&self.high_water) = Some(from);

        if let Err(e) = self.drive(Direction::Down) {
            app_log!(
                LogLevel::Error,
                "resource",
                "Forced shutdown incomplete, tearing down (session: {}): {}",
                self.id,
                e
            );
            self.force_teardown();
        }
        self.arbiter.release();
    }

    fn resources_available(&self) {
        let _guard = self.wait_command();
        if self.is_destroyed() {
            return;
        }

        let high_water = lock(&self.high_water).take();
        let current = self.machine.current();
        let target = match high_water {
            Some(from) if current == State::Null => {
                if from.rank() > RESUME_CEILING.rank() {
                    RESUME_CEILING
                } else {
                    from
                }
            }
            _ => {
                self.dispatcher.post(Message::ResourceReady);
                return;
            }
        };

        app_log!(
            LogLevel::Info,
            "resource",
            "Resources available, resuming to {:?} (session: {})",
            target,
            self.id
        );
        match self.drive(Direction::Up(target)) {
            Ok(_) => {}
            Err(CamError::ResourceBlocked(detail)) => {
                app_log!(
                    LogLevel::Warn,
                    "resource",
                    "Resume blocked again (session: {}): {}",
                    self.id,
                    detail
                );
                *lock(&self.high_water) = Some(target);
            }
            Err(e) => {
                app_log!(
                    LogLevel::Error,
                    "resource",
                    "Resume failed (session: {}): {}",
                    self.id,
                    e
                );
                self.dispatcher.post(Message::Error { kind: e.kind() });
            }
        }
    }
}
