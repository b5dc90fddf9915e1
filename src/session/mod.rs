//! Capture session
//!
//! `Session` is the root handle of one capture/recording lifecycle. Every
//! state-changing entry point takes the session's command lock with a
//! non-blocking try; a second command arriving while one executes gets
//! `CommandBusy` immediately. `get_state` reads the committed state through the
//! state machine's own lock and never waits behind a command.
//!
//! Lock order is command lock, then state lock. The state lock is never held
//! across a pipeline or broker call.
//!
//! # Example
//! ```ignore
//! let session = Session::create(SessionConfig::default(), context)?;
//! session.set_message_callback(Some(callback));
//! session.realize()?;
//! session.start()?;
//! session.record()?;
//! session.commit()?;
//! ```

mod commands;
mod drive;

use crate::app_log;
use crate::config::{RecordingLimits, SessionConfig};
use crate::error::{CamError, CamResult, Fault, FaultLatch};
use crate::logger::LogLevel;
use crate::message::{MessageCallback, MessageDispatcher};
use crate::pipeline::{PipelineAdapter, PipelineEventSink, PipelineHandle};
use crate::recording::{FsStorageInspector, RecordingMonitor, RecordingProgress, StorageInspector};
use crate::resource::{ResourceArbiter, ResourceBroker, ResourceSignal};
use crate::state_machine::{Command, Mode, State, StateMachine};
use crate::status::DeviceStatus;
use crate::worker::Worker;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError, Weak};
use std::thread::ThreadId;
use uuid::Uuid;

/// Collaborators injected into a session
#[derive(Clone)]
pub struct SessionContext {
    pub pipeline: Arc<dyn PipelineAdapter>,
    pub broker: Arc<dyn ResourceBroker>,
    pub storage: Arc<dyn StorageInspector>,
    pub status: Arc<DeviceStatus>,
}

impl SessionContext {
    /// Context backed by the real filesystem and a private status board
    pub fn new(pipeline: Arc<dyn PipelineAdapter>, broker: Arc<dyn ResourceBroker>) -> Self {
        Self {
            pipeline,
            broker,
            storage: Arc::new(FsStorageInspector::new()),
            status: Arc::new(DeviceStatus::new()),
        }
    }

    pub fn with_storage(mut self, storage: Arc<dyn StorageInspector>) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_status(mut self, status: Arc<DeviceStatus>) -> Self {
        self.status = status;
        self
    }
}

/// Pipelines owned by the current realization
#[derive(Debug, Default, Clone, Copy)]
struct Pipelines {
    /// Mode captured at Realize
    mode: Option<Mode>,
    source: Option<PipelineHandle>,
    encoder: Option<PipelineHandle>,
}

pub(crate) struct SessionInner {
    id: Uuid,
    config: Mutex<SessionConfig>,
    command_lock: Mutex<()>,
    command_owner: Mutex<Option<ThreadId>>,
    machine: StateMachine,
    pipelines: Mutex<Pipelines>,
    context: SessionContext,
    dispatcher: Arc<MessageDispatcher>,
    faults: Arc<FaultLatch>,
    monitor: Arc<RecordingMonitor>,
    arbiter: ResourceArbiter,
    worker: Worker,
    /// Set while a preemption walk runs
    preempting: AtomicBool,
    /// State the session was forced down from, if any
    high_water: Mutex<Option<State>>,
    destroyed: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Held for the duration of one command
pub(crate) struct CommandGuard<'a> {
    owner: &'a Mutex<Option<ThreadId>>,
    _lock: MutexGuard<'a, ()>,
}

impl Drop for CommandGuard<'_> {
    fn drop(&mut self) {
        *lock(self.owner) = None;
    }
}

impl SessionInner {
    fn guard<'a>(&'a self, held: MutexGuard<'a, ()>) -> CommandGuard<'a> {
        *lock(&self.command_owner) = Some(std::thread::current().id());
        CommandGuard {
            owner: &self.command_owner,
            _lock: held,
        }
    }

    /// Non-blocking acquire used by every caller-facing command
    pub(crate) fn try_command(&self) -> CamResult<CommandGuard<'_>> {
        if self.is_destroyed() {
            return Err(CamError::Destroyed);
        }
        let held = match self.command_lock.try_lock() {
            Ok(held) => held,
            Err(TryLockError::WouldBlock) => return Err(CamError::CommandBusy),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };
        let guard = self.guard(held);
        if self.is_destroyed() {
            return Err(CamError::Destroyed);
        }
        Ok(guard)
    }

    /// Blocking acquire, reserved for the preemption and resume paths
    pub(crate) fn wait_command(&self) -> CommandGuard<'_> {
        let held = lock(&self.command_lock);
        self.guard(held)
    }

    /// True when the current thread is executing a command on this session
    pub(crate) fn holds_command(&self) -> bool {
        *lock(&self.command_owner) == Some(std::thread::current().id())
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    fn config(&self) -> SessionConfig {
        lock(&self.config).clone()
    }

    fn pipelines(&self) -> Pipelines {
        *lock(&self.pipelines)
    }

    /// Mode in effect: captured at Realize, configured otherwise
    fn active_mode(&self) -> Mode {
        self.pipelines().mode.unwrap_or_else(|| lock(&self.config).mode)
    }

    /// Caller-facing command: try-lock, execute, forget any high-water mark.
    fn command(&self, command: Command) -> CamResult<State> {
        let _guard = self.try_command()?;
        let state = self.execute(command, commands::Origin::Caller)?;
        *lock(&self.high_water) = None;
        Ok(state)
    }

    /// Tear down after the command lock is held: no more messages, no more
    /// broker signals, everything released.
    fn shutdown_locked(&self) {
        self.dispatcher.shutdown();
        self.arbiter.unregister();

        if let Err(e) = self.drive(drive::Direction::Down) {
            app_log!(
                LogLevel::Warn,
                "session",
                "Orderly shutdown failed, forcing teardown (session: {}): {}",
                self.id,
                e
            );
        }
        self.force_teardown();
        self.machine.force(State::None);
        self.context.status.publish(State::None);
    }

    fn destroy(&self, wait: bool) -> CamResult<()> {
        if self.is_destroyed() {
            return Ok(());
        }
        let guard = if wait {
            self.wait_command()
        } else {
            self.try_command()?
        };
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        app_log!(LogLevel::Info, "session", "Destroying session {}", self.id);
        self.shutdown_locked();
        drop(guard);

        self.worker.shutdown();
        Ok(())
    }
}

/// Handle to one capture session
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Create a session in `Null` state.
    pub fn create(config: SessionConfig, context: SessionContext) -> CamResult<Self> {
        config.validate()?;

        let id = Uuid::new_v4();
        let dispatcher = Arc::new(MessageDispatcher::new(id));
        let faults = Arc::new(FaultLatch::new());
        let monitor = Arc::new(RecordingMonitor::new(
            Arc::clone(&dispatcher),
            Arc::clone(&context.storage),
            Arc::clone(&faults),
        ));
        let arbiter = ResourceArbiter::new(id, Arc::clone(&context.broker));

        let inner = Arc::new(SessionInner {
            id,
            config: Mutex::new(config),
            command_lock: Mutex::new(()),
            command_owner: Mutex::new(None),
            machine: StateMachine::new(State::Null),
            pipelines: Mutex::new(Pipelines::default()),
            context,
            dispatcher,
            faults,
            monitor,
            arbiter,
            worker: Worker::spawn("camctl-worker"),
            preempting: AtomicBool::new(false),
            high_water: Mutex::new(None),
            destroyed: AtomicBool::new(false),
        });

        let weak: Weak<SessionInner> = Arc::downgrade(&inner);
        inner
            .arbiter
            .register_preemption(Arc::new(move |signal: ResourceSignal| {
                SessionInner::on_resource_signal(&weak, signal);
            }));
        inner.context.status.publish(State::Null);

        app_log!(LogLevel::Info, "session", "Session {} created", id);
        Ok(Self { inner })
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Destroy the session. Fails with `CommandBusy` while a command runs.
    ///
    /// Pending messages are discarded, the pipelines are torn down and the
    /// lease is released. Later commands return `Destroyed`.
    pub fn destroy(&self) -> CamResult<()> {
        self.inner.destroy(false)
    }

    /// Committed state; `None` once destroyed.
    pub fn get_state(&self) -> State {
        if self.inner.is_destroyed() {
            return State::None;
        }
        self.inner.machine.current()
    }

    /// Target of an in-flight command, or the committed state
    pub fn target_state(&self) -> State {
        if self.inner.is_destroyed() {
            return State::None;
        }
        self.inner.machine.target()
    }

    pub fn set_message_callback(&self, callback: Option<MessageCallback>) {
        self.inner.dispatcher.set_callback(callback);
    }

    /// Sink for asynchronous pipeline events (focus, captures, device faults)
    pub fn event_sink(&self) -> PipelineEventSink {
        PipelineEventSink::new(
            self.inner.id,
            Arc::clone(&self.inner.dispatcher),
            Arc::clone(&self.inner.faults),
        )
    }

    pub fn config(&self) -> SessionConfig {
        self.inner.config()
    }

    /// Change the mode used by the next Realize. Only allowed in `Null`.
    pub fn set_mode(&self, mode: Mode) -> CamResult<()> {
        let _guard = self.inner.try_command()?;
        let state = self.inner.machine.current();
        if state != State::Null {
            return Err(CamError::invalid_state("set_mode", state));
        }
        lock(&self.inner.config).mode = mode;
        Ok(())
    }

    /// Change the limits used by the next Record.
    pub fn set_recording_limits(&self, limits: RecordingLimits) -> CamResult<()> {
        let _guard = self.inner.try_command()?;
        let state = self.inner.machine.current();
        if state.is_recording() {
            return Err(CamError::invalid_state("set_recording_limits", state));
        }
        lock(&self.inner.config).recording.limits = limits;
        Ok(())
    }

    pub fn set_target_path(&self, path: impl Into<PathBuf>) -> CamResult<()> {
        let _guard = self.inner.try_command()?;
        let state = self.inner.machine.current();
        if state.is_recording() {
            return Err(CamError::invalid_state("set_target_path", state));
        }
        lock(&self.inner.config).recording.target_path = path.into();
        Ok(())
    }

    /// Counters of the recording in progress
    pub fn recording_progress(&self) -> Option<RecordingProgress> {
        self.inner.monitor.progress()
    }

    /// Asynchronous fault latched by the recording in progress
    pub fn last_fault(&self) -> Option<Fault> {
        self.inner.faults.current()
    }

    pub fn holds_lease(&self) -> bool {
        self.inner.arbiter.holds_lease()
    }

    pub fn realize(&self) -> CamResult<State> {
        self.inner.command(Command::Realize)
    }

    pub fn unrealize(&self) -> CamResult<State> {
        self.inner.command(Command::Unrealize)
    }

    pub fn start(&self) -> CamResult<State> {
        self.inner.command(Command::Start)
    }

    pub fn stop(&self) -> CamResult<State> {
        self.inner.command(Command::Stop)
    }

    /// Capture an image. From `Recording` in video mode this is a snapshot
    /// that leaves the session recording.
    pub fn capture_start(&self) -> CamResult<State> {
        self.inner.command(Command::CaptureStart)
    }

    pub fn capture_stop(&self) -> CamResult<State> {
        self.inner.command(Command::CaptureStop)
    }

    pub fn record(&self) -> CamResult<State> {
        self.inner.command(Command::Record)
    }

    pub fn pause(&self) -> CamResult<State> {
        self.inner.command(Command::Pause)
    }

    pub fn commit(&self) -> CamResult<State> {
        self.inner.command(Command::Commit)
    }

    pub fn cancel(&self) -> CamResult<State> {
        self.inner.command(Command::Cancel)
    }

    /// Run `command` by value, for table-driven callers
    pub fn execute(&self, command: Command) -> CamResult<State> {
        self.inner.command(command)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.inner.destroy(true) {
            app_log!(
                LogLevel::Error,
                "session",
                "Failed to destroy session {} on drop: {}",
                self.inner.id,
                e
            );
        }
    }
}
