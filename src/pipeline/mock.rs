use super::{BufferAction, BufferObserver, IoFault, PipelineAdapter, PipelineHandle, PipelineRole};
use crate::error::{CamError, CamResult};
use crate::state_machine::{Mode, State};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Call recorded by the mock pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockCall {
    Create(PipelineRole, Mode),
    SetState(PipelineHandle, State),
    Destroy(PipelineHandle),
    AttachObserver(PipelineHandle),
    Prewarm(PipelineHandle),
}

struct LivePipeline {
    role: PipelineRole,
    state: State,
}

#[derive(Default)]
struct MockInner {
    next_handle: u64,
    live: HashMap<PipelineHandle, LivePipeline>,
    observers: HashMap<PipelineHandle, Arc<dyn BufferObserver>>,
    fail_on: HashSet<State>,
    fail_once: HashSet<State>,
    fail_create: HashSet<PipelineRole>,
    block_on: Option<State>,
    calls: Vec<MockCall>,
}

#[derive(Default)]
struct Gate {
    waiting: bool,
    released: bool,
}

/// Scriptable in-memory pipeline adapter for development and testing
///
/// Transitions succeed instantly unless scripted otherwise:
/// - `fail_transition(state)` makes every `set_state` to `state` fail with `DeviceIo`
/// - `fail_transition_once(state)` fails only the next `set_state` to `state`
/// - `fail_create(role)` makes `create` fail for that role
/// - `block_transition(state)` parks the next `set_state` to `state` until
///   `release()` or its timeout, in which case it returns `Timeout`
pub struct MockPipeline {
    inner: Mutex<MockInner>,
    gate: Mutex<Gate>,
    gate_signal: Condvar,
    trailer_size: AtomicU64,
}

impl MockPipeline {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MockInner::default()),
            gate: Mutex::new(Gate::default()),
            gate_signal: Condvar::new(),
            trailer_size: AtomicU64::new(0),
        }
    }

    fn inner(&self) -> MutexGuard<'_, MockInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn gate(&self) -> MutexGuard<'_, Gate> {
        match self.gate.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn fail_transition(&self, target: State) {
        self.inner().fail_on.insert(target);
    }

    pub fn fail_transition_once(&self, target: State) {
        self.inner().fail_once.insert(target);
    }

    pub fn fail_create(&self, role: PipelineRole) {
        self.inner().fail_create.insert(role);
    }

    pub fn clear_failures(&self) {
        let mut inner = self.inner();
        inner.fail_on.clear();
        inner.fail_once.clear();
        inner.fail_create.clear();
    }

    pub fn block_transition(&self, target: State) {
        self.inner().block_on = Some(target);
        *self.gate() = Gate::default();
    }

    /// Wait until a `set_state` call is parked on the gate
    pub fn wait_until_blocked(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut gate = self.gate();
        while !gate.waiting {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            gate = match self.gate_signal.wait_timeout(gate, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }

    /// Let a parked transition continue
    pub fn release(&self) {
        self.inner().block_on = None;
        self.gate().released = true;
        self.gate_signal.notify_all();
    }

    pub fn set_trailer_size(&self, bytes: u64) {
        self.trailer_size.store(bytes, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.inner().calls.clone()
    }

    pub fn create_calls(&self, role: PipelineRole) -> usize {
        self.inner()
            .calls
            .iter()
            .filter(|call| matches!(call, MockCall::Create(r, _) if *r == role))
            .count()
    }

    pub fn prewarm_calls(&self) -> usize {
        self.inner()
            .calls
            .iter()
            .filter(|call| matches!(call, MockCall::Prewarm(_)))
            .count()
    }

    /// Number of pipelines created and not yet destroyed
    pub fn live_pipelines(&self) -> usize {
        self.inner().live.len()
    }

    pub fn live_handle(&self, role: PipelineRole) -> Option<PipelineHandle> {
        self.inner()
            .live
            .iter()
            .find(|(_, pipeline)| pipeline.role == role)
            .map(|(handle, _)| *handle)
    }

    pub fn pipeline_state(&self, handle: PipelineHandle) -> Option<State> {
        self.inner().live.get(&handle).map(|pipeline| pipeline.state)
    }

    fn encoder_observer(&self) -> Option<Arc<dyn BufferObserver>> {
        let inner = self.inner();
        let handle = inner
            .live
            .iter()
            .find(|(_, pipeline)| pipeline.role == PipelineRole::Encoder)
            .map(|(handle, _)| *handle)?;
        inner.observers.get(&handle).cloned()
    }

    /// Feed one buffer through the live encoder's observer.
    ///
    /// Returns `None` when no encoder with an observer exists.
    pub fn push_buffer(&self, bytes: u64, timestamp_ms: u64) -> Option<BufferAction> {
        let observer = self.encoder_observer()?;
        Some(observer.on_buffer(bytes, timestamp_ms))
    }

    pub fn push_io_error(&self, fault: IoFault) -> bool {
        match self.encoder_observer() {
            Some(observer) => {
                observer.on_io_error(fault);
                true
            }
            None => false,
        }
    }

    fn wait_at_gate(&self, target: State, timeout: Duration) -> CamResult<()> {
        let deadline = Instant::now() + timeout;
        let mut gate = self.gate();
        gate.waiting = true;
        self.gate_signal.notify_all();

        while !gate.released {
            let now = Instant::now();
            if now >= deadline {
                gate.waiting = false;
                return Err(CamError::Timeout {
                    target,
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            gate = match self.gate_signal.wait_timeout(gate, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }

        gate.waiting = false;
        gate.released = false;
        Ok(())
    }
}

impl Default for MockPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineAdapter for MockPipeline {
    fn create(&self, role: PipelineRole, mode: Mode) -> CamResult<PipelineHandle> {
        let mut inner = self.inner();
        inner.calls.push(MockCall::Create(role, mode));
        if inner.fail_create.contains(&role) {
            return Err(CamError::DeviceIo(format!("cannot create {:?} pipeline", role)));
        }

        inner.next_handle += 1;
        let handle = PipelineHandle(inner.next_handle);
        inner.live.insert(
            handle,
            LivePipeline {
                role,
                state: State::Null,
            },
        );
        Ok(handle)
    }

    fn set_state(&self, handle: PipelineHandle, target: State, timeout: Duration) -> CamResult<()> {
        let blocked = {
            let mut inner = self.inner();
            inner.calls.push(MockCall::SetState(handle, target));
            if !inner.live.contains_key(&handle) {
                return Err(CamError::Internal(format!("unknown {}", handle)));
            }
            if inner.fail_on.contains(&target) || inner.fail_once.remove(&target) {
                return Err(CamError::DeviceIo(format!(
                    "{} refused {:?}",
                    handle, target
                )));
            }
            inner.block_on == Some(target)
        };

        if blocked {
            self.wait_at_gate(target, timeout)?;
        }

        if let Some(pipeline) = self.inner().live.get_mut(&handle) {
            pipeline.state = target;
        }
        Ok(())
    }

    fn destroy(&self, handle: PipelineHandle) {
        let mut inner = self.inner();
        inner.calls.push(MockCall::Destroy(handle));
        inner.live.remove(&handle);
        inner.observers.remove(&handle);
    }

    fn estimated_trailer_size(&self, _handle: PipelineHandle) -> u64 {
        self.trailer_size.load(Ordering::SeqCst)
    }

    fn attach_observer(
        &self,
        handle: PipelineHandle,
        observer: Arc<dyn BufferObserver>,
    ) -> CamResult<()> {
        let mut inner = self.inner();
        inner.calls.push(MockCall::AttachObserver(handle));
        if !inner.live.contains_key(&handle) {
            return Err(CamError::Internal(format!("unknown {}", handle)));
        }
        inner.observers.insert(handle, observer);
        Ok(())
    }

    fn prewarm(&self, source: PipelineHandle) {
        self.inner().calls.push(MockCall::Prewarm(source));
    }
}
