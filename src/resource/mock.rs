use super::{
    Lease, LeaseSpec, PreemptionReason, ResourceBroker, ResourceCallback, ResourceCategory,
    ResourceSignal,
};
use crate::error::{CamError, CamResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Default)]
struct BrokerState {
    prepared: Option<LeaseSpec>,
    leases: HashMap<Uuid, Vec<ResourceCategory>>,
    callbacks: HashMap<Uuid, ResourceCallback>,
}

/// In-memory resource broker for development and testing
///
/// Signals are delivered on the thread that calls `preempt()` or
/// `signal_available()`.
#[derive(Default)]
pub struct MockBroker {
    state: Mutex<BrokerState>,
    deny: AtomicBool,
    prepares: AtomicUsize,
    acquires: AtomicUsize,
    releases: AtomicUsize,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Deny every following acquire, as if another session had priority
    pub fn set_deny(&self, deny: bool) {
        self.deny.store(deny, Ordering::SeqCst);
    }

    pub fn prepare_count(&self) -> usize {
        self.prepares.load(Ordering::SeqCst)
    }

    pub fn acquire_count(&self) -> usize {
        self.acquires.load(Ordering::SeqCst)
    }

    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn active_leases(&self) -> usize {
        self.state().leases.len()
    }

    pub fn registered_sessions(&self) -> usize {
        self.state().callbacks.len()
    }

    fn callbacks(&self) -> Vec<ResourceCallback> {
        self.state().callbacks.values().cloned().collect()
    }

    /// Revoke resources from every registered session
    pub fn preempt(&self, reason: PreemptionReason) {
        for callback in self.callbacks() {
            callback(ResourceSignal::Preempted(reason));
        }
    }

    pub fn signal_available(&self) {
        for callback in self.callbacks() {
            callback(ResourceSignal::Available);
        }
    }
}

impl ResourceBroker for MockBroker {
    fn prepare(&self, spec: &LeaseSpec) -> CamResult<()> {
        self.prepares.fetch_add(1, Ordering::SeqCst);
        self.state().prepared = Some(spec.clone());
        Ok(())
    }

    fn acquire(&self) -> CamResult<Lease> {
        self.acquires.fetch_add(1, Ordering::SeqCst);
        if self.deny.load(Ordering::SeqCst) {
            return Err(CamError::ResourceBlocked(
                "another session has priority".to_string(),
            ));
        }

        let mut state = self.state();
        let spec = state.prepared.take().ok_or_else(|| {
            CamError::ResourceBlocked("acquire without prepare".to_string())
        })?;
        let lease = Lease::new(spec.categories);
        state.leases.insert(lease.id, lease.categories.clone());
        Ok(lease)
    }

    fn release(&self, lease: Lease) {
        self.releases.fetch_add(1, Ordering::SeqCst);
        self.state().leases.remove(&lease.id);
    }

    fn register(&self, session_id: Uuid, callback: ResourceCallback) {
        self.state().callbacks.insert(session_id, callback);
    }

    fn unregister(&self, session_id: Uuid) {
        self.state().callbacks.remove(&session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_acquire_requires_prepare() {
        let broker = MockBroker::new();
        assert!(broker.acquire().is_err());

        broker
            .prepare(&LeaseSpec {
                categories: vec![ResourceCategory::Camera],
            })
            .unwrap();
        let lease = broker.acquire().unwrap();
        assert_eq!(lease.categories, vec![ResourceCategory::Camera]);
        assert_eq!(broker.active_leases(), 1);

        broker.release(lease);
        assert_eq!(broker.active_leases(), 0);
    }

    #[test]
    fn test_preempt_reaches_registered_sessions() {
        let broker = MockBroker::new();
        let seen = Arc::new(Mutex::new(Vec::<ResourceSignal>::new()));
        let sink = Arc::clone(&seen);
        let session_id = Uuid::new_v4();
        broker.register(
            session_id,
            Arc::new(move |signal: ResourceSignal| sink.lock().unwrap().push(signal)),
        );

        broker.preempt(PreemptionReason::Policy);
        broker.signal_available();
        broker.unregister(session_id);
        broker.preempt(PreemptionReason::Policy);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ResourceSignal::Preempted(PreemptionReason::Policy),
                ResourceSignal::Available
            ]
        );
    }
}
