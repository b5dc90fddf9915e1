use super::{Lease, LeaseSpec, ResourceBroker, ResourceCallback};
use crate::app_log;
use crate::error::CamResult;
use crate::logger::LogLevel;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

/// Holds the session's single outstanding lease
pub struct ResourceArbiter {
    session_id: Uuid,
    broker: Arc<dyn ResourceBroker>,
    lease: Mutex<Option<Lease>>,
    registered: AtomicBool,
}

impl ResourceArbiter {
    pub fn new(session_id: Uuid, broker: Arc<dyn ResourceBroker>) -> Self {
        Self {
            session_id,
            broker,
            lease: Mutex::new(None),
            registered: AtomicBool::new(false),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<Lease>> {
        match self.lease.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn prepare(&self, spec: &LeaseSpec) -> CamResult<()> {
        self.broker.prepare(spec)
    }

    /// Prepare and acquire a lease for `spec`.
    ///
    /// No-op when a lease is already held or no categories are requested.
    pub fn acquire(&self, spec: &LeaseSpec) -> CamResult<()> {
        if spec.is_empty() || self.holds_lease() {
            return Ok(());
        }

        self.prepare(spec)?;
        let lease = self.broker.acquire().map_err(|e| {
            app_log!(
                LogLevel::Warn,
                "resource",
                "Lease for {:?} denied (session: {}): {}",
                spec.categories,
                self.session_id,
                e
            );
            e
        })?;

        app_log!(
            LogLevel::Debug,
            "resource",
            "Acquired lease {} for {:?}",
            lease.id,
            lease.categories
        );
        *self.slot() = Some(lease);
        Ok(())
    }

    /// Hand the lease back. Returns `false` when none was held.
    pub fn release(&self) -> bool {
        let lease = self.slot().take();
        match lease {
            Some(lease) => {
                app_log!(LogLevel::Debug, "resource", "Releasing lease {}", lease.id);
                self.broker.release(lease);
                true
            }
            None => false,
        }
    }

    pub fn holds_lease(&self) -> bool {
        self.slot().is_some()
    }

    pub fn register_preemption(&self, callback: ResourceCallback) {
        self.broker.register(self.session_id, callback);
        self.registered.store(true, Ordering::SeqCst);
    }

    pub fn unregister(&self) {
        if self.registered.swap(false, Ordering::SeqCst) {
            self.broker.unregister(self.session_id);
        }
    }
}
