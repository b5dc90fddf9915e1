//! Hardware resource leasing
//!
//! Camera, display overlay and hardware encoder are shared with other
//! processes. An external `ResourceBroker` grants exclusive leases on them and
//! may take them back at any time by signalling preemption. The
//! `ResourceArbiter` is the only thing in a session that touches a lease.

pub mod arbiter;
pub mod mock;

pub use arbiter::ResourceArbiter;

use crate::error::CamResult;
use crate::state_machine::Mode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourceCategory {
    Camera,
    Overlay,
    Encoder,
}

/// Resource categories requested for one realization
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseSpec {
    pub categories: Vec<ResourceCategory>,
}

impl LeaseSpec {
    /// Categories a session in `mode` needs before touching hardware.
    ///
    /// Audio sessions use no leased hardware.
    pub fn for_mode(mode: Mode, display_overlay: bool) -> Self {
        let mut categories = Vec::new();
        if mode.uses_camera() {
            categories.push(ResourceCategory::Camera);
            if display_overlay {
                categories.push(ResourceCategory::Overlay);
            }
        }
        if mode == Mode::Video {
            categories.push(ResourceCategory::Encoder);
        }
        Self { categories }
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

/// A granted, exclusive right to the categories of a `LeaseSpec`
///
/// Not `Clone`: a lease is handed back to the broker exactly once.
#[derive(Debug, PartialEq, Eq)]
pub struct Lease {
    pub id: Uuid,
    pub categories: Vec<ResourceCategory>,
}

impl Lease {
    pub fn new(categories: Vec<ResourceCategory>) -> Self {
        Self {
            id: Uuid::new_v4(),
            categories,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PreemptionReason {
    /// A session with higher priority needs the hardware
    HigherPriority,
    /// System policy (e.g. an incoming call) revoked the lease
    Policy,
    /// The device disappeared
    DeviceLost,
}

/// Unsolicited broker notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceSignal {
    Preempted(PreemptionReason),
    /// Previously preempted resources can be requested again
    Available,
}

/// Invoked on the broker's own thread
pub type ResourceCallback = Arc<dyn Fn(ResourceSignal) + Send + Sync>;

/// External resource manager
///
/// A denied request returns `CamError::ResourceBlocked`.
pub trait ResourceBroker: Send + Sync {
    fn prepare(&self, spec: &LeaseSpec) -> CamResult<()>;

    fn acquire(&self) -> CamResult<Lease>;

    fn release(&self, lease: Lease);

    fn register(&self, session_id: Uuid, callback: ResourceCallback);

    fn unregister(&self, session_id: Uuid);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_spec_for_mode() {
        assert_eq!(
            LeaseSpec::for_mode(Mode::Video, true).categories,
            vec![
                ResourceCategory::Camera,
                ResourceCategory::Overlay,
                ResourceCategory::Encoder
            ]
        );
        assert_eq!(
            LeaseSpec::for_mode(Mode::Image, false).categories,
            vec![ResourceCategory::Camera]
        );
        assert!(LeaseSpec::for_mode(Mode::Audio, true).is_empty());
    }
}
