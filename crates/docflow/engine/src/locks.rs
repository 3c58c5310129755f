//! Per-instance exclusive sections
//!
//! Every mutating engine operation holds the lock of the instance it
//! touches from its first read to its commit. The guard is owned, so it is
//! released on every exit path when it drops.

use dashmap::DashMap;
use docflow_types::WorkflowInstanceId;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Guard for one instance's exclusive section
pub type InstanceGuard = OwnedMutexGuard<()>;

/// Lock table keyed by instance id
#[derive(Debug, Default)]
pub struct InstanceLocks {
    locks: DashMap<WorkflowInstanceId, Arc<Mutex<()>>>,
}

impl InstanceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for and take the lock of an instance
    pub async fn acquire(&self, id: &WorkflowInstanceId) -> InstanceGuard {
        // The map shard must not stay borrowed across the await
        let lock = self
            .locks
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        tracing::trace!(instance_id = %id, "Acquiring instance lock");
        lock.lock_owned().await
    }

    /// Drop table entries nobody holds or waits on
    pub fn prune(&self) {
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
