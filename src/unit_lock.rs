use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::errors::AppError;

/// Per-unit async mutexes serializing every queue mutation of a unit.
///
/// Units never share a mutex, so rotations of different units run concurrently. The
/// cache is unbounded: an entry evicted while its guard is held would let a second
/// caller in with a fresh mutex.
#[derive(Clone)]
pub struct UnitLocks {
    locks: Cache<Uuid, Arc<Mutex<()>>>,
    timeout: Duration,
}

impl UnitLocks {
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: Cache::builder().build(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of units that currently have a mutex registered.
    pub async fn registered(&self) -> u64 {
        self.locks.run_pending_tasks().await;
        self.locks.entry_count()
    }

    /// Waits up to the configured timeout for the unit's lock.
    pub async fn acquire(&self, unit_id: Uuid) -> Result<OwnedMutexGuard<()>, AppError> {
        self.acquire_within(unit_id, self.timeout).await
    }

    pub async fn acquire_within(
        &self,
        unit_id: Uuid,
        timeout: Duration,
    ) -> Result<OwnedMutexGuard<()>, AppError> {
        let lock = self
            .locks
            .get_with(unit_id, async { Arc::new(Mutex::new(())) })
            .await;

        match tokio::time::timeout(timeout, lock.lock_owned()).await {
            Ok(guard) => Ok(guard),
            Err(_) => {
                tracing::warn!(
                    "Unit {} lock not acquired within {}ms",
                    unit_id,
                    timeout.as_millis()
                );
                Err(AppError::ConcurrencyTimeout(format!(
                    "Another rotation for unit {} is still in progress",
                    unit_id
                )))
            }
        }
    }
}
