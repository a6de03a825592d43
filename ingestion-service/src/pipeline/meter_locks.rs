use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Per-meter async locks for callers that accept concurrent uploads.
///
/// Hold the guard from the moment the meter number is known until the batch
/// is persisted.
#[derive(Clone, Default)]
pub struct MeterLocks {
    inner: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl MeterLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, meter_no: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            // Drop locks nobody holds or waits on.
            map.retain(|_, l| Arc::strong_count(l) > 1);
            map.entry(meter_no.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Number of meters with a live lock.
    #[cfg(test)]
    fn active(&self) -> usize {
        let map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        map.values().filter(|l| Arc::strong_count(l) > 1).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_meter_is_serialized() {
        let locks = MeterLocks::new();
        let guard = locks.lock("MSN1").await;

        let contender = locks.clone();
        let waiter = tokio::spawn(async move {
            let _g = contender.lock("MSN1").await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should acquire the lock")
            .expect("waiter task panicked");
    }

    #[tokio::test]
    async fn different_meters_do_not_block_each_other() {
        let locks = MeterLocks::new();
        let _a = locks.lock("MSN1").await;
        let b = tokio::time::timeout(Duration::from_millis(200), locks.lock("MSN2")).await;
        assert!(b.is_ok());
        assert_eq!(locks.active(), 2);
    }

    #[tokio::test]
    async fn released_locks_are_pruned() {
        let locks = MeterLocks::new();
        drop(locks.lock("MSN1").await);
        let _g = locks.lock("MSN2").await;
        assert_eq!(locks.active(), 1);
        assert_eq!(locks.inner.lock().unwrap().len(), 1);
    }
}
