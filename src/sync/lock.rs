use std::collections::HashMap;
use std::sync::{Arc, Mutex as SyncMutex};
use tokio::sync::{Mutex, OwnedMutexGuard};

type Registry = Arc<SyncMutex<HashMap<String, Arc<Mutex<()>>>>>;

/// Exclusive access to one record
///
/// The record is released when the guard is dropped. The last guard of a record also
/// removes it from the registry.
#[derive(Debug)]
pub struct RecordGuard {
    key: String,
    registry: Registry,
    lock: Arc<Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl RecordGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for RecordGuard {
    fn drop(&mut self) {
        self.guard.take();

        let mut locks = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        // one reference in the registry and one here, nobody else is waiting
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.key);
        }
    }
}

/// One lock per record key
#[derive(Clone, Debug, Default)]
pub struct RecordLocks {
    locks: Registry,
}

impl RecordLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to the record
    pub async fn lock(&self, key: impl Into<String>) -> RecordGuard {
        let key = key.into();
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(key.clone()).or_default().clone()
        };

        let guard = lock.clone().lock_owned().await;
        RecordGuard {
            key,
            registry: self.locks.clone(),
            lock,
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn it_gives_exclusive_access_per_key() {
        let locks = RecordLocks::new();
        let guard = locks.lock("experiment/default/web").await;
        assert_eq!(guard.key(), "experiment/default/web");

        // other records are not blocked
        let other = timeout(Duration::from_millis(50), locks.lock("experiment/default/db")).await;
        assert!(other.is_ok());

        let same = timeout(Duration::from_millis(50), locks.lock("experiment/default/web")).await;
        assert!(same.is_err());

        drop(guard);
        let same = timeout(Duration::from_millis(50), locks.lock("experiment/default/web")).await;
        assert!(same.is_ok());
    }

    #[tokio::test]
    async fn it_forgets_records_once_released() {
        let locks = RecordLocks::new();
        let first = locks.lock("trial/default/web-001").await;
        let second = locks.lock("trial/default/web-002").await;
        assert_eq!(locks.len(), 2);

        // a waiter keeps the record registered
        let waiter = tokio::spawn({
            let locks = locks.clone();
            async move {
                let _guard = locks.lock("trial/default/web-001").await;
            }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(first);
        waiter.await.unwrap();

        drop(second);
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn it_releases_locks_on_error_paths() {
        let locks = RecordLocks::new();
        let fail = |locks: RecordLocks| async move {
            let _guard = locks.lock("trial/default/web-001").await;
            Err::<(), &str>("failed")
        };
        assert!(fail(locks.clone()).await.is_err());

        let guard = timeout(Duration::from_millis(50), locks.lock("trial/default/web-001")).await;
        assert!(guard.is_ok());
    }
}
