//! Per-camera operation serialization
//!
//! Start/stop operations on the same camera must run one at a time, while
//! different cameras stay fully independent. Each camera id maps to its own
//! async mutex; the guard is owned, so it can be held across awaits.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

#[derive(Default)]
pub struct CameraLocks {
    locks: RwLock<HashMap<i64, Arc<Mutex<()>>>>,
}

impl CameraLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the camera's lock, waiting behind any operation in flight.
    pub async fn lock(&self, camera_id: i64) -> OwnedMutexGuard<()> {
        let lock = self.get_or_create(camera_id).await;
        lock.lock_owned().await
    }

    async fn get_or_create(&self, camera_id: i64) -> Arc<Mutex<()>> {
        {
            let locks = self.locks.read().await;
            if let Some(lock) = locks.get(&camera_id) {
                return lock.clone();
            }
        }

        let mut locks = self.locks.write().await;
        locks
            .entry(camera_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_camera_serializes() {
        let locks = Arc::new(CameraLocks::new());

        let guard = locks.lock(1).await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(1).await;
            })
        };

        // Still blocked while the first guard is held
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn different_cameras_are_independent() {
        let locks = CameraLocks::new();
        let _a = locks.lock(1).await;
        // Must not block
        let _b = tokio::time::timeout(Duration::from_millis(100), locks.lock(2))
            .await
            .unwrap();
    }
}
