//! The single mutual-exclusion gate serializing all sensor access.
//!
//! Every path that performs sensor I/O (one-shot export, the periodic
//! hand-off task, the streaming send) funnels through one
//! [`SensorGate`]. The gate is a plain binary gate, not a fair queue;
//! contenders are served best-effort.

use crate::error::CamError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, TryAcquireError};

/// Binary gate guarding the image sensor and the storage device.
pub struct SensorGate {
    sem: Arc<Semaphore>,
}

/// RAII permit for the gate. Held for the shortest span that still covers
/// "capture a frame" plus "optionally persist it"; released exactly once,
/// on drop.
#[derive(Debug)]
pub struct SensorPermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
}

impl SensorGate {
    pub fn new() -> Self {
        Self {
            sem: Arc::new(Semaphore::new(1)),
        }
    }

    /// Acquires the gate. `None` waits unbounded; `Some(timeout)` gives up
    /// after the timeout with [`CamError::ResourceUnavailable`], which the
    /// caller must treat as "busy", not retry automatically.
    pub async fn acquire(&self, timeout: Option<Duration>) -> Result<SensorPermit, CamError> {
        let acquire = Arc::clone(&self.sem).acquire_owned();
        let permit = match timeout {
            None => acquire
                .await
                .map_err(|_| CamError::ResourceUnavailable("gate closed".to_string()))?,
            Some(wait) => tokio::time::timeout(wait, acquire)
                .await
                .map_err(|_| {
                    CamError::ResourceUnavailable(format!(
                        "gate not released within {} ms",
                        wait.as_millis()
                    ))
                })?
                .map_err(|_| CamError::ResourceUnavailable("gate closed".to_string()))?,
        };
        Ok(SensorPermit { _permit: permit })
    }

    /// Non-blocking probe, used by tests to observe contention.
    pub fn try_acquire(&self) -> Result<SensorPermit, CamError> {
        match Arc::clone(&self.sem).try_acquire_owned() {
            Ok(permit) => Ok(SensorPermit { _permit: permit }),
            Err(TryAcquireError::NoPermits) => {
                Err(CamError::ResourceUnavailable("gate busy".to_string()))
            }
            Err(TryAcquireError::Closed) => {
                Err(CamError::ResourceUnavailable("gate closed".to_string()))
            }
        }
    }
}

impl Default for SensorGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_exclusive_hold() {
        let gate = SensorGate::new();
        let held = gate.acquire(None).await.unwrap();
        assert_matches!(
            gate.acquire(Some(Duration::from_millis(20))).await,
            Err(CamError::ResourceUnavailable(_))
        );
        drop(held);
        assert!(gate.acquire(Some(Duration::from_millis(20))).await.is_ok());
    }

    #[tokio::test]
    async fn test_timeout_is_busy_not_fatal() {
        let gate = SensorGate::new();
        let _held = gate.acquire(None).await.unwrap();
        let err = gate
            .acquire(Some(Duration::from_millis(10)))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "resource_unavailable");
    }

    #[tokio::test]
    async fn test_at_most_one_holder_under_contention() {
        let gate = Arc::new(SensorGate::new());
        let inside = Arc::new(AtomicU32::new(0));
        let peak = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let gate = Arc::clone(&gate);
            let inside = Arc::clone(&inside);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                for _ in 0..25 {
                    let _permit = gate.acquire(None).await.unwrap();
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    inside.fetch_sub(1, Ordering::SeqCst);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(inside.load(Ordering::SeqCst), 0);
    }
}
