//! Dispatch Gate: process-wide admission control for concurrent runs. §4.7.
//!
//! A single counting semaphore sized by `max_concurrent_deployments`.
//! Admission is blocking FIFO, since `tokio::sync::Semaphore` already queues
//! waiters in arrival order. Exactly one permit is held per live run and
//! released on terminal status by dropping the guard.

use std::sync::Arc;
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use flowforge_core::{Error, Result};

pub struct DispatchGate {
    semaphore: Arc<Semaphore>,
}

impl DispatchGate {
    pub fn new(cap: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(cap.max(1))),
        }
    }

    /// Blocks until a slot is available.
    pub async fn admit(&self) -> Result<OwnedSemaphorePermit> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(Self::closed_error)
    }

    /// Blocks until a slot is available or `cancellation` fires first. A
    /// waiter released by cancellation never consumes a slot (dropping
    /// the `acquire_owned` future before it resolves returns any reserved
    /// permit to the semaphore).
    pub async fn admit_or_cancelled(&self, cancellation: &CancellationToken) -> Result<Option<OwnedSemaphorePermit>> {
        tokio::select! {
            biased;
            _ = cancellation.cancelled() => Ok(None),
            permit = self.semaphore.clone().acquire_owned() => permit.map(Some).map_err(Self::closed_error),
        }
    }

    fn closed_error(_: AcquireError) -> Error {
        Error::Internal("dispatch gate semaphore closed".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn admits_up_to_cap_concurrently() {
        let gate = DispatchGate::new(2);
        let p1 = gate.admit().await.unwrap();
        let p2 = gate.admit().await.unwrap();

        let gate = Arc::new(gate);
        let gate2 = gate.clone();
        let third = tokio::spawn(async move { gate2.admit().await.unwrap() });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!third.is_finished());

        drop(p1);
        let p3 = third.await.unwrap();
        drop(p2);
        drop(p3);
    }

    #[tokio::test]
    async fn cancelling_a_pending_admission_releases_the_waiter() {
        let gate = DispatchGate::new(1);
        let _held = gate.admit().await.unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let result = gate.admit_or_cancelled(&token).await.unwrap();
        assert!(result.is_none());
    }
}
