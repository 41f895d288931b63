//! Shared cancellation for the tasks of one patch operation.

use crate::patch::error::PatchError;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

/// Cloneable cancellation signal backed by a `watch` channel.
///
/// Every clone observes the same state; once cancelled it stays cancelled.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                // Sender is owned by `self`, so this cannot close while we wait.
                std::future::pending::<()>().await;
            }
        }
    }

    /// Runs `fut` unless the token is cancelled first.
    pub async fn run<F, T, E>(&self, fut: F) -> Result<T, PatchError>
    where
        F: Future<Output = Result<T, E>>,
        PatchError: From<E>,
    {
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(PatchError::Cancelled),
            result = fut => result.map_err(PatchError::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::BuildError;
    use std::time::Duration;

    #[tokio::test]
    async fn test_clones_share_state() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());

        token.cancel();
        assert!(clone.is_cancelled());
        // Already cancelled: resolves immediately
        clone.cancelled().await;
    }

    #[tokio::test]
    async fn test_cancel_wakes_waiters() {
        let token = CancelToken::new();
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_stops_pending_work() {
        let token = CancelToken::new();
        token.cancel();

        let result = token
            .run(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<_, BuildError>(())
            })
            .await;
        assert!(matches!(result, Err(PatchError::Cancelled)));
    }

    #[tokio::test]
    async fn test_run_converts_errors() {
        let token = CancelToken::new();
        let result: Result<(), _> = token
            .run(async { Err(BuildError::Solve("boom".to_string())) })
            .await;
        assert!(matches!(result, Err(PatchError::Build(BuildError::Solve(_)))));
    }
}
