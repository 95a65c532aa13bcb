use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::store::{StoreError, StoreResult};

/// Per-attempt context threaded through every store and render call.
///
/// Carries the cancellation token handed out by the dispatcher and an
/// optional deadline. Nothing in it outlives a single reconcile attempt.
#[derive(Clone, Debug)]
pub struct ReconcileCtx {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl ReconcileCtx {
    pub fn new(cancel: CancellationToken, timeout: Option<Duration>) -> Self {
        Self {
            cancel,
            deadline: timeout.map(|t| Instant::now() + t),
        }
    }

    /// Context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::new(CancellationToken::new(), None)
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Fail fast when the attempt was cancelled or ran out of time.
    pub fn check(&self) -> StoreResult<()> {
        if self.cancel.is_cancelled() {
            return Err(StoreError::Cancelled("reconcile cancelled".into()));
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(StoreError::Cancelled(
                "reconcile deadline exceeded".into(),
            ));
        }
        Ok(())
    }

    /// Drive `fut` unless the attempt is cancelled or its deadline passes first.
    pub async fn run<T>(
        &self,
        fut: impl Future<Output = StoreResult<T>>,
    ) -> StoreResult<T> {
        self.check()?;
        let deadline = async {
            match self.deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                Err(StoreError::Cancelled("reconcile cancelled".into()))
            }
            _ = deadline => {
                Err(StoreError::Cancelled("reconcile deadline exceeded".into()))
            }
            res = fut => res,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancelled_context_short_circuits() {
        let token = CancellationToken::new();
        let ctx = ReconcileCtx::new(token.clone(), None);
        assert!(ctx.run(async { Ok(1) }).await.is_ok());
        token.cancel();
        let err = ctx.run(async { Ok(1) }).await.unwrap_err();
        assert!(matches!(err, StoreError::Cancelled(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_aborts_slow_call() {
        let ctx = ReconcileCtx::new(
            CancellationToken::new(),
            Some(Duration::from_secs(1)),
        );
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        };
        let err = ctx.run(slow).await.unwrap_err();
        assert!(err.to_string().contains("deadline"), "{err}");
    }
}
