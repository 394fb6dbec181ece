//! Cancellable, deadline-bound call context
//!
//! Every storage call runs under a [`Context`]. A context carries a
//! cancellation token and an optional deadline. Child contexts derived with
//! [`Context::with_timeout`] inherit the parent's cancellation and never
//! outlive the parent's deadline; cancelling a child does not touch the parent.

use crate::error::{Result, StorageError};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};

#[derive(Debug, Clone)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// Root context: never cancelled by anyone else, no deadline.
    pub fn background() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Child context whose deadline is the earlier of the parent's and
    /// `now + timeout`.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let requested = Instant::now().checked_add(timeout);
        let deadline = match (self.deadline, requested) {
            (Some(parent), Some(requested)) => Some(parent.min(requested)),
            (parent, None) => parent,
            (None, requested) => requested,
        };
        Self {
            token: self.token.child_token(),
            deadline,
        }
    }

    /// Child context with the parent's deadline that can be cancelled on its own.
    pub fn with_cancel(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Cancel this context and every context derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Cancels the context when the guard is dropped.
    pub fn drop_guard(&self) -> DropGuard {
        self.token.clone().drop_guard()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Budget left before the deadline; `None` when there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// The reason this context is done, if it is.
    pub fn err(&self) -> Option<StorageError> {
        if self.token.is_cancelled() {
            return Some(StorageError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(StorageError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Fail fast when the context is already done.
    pub fn check(&self) -> Result<()> {
        match self.err() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> StorageError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.token.cancelled() => StorageError::Cancelled,
                _ = tokio::time::sleep_until(deadline) => StorageError::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                StorageError::Cancelled
            }
        }
    }

    /// Drive `fut` until it completes or the context is done, whichever is first.
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check()?;
        tokio::select! {
            biased;
            result = fut => result,
            err = self.done() => Err(err),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_background_has_no_deadline() {
        let ctx = Context::background();
        assert!(ctx.deadline().is_none());
        assert!(ctx.remaining().is_none());
        assert!(ctx.check().is_ok());
    }

    #[tokio::test]
    async fn test_child_deadline_is_the_tighter_one() {
        let parent = Context::background().with_timeout(Duration::from_millis(100));
        let child = parent.with_timeout(Duration::from_secs(10));
        assert_eq!(child.deadline(), parent.deadline());

        let tighter = parent.with_timeout(Duration::from_millis(10));
        assert!(tighter.deadline() < parent.deadline());
    }

    #[tokio::test]
    async fn test_cancellation_flows_downward_only() {
        let parent = Context::background();
        let child = parent.with_timeout(Duration::from_secs(1));

        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());

        let child = parent.with_cancel();
        parent.cancel();
        assert!(child.is_cancelled());
        assert!(matches!(child.check(), Err(StorageError::Cancelled)));
    }

    #[tokio::test]
    async fn test_drop_guard_cancels() {
        let ctx = Context::background().with_timeout(Duration::from_secs(1));
        {
            let _guard = ctx.drop_guard();
        }
        assert!(ctx.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_times_out() {
        let ctx = Context::background().with_timeout(Duration::from_secs(2));
        let result: Result<()> = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(StorageError::DeadlineExceeded)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_returns_result_within_budget() {
        let ctx = Context::background().with_timeout(Duration::from_secs(2));
        let result = ctx
            .run(async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(7)
            })
            .await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_run_fails_fast_when_already_done() {
        let ctx = Context::background().with_timeout(Duration::ZERO);
        let result = ctx.run(async { Ok(()) }).await;
        assert!(matches!(result, Err(StorageError::DeadlineExceeded)));

        let ctx = Context::background();
        ctx.cancel();
        let result = ctx.run(async { Ok(()) }).await;
        assert!(matches!(result, Err(StorageError::Cancelled)));
    }

    #[tokio::test]
    async fn test_done_reports_cancel() {
        let ctx = Context::background();
        let waiter = ctx.clone();
        let handle = tokio::spawn(async move { waiter.done().await });
        ctx.cancel();
        assert!(matches!(handle.await.unwrap(), StorageError::Cancelled));
    }
}
