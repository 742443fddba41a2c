// src/lifecycle/deadline.rs
use std::future::Future;
use std::time::Duration;
use tokio::time::{self, Instant};

/// Returned by [`Deadline::run`] when the wrapped future did not finish in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("deadline exceeded")]
pub struct DeadlineExceeded;

/// A point in time after which work handed this value should give up.
///
/// Deadlines are `Copy` and carry no cancellation machinery of their own:
/// whoever receives one is expected to stop on its own once it has passed.
/// A bounded child never outlives its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// A deadline that never expires.
    pub fn unbounded() -> Self {
        Self { at: None }
    }

    pub fn after(timeout: Duration) -> Self {
        Self::unbounded().bounded(timeout)
    }

    /// Derive a child expiring at `min(self, now + timeout)`.
    pub fn bounded(&self, timeout: Duration) -> Self {
        let local = Instant::now().checked_add(timeout);
        let at = match (self.at, local) {
            (Some(parent), Some(local)) => Some(parent.min(local)),
            (parent, None) => parent,
            (None, local) => local,
        };
        Self { at }
    }

    /// Time left before expiry, `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        matches!(self.at, Some(at) if Instant::now() >= at)
    }

    /// Resolves once the deadline has passed. Pends forever when unbounded.
    pub async fn expired(&self) {
        match self.at {
            Some(at) => time::sleep_until(at).await,
            None => std::future::pending::<()>().await,
        }
    }

    /// Race `fut` against the deadline. The future is dropped on expiry.
    pub async fn run<F>(&self, fut: F) -> Result<F::Output, DeadlineExceeded>
    where
        F: Future,
    {
        match self.at {
            Some(at) => time::timeout_at(at, fut).await.map_err(|_| DeadlineExceeded),
            None => Ok(fut.await),
        }
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::unbounded()
    }
}
