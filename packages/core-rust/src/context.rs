//! Request-scoped context threaded through every chain call.
//!
//! A [`Context`] bundles three things: a cancellation scope, an optional
//! deadline, and a chain of typed values. It is immutable; every `with_*`
//! method returns a derived context and leaves the receiver untouched.

use std::any::{Any, TypeId};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{MeshError, Result};

/// One link of the typed value chain. Newer links shadow older ones.
struct ValueNode {
    key: TypeId,
    value: Arc<dyn Any + Send + Sync>,
    parent: Option<Arc<ValueNode>>,
}

/// Cancellable, deadline-bearing carrier of request-scoped values.
#[derive(Clone)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
    values: Option<Arc<ValueNode>>,
}

impl Context {
    /// Root context: never cancelled unless [`Context::cancel`] is called,
    /// no deadline, no values.
    #[must_use]
    pub fn background() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
            values: None,
        }
    }

    /// New cancellation scope nested in this one. Cancelling the child
    /// leaves the parent running; cancelling the parent ends the child.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
            values: self.values.clone(),
        }
    }

    /// Child scope that also ends after `timeout`.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Child scope ending at `deadline`, or at the parent's deadline if that
    /// comes first.
    #[must_use]
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(current) if current < deadline => current,
            _ => deadline,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
            values: self.values.clone(),
        }
    }

    /// Same values, but cancellation and deadline come from `scope`.
    ///
    /// Background timers use this to replay a call later: the values of
    /// the original request survive, its caller's lifetime does not.
    #[must_use]
    pub fn rebase(&self, scope: &Context) -> Self {
        Self {
            token: scope.token.child_token(),
            deadline: scope.deadline,
            values: self.values.clone(),
        }
    }

    /// Derived context carrying `value`. Shares this context's scope.
    #[must_use]
    pub fn with_value<T: Any + Send + Sync>(&self, value: T) -> Self {
        Self {
            token: self.token.clone(),
            deadline: self.deadline,
            values: Some(Arc::new(ValueNode {
                key: TypeId::of::<T>(),
                value: Arc::new(value),
                parent: self.values.clone(),
            })),
        }
    }

    /// Most recently attached value of type `T`.
    #[must_use]
    pub fn value<T: Any + Send + Sync>(&self) -> Option<&T> {
        let key = TypeId::of::<T>();
        let mut node = self.values.as_deref();
        while let Some(current) = node {
            if current.key == key {
                return current.value.downcast_ref::<T>();
            }
            node = current.parent.as_deref();
        }
        None
    }

    /// Cancels this scope and every scope derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Underlying token, for tasks that need their own child scopes.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; `None` when there is no deadline.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Resolves once the scope is cancelled or the deadline passes.
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    () = self.token.cancelled() => {}
                    () = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }

    /// Why the context ended, or `None` while it is still live.
    #[must_use]
    pub fn err(&self) -> Option<MeshError> {
        if self.token.is_cancelled() {
            return Some(MeshError::Canceled);
        }
        match self.deadline {
            Some(deadline) if deadline <= Instant::now() => Some(MeshError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Runs `fut` until it completes or the context ends, whichever is first.
    ///
    /// # Errors
    ///
    /// Returns the future's own error, or `Canceled` / `DeadlineExceeded`
    /// when the context ends first.
    pub async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if let Some(err) = self.err() {
            return Err(err);
        }
        tokio::select! {
            biased;
            result = fut => result,
            () = self.done() => Err(self.err().unwrap_or(MeshError::Canceled)),
        }
    }

    /// Sleeps for `duration` unless the context ends first.
    ///
    /// # Errors
    ///
    /// Returns `Canceled` / `DeadlineExceeded` if the context ends first.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        self.run(async {
            tokio::time::sleep(duration).await;
            Ok(())
        })
        .await
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("cancelled", &self.token.is_cancelled())
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

/// Wall-clock time left until `at`, zero if it already passed.
#[must_use]
pub fn duration_until(at: SystemTime) -> Duration {
    at.duration_since(SystemTime::now()).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
