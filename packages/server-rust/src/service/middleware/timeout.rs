//! Deadline middleware for mesh calls.
//!
//! Gives every call's context a deadline of `call_timeout` (or keeps the
//! caller's, if sooner) and fails calls that outlive it with
//! `MeshError::DeadlineExceeded`.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use nsmesh_core::MeshError;
use tower::{Layer, Service};

use crate::service::call::{MeshCall, MeshResponse};

// ---------------------------------------------------------------------------
// TimeoutLayer
// ---------------------------------------------------------------------------

/// Tower layer that bounds every call by a deadline.
#[derive(Debug, Clone)]
pub struct TimeoutLayer {
    timeout: Duration,
}

impl TimeoutLayer {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl<S> Layer<S> for TimeoutLayer {
    type Service = TimeoutService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimeoutService {
            inner,
            timeout: self.timeout,
        }
    }
}

// ---------------------------------------------------------------------------
// TimeoutService
// ---------------------------------------------------------------------------

/// Service wrapper that enforces per-call deadlines.
///
/// The deadline is placed on the call's context, so elements that wait
/// (discovery watches, dials) observe it too.
#[derive(Debug, Clone)]
pub struct TimeoutService<S> {
    inner: S,
    timeout: Duration,
}

impl<S> Service<MeshCall> for TimeoutService<S>
where
    S: Service<MeshCall, Response = MeshResponse, Error = MeshError> + Send,
    S::Future: Send + 'static,
{
    type Response = MeshResponse;
    type Error = MeshError;
    type Future = Pin<Box<dyn Future<Output = Result<MeshResponse, MeshError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, call: MeshCall) -> Self::Future {
        let ctx = call.ctx().with_timeout(self.timeout);
        let remaining = ctx.remaining().unwrap_or(self.timeout);
        let fut = self.inner.call(call.with_ctx(ctx));
        Box::pin(async move {
            match tokio::time::timeout(remaining, fut).await {
                Ok(result) => result,
                Err(_elapsed) => Err(MeshError::DeadlineExceeded),
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use nsmesh_core::{Connection, ErrorKind};
    use tower::ServiceExt;

    use super::*;

    /// Service that sleeps for a configurable delay, or until the call's
    /// context ends.
    struct SlowService {
        delay_ms: u64,
    }

    impl Service<MeshCall> for SlowService {
        type Response = MeshResponse;
        type Error = MeshError;
        type Future = Pin<Box<dyn Future<Output = Result<MeshResponse, MeshError>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, call: MeshCall) -> Self::Future {
            let delay = self.delay_ms;
            let ctx = call.ctx().clone();
            Box::pin(async move {
                ctx.sleep(Duration::from_millis(delay)).await?;
                Ok(MeshResponse::Closed)
            })
        }
    }

    fn make_call() -> MeshCall {
        MeshCall::close(
            nsmesh_core::Context::background(),
            Connection::new("conn-1", "ns-1"),
        )
    }

    #[tokio::test]
    async fn completes_within_timeout() {
        let svc = TimeoutLayer::new(Duration::from_secs(1)).layer(SlowService { delay_ms: 10 });
        let resp = svc.oneshot(make_call()).await.unwrap();
        assert_eq!(resp, MeshResponse::Closed);
    }

    #[tokio::test]
    async fn exceeds_timeout_returns_error() {
        let svc = TimeoutLayer::new(Duration::from_millis(50)).layer(SlowService { delay_ms: 200 });
        let err = svc.oneshot(make_call()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeadlineExceeded);
    }

    #[tokio::test]
    async fn caller_deadline_wins_when_sooner() {
        let svc = TimeoutLayer::new(Duration::from_secs(10)).layer(SlowService { delay_ms: 500 });
        let call = make_call();
        let ctx = call.ctx().with_timeout(Duration::from_millis(20));

        let err = svc.oneshot(call.with_ctx(ctx)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeadlineExceeded);
    }
}
