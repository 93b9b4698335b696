use futures::future::BoxFuture;
use serde_json::Value;
use std::fmt;
use std::future::{self, Future};
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

use crate::pipeline::{FlowError, FlowResult};

/// Outcome of a middleware, a continuation or a run: either already
/// computed or still suspended
///
/// Synchronous middleware return a ready flow, asynchronous middleware a
/// pending one; both compose in the same chain. A flow is a [`Future`], so
/// it can always be awaited, and [`Flow::into_ready`] extracts the value
/// without an executor when nothing in the chain suspended.
#[must_use = "a Flow does nothing unless it is inspected or awaited"]
pub struct Flow<'a> {
    state: FlowState<'a>,
}

enum FlowState<'a> {
    Ready(future::Ready<FlowResult>),
    Pending(BoxFuture<'a, FlowResult>),
}

impl<'a> Flow<'a> {
    /// A flow that has already completed with `outcome`
    pub fn ready(outcome: FlowResult) -> Self {
        Self {
            state: FlowState::Ready(future::ready(outcome)),
        }
    }

    pub fn ok(value: impl Into<Value>) -> Self {
        Self::ready(Ok(value.into()))
    }

    pub fn err(error: impl Into<FlowError>) -> Self {
        Self::ready(Err(error.into()))
    }

    /// A flow backed by an asynchronous computation
    ///
    /// # Example
    /// ```
    /// use flowdeck::{Flow, Pipeline};
    ///
    /// let pipeline = Pipeline::new()
    ///     .middleware(flowdeck::from_fn(|ctx, next| {
    ///         Flow::pending(async move {
    ///             let downstream = next.call(ctx).await?;
    ///             Ok(serde_json::json!({"wrapped": downstream}))
    ///         })
    ///     }))
    ///     .action(|_| Ok(1.into()));
    ///
    /// let run = pipeline.run();
    /// let result = futures::executor::block_on(run).unwrap();
    /// assert_eq!(result, serde_json::json!({"wrapped": 1}));
    /// ```
    pub fn pending<F>(future: F) -> Self
    where
        F: Future<Output = FlowResult> + Send + 'a,
    {
        Self {
            state: FlowState::Pending(Box::pin(future)),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, FlowState::Ready(_))
    }

    /// Take the outcome if the flow has completed, or get the flow back
    pub fn into_ready(self) -> Result<FlowResult, Self> {
        match self.state {
            FlowState::Ready(ready) => Ok(ready.into_inner()),
            pending => Err(Self { state: pending }),
        }
    }

    /// Post-process the outcome, staying synchronous when the flow is ready
    pub fn map_result<F>(self, f: F) -> Flow<'a>
    where
        F: FnOnce(FlowResult) -> FlowResult + Send + 'a,
    {
        match self.into_ready() {
            Ok(outcome) => Flow::ready(f(outcome)),
            Err(pending) => Flow::pending(async move { f(pending.await) }),
        }
    }

    /// Post-process a successful value; failures pass through
    pub fn map<F>(self, f: F) -> Flow<'a>
    where
        F: FnOnce(Value) -> Value + Send + 'a,
    {
        self.map_result(|outcome| outcome.map(f))
    }
}

impl From<FlowResult> for Flow<'_> {
    fn from(outcome: FlowResult) -> Self {
        Self::ready(outcome)
    }
}

impl<'a> From<BoxFuture<'a, FlowResult>> for Flow<'a> {
    fn from(future: BoxFuture<'a, FlowResult>) -> Self {
        Self {
            state: FlowState::Pending(future),
        }
    }
}

impl Future for Flow<'_> {
    type Output = FlowResult;

    fn poll(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            FlowState::Ready(ready) => Pin::new(ready).poll(cx),
            FlowState::Pending(future) => future.as_mut().poll(cx),
        }
    }
}

impl fmt::Debug for Flow<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            FlowState::Ready(ready) => f.debug_tuple("Flow::Ready").field(ready).finish(),
            FlowState::Pending(_) => f.write_str("Flow::Pending"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ready_flow() {
        let flow = Flow::ok(10);
        assert!(flow.is_ready());
        assert_eq!(flow.into_ready().unwrap().unwrap(), json!(10));
    }

    #[test]
    fn test_err_flow() {
        let flow = Flow::err(FlowError::custom("nope"));
        let err = flow.into_ready().unwrap().unwrap_err();
        assert_eq!(err.to_string(), "nope");
    }

    #[test]
    fn test_pending_flow_is_not_ready() {
        let flow = Flow::pending(async { Ok(json!(1)) });
        assert!(!flow.is_ready());
        let flow = flow.into_ready().unwrap_err();
        assert_eq!(format!("{:?}", flow), "Flow::Pending");
    }

    #[test]
    fn test_map_stays_synchronous() {
        let flow = Flow::ok(2).map(|v| json!(v.as_i64().unwrap() * 10));
        assert_eq!(flow.into_ready().unwrap().unwrap(), json!(20));
    }

    #[test]
    fn test_map_skips_failures() {
        let flow = Flow::err(FlowError::aborted("stop")).map(|_| json!("unreachable"));
        assert!(flow.into_ready().unwrap().unwrap_err().is_abort());
    }

    #[test]
    fn test_map_result_can_recover() {
        let flow = Flow::err(FlowError::aborted("stop")).map_result(|outcome| match outcome {
            Err(FlowError::Aborted { .. }) => Ok(Value::Null),
            other => other,
        });
        assert_eq!(flow.into_ready().unwrap().unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn test_await_ready_flow() {
        assert_eq!(Flow::ok("done").await.unwrap(), json!("done"));
    }

    #[tokio::test]
    async fn test_map_on_pending_flow() {
        let flow = Flow::pending(async {
            tokio::task::yield_now().await;
            Ok(json!(3))
        })
        .map(|v| json!([v]));

        assert!(!flow.is_ready());
        assert_eq!(flow.await.unwrap(), json!([3]));
    }

    #[tokio::test]
    async fn test_from_boxed_future() {
        let boxed: BoxFuture<'static, FlowResult> = Box::pin(async { Ok(json!("boxed")) });
        let flow = Flow::from(boxed);
        assert_eq!(flow.await.unwrap(), json!("boxed"));
    }
}
