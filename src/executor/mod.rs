//! Chain executor
//!
//! This module contains the invocation engine that walks a snapshot of
//! middleware factories one level at a time, and the types middleware use to
//! talk to it.

mod flow;
mod next;
pub mod traits;

pub use flow::Flow;
pub use next::Next;
pub use traits::{Action, FactoryFn, FromFn, Middleware, MiddlewareFactory, Shared, factory_fn, from_fn};

use serde_json::Value;
use std::sync::Arc;
use tracing::trace;

use crate::pipeline::Context;

/// Walks one run's factory snapshot
///
/// The snapshot is never mutated; every [`Next`] of the run shares it through
/// an `Arc`.
pub(crate) struct Invoker {
    factories: Vec<Arc<dyn MiddlewareFactory>>,
}

impl Invoker {
    pub(crate) fn new(factories: Vec<Arc<dyn MiddlewareFactory>>) -> Self {
        Self { factories }
    }

    pub(crate) fn len(&self) -> usize {
        self.factories.len()
    }

    /// Run the chain from its first position
    pub(crate) fn invoke<'a>(self: &Arc<Self>, ctx: &'a mut Context) -> Flow<'a> {
        self.run_middleware(0, ctx)
    }

    /// Instantiate and run the middleware at `idx`
    ///
    /// Past the end of the snapshot this is the base case of the chain and
    /// yields `Null` without running anything. The middleware's flow is
    /// returned as is, suspended or not.
    pub(crate) fn run_middleware<'a>(self: &Arc<Self>, idx: usize, ctx: &'a mut Context) -> Flow<'a> {
        let Some(factory) = self.factories.get(idx) else {
            trace!(idx, "end of chain reached");
            return Flow::ok(Value::Null);
        };

        trace!(idx, "running middleware");
        let next = Next::new(Arc::clone(self), idx + 1);
        let middleware = factory.create(ctx);
        middleware.call(ctx, next)
    }
}
