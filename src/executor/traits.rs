use std::marker::PhantomData;
use std::sync::Arc;

use super::{Flow, Next};
use crate::pipeline::{Context, FlowResult};

/// A unit of the chain
///
/// A middleware receives the run's [`Context`] and the [`Next`] continuation
/// for the rest of the chain. It may return a value directly, delegate to
/// `next` once or several times, post-process what `next` yields, or fail.
///
/// The returned [`Flow`] may borrow the context but not `self`: asynchronous
/// implementations clone whatever they need out of `self` before building
/// their future.
pub trait Middleware: Send + Sync {
    fn call<'a>(&self, ctx: &'a mut Context, next: Next) -> Flow<'a>;
}

impl<M: Middleware + ?Sized> Middleware for Arc<M> {
    fn call<'a>(&self, ctx: &'a mut Context, next: Next) -> Flow<'a> {
        (**self).call(ctx, next)
    }
}

impl<M: Middleware + ?Sized> Middleware for Box<M> {
    fn call<'a>(&self, ctx: &'a mut Context, next: Next) -> Flow<'a> {
        (**self).call(ctx, next)
    }
}

/// Builds the middleware for one position of one run
///
/// Called once per run and per position, right before that middleware
/// executes, which lets a middleware keep state scoped to a single run.
pub trait MiddlewareFactory: Send + Sync {
    fn create(&self, ctx: &Context) -> Arc<dyn Middleware>;
}

/// Middleware built from a closure, see [`from_fn`]
#[derive(Clone)]
pub struct FromFn<F> {
    f: F,
}

/// Create a middleware from a closure
///
/// # Example
/// ```
/// use flowdeck::{from_fn, Pipeline};
///
/// let pipeline = Pipeline::new()
///     .middleware(from_fn(|ctx, next| {
///         ctx.set("seen", true);
///         next.call(ctx)
///     }))
///     .middleware(from_fn(|ctx, _next| flowdeck::Flow::ok(ctx.get("seen").cloned())));
///
/// let result = pipeline.run().into_ready().unwrap().unwrap();
/// assert_eq!(result, serde_json::json!(true));
/// ```
pub fn from_fn<F>(f: F) -> FromFn<F>
where
    F: for<'a> Fn(&'a mut Context, Next) -> Flow<'a> + Send + Sync,
{
    FromFn { f }
}

impl<F> Middleware for FromFn<F>
where
    F: for<'a> Fn(&'a mut Context, Next) -> Flow<'a> + Send + Sync,
{
    fn call<'a>(&self, ctx: &'a mut Context, next: Next) -> Flow<'a> {
        (self.f)(ctx, next)
    }
}

/// Middleware that runs an action and then continues down the chain
///
/// The action's value is the middleware's result only when it is the last
/// stage; otherwise the result of the rest of the chain is returned. A
/// failing action stops the chain.
#[derive(Clone)]
pub struct Action<F> {
    action: F,
}

impl<F> Action<F>
where
    F: Fn(&mut Context) -> FlowResult + Send + Sync,
{
    pub fn new(action: F) -> Self {
        Self { action }
    }
}

impl<F> Middleware for Action<F>
where
    F: Fn(&mut Context) -> FlowResult + Send + Sync,
{
    fn call<'a>(&self, ctx: &'a mut Context, next: Next) -> Flow<'a> {
        let value = match (self.action)(ctx) {
            Ok(value) => value,
            Err(err) => return Flow::err(err),
        };

        if next.is_nop() {
            return Flow::ok(value);
        }
        next.call(ctx)
    }
}

/// Factory that hands out the same middleware instance to every run
pub struct Shared {
    middleware: Arc<dyn Middleware>,
}

impl Shared {
    pub fn new<M: Middleware + 'static>(middleware: M) -> Self {
        Self {
            middleware: Arc::new(middleware),
        }
    }
}

impl MiddlewareFactory for Shared {
    fn create(&self, _ctx: &Context) -> Arc<dyn Middleware> {
        Arc::clone(&self.middleware)
    }
}

/// Factory built from a closure, see [`factory_fn`]
pub struct FactoryFn<F, M> {
    f: F,
    _middleware: PhantomData<fn() -> M>,
}

/// Create a middleware factory from a closure
pub fn factory_fn<F, M>(f: F) -> FactoryFn<F, M>
where
    F: Fn(&Context) -> M + Send + Sync,
    M: Middleware + 'static,
{
    FactoryFn {
        f,
        _middleware: PhantomData,
    }
}

impl<F, M> MiddlewareFactory for FactoryFn<F, M>
where
    F: Fn(&Context) -> M + Send + Sync,
    M: Middleware + 'static,
{
    fn create(&self, ctx: &Context) -> Arc<dyn Middleware> {
        Arc::new((self.f)(ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Invoker;
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Constant(Value);

    impl Middleware for Constant {
        fn call<'a>(&self, _ctx: &'a mut Context, _next: Next) -> Flow<'a> {
            Flow::ok(self.0.clone())
        }
    }

    fn terminal_next() -> Next {
        Next::new(Arc::new(Invoker::new(Vec::new())), 1)
    }

    #[test]
    fn test_shared_factory_returns_same_instance() {
        let factory = Shared::new(Constant(json!(1)));
        let ctx = Context::new();

        let first = factory.create(&ctx);
        let second = factory.create(&ctx);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_factory_fn_builds_fresh_instances() {
        let built = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&built);
        let factory = factory_fn(move |ctx: &Context| {
            counter.fetch_add(1, Ordering::SeqCst);
            Constant(ctx.get("value").cloned().unwrap_or(Value::Null))
        });

        let ctx = Context::new().with_var("value", "from-state");
        let middleware = factory.create(&ctx);
        factory.create(&ctx);
        assert_eq!(built.load(Ordering::SeqCst), 2);

        let mut ctx = ctx;
        let result = middleware.call(&mut ctx, terminal_next());
        assert_eq!(result.into_ready().unwrap().unwrap(), json!("from-state"));
    }

    #[test]
    fn test_action_returns_value_when_last() {
        let action = Action::new(|ctx: &mut Context| {
            ctx.set("ran", true);
            Ok(json!("last"))
        });
        let mut ctx = Context::new();

        let result = action.call(&mut ctx, terminal_next());
        assert_eq!(result.into_ready().unwrap().unwrap(), json!("last"));
        assert_eq!(ctx.get("ran"), Some(&json!(true)));
    }

    #[test]
    fn test_action_failure_is_returned() {
        let action = Action::new(|ctx: &mut Context| Err(ctx.abort("halt")));
        let mut ctx = Context::new();

        let err = action.call(&mut ctx, terminal_next()).into_ready().unwrap().unwrap_err();
        assert!(err.is_abort());
        assert!(ctx.is_aborted());
    }

    #[test]
    fn test_boxed_middleware_delegates() {
        let boxed: Box<dyn Middleware> = Box::new(Constant(json!("boxed")));
        let mut ctx = Context::new();
        let result = boxed.call(&mut ctx, terminal_next());
        assert_eq!(result.into_ready().unwrap().unwrap(), json!("boxed"));
    }
}
