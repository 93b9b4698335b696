use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use super::{Context, FlowError, FlowResult, State};
use crate::config::{ConfigError, PipelineConfig};
use crate::executor::{Action, Flow, Invoker, Middleware, MiddlewareFactory, Next, Shared, factory_fn, from_fn};

/// An ordered chain of middleware
///
/// Registration order is execution order. Every run takes a snapshot of the
/// registered factories, builds a fresh [`Context`] and walks the snapshot
/// from the first position; registering more middleware later never affects
/// a run that has already started.
///
/// # Example
///
/// ```
/// use flowdeck::Pipeline;
/// use serde_json::{Value, json};
///
/// let mut pipeline = Pipeline::new();
/// pipeline
///     .use_fn(|ctx, next| {
///         ctx.set("user", "alice");
///         next.call(ctx).map(|body| json!({"status": 200, "body": body}))
///     })
///     .add_action(|ctx| {
///         let user = ctx.get("user").and_then(Value::as_str).unwrap_or("stranger");
///         Ok(json!(format!("hello {user}")))
///     });
///
/// let result = pipeline.run().into_ready().unwrap().unwrap();
/// assert_eq!(result, json!({"status": 200, "body": "hello alice"}));
/// ```
#[derive(Clone, Default)]
pub struct Pipeline {
    factories: Vec<Arc<dyn MiddlewareFactory>>,
    default_state: State,
    suppress_abort: bool,
    state_schema: Option<Arc<jsonschema::Validator>>,
}

impl Pipeline {
    /// Create an empty pipeline with no default state
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an empty pipeline from a loaded configuration
    ///
    /// Fails when the configured state schema does not compile.
    pub fn from_config(config: PipelineConfig) -> Result<Self, ConfigError> {
        let state_schema = config
            .state_schema
            .as_ref()
            .map(|schema| {
                jsonschema::validator_for(schema)
                    .map(Arc::new)
                    .map_err(|e| ConfigError::Schema {
                        message: e.to_string(),
                    })
            })
            .transpose()?;

        debug!(
            name = config.name.as_deref().unwrap_or("<unnamed>"),
            defaults = config.default_state.len(),
            suppress_abort = config.suppress_abort,
            "pipeline configured"
        );

        Ok(Self {
            factories: Vec::new(),
            default_state: config.default_state,
            suppress_abort: config.suppress_abort,
            state_schema,
        })
    }

    /// Set the state every run starts from
    ///
    /// Keys passed to [`Pipeline::run_with_state`] override these.
    pub fn with_default_state(mut self, state: State) -> Self {
        self.default_state = state;
        self
    }

    pub fn default_state(&self) -> &State {
        &self.default_state
    }

    pub fn default_state_mut(&mut self) -> &mut State {
        &mut self.default_state
    }

    /// Return `Null` instead of failing when a run ends through an abort
    pub fn suppress_abort(mut self, suppress: bool) -> Self {
        self.suppress_abort = suppress;
        self
    }

    pub fn set_suppress_abort(&mut self, suppress: bool) -> &mut Self {
        self.suppress_abort = suppress;
        self
    }

    pub fn suppresses_abort(&self) -> bool {
        self.suppress_abort
    }

    /// Append a middleware; every run shares this one instance
    pub fn use_middleware<M: Middleware + 'static>(&mut self, middleware: M) -> &mut Self {
        self.use_middleware_factory(Shared::new(middleware))
    }

    /// Append a closure middleware, see [`from_fn`]
    pub fn use_fn<F>(&mut self, f: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut Context, Next) -> Flow<'a> + Send + Sync + 'static,
    {
        self.use_middleware(from_fn(f))
    }

    /// Append a factory that builds a fresh middleware for every run
    ///
    /// # Example
    /// ```
    /// use flowdeck::{Flow, Pipeline, from_fn};
    /// use std::sync::Arc;
    /// use std::sync::atomic::{AtomicU64, Ordering};
    ///
    /// let mut pipeline = Pipeline::new();
    /// pipeline.use_factory(|_ctx| {
    ///     // per-run counter, reset for every run
    ///     let calls = Arc::new(AtomicU64::new(0));
    ///     from_fn(move |_ctx, _next| Flow::ok(calls.fetch_add(1, Ordering::SeqCst)))
    /// });
    ///
    /// assert_eq!(pipeline.run().into_ready().unwrap().unwrap(), 0);
    /// assert_eq!(pipeline.run().into_ready().unwrap().unwrap(), 0);
    /// ```
    pub fn use_factory<F, M>(&mut self, factory: F) -> &mut Self
    where
        F: Fn(&Context) -> M + Send + Sync + 'static,
        M: Middleware + 'static,
    {
        self.use_middleware_factory(factory_fn(factory))
    }

    pub fn use_middleware_factory<T: MiddlewareFactory + 'static>(&mut self, factory: T) -> &mut Self {
        self.factories.push(Arc::new(factory));
        self
    }

    /// Append an action that runs and then continues to the next middleware
    ///
    /// The action's value becomes the result only when it is the last stage.
    pub fn add_action<F>(&mut self, action: F) -> &mut Self
    where
        F: Fn(&mut Context) -> FlowResult + Send + Sync + 'static,
    {
        self.use_middleware(Action::new(action))
    }

    /// Add a middleware (fluent API - consumes self)
    pub fn middleware<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.use_middleware(middleware);
        self
    }

    /// Add a middleware factory (fluent API - consumes self)
    pub fn factory<F, M>(mut self, factory: F) -> Self
    where
        F: Fn(&Context) -> M + Send + Sync + 'static,
        M: Middleware + 'static,
    {
        self.use_factory(factory);
        self
    }

    /// Add an action (fluent API - consumes self)
    pub fn action<F>(mut self, action: F) -> Self
    where
        F: Fn(&mut Context) -> FlowResult + Send + Sync + 'static,
    {
        self.add_action(action);
        self
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Run the chain with the default state
    ///
    /// # Panics
    ///
    /// See [`Pipeline::run_with_state`]: async middleware start running
    /// inside this call.
    pub fn run(&self) -> Flow<'static> {
        self.run_with_state(State::new())
    }

    /// Run the chain with `state` merged over the default state
    ///
    /// The chain is driven right away up to its first suspension point. A
    /// chain in which no middleware suspends therefore returns a ready
    /// [`Flow`]; otherwise the returned flow must be awaited to finish the
    /// run.
    ///
    /// # Panics
    ///
    /// Async middleware are polled inside this call, in the caller's
    /// context. A middleware that needs a runtime on its first poll, such as
    /// one awaiting `tokio::time::sleep`, panics when `run_with_state` is
    /// called outside that runtime, even if the returned flow is later
    /// driven by it. Call it from within the runtime instead.
    pub fn run_with_state(&self, state: State) -> Flow<'static> {
        let mut seeded = self.default_state.clone();
        seeded.extend(state);

        if let Err(errors) = self.validate_state(&seeded) {
            debug!(errors = errors.len(), "run state rejected by schema");
            return Flow::err(FlowError::InvalidState { errors });
        }

        let invoker = Arc::new(Invoker::new(self.factories.clone()));
        debug!(stages = invoker.len(), "pipeline run started");

        let mut ctx = Context::with_state(seeded);
        let mut run: BoxFuture<'static, FlowResult> =
            Box::pin(async move { invoker.invoke(&mut ctx).await });

        let polled = run.as_mut().now_or_never();
        let flow = match polled {
            Some(outcome) => Flow::ready(outcome),
            None => {
                debug!("pipeline run suspended");
                Flow::from(run)
            }
        };

        let suppress = self.suppress_abort;
        flow.map_result(move |outcome| finish_run(outcome, suppress))
    }

    fn validate_state(&self, state: &State) -> Result<(), Vec<String>> {
        let Some(schema) = &self.state_schema else {
            return Ok(());
        };

        let instance = Value::Object(state.clone().into_iter().collect());
        if schema.is_valid(&instance) {
            return Ok(());
        }

        Err(schema
            .iter_errors(&instance)
            .map(|e| e.to_string())
            .collect())
    }
}

fn finish_run(outcome: FlowResult, suppress_abort: bool) -> FlowResult {
    match outcome {
        Err(FlowError::Aborted { payload }) if suppress_abort => {
            debug!(%payload, "pipeline abort suppressed");
            Ok(Value::Null)
        }
        Err(err) => {
            debug!(error = %err, "pipeline run failed");
            Err(err)
        }
        Ok(value) => {
            debug!("pipeline run completed");
            Ok(value)
        }
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.factories.len())
            .field("default_state", &self.default_state)
            .field("suppress_abort", &self.suppress_abort)
            .field("state_schema", &self.state_schema.is_some())
            .finish()
    }
}
