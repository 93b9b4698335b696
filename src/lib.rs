//! flowdeck - A middleware pipeline executor
//!
//! This library composes an ordered list of middleware into a single
//! callable chain. Each middleware decides whether, when and how many times
//! to run the rest of the chain through its [`Next`] continuation, shares
//! per-run state through the [`Context`], and can short-circuit the run with
//! [`Context::abort`].
//!
//! Synchronous and asynchronous middleware mix freely: every middleware
//! returns a [`Flow`], which is either ready or pending, and a run that never
//! suspends completes without an executor.
//!
//! ```
//! use flowdeck::{Flow, Pipeline, from_fn};
//! use serde_json::json;
//!
//! let pipeline = Pipeline::new()
//!     .middleware(from_fn(|ctx, next| {
//!         if ctx.get("token").is_none() {
//!             return Flow::err(ctx.abort(json!({"status": 401})));
//!         }
//!         next.call(ctx)
//!     }))
//!     .action(|ctx| Ok(json!({"user": ctx.get("token")})));
//!
//! let err = pipeline.run().into_ready().unwrap().unwrap_err();
//! assert_eq!(err.abort_payload(), Some(&json!({"status": 401})));
//! ```

pub mod config;
pub mod executor;
pub mod pipeline;

// Re-export commonly used types
pub use config::{ConfigError, PipelineConfig};
pub use executor::{Flow, Middleware, MiddlewareFactory, Next, factory_fn, from_fn};
pub use pipeline::{Context, FlowError, FlowResult, Pipeline, State};
