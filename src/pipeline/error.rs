use serde_json::Value;
use std::error::Error as StdError;
use std::sync::Arc;
use thiserror::Error;

/// Outcome of a middleware, a continuation or a whole run
pub type FlowResult = Result<Value, FlowError>;

/// Errors that can surface from a pipeline run
///
/// The engine never recovers any of these locally: whatever a middleware
/// returns travels back through every enclosing continuation unchanged.
#[derive(Debug, Clone, Error)]
pub enum FlowError {
    /// A middleware short-circuited the run through [`Context::abort`]
    ///
    /// This is a control flow mechanism rather than a failure, and the only
    /// variant a pipeline can be configured to swallow at the run boundary.
    ///
    /// [`Context::abort`]: crate::pipeline::Context::abort
    #[error("pipeline aborted: {payload}")]
    Aborted { payload: Value },

    /// A failure raised by user middleware code, passed through untouched
    #[error(transparent)]
    Middleware(Arc<dyn StdError + Send + Sync>),

    /// Generic error for custom error messages
    #[error("{message}")]
    Custom { message: String },

    /// The seeded run state was rejected by the configured state schema
    #[error("invalid run state: {}", errors.join("; "))]
    InvalidState { errors: Vec<String> },
}

impl FlowError {
    /// Create an Aborted error carrying `payload`
    ///
    /// Prefer [`Context::abort`](crate::pipeline::Context::abort) inside
    /// middleware, which also marks the context.
    pub fn aborted(payload: impl Into<Value>) -> Self {
        Self::Aborted {
            payload: payload.into(),
        }
    }

    /// Wrap an arbitrary error raised by middleware code
    pub fn middleware<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Middleware(Arc::new(error))
    }

    /// Create a Custom error
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom {
            message: message.into(),
        }
    }

    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }

    /// Payload of an abort, if this is one
    pub fn abort_payload(&self) -> Option<&Value> {
        match self {
            Self::Aborted { payload } => Some(payload),
            _ => None,
        }
    }

    /// Recover the original error type of a [`FlowError::Middleware`] failure
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: StdError + 'static,
    {
        match self {
            Self::Middleware(error) => (**error).downcast_ref::<E>(),
            _ => None,
        }
    }
}
