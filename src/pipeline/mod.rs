//! Pipeline types
//!
//! This module contains the composition root and the per-run types that
//! flow through every middleware.

mod chain;
mod context;
mod error;

pub use chain::Pipeline;
pub use context::{Context, State};
pub use error::{FlowError, FlowResult};
