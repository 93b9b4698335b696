//! Configuration types for flowdeck
//!
//! This module contains the declarative JSON settings a pipeline can be
//! built from.

mod error;
mod root;

pub use error::ConfigError;
pub use root::PipelineConfig;
