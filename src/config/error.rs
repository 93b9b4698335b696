use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or applying a [`PipelineConfig`](super::PipelineConfig)
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse pipeline config: {0}")]
    Parse(#[from] serde_json::Error),

    /// The state schema is not a valid JSON Schema
    #[error("failed to compile state schema: {message}")]
    Schema { message: String },
}
