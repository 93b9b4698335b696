use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::debug;

use super::ConfigError;

/// Declarative settings of a pipeline
///
/// Middleware themselves are registered in code; the configuration only
/// carries what every run of the pipeline shares.
///
/// Example:
/// ```json
/// {
///   "name": "checkout",
///   "defaultState": {"currency": "EUR"},
///   "suppressAbort": true,
///   "stateSchema": {"type": "object", "required": ["currency"]}
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    /// Name used in log output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// State every run starts from; per-run state overrides these keys
    #[serde(default)]
    pub default_state: HashMap<String, Value>,

    /// Whether a run ending through an abort returns `null` instead of failing
    #[serde(default)]
    pub suppress_abort: bool,

    /// JSON Schema the seeded state of every run must satisfy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_schema: Option<Value>,
}

impl PipelineConfig {
    /// Parse a configuration from JSON text
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a JSON configuration file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let config = Self::from_json_str(&json)?;
        debug!(path = %path.display(), "pipeline config loaded");
        Ok(config)
    }
}
