use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

use super::FlowError;

/// Per-run state mapping shared by every middleware of a run
pub type State = HashMap<String, Value>;

/// Execution context of a single pipeline run
///
/// A fresh context is created for every run and dropped when the run ends.
/// Middleware read and write [`State`] through it, and short-circuit the
/// run with [`Context::abort`].
#[derive(Debug, Clone, Default)]
pub struct Context {
    /// Variable storage
    state: State,
    aborted: bool,
    abort_payload: Option<Value>,
}

impl Context {
    /// Create a new empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context seeded with `state`
    pub fn with_state(state: State) -> Self {
        Self {
            state,
            ..Self::default()
        }
    }

    /// Create a new context with a variable set
    ///
    /// # Example
    /// ```
    /// use flowdeck::pipeline::Context;
    /// use serde_json::json;
    ///
    /// let ctx = Context::new()
    ///     .with_var("user", json!({"id": "123", "email": "user@example.com"}))
    ///     .with_var("count", json!(42));
    /// assert!(ctx.has("count"));
    /// ```
    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.state.insert(name.into(), value.into());
        self
    }

    /// Set a variable, returning the value it replaced
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.state.insert(name.into(), value.into())
    }

    /// Get a variable by name (top-level only)
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.state.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.state.get_mut(name)
    }

    /// Get a variable decoded into `T`
    ///
    /// Returns `Ok(None)` when the variable is missing and a
    /// [`FlowError::Middleware`] wrapping the serde error when it does not
    /// decode.
    pub fn get_as<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, FlowError> {
        self.state
            .get(name)
            .map(|value| T::deserialize(value).map_err(FlowError::middleware))
            .transpose()
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.state.remove(name)
    }

    /// Get a value using a dotted path (e.g., "user.email" or "items.0")
    ///
    /// # Example
    /// ```
    /// use flowdeck::pipeline::Context;
    /// use serde_json::json;
    ///
    /// let ctx = Context::new()
    ///     .with_var("user", json!({"id": "123", "email": "user@example.com"}));
    ///
    /// assert_eq!(
    ///     ctx.get_path("user.email").unwrap(),
    ///     &json!("user@example.com")
    /// );
    /// ```
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.state.get(parts.next()?)?;

        for part in parts {
            current = match current {
                Value::Object(map) => map.get(part)?,
                Value::Array(arr) => arr.get(part.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }

        Some(current)
    }

    /// Query the whole state with a JSONPath expression
    ///
    /// The state is viewed as a single JSON object whose keys are the
    /// variable names, so `$.user.email` reads the `email` field of the
    /// `user` variable.
    pub fn query(&self, path: &str) -> Result<Vec<Value>, FlowError> {
        use jsonpath_rust::JsonPath;

        let state_json = serde_json::to_value(&self.state)
            .map_err(|e| FlowError::custom(format!("Failed to serialize state: {}", e)))?;

        let results = state_json
            .query(path)
            .map_err(|e| FlowError::custom(format!("JSONPath query failed for '{}': {}", path, e)))?;

        Ok(results.into_iter().cloned().collect())
    }

    /// Get all variables as a reference to the internal HashMap
    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut State {
        &mut self.state
    }

    pub fn into_state(self) -> State {
        self.state
    }

    /// Check if a variable exists
    pub fn has(&self, name: &str) -> bool {
        self.state.contains_key(name)
    }

    /// Check if a path exists
    pub fn has_path(&self, path: &str) -> bool {
        self.get_path(path).is_some()
    }

    /// Mark the run aborted and build the abort signal
    ///
    /// The returned error must be returned by the middleware for the abort to
    /// take effect; it then unwinds through every enclosing continuation like
    /// any other failure.
    ///
    /// ```
    /// use flowdeck::Pipeline;
    /// use serde_json::json;
    ///
    /// let pipeline = Pipeline::new()
    ///     .action(|ctx| Err(ctx.abort(json!("forbidden"))))
    ///     .action(|_| unreachable!());
    ///
    /// let err = pipeline.run().into_ready().unwrap().unwrap_err();
    /// assert_eq!(err.abort_payload(), Some(&json!("forbidden")));
    /// ```
    pub fn abort(&mut self, payload: impl Into<Value>) -> FlowError {
        let payload = payload.into();
        debug!(%payload, "pipeline abort requested");
        self.aborted = true;
        self.abort_payload = Some(payload.clone());
        FlowError::Aborted { payload }
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    pub fn abort_payload(&self) -> Option<&Value> {
        self.abort_payload.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[test]
    fn test_new_context() {
        let ctx = Context::new();
        assert!(ctx.state().is_empty());
        assert!(!ctx.is_aborted());
        assert_eq!(ctx.abort_payload(), None);
    }

    #[test]
    fn test_with_var() {
        let ctx = Context::new()
            .with_var("name", json!("Alice"))
            .with_var("age", 30);

        assert_eq!(ctx.get("name"), Some(&json!("Alice")));
        assert_eq!(ctx.get("age"), Some(&json!(30)));
    }

    #[test]
    fn test_set_returns_previous() {
        let mut ctx = Context::new();
        assert_eq!(ctx.set("name", "Bob"), None);
        assert_eq!(ctx.set("name", "Carol"), Some(json!("Bob")));
        assert_eq!(ctx.get("name"), Some(&json!("Carol")));
    }

    #[test]
    fn test_get_mut_and_remove() {
        let mut ctx = Context::new().with_var("hits", 1);
        *ctx.get_mut("hits").unwrap() = json!(2);
        assert_eq!(ctx.remove("hits"), Some(json!(2)));
        assert!(!ctx.has("hits"));
    }

    #[test]
    fn test_get_as() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct User {
            id: u32,
            name: String,
        }

        let ctx = Context::new()
            .with_var("user", json!({"id": 7, "name": "Dana"}))
            .with_var("broken", json!("not a user"));

        assert_eq!(
            ctx.get_as::<User>("user").unwrap(),
            Some(User { id: 7, name: "Dana".to_string() })
        );
        assert_eq!(ctx.get_as::<User>("missing").unwrap(), None);
        assert!(ctx.get_as::<User>("broken").is_err());
    }

    #[test]
    fn test_get_path_nested_object() {
        let ctx = Context::new()
            .with_var("user", json!({
                "id": "123",
                "profile": {
                    "name": "Alice",
                    "age": 30
                }
            }));

        assert_eq!(ctx.get_path("user.id"), Some(&json!("123")));
        assert_eq!(ctx.get_path("user.profile.name"), Some(&json!("Alice")));
        assert_eq!(ctx.get_path("user.missing"), None);
        assert_eq!(ctx.get_path("missing.path"), None);
    }

    #[test]
    fn test_get_path_array_index() {
        let ctx = Context::new()
            .with_var("items", json!([{"name": "Item 1"}, {"name": "Item 2"}]));

        assert_eq!(ctx.get_path("items.1.name"), Some(&json!("Item 2")));
        assert_eq!(ctx.get_path("items.99"), None);
        assert_eq!(ctx.get_path("items.first"), None);
    }

    #[test]
    fn test_has_path() {
        let ctx = Context::new().with_var("count", 42);

        assert!(ctx.has_path("count"));
        assert!(!ctx.has_path("count.something"));
        assert!(!ctx.has_path("missing"));
    }

    #[test]
    fn test_query_jsonpath() {
        let ctx = Context::new()
            .with_var("user", json!({"email": "alice@example.com"}))
            .with_var("items", json!([
                {"name": "Item 1", "price": 10},
                {"name": "Item 2", "price": 20}
            ]));

        assert_eq!(ctx.query("$.user.email").unwrap(), vec![json!("alice@example.com")]);
        assert_eq!(
            ctx.query("$.items[*].name").unwrap(),
            vec![json!("Item 1"), json!("Item 2")]
        );
        assert!(ctx.query("$.nothing").unwrap().is_empty());
    }

    #[test]
    fn test_query_invalid_expression() {
        let ctx = Context::new();
        let err = ctx.query("$[").unwrap_err();
        assert!(err.to_string().contains("JSONPath query failed"));
    }

    #[test]
    fn test_abort_marks_context() {
        let mut ctx = Context::new();
        let err = ctx.abort(json!({"status": 403}));

        assert!(ctx.is_aborted());
        assert_eq!(ctx.abort_payload(), Some(&json!({"status": 403})));
        assert_eq!(err.abort_payload(), Some(&json!({"status": 403})));
    }

    #[test]
    fn test_into_state() {
        let ctx = Context::with_state(State::from([("a".to_string(), json!(1))]));
        let state = ctx.into_state();
        assert_eq!(state.get("a"), Some(&json!(1)));
    }
}
