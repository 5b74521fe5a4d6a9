//! Synthetic trigger-event payloads.

use serde_json::{Map, Value};

use crate::workflow::Inputs;

/// Key every payload carries so a pipeline can tell it is running under the
/// harness (`github.event.act`).
pub const ACT_SENTINEL: &str = "act";

/// An event name plus the JSON payload act exposes as `github.event`.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    name: String,
    payload: Map<String, Value>,
}

impl Event {
    /// An arbitrary event with an empty payload.
    pub fn named(name: impl Into<String>) -> Self {
        let mut payload = Map::new();
        payload.insert(ACT_SENTINEL.to_string(), Value::Bool(true));
        Self {
            name: name.into(),
            payload,
        }
    }

    /// A push to `main`.
    pub fn push() -> Self {
        Self::named("push")
            .with("ref", "refs/heads/main")
            .with("before", "0000000000000000000000000000000000000000")
            .with("repository.default_branch", "main")
    }

    /// Pull request #1 from `feature` into `main`.
    pub fn pull_request() -> Self {
        Self::named("pull_request")
            .with("action", "opened")
            .with("number", 1)
            .with("pull_request.number", 1)
            .with("pull_request.head.ref", "feature")
            .with("pull_request.base.ref", "main")
            .with("repository.default_branch", "main")
    }

    /// A manual dispatch with the given inputs.
    pub fn workflow_dispatch(inputs: Inputs) -> Self {
        let inputs: Map<String, Value> = inputs
            .into_iter()
            .map(|(key, value)| {
                let value = serde_json::to_value(&value).unwrap_or(Value::String(value.to_string()));
                (key, value)
            })
            .collect();
        Self::named("workflow_dispatch")
            .with("ref", "refs/heads/main")
            .with("inputs", Value::Object(inputs))
    }

    /// Event for a name the CLI accepts.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "push" => Some(Self::push()),
            "pull_request" => Some(Self::pull_request()),
            "workflow_dispatch" => Some(Self::workflow_dispatch(Inputs::new())),
            _ => None,
        }
    }

    /// Set a value at a dotted path, creating intermediate objects and
    /// replacing any non-object found on the way.
    #[must_use]
    pub fn with(mut self, path: &str, value: impl Into<Value>) -> Self {
        let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
        set_path(&mut self.payload, &segments, value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The payload as written to disk; the sentinel is always `true`.
    pub fn payload(&self) -> Value {
        let mut payload = self.payload.clone();
        payload.insert(ACT_SENTINEL.to_string(), Value::Bool(true));
        Value::Object(payload)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.payload())
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::push()
    }
}

fn set_path(map: &mut Map<String, Value>, segments: &[&str], value: Value) {
    match segments {
        [] => {}
        [last] => {
            map.insert(last.to_string(), value);
        }
        [first, rest @ ..] => {
            let entry = map
                .entry(first.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            if let Value::Object(next) = entry {
                set_path(next, rest, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::inputs;
    use serde_json::json;

    #[test]
    fn test_every_payload_carries_sentinel() {
        for event in [
            Event::push(),
            Event::pull_request(),
            Event::workflow_dispatch(Inputs::new()),
            Event::named("release"),
        ] {
            assert_eq!(event.payload()[ACT_SENTINEL], json!(true), "{}", event.name());
        }
    }

    #[test]
    fn test_sentinel_cannot_be_cleared() {
        let event = Event::push().with("act", false);
        assert_eq!(event.payload()["act"], json!(true));
    }

    #[test]
    fn test_with_creates_nested_objects() {
        let event = Event::push()
            .with("head_commit.author.name", "octocat")
            .with("ref", "refs/tags/v1.0.0");
        let payload = event.payload();
        assert_eq!(payload["head_commit"]["author"]["name"], "octocat");
        assert_eq!(payload["ref"], "refs/tags/v1.0.0");
        assert_eq!(payload["repository"]["default_branch"], "main");
    }

    #[test]
    fn test_with_replaces_scalar_on_path() {
        let event = Event::named("x").with("a", 1).with("a.b", 2);
        assert_eq!(event.payload()["a"], json!({ "b": 2 }));
    }

    #[test]
    fn test_workflow_dispatch_inputs_keep_types() {
        let event = Event::workflow_dispatch(inputs([("environment", "dev")]))
            .with("inputs.dry_run", true);
        let payload = event.payload();
        assert_eq!(event.name(), "workflow_dispatch");
        assert_eq!(payload["inputs"]["environment"], "dev");
        assert_eq!(payload["inputs"]["dry_run"], true);
    }

    #[test]
    fn test_from_name() {
        assert_eq!(Event::from_name("pull_request").unwrap().name(), "pull_request");
        assert!(Event::from_name("schedule").is_none());
    }

    #[test]
    fn test_to_json_is_valid() {
        let json = Event::pull_request().to_json().unwrap();
        let parsed: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["pull_request"]["base"]["ref"], "main");
    }
}
