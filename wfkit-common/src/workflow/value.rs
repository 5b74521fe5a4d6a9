//! Open key/value maps used for step inputs and environments.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Step `with:` inputs and `env:` blocks. The recognised keys belong to each
/// action, so the map stays open and each consumer asserts the type it needs.
pub type Inputs = BTreeMap<String, InputValue>;

/// A scalar value as it appears in a workflow file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// A key with no value (`token:`), which GitHub passes as an empty string.
    Null,
}

impl InputValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Booleans, plus the string spellings GitHub expressions produce.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Str(s) => match s.trim() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::Null => "null",
        }
    }
}

impl fmt::Display for InputValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Str(s) => f.write_str(s),
            Self::Null => Ok(()),
        }
    }
}

impl From<&str> for InputValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for InputValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<bool> for InputValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for InputValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

/// Build an [`Inputs`] map from pairs.
pub fn inputs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Inputs
where
    K: Into<String>,
    V: Into<InputValue>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}
