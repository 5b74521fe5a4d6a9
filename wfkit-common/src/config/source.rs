//! Provenance of configuration values.

use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Default,
    Environment,
    File,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::Environment => write!(f, "environment"),
            Self::File => write!(f, "file"),
        }
    }
}

/// A value and where it came from. `origin` names the variable or file.
#[derive(Debug, Clone, PartialEq)]
pub struct Sourced<T> {
    pub value: T,
    pub source: ConfigSource,
    pub origin: Option<String>,
}

impl<T> Sourced<T> {
    pub fn default_value(value: T) -> Self {
        Self {
            value,
            source: ConfigSource::Default,
            origin: None,
        }
    }

    pub fn from_env(value: T, var: impl Into<String>) -> Self {
        Self {
            value,
            source: ConfigSource::Environment,
            origin: Some(var.into()),
        }
    }

    pub fn from_file(value: T, path: &Path) -> Self {
        Self {
            value,
            source: ConfigSource::File,
            origin: Some(path.display().to_string()),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Sourced<U> {
        Sourced {
            value: f(self.value),
            source: self.source,
            origin: self.origin,
        }
    }

    pub fn into_inner(self) -> T {
        self.value
    }

    /// `default`, `environment (WFKIT_X)` or `file (/path)`.
    pub fn describe(&self) -> String {
        match &self.origin {
            Some(origin) => format!("{} ({origin})", self.source),
            None => self.source.to_string(),
        }
    }
}
