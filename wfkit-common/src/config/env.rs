//! Typed reads of `WFKIT_*` environment variables.
//!
//! A parser collects every invalid value instead of stopping at the first, so
//! a misconfigured CI job reports all of its mistakes in one go.

use std::env;
use std::path::PathBuf;

use thiserror::Error;

use super::source::Sourced;

const PREFIX: &str = "WFKIT_";

#[derive(Debug, Error)]
pub enum EnvError {
    #[error("invalid value for {var}: expected {expected}, got '{value}'")]
    InvalidValue {
        var: String,
        expected: String,
        value: String,
    },

    #[error("{var} points at {path}, which does not exist")]
    PathNotFound { var: String, path: PathBuf },

    #[error("{var} must be one of {allowed}, got '{value}'")]
    NotOneOf {
        var: String,
        value: String,
        allowed: String,
    },
}

/// Reads `WFKIT_<name>` variables, recording errors as it goes.
#[derive(Debug, Default)]
pub struct EnvParser {
    errors: Vec<EnvError>,
}

impl EnvParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn errors(&self) -> &[EnvError] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn take_errors(&mut self) -> Vec<EnvError> {
        std::mem::take(&mut self.errors)
    }

    fn read(name: &str) -> (String, Option<String>) {
        let var = format!("{PREFIX}{name}");
        let value = env::var(&var).ok();
        (var, value)
    }

    pub fn get_string(&mut self, name: &str, default: &str) -> Sourced<String> {
        match Self::read(name) {
            (var, Some(value)) => Sourced::from_env(value, var),
            (_, None) => Sourced::default_value(default.to_string()),
        }
    }

    /// An unset variable yields `default`; an empty one explicitly disables
    /// the setting.
    pub fn get_disableable(&mut self, name: &str, default: Option<&str>) -> Sourced<Option<String>> {
        match Self::read(name) {
            (var, Some(value)) if value.trim().is_empty() => Sourced::from_env(None, var),
            (var, Some(value)) => Sourced::from_env(Some(value), var),
            (_, None) => Sourced::default_value(default.map(str::to_string)),
        }
    }

    /// `1/true/yes/on` or `0/false/no/off/""`, case-insensitive.
    pub fn get_bool(&mut self, name: &str, default: bool) -> Sourced<bool> {
        let (var, Some(value)) = Self::read(name) else {
            return Sourced::default_value(default);
        };
        let parsed = match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" | "" => false,
            _ => {
                self.errors.push(EnvError::InvalidValue {
                    var: var.clone(),
                    expected: "a boolean (true/false/1/0/yes/no)".to_string(),
                    value,
                });
                default
            }
        };
        Sourced::from_env(parsed, var)
    }

    /// A value restricted to `allowed`. Unset falls back to `default`; empty
    /// means "leave it to act" (`None`).
    pub fn get_choice(
        &mut self,
        name: &str,
        allowed: &[&str],
        default: Option<&str>,
    ) -> Sourced<Option<String>> {
        let (var, Some(value)) = Self::read(name) else {
            return Sourced::default_value(default.map(str::to_string));
        };
        let value = value.trim().to_string();
        if value.is_empty() {
            return Sourced::from_env(None, var);
        }
        if !allowed.contains(&value.as_str()) {
            self.errors.push(EnvError::NotOneOf {
                var: var.clone(),
                value,
                allowed: allowed.join(", "),
            });
            return Sourced::from_env(default.map(str::to_string), var);
        }
        Sourced::from_env(Some(value), var)
    }

    /// A path with `~/` expanded. Unset or empty is `None`; with
    /// `must_exist` a missing path is an error.
    pub fn get_optional_path(&mut self, name: &str, must_exist: bool) -> Sourced<Option<PathBuf>> {
        let value = match Self::read(name) {
            (var, Some(value)) if value.trim().is_empty() => return Sourced::from_env(None, var),
            (var, Some(value)) => (var, value),
            (_, None) => return Sourced::default_value(None),
        };
        let (var, raw) = value;
        let path = expand_home(raw.trim());
        if must_exist && !path.exists() {
            self.errors.push(EnvError::PathNotFound {
                var: var.clone(),
                path: path.clone(),
            });
        }
        Sourced::from_env(Some(path), var)
    }

    /// A path with `~/` expanded, or `default`.
    pub fn get_path(&mut self, name: &str, default: &str) -> Sourced<PathBuf> {
        match Self::read(name) {
            (var, Some(value)) if !value.trim().is_empty() => {
                Sourced::from_env(expand_home(value.trim()), var)
            }
            _ => Sourced::default_value(PathBuf::from(default)),
        }
    }
}

fn expand_home(value: &str) -> PathBuf {
    if let Some(rest) = value.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(value)
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;
    use crate::config::ConfigSource;
    use crate::config::env_test_lock;

    fn set(var: &str, value: &str) {
        // SAFETY: callers hold the env lock
        unsafe { env::set_var(var, value) };
    }

    fn unset(var: &str) {
        // SAFETY: callers hold the env lock
        unsafe { env::remove_var(var) };
    }

    #[test]
    fn test_bool_spellings() {
        let _guard = env_test_lock();
        for (raw, expected) in [("YES", true), ("on", true), ("0", false), ("", false)] {
            set("WFKIT_TEST_FLAG", raw);
            let mut parser = EnvParser::new();
            assert_eq!(parser.get_bool("TEST_FLAG", !expected).value, expected, "{raw:?}");
            assert!(!parser.has_errors());
        }
        unset("WFKIT_TEST_FLAG");
    }

    #[test]
    fn test_bad_bool_is_reported_and_defaulted() {
        let _guard = env_test_lock();
        set("WFKIT_TEST_FLAG", "perhaps");
        let mut parser = EnvParser::new();
        assert!(parser.get_bool("TEST_FLAG", true).value);
        let errors = parser.take_errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("WFKIT_TEST_FLAG"));
        assert!(!parser.has_errors());
        unset("WFKIT_TEST_FLAG");
    }

    #[test]
    fn test_choice() {
        let _guard = env_test_lock();
        let arch = ["linux/amd64", "linux/arm64"];

        unset("WFKIT_TEST_ARCH");
        let mut parser = EnvParser::new();
        let value = parser.get_choice("TEST_ARCH", &arch, Some("linux/amd64"));
        assert_eq!(value.value.as_deref(), Some("linux/amd64"));
        assert_eq!(value.source, ConfigSource::Default);

        set("WFKIT_TEST_ARCH", "linux/arm64");
        let value = parser.get_choice("TEST_ARCH", &arch, Some("linux/amd64"));
        assert_eq!(value.value.as_deref(), Some("linux/arm64"));

        set("WFKIT_TEST_ARCH", "");
        assert_eq!(parser.get_choice("TEST_ARCH", &arch, Some("linux/amd64")).value, None);

        set("WFKIT_TEST_ARCH", "s390x");
        parser.get_choice("TEST_ARCH", &arch, None);
        assert!(matches!(parser.errors(), [EnvError::NotOneOf { .. }]));
        unset("WFKIT_TEST_ARCH");
    }

    #[test]
    fn test_disableable() {
        let _guard = env_test_lock();
        unset("WFKIT_TEST_CMD");
        let mut parser = EnvParser::new();
        assert_eq!(
            parser.get_disableable("TEST_CMD", Some("gh auth token")).value.as_deref(),
            Some("gh auth token")
        );
        set("WFKIT_TEST_CMD", "  ");
        assert_eq!(parser.get_disableable("TEST_CMD", Some("gh auth token")).value, None);
        set("WFKIT_TEST_CMD", "cat token.txt");
        let value = parser.get_disableable("TEST_CMD", None);
        assert_eq!(value.value.as_deref(), Some("cat token.txt"));
        assert_eq!(value.describe(), "environment (WFKIT_TEST_CMD)");
        unset("WFKIT_TEST_CMD");
    }

    #[test]
    fn test_missing_path_is_reported() {
        let _guard = env_test_lock();
        set("WFKIT_TEST_FILE", "/definitely/not/here/labels.toml");
        let mut parser = EnvParser::new();
        let value = parser.get_optional_path("TEST_FILE", true);
        assert_eq!(
            value.value.as_deref(),
            Some(std::path::Path::new("/definitely/not/here/labels.toml"))
        );
        assert!(matches!(parser.errors(), [EnvError::PathNotFound { .. }]));
        unset("WFKIT_TEST_FILE");
    }

    #[test]
    fn test_home_expansion() {
        let Some(home) = dirs::home_dir() else {
            return;
        };
        assert_eq!(expand_home("~/bin/act"), home.join("bin/act"));
        assert_eq!(expand_home("/usr/bin/act"), PathBuf::from("/usr/bin/act"));
    }
}
