//! Settings the runner needs to invoke act.

use std::collections::BTreeMap;
use std::path::PathBuf;

use super::env::{EnvError, EnvParser};

/// The repository whose actions are redirected onto the local working tree.
pub const DEFAULT_SELF_REPOSITORY: &str = "grafana/plugin-ci-workflows@main";

/// Platforms act accepts for `--container-architecture`.
pub const CONTAINER_ARCHITECTURES: &[&str] = &["linux/amd64", "linux/arm64", "linux/arm/v7"];

/// Configuration for the act runner.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// act executable (bare name resolved on `PATH`, or a path).
    pub act_binary: PathBuf,
    /// Working tree act executes in; workflow files are written below it.
    pub repo_root: PathBuf,
    /// `owner/repo@ref` redirected onto `repo_root`.
    pub self_repository: String,
    /// `--container-architecture` value; `None` leaves act's default.
    pub container_architecture: Option<String>,
    /// Shell command whose output becomes the `GITHUB_TOKEN` secret.
    pub token_command: Option<String>,
    /// Leave temporary workflow and event files behind when a run fails.
    pub keep_files_on_failure: bool,
    /// Pass `--verbose` to act.
    pub verbose: bool,
    /// Extra environment for the act process itself.
    pub env_vars: BTreeMap<String, String>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            act_binary: PathBuf::from("act"),
            repo_root: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            self_repository: DEFAULT_SELF_REPOSITORY.to_string(),
            container_architecture: Some("linux/amd64".to_string()),
            token_command: Some("gh auth token".to_string()),
            keep_files_on_failure: true,
            verbose: false,
            env_vars: BTreeMap::new(),
        }
    }
}

impl HarnessConfig {
    /// Read `WFKIT_*` overrides on top of the defaults. All invalid values are
    /// reported together.
    pub fn from_env() -> Result<Self, Vec<EnvError>> {
        let defaults = Self::default();
        let mut parser = EnvParser::new();

        let act_binary = parser.get_path("ACT_BINARY", "act");
        let repo_root = parser.get_optional_path("REPO_ROOT", true);
        let self_repository = parser.get_string("SELF_REPOSITORY", DEFAULT_SELF_REPOSITORY);
        let container_architecture = parser.get_choice(
            "CONTAINER_ARCHITECTURE",
            CONTAINER_ARCHITECTURES,
            defaults.container_architecture.as_deref(),
        );
        let token_command =
            parser.get_disableable("TOKEN_COMMAND", defaults.token_command.as_deref());
        let keep_files_on_failure = parser.get_bool("KEEP_FILES_ON_FAILURE", true);
        let verbose = parser.get_bool("VERBOSE", false);

        tracing::debug!(
            act_binary = %act_binary.describe(),
            repo_root = %repo_root.describe(),
            self_repository = %self_repository.describe(),
            container_architecture = %container_architecture.describe(),
            token_command = %token_command.describe(),
            keep_files_on_failure = %keep_files_on_failure.describe(),
            "harness configuration sources"
        );

        if parser.has_errors() {
            return Err(parser.take_errors());
        }

        Ok(Self {
            act_binary: act_binary.into_inner(),
            repo_root: repo_root.into_inner().unwrap_or(defaults.repo_root),
            self_repository: self_repository.into_inner(),
            container_architecture: container_architecture.into_inner(),
            token_command: token_command.into_inner(),
            keep_files_on_failure: keep_files_on_failure.into_inner(),
            verbose: verbose.into_inner(),
            env_vars: BTreeMap::new(),
        })
    }

    /// Resolve `act_binary` to an absolute path when it is a bare name.
    pub fn resolved_act_binary(&self) -> PathBuf {
        if self.act_binary.components().count() == 1 {
            if let Ok(found) = which::which(&self.act_binary) {
                return found;
            }
        }
        self.act_binary.clone()
    }

    pub fn act_binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.act_binary = path.into();
        self
    }

    pub fn repo_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.repo_root = path.into();
        self
    }

    pub fn token_command(mut self, command: Option<String>) -> Self {
        self.token_command = command;
        self
    }

    pub fn keep_files_on_failure(mut self, keep: bool) -> Self {
        self.keep_files_on_failure = keep;
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env_vars.insert(key.to_string(), value.to_string());
        self
    }
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;
    use crate::config::env_test_lock;

    const VARS: &[&str] = &[
        "WFKIT_ACT_BINARY",
        "WFKIT_TOKEN_COMMAND",
        "WFKIT_VERBOSE",
        "WFKIT_KEEP_FILES_ON_FAILURE",
        "WFKIT_SELF_REPOSITORY",
        "WFKIT_CONTAINER_ARCHITECTURE",
    ];

    fn cleanup_env() {
        for var in VARS {
            // SAFETY: callers hold the env lock
            unsafe { std::env::remove_var(var) };
        }
    }

    #[test]
    fn test_from_env_defaults() {
        let _guard = env_test_lock();
        cleanup_env();

        let config = HarnessConfig::from_env().unwrap();
        assert_eq!(config.act_binary, PathBuf::from("act"));
        assert_eq!(config.self_repository, DEFAULT_SELF_REPOSITORY);
        assert_eq!(config.token_command.as_deref(), Some("gh auth token"));
        assert!(config.keep_files_on_failure);
    }

    #[test]
    fn test_from_env_overrides() {
        let _guard = env_test_lock();
        cleanup_env();
        // SAFETY: env lock held
        unsafe {
            std::env::set_var("WFKIT_ACT_BINARY", "/opt/act/bin/act");
            std::env::set_var("WFKIT_TOKEN_COMMAND", "");
            std::env::set_var("WFKIT_VERBOSE", "yes");
            std::env::set_var("WFKIT_CONTAINER_ARCHITECTURE", "linux/arm64");
        }

        let config = HarnessConfig::from_env().unwrap();
        assert_eq!(config.act_binary, PathBuf::from("/opt/act/bin/act"));
        assert!(config.token_command.is_none());
        assert!(config.verbose);
        assert_eq!(config.container_architecture.as_deref(), Some("linux/arm64"));

        cleanup_env();
    }

    #[test]
    fn test_from_env_collects_errors() {
        let _guard = env_test_lock();
        cleanup_env();
        // SAFETY: env lock held
        unsafe {
            std::env::set_var("WFKIT_VERBOSE", "loud");
            std::env::set_var("WFKIT_KEEP_FILES_ON_FAILURE", "sometimes");
            std::env::set_var("WFKIT_CONTAINER_ARCHITECTURE", "windows/amd64");
        }

        let errors = HarnessConfig::from_env().unwrap_err();
        assert_eq!(errors.len(), 3);

        cleanup_env();
    }
}
