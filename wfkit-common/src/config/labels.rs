//! Runner-label table.
//!
//! act only knows the GitHub-hosted labels. Every self-hosted label a pipeline
//! may ask for has to be mapped onto a container image or the job never gets
//! scheduled. The table is read-only for the life of the process: install it
//! once at harness start with [`install_runner_labels`], or let
//! [`runner_labels`] load it from `WFKIT_RUNNER_LABELS_FILE`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::env::EnvParser;
use super::source::Sourced;

/// Image used for labels that do not name one explicitly.
pub const DEFAULT_RUNNER_IMAGE: &str = "catthehacker/ubuntu:act-latest";

const BUILTIN_LABELS: &[&str] = &[
    "ubuntu-latest",
    "ubuntu-24.04",
    "ubuntu-22.04",
    "ubuntu-x64",
    "ubuntu-x64-small",
    "ubuntu-x64-large",
    "ubuntu-x64-xlarge",
    "ubuntu-x64-2xlarge",
    "ubuntu-arm64",
    "ubuntu-arm64-small",
    "ubuntu-arm64-large",
    "ubuntu-arm64-xlarge",
    "ubuntu-arm64-2xlarge",
];

static INSTALLED: OnceLock<Arc<RunnerLabels>> = OnceLock::new();

#[derive(Debug, Error)]
pub enum LabelsError {
    #[error("failed to read runner labels from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid runner labels file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("runner labels file {0} defines no labels")]
    Empty(PathBuf),

    #[error("runner labels were already installed for this process")]
    AlreadyInstalled,

    #[error("invalid runner labels configuration: {0}")]
    Env(String),
}

/// Mapping from runner label to the container image act should use for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerLabels {
    #[serde(default = "default_image")]
    pub default_image: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

fn default_image() -> String {
    DEFAULT_RUNNER_IMAGE.to_string()
}

impl RunnerLabels {
    /// The compiled-in fleet, every label mapped to [`DEFAULT_RUNNER_IMAGE`].
    pub fn builtin() -> Self {
        Self::uniform(BUILTIN_LABELS.iter().copied(), DEFAULT_RUNNER_IMAGE)
    }

    /// Map every label onto the same image.
    pub fn uniform<'a>(labels: impl IntoIterator<Item = &'a str>, image: &str) -> Self {
        Self {
            default_image: image.to_string(),
            labels: labels
                .into_iter()
                .map(|label| (label.to_string(), image.to_string()))
                .collect(),
        }
    }

    /// Parse a TOML table. Labels mapped to an empty string use `default_image`.
    pub fn from_toml_str(content: &str, origin: &Path) -> Result<Self, LabelsError> {
        let mut parsed: Self = toml::from_str(content).map_err(|source| LabelsError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        if parsed.labels.is_empty() {
            return Err(LabelsError::Empty(origin.to_path_buf()));
        }
        let fallback = parsed.default_image.clone();
        for image in parsed.labels.values_mut() {
            if image.trim().is_empty() {
                *image = fallback.clone();
            }
        }
        Ok(parsed)
    }

    pub fn from_file(path: &Path) -> Result<Self, LabelsError> {
        let content = std::fs::read_to_string(path).map_err(|source| LabelsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content, path)
    }

    /// Load from `WFKIT_RUNNER_LABELS_FILE`, or fall back to [`RunnerLabels::builtin`].
    pub fn from_env() -> Result<Sourced<Self>, LabelsError> {
        let mut parser = EnvParser::new();
        let path = parser.get_optional_path("RUNNER_LABELS_FILE", true);
        if parser.has_errors() {
            let message = parser
                .take_errors()
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(LabelsError::Env(message));
        }
        match path.value {
            Some(path) => Ok(Sourced::from_file(Self::from_file(&path)?, &path)),
            None => Ok(Sourced::default_value(Self::builtin())),
        }
    }

    /// Image for a label, if the table knows it.
    pub fn image_for(&self, label: &str) -> Option<&str> {
        self.labels.get(label).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// `label=image` pairs in label order, ready for act's `-P` flag.
    pub fn platform_args(&self) -> Vec<String> {
        self.labels
            .iter()
            .map(|(label, image)| format!("{label}={image}"))
            .collect()
    }
}

impl Default for RunnerLabels {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Install the process-wide table. Fails if one is already in place.
pub fn install_runner_labels(labels: RunnerLabels) -> Result<(), LabelsError> {
    INSTALLED
        .set(Arc::new(labels))
        .map_err(|_| LabelsError::AlreadyInstalled)
}

/// The process-wide table, loading it from the environment on first use.
pub fn runner_labels() -> Result<Arc<RunnerLabels>, LabelsError> {
    if let Some(labels) = INSTALLED.get() {
        return Ok(Arc::clone(labels));
    }
    let loaded = RunnerLabels::from_env()?;
    tracing::debug!(
        labels = loaded.value.len(),
        source = %loaded.describe(),
        "runner label table loaded"
    );
    Ok(Arc::clone(
        INSTALLED.get_or_init(|| Arc::new(loaded.into_inner())),
    ))
}
