//! What a run produced.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Outputs by job id, then step id, then output name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowOutputs(BTreeMap<String, BTreeMap<String, BTreeMap<String, String>>>);

impl WorkflowOutputs {
    /// Record an output. A later value for the same key replaces the earlier one.
    pub fn insert(&mut self, job: &str, step: &str, name: &str, value: impl Into<String>) {
        self.0
            .entry(job.to_string())
            .or_default()
            .entry(step.to_string())
            .or_default()
            .insert(name.to_string(), value.into());
    }

    pub fn get(&self, job: &str, step: &str, name: &str) -> Option<&str> {
        self.0.get(job)?.get(step)?.get(name).map(String::as_str)
    }

    /// Every step's outputs for one job.
    pub fn job(&self, job: &str) -> Option<&BTreeMap<String, BTreeMap<String, String>>> {
        self.0.get(job)
    }

    /// One step's outputs.
    pub fn step(&self, job: &str, step: &str) -> Option<&BTreeMap<String, String>> {
        self.0.get(job)?.get(step)
    }

    /// Job ids with at least one output.
    pub fn jobs(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationLevel {
    Error,
    Warning,
    Notice,
}

impl AnnotationLevel {
    /// The workflow command that produces this level.
    pub fn from_command(command: &str) -> Option<Self> {
        match command {
            "error" => Some(Self::Error),
            "warning" => Some(Self::Warning),
            "notice" => Some(Self::Notice),
            _ => None,
        }
    }
}

impl fmt::Display for AnnotationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Notice => write!(f, "notice"),
        }
    }
}

/// An `::error::`, `::warning::` or `::notice::` emitted by a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub level: AnnotationLevel,
    /// Empty when the command had no `title=`.
    pub title: String,
    pub message: String,
}

/// Step-summary text written by one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub job: String,
    pub step: String,
    pub text: String,
}

/// Result of one [`super::Runner::run`].
///
/// A failed pipeline is a result with `success == false`, not an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    pub success: bool,
    pub outputs: WorkflowOutputs,
    pub annotations: Vec<Annotation>,
    pub summaries: Vec<Summary>,
    /// `success`, `failure` or `skipped` by job id, as act reports them.
    pub job_results: BTreeMap<String, String>,
}

impl RunResult {
    pub fn output(&self, job: &str, step: &str, name: &str) -> Option<&str> {
        self.outputs.get(job, step, name)
    }

    pub fn annotations_at(&self, level: AnnotationLevel) -> impl Iterator<Item = &Annotation> {
        self.annotations.iter().filter(move |a| a.level == level)
    }

    /// True when some error annotation's message contains `needle`.
    pub fn has_error_containing(&self, needle: &str) -> bool {
        self.annotations_at(AnnotationLevel::Error)
            .any(|a| a.message.contains(needle))
    }

    /// All summary text for a job, fragments joined by newlines.
    pub fn summary_for(&self, job: &str) -> Option<String> {
        let fragments: Vec<&str> = self
            .summaries
            .iter()
            .filter(|s| s.job == job)
            .map(|s| s.text.as_str())
            .collect();
        (!fragments.is_empty()).then(|| fragments.join("\n"))
    }

    pub fn job_succeeded(&self, job: &str) -> Option<bool> {
        self.job_results.get(job).map(|result| result == "success")
    }
}
