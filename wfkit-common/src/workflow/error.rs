use std::path::PathBuf;

use thiserror::Error;

use crate::mocks::MockError;

/// Errors from building, mutating, or serialising a workflow.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("failed to read workflow {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse workflow: {0}")]
    Parse(#[source] serde_yaml_ng::Error),

    #[error("failed to marshal workflow: {0}")]
    Marshal(#[source] serde_yaml_ng::Error),

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("job {job} has no step with id {step}")]
    StepNotFound { job: String, step: String },

    #[error("job {job} has {len} steps, index {index} is out of range")]
    StepIndexOutOfRange { job: String, index: usize, len: usize },

    #[error("replacing a step in job {0} requires at least one replacement step")]
    NoReplacementSteps(String),

    #[error("job {0} calls a reusable workflow and has no steps to edit")]
    ReusableJob(String),

    #[error("job {0} declares both `uses` and `steps`")]
    UsesWithSteps(String),

    #[error("job {job} needs {needs}, which is not defined")]
    MissingDependency { job: String, needs: String },

    #[error("mocking step {step} in job {job}: {source}")]
    Mock {
        job: String,
        step: String,
        #[source]
        source: MockError,
    },
}
