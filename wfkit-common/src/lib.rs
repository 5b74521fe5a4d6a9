//! Shared library for wfkit: the workflow model and its mutations, mock step
//! factories, the act runner, and the configuration and test-logging layers
//! the other crates build on.

pub mod config;
pub mod e2e;
pub mod mocks;
pub mod testing;
pub mod util;
pub mod workflow;

pub use config::{HarnessConfig, RunnerLabels};
pub use e2e::{Event, RunResult, Runner, RunnerError};
pub use workflow::{Job, Step, TestingWorkflow, Workflow, WorkflowError};
