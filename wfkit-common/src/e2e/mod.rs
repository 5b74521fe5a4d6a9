//! Running workflows end to end through act.
//!
//! # Example
//!
//! ```no_run
//! use wfkit_common::config::HarnessConfig;
//! use wfkit_common::e2e::{Event, Runner};
//! use wfkit_common::workflow::{TestingWorkflow, Workflow};
//! use std::path::Path;
//!
//! let workflow = TestingWorkflow::from_file(Path::new(".github/workflows/ci.yml"))?;
//! let runner = Runner::new(HarnessConfig::from_env().map_err(|e| anyhow::anyhow!("{e:?}"))?)?;
//! let result = runner.run(&workflow, &Event::push())?;
//! assert!(result.success);
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod artifacts;
pub mod event;
pub mod logstream;
pub mod result;
pub mod runner;

pub use artifacts::{ArtifactError, ArtifactFolder, ArtifactStore};
pub use event::{ACT_SENTINEL, Event};
pub use logstream::{ACT_LOG_TARGET, LogCollector, LogRecord, SUMMARY_MARKER};
pub use result::{Annotation, AnnotationLevel, RunResult, Summary, WorkflowOutputs};
pub use runner::{Runner, RunnerError, capture_step_summaries};
