//! Test-support utilities shared by the wfkit crates' test suites.

pub mod log;

pub use log::{LogLine, Phase, ScenarioLog, init_global_test_logging, test_log_dir};
