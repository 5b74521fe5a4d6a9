//! Configuration for the workflow harness.
//!
//! - Environment variable parsing with type safety (`WFKIT_` prefix)
//! - Source tracking for debugging
//! - The runner-label table, injected once per process
//! - Assembled harness settings consumed by the runner

pub mod env;
pub mod harness;
pub mod labels;
pub mod source;

pub use env::{EnvError, EnvParser};
pub use harness::{CONTAINER_ARCHITECTURES, DEFAULT_SELF_REPOSITORY, HarnessConfig};
pub use labels::{LabelsError, RunnerLabels, install_runner_labels, runner_labels};
pub use source::{ConfigSource, Sourced};

#[cfg(test)]
pub(crate) fn env_test_lock() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
