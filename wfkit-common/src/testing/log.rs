//! Structured trails for tests that drive act.
//!
//! Install the process subscriber once per test binary:
//!
//! ```ignore
//! #[ctor::ctor]
//! fn setup() {
//!     wfkit_common::testing::init_global_test_logging();
//! }
//! ```
//!
//! Each scenario then opens a [`ScenarioLog`], which appends one JSON object
//! per line to `target/test-logs/<scenario>.jsonl`. A scenario that is dropped
//! without [`ScenarioLog::finish`] records whether it panicked.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, Once};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use crate::e2e::RunResult;

const CRATES: &[&str] = &["wfkit", "wfkit_common", "wfkit_doubles"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Setup,
    Run,
    Check,
    Outcome,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Setup => "setup",
            Self::Run => "run",
            Self::Check => "check",
            Self::Outcome => "outcome",
        })
    }
}

static INIT: Once = Once::new();

/// Route `tracing` output from the wfkit crates to the test writer and, as
/// JSON, to `WFKIT_TEST_LOG_FILE` (default `<target>/test-logs/all_tests.jsonl`).
/// `WFKIT_TEST_LOG_LEVEL` picks the level, `info` by default.
pub fn init_global_test_logging() {
    INIT.call_once(|| {
        let level = std::env::var("WFKIT_TEST_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let directives = CRATES
            .iter()
            .map(|krate| format!("{krate}={level}"))
            .collect::<Vec<_>>()
            .join(",");
        let filter = EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new("info"));

        let json = open_shared_log().map(|file| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(Mutex::new(file))
                .with_thread_names(true)
                .with_line_number(true)
        });
        let console = tracing_subscriber::fmt::layer()
            .with_test_writer()
            .compact();

        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(json)
            .with(console)
            .try_init();
    });
}

fn open_shared_log() -> Option<File> {
    let path = match std::env::var_os("WFKIT_TEST_LOG_FILE") {
        Some(custom) => PathBuf::from(custom),
        None => test_log_dir().join("all_tests.jsonl"),
    };
    create_with_parent(&path).ok()
}

fn create_with_parent(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    File::create(path)
}

/// `<target>/test-logs`. Honours `CARGO_TARGET_DIR`, otherwise uses the
/// nearest `target/` above the working directory.
pub fn test_log_dir() -> PathBuf {
    if let Some(target) = std::env::var_os("CARGO_TARGET_DIR") {
        return PathBuf::from(target).join("test-logs");
    }
    let cwd = std::env::current_dir().unwrap_or_default();
    cwd.ancestors()
        .map(|dir| dir.join("target"))
        .find(|target| target.is_dir())
        .unwrap_or_else(|| PathBuf::from("target"))
        .join("test-logs")
}

/// One line of a scenario log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub at: chrono::DateTime<chrono::Utc>,
    pub scenario: String,
    pub phase: Phase,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub elapsed_ms: u64,
}

/// Per-scenario JSONL log, also mirrored to `tracing`.
pub struct ScenarioLog {
    scenario: String,
    started: Instant,
    file: Option<Mutex<File>>,
    lines: Mutex<Vec<LogLine>>,
    finished: bool,
}

impl ScenarioLog {
    pub fn start(scenario: &str) -> Self {
        let file_name = format!("{}.jsonl", scenario.replace(['/', '\\', ':'], "_"));
        let file = create_with_parent(&test_log_dir().join(file_name)).ok();
        let log = Self {
            scenario: scenario.to_string(),
            started: Instant::now(),
            file: file.map(Mutex::new),
            lines: Mutex::new(Vec::new()),
            finished: false,
        };
        log.note(Phase::Setup, "started");
        log
    }

    pub fn note(&self, phase: Phase, message: impl Into<String>) {
        self.push(phase, message.into(), None);
    }

    /// Record `message` with a serialized payload. Unserializable data is
    /// logged as `null`.
    pub fn attach(&self, phase: Phase, message: impl Into<String>, data: &impl Serialize) {
        let value = serde_json::to_value(data).unwrap_or(serde_json::Value::Null);
        self.push(phase, message.into(), Some(value));
    }

    /// Record a finished act run in full.
    pub fn run_result(&self, result: &RunResult) {
        let status = if result.success { "run succeeded" } else { "run failed" };
        self.attach(Phase::Run, status, result);
    }

    fn push(&self, phase: Phase, message: String, data: Option<serde_json::Value>) {
        let line = LogLine {
            at: chrono::Utc::now(),
            scenario: self.scenario.clone(),
            phase,
            message,
            data,
            elapsed_ms: u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };
        tracing::info!(scenario = %line.scenario, %phase, elapsed_ms = line.elapsed_ms, "{}", line.message);

        if let Some(file) = &self.file
            && let Ok(json) = serde_json::to_string(&line)
        {
            let mut file = file.lock().unwrap_or_else(|e| e.into_inner());
            let _ = writeln!(file, "{json}");
        }
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(line);
    }

    pub fn lines(&self) -> Vec<LogLine> {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Mark the scenario as passed.
    pub fn finish(mut self) {
        self.finished = true;
        self.note(Phase::Outcome, "passed");
    }
}

impl Drop for ScenarioLog {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let outcome = if std::thread::panicking() {
            "failed"
        } else {
            "ended early"
        };
        self.note(Phase::Outcome, outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_keep_phase_order_and_data() {
        let log = ScenarioLog::start("testing::log::order");
        log.note(Phase::Run, "invoking act");
        log.attach(Phase::Check, "outputs", &serde_json::json!({ "count": 2 }));

        let lines = log.lines();
        let phases: Vec<_> = lines.iter().map(|l| l.phase).collect();
        assert_eq!(phases, vec![Phase::Setup, Phase::Run, Phase::Check]);
        assert_eq!(lines[2].data.as_ref().unwrap()["count"], 2);
        assert!(lines.iter().all(|l| l.scenario == "testing::log::order"));
        log.finish();
    }

    #[test]
    fn test_run_result_is_attached() {
        let log = ScenarioLog::start("testing::log::result");
        log.run_result(&RunResult::default());
        let lines = log.lines();
        let last = lines.last().unwrap();
        assert_eq!(last.phase, Phase::Run);
        assert_eq!(last.message, "run failed");
        assert_eq!(last.data.as_ref().unwrap()["success"], false);
    }

    #[test]
    fn test_unfinished_scenario_writes_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scenario.jsonl");
        let log = ScenarioLog {
            scenario: "early".to_string(),
            started: Instant::now(),
            file: Some(Mutex::new(File::create(&path).unwrap())),
            lines: Mutex::new(Vec::new()),
            finished: false,
        };
        drop(log);

        let written = std::fs::read_to_string(&path).unwrap();
        let line: LogLine = serde_json::from_str(written.trim()).unwrap();
        assert_eq!(line.phase, Phase::Outcome);
        assert_eq!(line.message, "ended early");
    }

    #[test]
    fn test_phase_wire_names() {
        assert_eq!(serde_json::to_string(&Phase::Outcome).unwrap(), "\"outcome\"");
        assert_eq!(Phase::Check.to_string(), "check");
    }

    #[test]
    fn test_init_is_idempotent() {
        init_global_test_logging();
        init_global_test_logging();
        tracing::info!("subscriber installed once");
    }
}
