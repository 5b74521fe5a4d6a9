//! Drives act against a materialised [`TestingWorkflow`].
//!
//! One `run` is one act process. Its stdout (`--json` records) is parsed on
//! a reader thread while the calling thread waits for exit; the reader hands
//! its collector back over a single-slot channel, so every output is
//! recorded before `run` returns. act's stderr is passed through.

use std::collections::BTreeMap;
use std::io::BufReader;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Instant;

use thiserror::Error;
use uuid::Uuid;

use super::artifacts::ArtifactStore;
use super::event::Event;
use super::logstream::{LogCollector, SUMMARY_MARKER};
use super::result::RunResult;
use crate::config::{HarnessConfig, LabelsError, RunnerLabels, runner_labels};
use crate::mocks::quote;
use crate::util::mask_sensitive_command;
use crate::workflow::{TestingWorkflow, Workflow, WorkflowError};

/// Harness failures. A pipeline that fails is not one of these; it is a
/// [`RunResult`] with `success == false`.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("failed to create run directory: {0}")]
    TempDir(#[source] std::io::Error),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Labels(#[from] LabelsError),

    #[error("failed to encode event payload: {0}")]
    EventEncode(#[from] serde_json::Error),

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no free port for the artifact server: {0}")]
    Port(#[source] std::io::Error),

    #[error("failed to start {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed waiting for act to exit: {0}")]
    Wait(#[source] std::io::Error),

    #[error("failed reading act output: {0}")]
    Stream(#[source] std::io::Error),

    #[error("act log reader stopped without reporting")]
    ReaderLost,
}

/// Runs workflows with act. Each runner owns a private directory
/// (`<tmp>/wfkit-<run-id>/`) for act's caches, artifact store, and event
/// files, so runners in parallel tests never share state.
#[derive(Debug)]
pub struct Runner {
    config: HarnessConfig,
    labels: Arc<RunnerLabels>,
    run_id: Uuid,
    temp: Option<tempfile::TempDir>,
    temp_path: PathBuf,
    mounts: Vec<PathBuf>,
    secrets: BTreeMap<String, String>,
    env: BTreeMap<String, String>,
    keep_temp: AtomicBool,
}

impl Runner {
    /// A runner using the process-wide runner-label table.
    pub fn new(config: HarnessConfig) -> Result<Self, RunnerError> {
        let labels = runner_labels()?;
        Self::with_labels(config, labels)
    }

    pub fn with_labels(config: HarnessConfig, labels: Arc<RunnerLabels>) -> Result<Self, RunnerError> {
        let run_id = Uuid::new_v4();
        let temp = tempfile::Builder::new()
            .prefix("wfkit-")
            .suffix(&run_id.to_string())
            .rand_bytes(0)
            .tempdir()
            .map_err(RunnerError::TempDir)?;
        let temp_path = temp.path().to_path_buf();
        for dir in ["action-cache", "cache-server", "artifacts"] {
            let path = temp_path.join(dir);
            std::fs::create_dir_all(&path)
                .map_err(|source| RunnerError::Write { path, source })?;
        }
        tracing::debug!(%run_id, dir = %temp_path.display(), "runner created");

        Ok(Self {
            config,
            labels,
            run_id,
            temp: Some(temp),
            temp_path,
            mounts: Vec::new(),
            secrets: BTreeMap::new(),
            env: BTreeMap::new(),
            keep_temp: AtomicBool::new(false),
        })
    }

    /// Bind `path` into job containers at the same path (for mock storage
    /// roots and fixture trees).
    #[must_use]
    pub fn mount(mut self, path: impl Into<PathBuf>) -> Self {
        self.mounts.push(path.into());
        self
    }

    /// A secret available as `secrets.<name>`. The value reaches act through
    /// its environment, never its command line.
    #[must_use]
    pub fn secret(mut self, name: &str, value: &str) -> Self {
        self.secrets.insert(name.to_string(), value.to_string());
        self
    }

    /// An environment variable set for every job.
    #[must_use]
    pub fn env(mut self, name: &str, value: &str) -> Self {
        self.env.insert(name.to_string(), value.to_string());
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// The runner's private directory.
    pub fn dir(&self) -> &Path {
        &self.temp_path
    }

    /// Artifacts uploaded during this runner's runs.
    pub fn artifacts(&self) -> ArtifactStore {
        ArtifactStore::new(self.temp_path.join("artifacts"))
    }

    /// Materialise `workflow`, run it with act, and collect the result.
    pub fn run(&self, workflow: &TestingWorkflow, event: &Event) -> Result<RunResult, RunnerError> {
        let started = Instant::now();
        self.locate_act()?;
        let mut prepared = workflow.clone();
        prepared.for_each_workflow_mut(capture_step_summaries);

        let written = prepared.materialize(&self.config.repo_root)?;
        let mut files = FileGuard::new(written.clone());

        let event_path = self.temp_path.join(format!("event-{}.json", prepared.run_id()));
        std::fs::write(&event_path, event.to_json()?).map_err(|source| RunnerError::Write {
            path: event_path.clone(),
            source,
        })?;
        files.push(event_path.clone());

        let artifact_port = free_port().map_err(RunnerError::Port)?;
        let workflow_path = written.first().cloned().unwrap_or_default();
        let command_line = self.act_command(event.name(), &workflow_path, &event_path, artifact_port);
        tracing::info!(
            run_id = %self.run_id,
            workflow = %prepared.file_name(),
            command = %mask_sensitive_command(&command_line),
            "starting act"
        );

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&command_line)
            .current_dir(&self.config.repo_root)
            .envs(&self.config.env_vars)
            .envs(&self.secrets)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| RunnerError::Spawn {
                binary: self.config.act_binary.display().to_string(),
                source,
            })?;

        let (done_tx, done_rx) = mpsc::sync_channel(1);
        let stdout = child.stdout.take();
        thread::spawn(move || {
            let mut collector = LogCollector::new();
            let outcome = match stdout {
                Some(stdout) => collector.consume(BufReader::new(stdout)),
                None => Ok(()),
            };
            let _ = done_tx.send(outcome.map(|()| collector));
        });

        let status = child.wait().map_err(RunnerError::Wait)?;
        let collector = done_rx
            .recv()
            .map_err(|_| RunnerError::ReaderLost)?
            .map_err(RunnerError::Stream)?;

        if collector.malformed() > 0 {
            tracing::debug!(skipped = collector.malformed(), "non-JSON act output lines skipped");
        }
        let mut result = collector.finish();
        result.success = status.success();

        if !result.success && self.config.keep_files_on_failure {
            files.keep();
            self.keep_temp.store(true, Ordering::Relaxed);
            tracing::warn!(
                exit = ?status.code(),
                files = ?files.paths(),
                "act run failed; keeping generated files for inspection"
            );
        }

        tracing::info!(
            run_id = %self.run_id,
            success = result.success,
            jobs = result.job_results.len(),
            annotations = result.annotations.len(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "act finished"
        );
        Ok(result)
    }

    /// Resolve the act binary the way `sh` would from the repo root. A
    /// missing or non-executable binary is a harness error, not a failed
    /// pipeline, so it is caught before `sh -c` can turn it into exit 127.
    fn locate_act(&self) -> Result<PathBuf, RunnerError> {
        let binary = self.config.resolved_act_binary();
        which::which_in(&binary, None::<&str>, &self.config.repo_root).map_err(|err| {
            RunnerError::Spawn {
                binary: binary.display().to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, err.to_string()),
            }
        })
    }

    /// The shell command line for one act invocation.
    pub fn act_command(
        &self,
        event_name: &str,
        workflow_path: &Path,
        event_path: &Path,
        artifact_port: u16,
    ) -> String {
        let mut args: Vec<String> = vec![
            quote(&self.config.resolved_act_binary().to_string_lossy()),
            quote(event_name),
            "--workflows".to_string(),
            quote_path(workflow_path),
            "--eventpath".to_string(),
            quote_path(event_path),
            "--json".to_string(),
            "--action-cache-path".to_string(),
            quote_path(&self.temp_path.join("action-cache")),
            "--cache-server-path".to_string(),
            quote_path(&self.temp_path.join("cache-server")),
            "--artifact-server-path".to_string(),
            quote_path(&self.temp_path.join("artifacts")),
            "--artifact-server-port".to_string(),
            artifact_port.to_string(),
            "--local-repository".to_string(),
            quote(&format!(
                "{}={}",
                self.config.self_repository,
                self.config.repo_root.display()
            )),
        ];

        for platform in self.labels.platform_args() {
            args.push("-P".to_string());
            args.push(quote(&platform));
        }
        if let Some(arch) = &self.config.container_architecture {
            args.push("--container-architecture".to_string());
            args.push(quote(arch));
        }
        if !self.mounts.is_empty() {
            let volumes: Vec<String> = self
                .mounts
                .iter()
                .map(|path| format!("-v {0}:{0}", path.display()))
                .collect();
            args.push("--container-options".to_string());
            args.push(quote(&volumes.join(" ")));
        }
        for (name, value) in &self.env {
            args.push("--env".to_string());
            args.push(quote(&format!("{name}={value}")));
        }
        for name in self.secrets.keys() {
            args.push("--secret".to_string());
            args.push(quote(name));
        }
        if let Some(token_command) = &self.config.token_command {
            args.push("--secret".to_string());
            args.push(format!("GITHUB_TOKEN=\"$({token_command})\""));
        }
        if self.config.verbose {
            args.push("--verbose".to_string());
        }
        args.join(" ")
    }
}

impl Drop for Runner {
    fn drop(&mut self) {
        let Some(temp) = self.temp.take() else {
            return;
        };
        if self.keep_temp.load(Ordering::Relaxed) {
            let kept = temp.keep();
            tracing::info!(dir = %kept.display(), "keeping runner directory after failed run");
        }
    }
}

fn quote_path(path: &Path) -> String {
    quote(&path.to_string_lossy())
}

/// Ask the OS for a port nobody is listening on. The listener is dropped
/// before act binds it, so this narrows rather than closes the race.
fn free_port() -> std::io::Result<u16> {
    let listener = TcpListener::bind("0.0.0.0:0")?;
    Ok(listener.local_addr()?.port())
}

/// Generated files removed on drop unless kept.
struct FileGuard {
    paths: Vec<PathBuf>,
    keep: bool,
}

impl FileGuard {
    fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths, keep: false }
    }

    fn push(&mut self, path: PathBuf) {
        self.paths.push(path);
    }

    fn keep(&mut self) {
        self.keep = true;
    }

    fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

impl Drop for FileGuard {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        for path in &self.paths {
            if let Err(err) = std::fs::remove_file(path) {
                tracing::debug!(path = %path.display(), error = %err, "failed to remove generated file");
            }
        }
    }
}

const SUMMARY_PREAMBLE: &str = r#"__wfkit_summary="$(mktemp)"
__wfkit_flush() {
  while IFS= read -r __wfkit_line || [ -n "$__wfkit_line" ]; do
    printf '%s%s\n' '__MARKER__' "$__wfkit_line"
  done < "$__wfkit_summary"
  rm -f "$__wfkit_summary"
}
trap __wfkit_flush EXIT
GITHUB_STEP_SUMMARY="$__wfkit_summary"
export GITHUB_STEP_SUMMARY
"#;

/// Bash steps get a `trap` wrapper so a step that installs its own EXIT
/// trap runs it first and still flushes the summary afterwards.
const BASH_TRAP_CHAIN: &str = r#"trap() {
  if [ "${1-}" = -- ]; then shift; fi
  if [ "$#" -eq 0 ] || [ "$1" = -p ] || [ "$1" = -l ]; then
    builtin trap "$@"
    return
  fi
  local __wfkit_action="$1" __wfkit_sig
  shift
  if [ "$#" -eq 0 ]; then
    set -- "$__wfkit_action"
    __wfkit_action=-
  fi
  for __wfkit_sig in "$@"; do
    case "$__wfkit_sig" in
      EXIT|exit|SIGEXIT|0)
        case "$__wfkit_action" in
          -|'') builtin trap __wfkit_flush EXIT ;;
          *) builtin trap "$__wfkit_action"'
__wfkit_flush' EXIT ;;
        esac ;;
      *) builtin trap "$__wfkit_action" "$__wfkit_sig" ;;
    esac
  done
}
"#;

/// Route step summaries into the log stream. Every POSIX-shell `run:` step
/// that mentions `GITHUB_STEP_SUMMARY` writes to a private file that is
/// echoed line by line, behind [`SUMMARY_MARKER`], when the step exits.
///
/// Under bash (the default) an EXIT trap set by the step is chained in
/// front of the flush. `shell: sh` cannot shadow the `trap` builtin, so a
/// `sh` step that sets its own EXIT trap loses its summary.
pub fn capture_step_summaries(workflow: &mut Workflow) {
    let posix_preamble = SUMMARY_PREAMBLE.replace("__MARKER__", SUMMARY_MARKER);
    let bash_preamble = format!("{posix_preamble}{BASH_TRAP_CHAIN}");
    for job in workflow.jobs.values_mut() {
        for step in &mut job.steps {
            let preamble = match step.shell.as_deref() {
                None | Some("bash") => &bash_preamble,
                Some("sh") => &posix_preamble,
                Some(_) => continue,
            };
            let Some(script) = step.run.as_mut() else {
                continue;
            };
            if !script.contains("GITHUB_STEP_SUMMARY") || script.contains("__wfkit_flush") {
                continue;
            }
            script.insert_str(0, preamble);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{Job, Step, Triggers};

    fn runner(config: HarnessConfig) -> Runner {
        let labels = Arc::new(RunnerLabels::uniform(["ubuntu-latest", "ubuntu-x64-small"], "img:1"));
        Runner::with_labels(config, labels).unwrap()
    }

    fn config() -> HarnessConfig {
        HarnessConfig::default()
            .act_binary("/opt/act/bin/act")
            .repo_root("/work/repo")
            .token_command(None)
    }

    #[test]
    fn test_runner_dir_layout() {
        let runner = runner(config());
        let dir = runner.dir().to_path_buf();
        assert!(
            dir.file_name()
                .unwrap()
                .to_string_lossy()
                .ends_with(&runner.run_id().to_string())
        );
        for sub in ["action-cache", "cache-server", "artifacts"] {
            assert!(dir.join(sub).is_dir());
        }
        assert_eq!(runner.artifacts().root(), dir.join("artifacts"));
        drop(runner);
        assert!(!dir.exists());
    }

    #[test]
    fn test_act_command_flags() {
        let runner = runner(config())
            .mount("/tmp/storage")
            .secret("VAULT_TOKEN", "hunter2")
            .env("CI", "true");
        let cmd = runner.act_command(
            "push",
            Path::new("/work/repo/.github/workflows/act-ci-x.yml"),
            Path::new("/tmp/event.json"),
            34567,
        );

        let has = |flag: &str, value: &str| cmd.contains(&format!("{flag} {}", quote(value)));

        assert!(cmd.starts_with("/opt/act/bin/act push --workflows /work/repo/.github/workflows/act-ci-x.yml"));
        assert!(cmd.contains("--eventpath /tmp/event.json --json"));
        assert!(cmd.contains("--artifact-server-port 34567"));
        assert!(has(
            "--action-cache-path",
            &runner.dir().join("action-cache").to_string_lossy()
        ));
        assert!(has(
            "--local-repository",
            "grafana/plugin-ci-workflows@main=/work/repo"
        ));
        assert!(has("-P", "ubuntu-latest=img:1"));
        assert!(has("-P", "ubuntu-x64-small=img:1"));
        assert!(has("--container-architecture", "linux/amd64"));
        assert!(has("--container-options", "-v /tmp/storage:/tmp/storage"));
        assert!(has("--env", "CI=true"));
        assert!(cmd.contains("--secret VAULT_TOKEN"));
        assert!(!cmd.contains("hunter2"));
        assert!(!cmd.contains("GITHUB_TOKEN"));
        assert!(!cmd.contains("--verbose"));
    }

    #[test]
    fn test_act_command_token_and_verbose() {
        let mut config = config().token_command(Some("gh auth token".to_string()));
        config.verbose = true;
        let cmd = runner(config).act_command("push", Path::new("/w.yml"), Path::new("/e.json"), 1);
        assert!(cmd.contains(r#"--secret GITHUB_TOKEN="$(gh auth token)""#));
        assert!(cmd.ends_with("--verbose"));
        assert!(mask_sensitive_command(&cmd).contains("--secret GITHUB_TOKEN=***"));
    }

    #[test]
    fn test_runners_do_not_share_dirs() {
        let a = runner(config());
        let b = runner(config());
        assert_ne!(a.run_id(), b.run_id());
        assert_ne!(a.dir(), b.dir());
    }

    #[test]
    fn test_capture_step_summaries_wraps_only_posix_summary_steps() {
        let mut wf = Workflow::new("ci", Triggers::push(&["main"]));
        let mut pwsh = Step::run("pwsh", "echo hi >> $env:GITHUB_STEP_SUMMARY");
        pwsh.shell = Some("pwsh".to_string());
        wf.add_job(
            "build",
            Job::new(
                "ubuntu-latest",
                vec![
                    Step::run("summary", "echo '## Build' >> \"$GITHUB_STEP_SUMMARY\""),
                    Step::run("plain", "make"),
                    pwsh,
                    Step::uses("checkout", "actions/checkout@v4"),
                ],
            ),
        );

        capture_step_summaries(&mut wf);
        let once = wf.clone();
        capture_step_summaries(&mut wf);
        assert_eq!(wf, once);

        let steps = &wf.job("build").unwrap().steps;
        let wrapped = steps[0].run.as_deref().unwrap();
        assert!(wrapped.starts_with("__wfkit_summary="));
        assert!(wrapped.contains("wfkit-summary::"));
        assert!(wrapped.ends_with("echo '## Build' >> \"$GITHUB_STEP_SUMMARY\""));
        assert_eq!(steps[1].run.as_deref(), Some("make"));
        assert!(!steps[2].run.as_deref().unwrap().contains("__wfkit"));
    }

    #[test]
    fn test_summary_preamble_echoes_lines() {
        let mut wf = Workflow::default();
        wf.add_job(
            "j",
            Job::new(
                "ubuntu-latest",
                vec![Step::run(
                    "s",
                    "echo '## Title' >> \"$GITHUB_STEP_SUMMARY\"\nprintf 'no newline' >> \"$GITHUB_STEP_SUMMARY\"",
                )],
            ),
        );
        capture_step_summaries(&mut wf);
        let script = wf.job("j").unwrap().steps[0].run.clone().unwrap();

        let output = Command::new("bash")
            .arg("-e")
            .arg("-c")
            .arg(&script)
            .output()
            .unwrap();
        assert!(output.status.success());
        assert_eq!(
            String::from_utf8_lossy(&output.stdout),
            "wfkit-summary::## Title\nwfkit-summary::no newline\n"
        );
    }

    fn run_wrapped_bash(body: &str) -> std::process::Output {
        let mut wf = Workflow::default();
        wf.add_job("j", Job::new("ubuntu-latest", vec![Step::run("s", body)]));
        capture_step_summaries(&mut wf);
        let script = wf.job("j").unwrap().steps[0].run.clone().unwrap();
        Command::new("bash")
            .args(["--noprofile", "--norc", "-eo", "pipefail", "-c"])
            .arg(&script)
            .output()
            .unwrap()
    }

    #[test]
    fn test_step_exit_trap_runs_before_summary_flush() {
        let output = run_wrapped_bash(
            "trap 'echo cleanup' EXIT\necho '## Done' >> \"$GITHUB_STEP_SUMMARY\"",
        );
        assert!(output.status.success());
        assert_eq!(
            String::from_utf8_lossy(&output.stdout),
            "cleanup\nwfkit-summary::## Done\n"
        );

        let output = run_wrapped_bash(
            "trap -- 'echo cleanup' INT EXIT\necho '## Failed' >> \"$GITHUB_STEP_SUMMARY\"\nexit 3",
        );
        assert_eq!(output.status.code(), Some(3));
        assert_eq!(
            String::from_utf8_lossy(&output.stdout),
            "cleanup\nwfkit-summary::## Failed\n"
        );
    }

    #[test]
    fn test_clearing_exit_trap_keeps_summary_flush() {
        let output = run_wrapped_bash(
            "trap 'echo cleanup' EXIT\ntrap - EXIT\necho kept >> \"$GITHUB_STEP_SUMMARY\"",
        );
        assert!(output.status.success());
        assert_eq!(String::from_utf8_lossy(&output.stdout), "wfkit-summary::kept\n");
    }

    #[test]
    fn test_sh_steps_get_plain_preamble() {
        let mut wf = Workflow::default();
        let mut step = Step::run("s", "echo x >> \"$GITHUB_STEP_SUMMARY\"");
        step.shell = Some("sh".to_string());
        wf.add_job("j", Job::new("ubuntu-latest", vec![step, Step::run("b", "echo y >> \"$GITHUB_STEP_SUMMARY\"")]));
        capture_step_summaries(&mut wf);

        let steps = &wf.job("j").unwrap().steps;
        assert!(steps[0].run.as_deref().unwrap().contains("__wfkit_flush"));
        assert!(!steps[0].run.as_deref().unwrap().contains("builtin trap"));
        assert!(steps[1].run.as_deref().unwrap().contains("builtin trap"));
    }
}
