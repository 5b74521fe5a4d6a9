//! Scenarios against the real act binary.
//!
//! These need act and a Docker daemon, so they only build with the
//! `act-e2e` feature:
//!
//! ```bash
//! cargo test -p wfkit --features act-e2e --test act_e2e -- --nocapture
//! ```
//!
//! When act is not on `PATH` (or `WFKIT_ACT_BINARY`), every test logs a skip
//! and passes.

use std::path::PathBuf;
use std::process::Command;

use wfkit_common::config::HarnessConfig;
use wfkit_common::e2e::{AnnotationLevel, Event, RunResult, Runner};
use wfkit_common::mocks::{self, actions};
use wfkit_common::testing::{Phase, ScenarioLog, init_global_test_logging};
use wfkit_common::workflow::{Job, Step, TestingWorkflow, Triggers, Workflow};
use wfkit_doubles::{HttpSpy, MockStorage};

#[ctor::ctor]
fn setup() {
    init_global_test_logging();
}

fn workspace_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Harness settings, or `None` when act is unavailable.
fn act_config(log: &ScenarioLog) -> Option<HarnessConfig> {
    let config = match HarnessConfig::from_env() {
        Ok(config) => config.repo_root(workspace_root()),
        Err(errors) => panic!("invalid harness configuration: {errors:?}"),
    };
    let available = Command::new(config.resolved_act_binary())
        .arg("--version")
        .output()
        .is_ok_and(|output| output.status.success());
    if !available {
        log.note(Phase::Setup, "act not available; skipping");
        return None;
    }
    Some(config)
}

fn run(runner: &Runner, workflow: &TestingWorkflow, log: &ScenarioLog) -> RunResult {
    log.note(Phase::Run, format!("running {}", workflow.file_name()));
    let result = runner.run(workflow, &Event::push()).unwrap();
    log.run_result(&result);
    result
}

#[test]
fn test_single_step_output() {
    let log = ScenarioLog::start("test_single_step_output");
    let Some(config) = act_config(&log) else {
        return;
    };

    let mut workflow = Workflow::new("single", Triggers::push(&["main"]));
    workflow.add_job(
        "test",
        Job::new(
            "ubuntu-latest",
            vec![Step::run("Only", "echo \"value=hello-from-act\" >> \"$GITHUB_OUTPUT\"").with_id("only")],
        ),
    );
    let workflow = TestingWorkflow::new("single", workflow);

    let runner = Runner::new(config).unwrap();
    let result = run(&runner, &workflow, &log);

    assert!(result.success);
    assert_eq!(result.output("test", "only", "value"), Some("hello-from-act"));
    log.finish();
}

#[test]
fn test_only_one_job_limits_outputs() {
    let log = ScenarioLog::start("test_only_one_job_limits_outputs");
    let Some(config) = act_config(&log) else {
        return;
    };

    let mut workflow = Workflow::new("multi", Triggers::push(&["main"]));
    workflow.add_job(
        "setup",
        Job::new(
            "ubuntu-latest",
            vec![Step::run("Setup", "echo \"ready=yes\" >> \"$GITHUB_OUTPUT\"").with_id("setup")],
        ),
    );
    workflow.add_job(
        "build",
        Job::new(
            "ubuntu-latest",
            vec![Step::run("Build", "echo \"artifact=dist.zip\" >> \"$GITHUB_OUTPUT\"").with_id("build")],
        )
        .with_needs(["setup"]),
    );
    workflow.add_job(
        "lint",
        Job::new(
            "ubuntu-latest",
            vec![Step::run("Lint", "echo \"clean=true\" >> \"$GITHUB_OUTPUT\"").with_id("lint")],
        ),
    );
    workflow.with_only_one_job("build", false).unwrap();
    let workflow = TestingWorkflow::new("multi", workflow);

    let runner = Runner::new(config).unwrap();
    let result = run(&runner, &workflow, &log);

    assert!(result.success);
    assert_eq!(result.output("build", "build", "artifact"), Some("dist.zip"));
    assert_eq!(result.outputs.jobs().collect::<Vec<_>>(), vec!["build"]);
    log.finish();
}

#[test]
fn test_failure_annotation_and_summary() {
    let log = ScenarioLog::start("test_failure_annotation_and_summary");
    let Some(config) = act_config(&log) else {
        return;
    };

    let mut workflow = Workflow::new("failing", Triggers::push(&["main"]));
    workflow.add_job(
        "check",
        Job::new(
            "ubuntu-latest",
            vec![
                Step::run("Report", "echo '## Report' >> \"$GITHUB_STEP_SUMMARY\"").with_id("report"),
                Step::run("Fail", "echo '::error title=Validation::plugin.json is missing'\nexit 1")
                    .with_id("fail"),
            ],
        ),
    );
    let workflow = TestingWorkflow::new("failing", workflow);

    let runner = Runner::new(config.keep_files_on_failure(false)).unwrap();
    let result = run(&runner, &workflow, &log);

    assert!(!result.success);
    assert!(result.has_error_containing("plugin.json is missing"));
    let errors: Vec<_> = result.annotations_at(AnnotationLevel::Error).collect();
    assert_eq!(errors[0].title, "Validation");
    assert_eq!(result.summary_for("check").as_deref(), Some("## Report"));
    assert_eq!(result.job_succeeded("check"), Some(false));
    log.finish();
}

#[test]
fn test_mocked_upload_and_spy_from_container() {
    let log = ScenarioLog::start("test_mocked_upload_and_spy_from_container");
    let Some(config) = act_config(&log) else {
        return;
    };
    let storage = MockStorage::new().unwrap();
    let spy = HttpSpy::start().unwrap();

    let mut workflow = Workflow::new("upload", Triggers::push(&["main"]));
    workflow.add_job(
        "package",
        Job::new(
            "ubuntu-latest",
            vec![
                Step::run("Build", "mkdir -p dist && echo bundle > dist/plugin.zip"),
                Step::uses("Upload", "google-github-actions/upload-cloud-storage@v2")
                    .with_id("upload")
                    .with_input("path", "dist")
                    .with_input("destination", "plugins/builds"),
                Step::run(
                    "Notify",
                    format!("curl -fsS -X POST -d '{{\"done\":true}}' {}/hooks/done", spy.container_url()),
                ),
            ],
        ),
    );
    let root = storage.root().to_path_buf();
    workflow
        .mock_all_steps_using_action(actions::GCS_UPLOAD, |step| mocks::gcs_upload(step, &root))
        .unwrap();
    let workflow = TestingWorkflow::new("upload", workflow);

    let runner = Runner::new(config).unwrap().mount(storage.root());
    let result = run(&runner, &workflow, &log);

    assert!(result.success);
    assert_eq!(
        result.output("package", "upload", "uploaded"),
        Some("plugins/builds/dist/plugin.zip")
    );
    assert_eq!(
        storage.fs().read_to_string("plugins/builds/dist/plugin.zip").unwrap(),
        "bundle\n"
    );
    assert!(spy.was_called("POST /hooks/done").unwrap());
    log.finish();
}
