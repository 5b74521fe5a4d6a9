//! wfkit - run and reshape GitHub Actions workflows locally through act.

#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use wfkit_common::config::{HarnessConfig, RunnerLabels};
use wfkit_common::e2e::{Event, RunResult, Runner};
use wfkit_common::workflow::{InputValue, TestingWorkflow, inputs};

#[derive(Parser)]
#[command(name = "wfkit")]
#[command(author, version, about = "Run and reshape GitHub Actions workflows locally through act")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a workflow after applying the selected mutations
    Render {
        /// Workflow file to load
        workflow: PathBuf,

        #[command(flatten)]
        shape: Shape,
    },

    /// Run a workflow with act and print the result
    Run {
        /// Workflow file to load
        workflow: PathBuf,

        /// Trigger event
        #[arg(long, default_value = "push", value_parser = ["push", "pull_request", "workflow_dispatch"])]
        event: String,

        /// workflow_dispatch input, repeatable
        #[arg(long = "input", value_name = "KEY=VALUE", value_parser = parse_key_value)]
        inputs: Vec<(String, String)>,

        #[command(flatten)]
        shape: Shape,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the active runner-label table
    Labels,
}

/// Mutations shared by `render` and `run`.
#[derive(Args)]
struct Shape {
    /// Keep only this job
    #[arg(long, value_name = "JOB")]
    only_job: Option<String>,

    /// With --only-job, also keep the job's transitive dependencies
    #[arg(long, requires = "only_job")]
    keep_deps: bool,

    /// Drop every step after STEP in JOB
    #[arg(long, value_name = "JOB:STEP", value_parser = parse_job_step)]
    truncate_after: Option<(String, String)>,
}

impl Shape {
    fn apply(&self, workflow: &mut TestingWorkflow) -> Result<()> {
        if let Some(job) = &self.only_job {
            workflow
                .workflow
                .with_only_one_job(job, self.keep_deps)
                .with_context(|| format!("cannot isolate job {job}"))?;
        }
        if let Some((job, step)) = &self.truncate_after {
            workflow
                .workflow
                .remove_all_steps_after(job, step)
                .with_context(|| format!("cannot truncate {job} after {step}"))?;
        }
        Ok(())
    }
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got {raw:?}")),
    }
}

fn parse_job_step(raw: &str) -> Result<(String, String), String> {
    match raw.split_once(':') {
        Some((job, step)) if !job.is_empty() && !step.is_empty() => {
            Ok((job.to_string(), step.to_string()))
        }
        _ => Err(format!("expected JOB:STEP, got {raw:?}")),
    }
}

/// `true`/`false` become booleans, everything else stays a string.
fn input_value(raw: &str) -> InputValue {
    match raw {
        "true" => InputValue::Bool(true),
        "false" => InputValue::Bool(false),
        other => InputValue::Str(other.to_string()),
    }
}

fn init_logging(verbose: bool) {
    let filter = match std::env::var("WFKIT_LOG_LEVEL") {
        Ok(level) if !level.trim().is_empty() => EnvFilter::new(level),
        _ if verbose => EnvFilter::new("debug"),
        _ => EnvFilter::new("info"),
    };
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .try_init();
}

fn load(path: &Path) -> Result<TestingWorkflow> {
    TestingWorkflow::from_file(path).with_context(|| format!("failed to load {}", path.display()))
}

fn harness_config() -> Result<HarnessConfig> {
    HarnessConfig::from_env().map_err(|errors| {
        let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
        anyhow!("invalid configuration:\n  {}", messages.join("\n  "))
    })
}

fn event_for(name: &str, pairs: Vec<(String, String)>) -> Result<Event> {
    if name == "workflow_dispatch" {
        let values = pairs.iter().map(|(k, v)| (k.as_str(), input_value(v)));
        return Ok(Event::workflow_dispatch(inputs(values)));
    }
    if !pairs.is_empty() {
        bail!("--input only applies to workflow_dispatch events");
    }
    Event::from_name(name).ok_or_else(|| anyhow!("unsupported event {name}"))
}

fn print_result(result: &RunResult) {
    println!("result: {}", if result.success { "success" } else { "failure" });
    for (job, status) in &result.job_results {
        println!("job {job}: {status}");
    }
    for job in result.outputs.jobs() {
        for (step, values) in result.outputs.job(job).into_iter().flatten() {
            for (name, value) in values {
                println!("output {job}.{step}.{name} = {value}");
            }
        }
    }
    for annotation in &result.annotations {
        if annotation.title.is_empty() {
            println!("{}: {}", annotation.level, annotation.message);
        } else {
            println!("{}: {}: {}", annotation.level, annotation.title, annotation.message);
        }
    }
    for summary in &result.summaries {
        println!("summary {}.{}:\n{}", summary.job, summary.step, summary.text);
    }
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Render { workflow, shape } => {
            let mut loaded = load(&workflow)?;
            shape.apply(&mut loaded)?;
            loaded.workflow.validate().context("mutated workflow is invalid")?;
            print!("{}", loaded.workflow.marshal()?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run {
            workflow,
            event,
            inputs,
            shape,
            json,
        } => {
            let mut loaded = load(&workflow)?;
            shape.apply(&mut loaded)?;
            let event = event_for(&event, inputs)?;
            tracing::info!(workflow = %workflow.display(), event = event.name(), "running workflow");

            let runner = Runner::new(harness_config()?).context("failed to prepare act runner")?;
            let result = runner
                .run(&loaded, &event)
                .with_context(|| format!("failed to run {}", workflow.display()))?;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_result(&result);
            }
            Ok(if result.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Labels => {
            let loaded = RunnerLabels::from_env().context("failed to load runner labels")?;
            println!("source: {}", loaded.describe());
            let labels = loaded.into_inner();
            println!("default: {}", labels.default_image);
            for (label, image) in &labels.labels {
                println!("{label} = {image}");
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
