//! In-memory model of a GitHub Actions workflow.
//!
//! Tests clone a real pipeline definition, prune it to the jobs they care
//! about, and swap steps that call external services for local equivalents.
//! The mutation API lives in [`mutate`]; serialisation omits every empty or
//! unset field so act's schema validation accepts the result.

pub mod error;
pub mod mutate;
pub mod testing;
pub mod triggers;
pub mod value;


use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml_ng::Value;

pub use error::WorkflowError;
pub use testing::{TestingWorkflow, WORKFLOWS_DIR};
pub use triggers::{
    DispatchTrigger, PullRequestTrigger, PushTrigger, TriggerMap, Triggers, WorkflowCallOutput,
    WorkflowCallTrigger, WorkflowInput, WorkflowSecret,
};
pub use value::{InputValue, Inputs, inputs};

use crate::mocks::MockError;

/// A whole workflow file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(rename = "run-name", default, skip_serializing_if = "Option::is_none")]
    pub run_name: Option<String>,
    #[serde(default, skip_serializing_if = "Triggers::is_empty")]
    pub on: Triggers,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Permissions>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: Inputs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defaults: Option<Value>,
    #[serde(default)]
    pub jobs: BTreeMap<String, Job>,
}

/// `permissions:` at workflow or job level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Permissions {
    /// `read-all`, `write-all`, or `{}` spelled as a string.
    Preset(String),
    Scopes(BTreeMap<String, String>),
}

impl Permissions {
    pub fn scopes<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self::Scopes(
            pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

/// `runs-on:`. A label (or expression), a label list, or a runner group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RunsOn {
    Label(String),
    Labels(Vec<String>),
    Group {
        group: String,
        #[serde(
            default,
            deserialize_with = "string_or_list",
            skip_serializing_if = "Vec::is_empty"
        )]
        labels: Vec<String>,
    },
}

impl RunsOn {
    /// Labels the job asks for. A group without labels has none.
    pub fn labels(&self) -> Vec<&str> {
        match self {
            Self::Label(label) => vec![label.as_str()],
            Self::Labels(labels) | Self::Group { labels, .. } => {
                labels.iter().map(String::as_str).collect()
            }
        }
    }
}

impl From<&str> for RunsOn {
    fn from(label: &str) -> Self {
        Self::Label(label.to_string())
    }
}

/// `container:` as either a bare image or a full spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Container {
    Image(String),
    Spec(ContainerSpec),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: Inputs,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
}

/// `strategy:`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Strategy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matrix: Option<Matrix>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_fast: Option<OrExpr<bool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_parallel: Option<OrExpr<u32>>,
}

/// `strategy.matrix:` as axes (plus `include`/`exclude`) or a single
/// expression such as `${{ fromJSON(needs.plan.outputs.matrix) }}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Matrix {
    Axes(BTreeMap<String, Value>),
    Expr(String),
}

/// A setting that takes either a literal or a `${{ ... }}` expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OrExpr<T> {
    Value(T),
    Expr(String),
}

impl<T> OrExpr<T> {
    /// The literal, or `None` when only known at run time.
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Value(value) => Some(value),
            Self::Expr(_) => None,
        }
    }
}

impl<T> From<T> for OrExpr<T> {
    fn from(value: T) -> Self {
        Self::Value(value)
    }
}

/// `secrets:` on a job that calls a reusable workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobSecrets {
    /// `secrets: inherit`.
    Inherit(String),
    Map(BTreeMap<String, String>),
}

/// One entry of `jobs:`. Either `uses` names a reusable workflow (and `steps`
/// is empty) or `steps` lists what to run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Job {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runs_on: Option<RunsOn>,
    #[serde(
        default,
        deserialize_with = "string_or_list",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub needs: Vec<String>,
    #[serde(rename = "if", default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Permissions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: Inputs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defaults: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_minutes: Option<OrExpr<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continue_on_error: Option<OrExpr<bool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<Strategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<Container>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub services: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uses: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub with: Inputs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secrets: Option<JobSecrets>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<Step>,
}

impl Job {
    /// A steps job on the given runner label.
    pub fn new(runs_on: &str, steps: Vec<Step>) -> Self {
        Self {
            runs_on: Some(RunsOn::from(runs_on)),
            steps,
            ..Default::default()
        }
    }

    /// A job that calls a reusable workflow.
    pub fn calling(uses: impl Into<String>) -> Self {
        Self {
            uses: Some(uses.into()),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn with_needs<'a>(mut self, needs: impl IntoIterator<Item = &'a str>) -> Self {
        self.needs = needs.into_iter().map(str::to_string).collect();
        self
    }

    #[must_use]
    pub fn with_outputs<'a>(mut self, outputs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        self.outputs = outputs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self
    }

    /// True when the job invokes a reusable workflow instead of running steps.
    pub fn is_reusable_call(&self) -> bool {
        self.uses.is_some()
    }

    /// Position of the step with the given id.
    pub fn step_index(&self, id: &str) -> Option<usize> {
        self.steps
            .iter()
            .position(|step| step.id.as_deref() == Some(id))
    }
}

/// One entry of a job's `steps:`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Step {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "if", default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uses: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub with: Inputs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: Inputs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continue_on_error: Option<OrExpr<bool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_minutes: Option<OrExpr<u32>>,
}

impl Step {
    /// A `run:` step executed with bash.
    pub fn run(name: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            run: Some(script.into()),
            shell: Some("bash".to_string()),
            ..Default::default()
        }
    }

    /// A `uses:` step.
    pub fn uses(name: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            uses: Some(action.into()),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_if(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    #[must_use]
    pub fn with_input(mut self, key: impl Into<String>, value: impl Into<InputValue>) -> Self {
        self.with.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<InputValue>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// True when `uses:` starts with `prefix`.
    pub fn uses_action(&self, prefix: &str) -> bool {
        self.uses
            .as_deref()
            .is_some_and(|uses| uses.starts_with(prefix))
    }

    /// Human label for log and error messages.
    pub fn label(&self) -> String {
        match (&self.id, &self.name, &self.uses) {
            (Some(id), _, _) => id.clone(),
            (None, Some(name), _) => name.clone(),
            (None, None, Some(uses)) => uses.clone(),
            _ => "<anonymous step>".to_string(),
        }
    }

    /// A required string input.
    pub fn input_str(&self, key: &str) -> Result<&str, MockError> {
        match self.with.get(key) {
            Some(value) => value.as_str().ok_or_else(|| MockError::InputType {
                step: self.label(),
                input: key.to_string(),
                expected: "string",
                found: value.type_name(),
            }),
            None => Err(MockError::MissingInput {
                step: self.label(),
                input: key.to_string(),
            }),
        }
    }

    /// An optional string input; empty strings and bare keys count as absent.
    pub fn input_str_opt(&self, key: &str) -> Result<Option<&str>, MockError> {
        match self.with.get(key) {
            None | Some(InputValue::Null) => Ok(None),
            Some(_) => self
                .input_str(key)
                .map(|s| if s.is_empty() { None } else { Some(s) }),
        }
    }

    /// A boolean input with a default for when it is absent.
    pub fn input_bool(&self, key: &str, default: bool) -> Result<bool, MockError> {
        match self.with.get(key) {
            None | Some(InputValue::Null) => Ok(default),
            Some(value) => value.as_bool().ok_or_else(|| MockError::InputType {
                step: self.label(),
                input: key.to_string(),
                expected: "bool",
                found: value.type_name(),
            }),
        }
    }
}

impl Workflow {
    pub fn new(name: impl Into<String>, on: Triggers) -> Self {
        Self {
            name: name.into(),
            on,
            ..Default::default()
        }
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, WorkflowError> {
        serde_yaml_ng::from_str(content).map_err(WorkflowError::Parse)
    }

    pub fn from_file(path: &Path) -> Result<Self, WorkflowError> {
        let content = std::fs::read_to_string(path).map_err(|source| WorkflowError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    /// Serialise to workflow YAML.
    pub fn marshal(&self) -> Result<String, WorkflowError> {
        serde_yaml_ng::to_string(self).map_err(WorkflowError::Marshal)
    }

    /// Add or replace a job.
    pub fn add_job(&mut self, id: impl Into<String>, job: Job) -> &mut Self {
        self.jobs.insert(id.into(), job);
        self
    }

    pub fn job(&self, id: &str) -> Result<&Job, WorkflowError> {
        self.jobs
            .get(id)
            .ok_or_else(|| WorkflowError::JobNotFound(id.to_string()))
    }

    pub fn job_mut(&mut self, id: &str) -> Result<&mut Job, WorkflowError> {
        self.jobs
            .get_mut(id)
            .ok_or_else(|| WorkflowError::JobNotFound(id.to_string()))
    }

    /// Check the structural invariants act relies on.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        for (id, job) in &self.jobs {
            if job.uses.is_some() && !job.steps.is_empty() {
                return Err(WorkflowError::UsesWithSteps(id.clone()));
            }
            if let Some(missing) = job.needs.iter().find(|need| !self.jobs.contains_key(*need)) {
                return Err(WorkflowError::MissingDependency {
                    job: id.clone(),
                    needs: missing.clone(),
                });
            }
        }
        Ok(())
    }
}

fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(one)) => vec![one],
        Some(OneOrMany::Many(many)) => many,
    })
}
