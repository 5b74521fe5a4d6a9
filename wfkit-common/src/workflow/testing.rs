//! Workflows stamped with a run id and materialised as temporary files.

use std::path::{Path, PathBuf};

use uuid::Uuid;

use super::{Workflow, WorkflowError};

/// Directory, relative to the repository root, act loads workflows from.
pub const WORKFLOWS_DIR: &str = ".github/workflows";

/// A workflow under test, plus the child workflows it calls.
///
/// A parent exclusively owns its children. Children share the parent's run
/// id so that every generated file name carries the same correlation id.
#[derive(Debug, Clone)]
pub struct TestingWorkflow {
    base_name: String,
    run_id: Uuid,
    pub workflow: Workflow,
    children: Vec<TestingWorkflow>,
}

impl TestingWorkflow {
    pub fn new(base_name: impl Into<String>, workflow: Workflow) -> Self {
        Self {
            base_name: sanitize(&base_name.into()),
            run_id: Uuid::new_v4(),
            workflow,
            children: Vec::new(),
        }
    }

    /// Parse `path` and wrap it, named after the file stem.
    pub fn from_file(path: &Path) -> Result<Self, WorkflowError> {
        let workflow = Workflow::from_file(path)?;
        let base = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "workflow".to_string());
        Ok(Self::new(base, workflow))
    }

    /// Share the run id of `other`.
    #[must_use]
    pub fn with_run_id_of(mut self, other: &TestingWorkflow) -> Self {
        self.set_run_id(other.run_id);
        self
    }

    fn set_run_id(&mut self, run_id: Uuid) {
        self.run_id = run_id;
        for child in &mut self.children {
            child.set_run_id(run_id);
        }
    }

    /// Adopt `workflow` as a child and return its local `uses:` path.
    pub fn child(&mut self, base_name: impl Into<String>, workflow: Workflow) -> String {
        let mut child = TestingWorkflow::new(base_name, workflow);
        child.set_run_id(self.run_id);
        let path = child.local_path();
        self.children.push(child);
        path
    }

    /// Adopt `workflow` as a child and point `job` at it.
    pub fn call_child(
        &mut self,
        job: &str,
        base_name: impl Into<String>,
        workflow: Workflow,
    ) -> Result<(), WorkflowError> {
        // Check the job before adopting so a failure leaves no orphan child.
        if !self.workflow.job(job)?.steps.is_empty() {
            return Err(WorkflowError::UsesWithSteps(job.to_string()));
        }
        let path = self.child(base_name, workflow);
        self.workflow.set_job_uses(job, path)
    }

    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn children(&self) -> &[TestingWorkflow] {
        &self.children
    }

    pub fn child_mut(&mut self, base_name: &str) -> Option<&mut TestingWorkflow> {
        let wanted = sanitize(base_name);
        self.children
            .iter_mut()
            .find(|child| child.base_name == wanted)
    }

    /// `act-<base>-<run-id>.yml`
    pub fn file_name(&self) -> String {
        format!("act-{}-{}.yml", self.base_name, self.run_id)
    }

    /// Path a job in the same repository uses to call this workflow.
    pub fn local_path(&self) -> String {
        format!("./{WORKFLOWS_DIR}/{}", self.file_name())
    }

    /// This workflow followed by all descendants, depth first.
    pub fn flatten(&self) -> Vec<&TestingWorkflow> {
        let mut all = vec![self];
        for child in &self.children {
            all.extend(child.flatten());
        }
        all
    }

    /// Apply `edit` to this workflow and every descendant.
    pub fn for_each_workflow_mut<F: FnMut(&mut Workflow)>(&mut self, mut edit: F) {
        self.visit_mut(&mut edit);
    }

    fn visit_mut<F: FnMut(&mut Workflow)>(&mut self, edit: &mut F) {
        edit(&mut self.workflow);
        for child in &mut self.children {
            child.visit_mut(edit);
        }
    }

    /// Write this workflow and all descendants under `repo_root`. Returns the
    /// written paths, parent first.
    pub fn materialize(&self, repo_root: &Path) -> Result<Vec<PathBuf>, WorkflowError> {
        let dir = repo_root.join(WORKFLOWS_DIR);
        std::fs::create_dir_all(&dir).map_err(|source| WorkflowError::Write {
            path: dir.clone(),
            source,
        })?;

        let mut rendered = Vec::new();
        for workflow in self.flatten() {
            workflow.workflow.validate()?;
            rendered.push((dir.join(workflow.file_name()), workflow.workflow.marshal()?));
        }

        let mut written = Vec::new();
        for (path, content) in rendered {
            if let Err(source) = std::fs::write(&path, content) {
                for done in &written {
                    let _ = std::fs::remove_file(done);
                }
                return Err(WorkflowError::Write { path, source });
            }
            written.push(path);
        }
        Ok(written)
    }
}

fn sanitize(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "workflow".to_string()
    } else {
        cleaned
    }
}
