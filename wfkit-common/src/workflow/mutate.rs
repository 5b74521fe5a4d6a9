//! Surgical edits to a parsed workflow.
//!
//! None of these track data flow between steps: removing a step whose outputs
//! a later step reads leaves a dangling `steps.<id>.outputs` reference, and
//! the run fails the way the real pipeline would.

use std::collections::BTreeSet;

use super::{Step, Workflow, WorkflowError};
use crate::mocks::MockError;

impl Workflow {
    fn steps_mut(&mut self, job: &str) -> Result<&mut Vec<Step>, WorkflowError> {
        let entry = self.job_mut(job)?;
        if entry.is_reusable_call() {
            return Err(WorkflowError::ReusableJob(job.to_string()));
        }
        Ok(&mut entry.steps)
    }

    fn index_of(&self, job: &str, id: &str) -> Result<usize, WorkflowError> {
        self.job(job)?
            .step_index(id)
            .ok_or_else(|| WorkflowError::StepNotFound {
                job: job.to_string(),
                step: id.to_string(),
            })
    }

    /// Splice `replacements` in place of the step at `index`.
    ///
    /// Every replacement inherits the original's `if:` guard; only the first
    /// inherits its `id`, so `steps.<id>.outputs` references keep resolving.
    pub fn replace_step_at_index(
        &mut self,
        job: &str,
        index: usize,
        replacements: Vec<Step>,
    ) -> Result<(), WorkflowError> {
        if replacements.is_empty() {
            return Err(WorkflowError::NoReplacementSteps(job.to_string()));
        }
        let steps = self.steps_mut(job)?;
        if index >= steps.len() {
            return Err(WorkflowError::StepIndexOutOfRange {
                job: job.to_string(),
                index,
                len: steps.len(),
            });
        }
        let original = steps[index].clone();
        let replacements = inherit_from(&original, replacements);
        steps.splice(index..=index, replacements);
        Ok(())
    }

    /// [`Workflow::replace_step_at_index`] addressed by step id.
    pub fn replace_step(
        &mut self,
        job: &str,
        id: &str,
        replacements: Vec<Step>,
    ) -> Result<(), WorkflowError> {
        let index = self.index_of(job, id)?;
        self.replace_step_at_index(job, index, replacements)
    }

    pub fn remove_step_at_index(&mut self, job: &str, index: usize) -> Result<Step, WorkflowError> {
        let steps = self.steps_mut(job)?;
        if index >= steps.len() {
            return Err(WorkflowError::StepIndexOutOfRange {
                job: job.to_string(),
                index,
                len: steps.len(),
            });
        }
        Ok(steps.remove(index))
    }

    pub fn remove_step(&mut self, job: &str, id: &str) -> Result<Step, WorkflowError> {
        let index = self.index_of(job, id)?;
        self.remove_step_at_index(job, index)
    }

    /// Keep the steps up to and including `id`; drop everything after it.
    pub fn remove_all_steps_after(&mut self, job: &str, id: &str) -> Result<(), WorkflowError> {
        let index = self.index_of(job, id)?;
        self.steps_mut(job)?.truncate(index + 1);
        Ok(())
    }

    /// Insert `steps` immediately before the step with `id`.
    pub fn insert_steps_before(
        &mut self,
        job: &str,
        id: &str,
        steps: Vec<Step>,
    ) -> Result<(), WorkflowError> {
        let index = self.index_of(job, id)?;
        let existing = self.steps_mut(job)?;
        existing.splice(index..index, steps);
        Ok(())
    }

    /// Insert `steps` immediately after the step with `id`.
    pub fn insert_steps_after(
        &mut self,
        job: &str,
        id: &str,
        steps: Vec<Step>,
    ) -> Result<(), WorkflowError> {
        let index = self.index_of(job, id)? + 1;
        let existing = self.steps_mut(job)?;
        existing.splice(index..index, steps);
        Ok(())
    }

    /// Append `steps` to the end of a job.
    pub fn push_steps(&mut self, job: &str, steps: Vec<Step>) -> Result<(), WorkflowError> {
        self.steps_mut(job)?.extend(steps);
        Ok(())
    }

    /// Replace every step whose `uses:` starts with `action_prefix` by the
    /// step `factory` builds from it. Returns how many steps were replaced.
    ///
    /// Matching is by action rather than step id because a pipeline may call
    /// the same action from many unrelated steps. If any factory fails, no
    /// step is replaced.
    pub fn mock_all_steps_using_action<F>(
        &mut self,
        action_prefix: &str,
        mut factory: F,
    ) -> Result<usize, WorkflowError>
    where
        F: FnMut(&Step) -> Result<Step, MockError>,
    {
        // Every factory runs before anything is written, so a failing mock
        // leaves the workflow untouched.
        let mut planned = Vec::new();
        for (job_id, job) in &self.jobs {
            for (index, step) in job.steps.iter().enumerate() {
                if !step.uses_action(action_prefix) {
                    continue;
                }
                let mock = factory(step).map_err(|source| WorkflowError::Mock {
                    job: job_id.clone(),
                    step: step.label(),
                    source,
                })?;
                planned.push((job_id.clone(), index, inherit_from(step, vec![mock])));
            }
        }

        let replaced = planned.len();
        for (job_id, index, mocked) in planned {
            if let (Some(job), Some(mock)) = (self.jobs.get_mut(&job_id), mocked.into_iter().next()) {
                job.steps[index] = mock;
            }
        }
        if replaced > 0 {
            tracing::debug!(action = action_prefix, replaced, "mocked action steps");
        }
        Ok(replaced)
    }

    /// Point a job at another workflow (usually a child's
    /// [`super::TestingWorkflow::local_path`]). The job must not have steps.
    pub fn set_job_uses(&mut self, job: &str, uses: impl Into<String>) -> Result<(), WorkflowError> {
        let entry = self.job_mut(job)?;
        if !entry.steps.is_empty() {
            return Err(WorkflowError::UsesWithSteps(job.to_string()));
        }
        entry.uses = Some(uses.into());
        Ok(())
    }

    /// Drop every job except `id`. With `keep_dependencies` the transitive
    /// `needs` closure of `id` survives too; without it the kept job's `needs`
    /// list is cleared so it can be scheduled on its own.
    pub fn with_only_one_job(&mut self, id: &str, keep_dependencies: bool) -> Result<(), WorkflowError> {
        self.job(id)?;

        let mut keep = BTreeSet::new();
        if keep_dependencies {
            let mut pending = vec![id.to_string()];
            while let Some(current) = pending.pop() {
                if !keep.insert(current.clone()) {
                    continue;
                }
                let job = self.jobs.get(&current).ok_or_else(|| WorkflowError::MissingDependency {
                    job: id.to_string(),
                    needs: current.clone(),
                })?;
                pending.extend(job.needs.iter().cloned());
            }
        } else {
            keep.insert(id.to_string());
        }

        self.jobs.retain(|job_id, _| keep.contains(job_id));
        if !keep_dependencies {
            self.job_mut(id)?.needs.clear();
        }
        Ok(())
    }
}

fn inherit_from(original: &Step, mut replacements: Vec<Step>) -> Vec<Step> {
    if let Some(condition) = &original.condition {
        for step in &mut replacements {
            step.condition = Some(condition.clone());
        }
    }
    if let (Some(id), Some(first)) = (&original.id, replacements.first_mut()) {
        first.id = Some(id.clone());
    }
    replacements
}
