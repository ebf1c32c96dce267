use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::HashSet;

use super::{AgentInfo, RunOutcome, Step, TaskInfo, Trajectory};
use crate::errors::{ValidationError, ValidationKind};
use crate::timefmt;

/// Incremental producer for a [`Trajectory`].
///
/// Steps are checked as they arrive so a producer learns about a bad id at
/// the call site rather than when the record is sealed.
#[derive(Debug)]
pub struct TrajectoryBuilder {
    record: Trajectory,
    ids: HashSet<String>,
}

impl TrajectoryBuilder {
    pub fn new(run_id: impl Into<String>, agent: AgentInfo, started_at: DateTime<Utc>) -> Self {
        Self {
            record: Trajectory {
                run_id: run_id.into(),
                started_at: timefmt::truncate_millis(started_at),
                ended_at: None,
                agent,
                task: None,
                outcome: None,
                steps: Vec::new(),
                metadata: None,
            },
            ids: HashSet::new(),
        }
    }

    /// Same as [`TrajectoryBuilder::new`] with a random UUID v4 run id.
    pub fn with_generated_id(agent: AgentInfo, started_at: DateTime<Utc>) -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), agent, started_at)
    }

    pub fn run_id(&self) -> &str {
        &self.record.run_id
    }

    pub fn task(mut self, task: TaskInfo) -> Self {
        self.record.task = Some(task);
        self
    }

    pub fn metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.record.metadata = Some(metadata);
        self
    }

    pub fn len(&self) -> usize {
        self.record.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.record.steps.is_empty()
    }

    pub fn push(&mut self, step: Step) -> Result<&mut Self, ValidationError> {
        let idx = self.record.steps.len();
        if self.ids.contains(&step.step_id) {
            return Err(ValidationError::new(
                ValidationKind::DuplicateStepId,
                format!("step_id '{}' already recorded", step.step_id),
            )
            .at_step(idx, Some(&step.step_id))
            .with_field("step_id"));
        }
        if let Some(parent) = step.parent_step_id.as_deref() {
            if !self.ids.contains(parent) {
                return Err(ValidationError::new(
                    ValidationKind::UnknownParent,
                    format!("parent_step_id '{parent}' does not name an earlier step"),
                )
                .at_step(idx, Some(&step.step_id))
                .with_field("parent_step_id"));
            }
        }
        self.ids.insert(step.step_id.clone());
        self.record.steps.push(step);
        Ok(self)
    }

    /// Sets outcome and end time and hands back the immutable record.
    pub fn seal(
        mut self,
        outcome: RunOutcome,
        ended_at: DateTime<Utc>,
    ) -> Result<Trajectory, ValidationError> {
        self.record.outcome = Some(outcome);
        self.record.ended_at = Some(timefmt::truncate_millis(ended_at));
        self.record.validate()?;
        Ok(self.record)
    }
}
