//! The trajectory record: an ordered, immutable log of one agent run.

mod builder;
mod step;
mod untrusted;

pub use builder::TrajectoryBuilder;
pub use step::{
    ChatMessage, FieldChange, FinalOutput, Interrupt, LlmCall, LlmInput, LlmOutput, MemoryOperation,
    MemoryRead, MemoryWrite, Namespace, ResourceImpact, Retrieval, RetrievedItem, StateChange, Step,
    StepKind, StepType, TextOrObject, ToolCall, UserInput,
};
pub use untrusted::UntrustedTrajectory;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::errors::{ValidationError, ValidationKind};
use crate::timefmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framework_version: Option<String>,
}

impl AgentInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            framework: None,
            framework_version: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TaskInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Success,
    Failure,
    Error,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub run_id: String,
    #[serde(with = "timefmt")]
    pub started_at: DateTime<Utc>,
    #[serde(default, with = "timefmt::option", skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(rename = "agent_info", alias = "agent")]
    pub agent: AgentInfo,
    #[serde(
        rename = "task_info",
        alias = "task",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub task: Option<TaskInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<RunOutcome>,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl Trajectory {
    /// Strict ingestion: serde parse, then record invariants.
    pub fn from_json(raw: &str) -> Result<Self, ValidationError> {
        let record: Trajectory = serde_json::from_str(raw)
            .map_err(|e| ValidationError::malformed(format!("trajectory JSON: {e}")))?;
        record.validate()?;
        Ok(record)
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Checks the record-level invariants: unique step ids, parents that
    /// point backwards, a sane timeline, and `ended_at` on sealed records.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.run_id.trim().is_empty() {
            return Err(ValidationError::new(
                ValidationKind::MissingField,
                "run_id must not be empty",
            )
            .with_field("run_id"));
        }

        let mut seen: HashMap<&str, usize> = HashMap::with_capacity(self.steps.len());
        for (idx, step) in self.steps.iter().enumerate() {
            if step.step_id.is_empty() {
                return Err(ValidationError::missing_field("step_id", step.step_type().as_str())
                    .at_step(idx, None));
            }
            if let Some(parent) = step.parent_step_id.as_deref() {
                if !seen.contains_key(parent) {
                    return Err(ValidationError::new(
                        ValidationKind::UnknownParent,
                        format!("parent_step_id '{parent}' does not name an earlier step"),
                    )
                    .at_step(idx, Some(&step.step_id))
                    .with_field("parent_step_id"));
                }
            }
            if let Some(first) = seen.insert(step.step_id.as_str(), idx) {
                return Err(ValidationError::new(
                    ValidationKind::DuplicateStepId,
                    format!("step_id '{}' already used by step {first}", step.step_id),
                )
                .at_step(idx, Some(&step.step_id))
                .with_field("step_id"));
            }
        }

        match self.ended_at {
            Some(end) if end < self.started_at => {
                return Err(ValidationError::new(
                    ValidationKind::InvalidTimeline,
                    format!(
                        "ended_at {} precedes started_at {}",
                        timefmt::format(&end),
                        timefmt::format(&self.started_at)
                    ),
                )
                .with_field("ended_at"));
            }
            None if self.outcome.is_some() => {
                return Err(ValidationError::new(
                    ValidationKind::InvalidTimeline,
                    "sealed record (outcome set) has no ended_at",
                )
                .with_field("ended_at"));
            }
            _ => {}
        }
        Ok(())
    }

    pub fn steps_of(&self, step_type: StepType) -> impl Iterator<Item = &Step> {
        self.steps.iter().filter(move |s| s.step_type() == step_type)
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = (&Step, &ToolCall)> {
        self.steps.iter().filter_map(|s| s.as_tool_call().map(|c| (s, c)))
    }

    pub fn llm_calls(&self) -> impl Iterator<Item = (&Step, &LlmCall)> {
        self.steps.iter().filter_map(|s| s.as_llm_call().map(|c| (s, c)))
    }

    pub fn step_index(&self, step_id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.step_id == step_id)
    }

    pub fn total_tokens(&self) -> u64 {
        self.llm_calls().map(|(_, c)| c.total_tokens()).sum()
    }

    pub fn total_tool_calls(&self) -> usize {
        self.tool_calls().count()
    }

    pub fn has_step_type(&self, step_type: StepType) -> bool {
        self.steps.iter().any(|s| s.step_type() == step_type)
    }

    pub fn is_sealed(&self) -> bool {
        self.outcome.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(steps: Value) -> Value {
        json!({
            "run_id": "run-1",
            "started_at": "2025-01-01T00:00:00Z",
            "agent_info": {"name": "support-bot"},
            "steps": steps
        })
    }

    #[test]
    fn from_json_accepts_valid_record() {
        let raw = record(json!([
            {"step_id": "a", "step_type": "user_input", "timestamp": "2025-01-01T00:00:00Z", "content": "hi"},
            {"step_id": "b", "step_type": "llm_call", "timestamp": "2025-01-01T00:00:01Z",
             "model": "m", "input": "hi", "output": "hello", "tokens_in": 3, "tokens_out": 4,
             "parent_step_id": "a"}
        ]));
        let t = Trajectory::from_json(&raw.to_string()).unwrap();
        assert_eq!(t.steps.len(), 2);
        assert_eq!(t.total_tokens(), 7);
        assert!(t.has_step_type(StepType::LlmCall));
        assert!(!t.has_step_type(StepType::ToolCall));
        assert_eq!(t.step_index("b"), Some(1));
    }

    #[test]
    fn duplicate_step_ids_rejected() {
        let raw = record(json!([
            {"step_id": "a", "step_type": "user_input", "timestamp": "2025-01-01T00:00:00Z", "content": "hi"},
            {"step_id": "a", "step_type": "final_output", "timestamp": "2025-01-01T00:00:01Z", "content": "bye"}
        ]));
        let err = Trajectory::from_json(&raw.to_string()).unwrap_err();
        assert_eq!(err.kind, ValidationKind::DuplicateStepId);
        assert_eq!(err.step_index, Some(1));
    }

    #[test]
    fn forward_parent_reference_rejected() {
        let raw = record(json!([
            {"step_id": "a", "step_type": "user_input", "timestamp": "2025-01-01T00:00:00Z",
             "content": "hi", "parent_step_id": "b"},
            {"step_id": "b", "step_type": "final_output", "timestamp": "2025-01-01T00:00:01Z", "content": "bye"}
        ]));
        let err = Trajectory::from_json(&raw.to_string()).unwrap_err();
        assert_eq!(err.kind, ValidationKind::UnknownParent);
        assert_eq!(err.step_id.as_deref(), Some("a"));
    }

    #[test]
    fn ended_before_started_rejected() {
        let mut raw = record(json!([]));
        raw["ended_at"] = json!("2024-12-31T23:59:59Z");
        let err = Trajectory::from_json(&raw.to_string()).unwrap_err();
        assert_eq!(err.kind, ValidationKind::InvalidTimeline);
    }

    #[test]
    fn missing_required_field_is_malformed_on_strict_path() {
        let raw = record(json!([
            {"step_id": "a", "step_type": "tool_call", "timestamp": "2025-01-01T00:00:00Z", "arguments": {}}
        ]));
        let err = Trajectory::from_json(&raw.to_string()).unwrap_err();
        assert_eq!(err.kind, ValidationKind::Malformed);
    }
}
