//! Lenient first stage of ingestion for records converted from external
//! transports, where any field may be absent or explicitly null.

use serde::Deserialize;
use serde_json::{Map, Value};

use super::{AgentInfo, RunOutcome, Step, StepType, TaskInfo, Trajectory};
use crate::errors::{ValidationError, ValidationKind};
use crate::timefmt;

/// A record nobody has vouched for yet. Promote with [`UntrustedTrajectory::validate`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UntrustedTrajectory {
    #[serde(default)]
    pub run_id: Option<Value>,
    #[serde(default)]
    pub started_at: Option<Value>,
    #[serde(default)]
    pub ended_at: Option<Value>,
    #[serde(default, alias = "agent")]
    pub agent_info: Option<Value>,
    #[serde(default, alias = "task")]
    pub task_info: Option<Value>,
    #[serde(default)]
    pub outcome: Option<Value>,
    #[serde(default)]
    pub steps: Option<Vec<Value>>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl UntrustedTrajectory {
    pub fn from_json(raw: &str) -> Result<Self, ValidationError> {
        serde_json::from_str(raw)
            .map_err(|e| ValidationError::malformed(format!("trajectory JSON: {e}")))
    }

    pub fn from_value(value: Value) -> Result<Self, ValidationError> {
        serde_json::from_value(value)
            .map_err(|e| ValidationError::malformed(format!("trajectory JSON: {e}")))
    }

    /// Second stage: every required field per variant is enforced, null
    /// optionals become `None`, then the record invariants are checked.
    pub fn validate(self) -> Result<Trajectory, ValidationError> {
        let run_id = required_string(self.run_id, "run_id")?;
        let started_at = required_time(self.started_at, "started_at")?;
        let ended_at = optional_time(self.ended_at, "ended_at")?;

        let agent_raw = non_null(self.agent_info)
            .ok_or_else(|| ValidationError::missing_field("agent_info", "trajectory"))?;
        let agent: AgentInfo = from_field(strip_nulls(agent_raw), "agent_info")?;
        let task: Option<TaskInfo> = non_null(self.task_info)
            .map(|v| from_field(strip_nulls(v), "task_info"))
            .transpose()?;
        let outcome: Option<RunOutcome> = non_null(self.outcome)
            .map(|v| from_field(v, "outcome"))
            .transpose()?;
        let metadata: Option<Map<String, Value>> = non_null(self.metadata)
            .map(|v| from_field(v, "metadata"))
            .transpose()?;

        let steps = self
            .steps
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(idx, raw)| promote_step(idx, raw))
            .collect::<Result<Vec<_>, _>>()?;

        let record = Trajectory {
            run_id,
            started_at,
            ended_at,
            agent,
            task,
            outcome,
            steps,
            metadata,
        };
        record.validate()?;
        Ok(record)
    }
}

fn promote_step(idx: usize, raw: Value) -> Result<Step, ValidationError> {
    let Value::Object(obj) = raw else {
        return Err(ValidationError::malformed("step is not a JSON object").at_step(idx, None));
    };

    let step_id = match obj.get("step_id") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        _ => {
            return Err(ValidationError::new(
                ValidationKind::MissingField,
                "missing required field `step_id`",
            )
            .at_step(idx, None)
            .with_field("step_id"))
        }
    };
    let at = |e: ValidationError| e.at_step(idx, Some(&step_id));

    let step_type: StepType = match obj.get("step_type") {
        Some(Value::String(tag)) => tag.parse().map_err(|msg: String| {
            at(ValidationError::new(ValidationKind::UnknownStepType, msg).with_field("step_type"))
        })?,
        Some(Value::Null) | None => {
            return Err(at(ValidationError::new(
                ValidationKind::MissingField,
                "missing required field `step_type`",
            )
            .with_field("step_type")))
        }
        Some(other) => {
            return Err(at(ValidationError::new(
                ValidationKind::UnknownStepType,
                format!("step_type must be a string, got {other}"),
            )
            .with_field("step_type")))
        }
    };

    if obj.get("timestamp").is_none_or_null() {
        return Err(at(ValidationError::missing_field("timestamp", step_type.as_str())));
    }
    for field in step_type.required_fields() {
        if obj.get(*field).is_none_or_null() {
            return Err(at(ValidationError::missing_field(field, step_type.as_str())));
        }
    }

    let cleaned = strip_nulls(Value::Object(obj));
    serde_json::from_value::<Step>(cleaned).map_err(|e| {
        at(ValidationError::new(
            ValidationKind::InvalidField,
            format!("{step_type} step: {e}"),
        ))
    })
}

trait NoneOrNull {
    fn is_none_or_null(&self) -> bool;
}

impl NoneOrNull for Option<&Value> {
    fn is_none_or_null(&self) -> bool {
        self.map_or(true, Value::is_null)
    }
}

/// Drops top-level `null` members so serde sees them as absent.
fn strip_nulls(v: Value) -> Value {
    match v {
        Value::Object(obj) => Value::Object(obj.into_iter().filter(|(_, v)| !v.is_null()).collect()),
        other => other,
    }
}

fn non_null(v: Option<Value>) -> Option<Value> {
    v.filter(|v| !v.is_null())
}

fn from_field<T: serde::de::DeserializeOwned>(v: Value, field: &str) -> Result<T, ValidationError> {
    serde_json::from_value(v).map_err(|e| {
        ValidationError::new(ValidationKind::InvalidField, format!("{field}: {e}")).with_field(field)
    })
}

fn required_string(v: Option<Value>, field: &str) -> Result<String, ValidationError> {
    match non_null(v) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s),
        Some(_) => Err(ValidationError::new(
            ValidationKind::InvalidField,
            format!("`{field}` must be a non-empty string"),
        )
        .with_field(field)),
        None => Err(ValidationError::missing_field(field, "trajectory")),
    }
}

fn required_time(v: Option<Value>, field: &str) -> Result<chrono::DateTime<chrono::Utc>, ValidationError> {
    optional_time(v, field)?.ok_or_else(|| ValidationError::missing_field(field, "trajectory"))
}

fn optional_time(
    v: Option<Value>,
    field: &str,
) -> Result<Option<chrono::DateTime<chrono::Utc>>, ValidationError> {
    match non_null(v) {
        None => Ok(None),
        Some(Value::String(s)) => timefmt::parse(&s).map(Some).map_err(|e| {
            ValidationError::new(
                ValidationKind::InvalidField,
                format!("`{field}` is not RFC 3339: {e}"),
            )
            .with_field(field)
        }),
        Some(other) => Err(ValidationError::new(
            ValidationKind::InvalidField,
            format!("`{field}` must be a timestamp string, got {other}"),
        )
        .with_field(field)),
    }
}
