pub mod similarity;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationKind {
    MissingField,
    UnknownStepType,
    InvalidField,
    DuplicateStepId,
    UnknownParent,
    InvalidTimeline,
    Malformed,
}

impl ValidationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationKind::MissingField => "missing_field",
            ValidationKind::UnknownStepType => "unknown_step_type",
            ValidationKind::InvalidField => "invalid_field",
            ValidationKind::DuplicateStepId => "duplicate_step_id",
            ValidationKind::UnknownParent => "unknown_parent",
            ValidationKind::InvalidTimeline => "invalid_timeline",
            ValidationKind::Malformed => "malformed",
        }
    }
}

/// Structured rejection of a trajectory record, naming the offending step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("invalid trajectory ({}){}: {message}", .kind.as_str(), self.location())]
pub struct ValidationError {
    pub kind: ValidationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub message: String,
}

impl ValidationError {
    pub fn new(kind: ValidationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            step_index: None,
            step_id: None,
            field: None,
            message: message.into(),
        }
    }

    pub fn at_step(mut self, index: usize, step_id: Option<&str>) -> Self {
        self.step_index = Some(index);
        self.step_id = step_id.map(ToString::to_string);
        self
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn missing_field(field: &str, step_type: &str) -> Self {
        Self::new(
            ValidationKind::MissingField,
            format!("missing required field `{field}` for step_type {step_type}"),
        )
        .with_field(field)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ValidationKind::Malformed, message)
    }

    /// ` at step N (id=X)` suffix, empty for run-level errors.
    fn location(&self) -> String {
        match (self.step_index, self.step_id.as_deref()) {
            (Some(idx), Some(id)) => format!(" at step {idx} (id={id})"),
            (Some(idx), None) => format!(" at step {idx}"),
            (None, Some(id)) => format!(" at step id={id}"),
            (None, None) => String::new(),
        }
    }
}


/// Why a grader could not produce a verdict.
///
/// `MissingCapability` and `Validation` are reported as *skipped*;
/// `Internal` is reported as *errored*. Neither is a failing grade.
#[derive(Debug, Error)]
pub enum GradeError {
    #[error("grader '{grader}' requires {} which the record lacks", .missing.join(", "))]
    MissingCapability { grader: String, missing: Vec<String> },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("grader '{grader}' failed internally: {message}")]
    Internal { grader: String, message: String },
}

impl GradeError {
    pub fn internal(grader: &str, message: impl Into<String>) -> Self {
        GradeError::Internal {
            grader: grader.to_string(),
            message: message.into(),
        }
    }

    /// True for errors that mean "not applicable to this record".
    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            GradeError::MissingCapability { .. } | GradeError::Validation(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("config error: key `{key}` must be {expected}")]
    InvalidValue { key: String, expected: &'static str },

    #[error("config error: {grader}: {message}")]
    Invalid { grader: String, message: String },

    #[error("config error: unknown grader '{name}'{}", .suggestion.as_ref().map(|s| format!(". Did you mean '{s}'?")).unwrap_or_default())]
    UnknownGrader {
        name: String,
        suggestion: Option<String>,
    },
}

impl ConfigError {
    pub fn invalid(grader: &str, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            grader: grader.to_string(),
            message: message.into(),
        }
    }
}
