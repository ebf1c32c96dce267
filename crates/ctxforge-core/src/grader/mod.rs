mod result;

pub use result::{Evidence, GraderResult, Severity};

use crate::errors::GradeError;
use crate::trajectory::{StepType, Trajectory};

/// A stateless, deterministic evaluator over one trajectory.
///
/// Implementations take all configuration at construction and must not keep
/// mutable state between calls: the driver runs graders in parallel over a
/// shared record, and grading the same record twice must give an identical
/// result.
pub trait Grader: Send + Sync {
    fn name(&self) -> &'static str;

    fn version(&self) -> &'static str {
        "1.0.0"
    }

    fn requirements(&self) -> Requirements {
        Requirements::none()
    }

    /// Implementations call `self.requirements().check(..)` before grading.
    fn grade(&self, record: &Trajectory) -> Result<GraderResult, GradeError>;
}

/// Step types and fields a grader needs in order to say anything useful.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Requirements {
    pub all_of: Vec<StepType>,
    pub any_of: Vec<StepType>,
    pub fields: Vec<(StepType, &'static str)>,
}

impl Requirements {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn all_of(types: impl IntoIterator<Item = StepType>) -> Self {
        Self {
            all_of: types.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn any_of(types: impl IntoIterator<Item = StepType>) -> Self {
        Self {
            any_of: types.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn field(mut self, step_type: StepType, field: &'static str) -> Self {
        self.fields.push((step_type, field));
        self
    }

    /// `Err(MissingCapability)` listing everything the record lacks.
    pub fn check(&self, grader: &str, record: &Trajectory) -> Result<(), GradeError> {
        let mut missing: Vec<String> = self
            .all_of
            .iter()
            .filter(|t| !record.has_step_type(**t))
            .map(|t| t.as_str().to_string())
            .collect();

        if !self.any_of.is_empty() && !self.any_of.iter().any(|t| record.has_step_type(*t)) {
            let names: Vec<&str> = self.any_of.iter().map(|t| t.as_str()).collect();
            missing.push(format!("one of [{}]", names.join(", ")));
        }

        for (step_type, field) in &self.fields {
            if !record.steps_of(*step_type).any(|s| s.has_field(field)) {
                missing.push(format!("{step_type}.{field}"));
            }
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(GradeError::MissingCapability {
                grader: grader.to_string(),
                missing,
            })
        }
    }
}
