use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warn,
    Error,
}

/// One auditable finding. Failing items carry threshold and observed value
/// in `details`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub check: String,
    pub description: String,
    pub severity: Severity,
    #[serde(default)]
    pub step_ids: Vec<String>,
    #[serde(default)]
    pub details: BTreeMap<String, Value>,
}

impl Evidence {
    pub fn new(check: impl Into<String>, severity: Severity, description: impl Into<String>) -> Self {
        Self {
            check: check.into(),
            description: description.into(),
            severity,
            step_ids: Vec::new(),
            details: BTreeMap::new(),
        }
    }

    pub fn info(check: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(check, Severity::Info, description)
    }

    pub fn warn(check: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(check, Severity::Warn, description)
    }

    pub fn error(check: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(check, Severity::Error, description)
    }

    pub fn step(mut self, step_id: impl Into<String>) -> Self {
        self.step_ids.push(step_id.into());
        self
    }

    pub fn steps<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.step_ids.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraderResult {
    pub grader: String,
    pub version: String,
    pub passed: bool,
    pub score: f64,
    pub evidence: Vec<Evidence>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl GraderResult {
    pub fn new(grader: &str, version: &str, passed: bool, score: f64) -> Self {
        Self {
            grader: grader.to_string(),
            version: version.to_string(),
            passed,
            score,
            evidence: Vec::new(),
            metadata: None,
        }
    }

    pub fn with_evidence(mut self, evidence: Vec<Evidence>) -> Self {
        self.evidence = evidence;
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata
            .get_or_insert_with(Map::new)
            .insert(key.to_string(), value.into());
        self
    }

    pub fn errors(&self) -> impl Iterator<Item = &Evidence> {
        self.evidence.iter().filter(|e| e.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Evidence> {
        self.evidence.iter().filter(|e| e.severity == Severity::Warn)
    }

    /// Score is a finite number in `[0, 1]`.
    pub fn score_in_range(&self) -> bool {
        self.score.is_finite() && (0.0..=1.0).contains(&self.score)
    }
}
