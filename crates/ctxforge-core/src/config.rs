//! Explicit grader configuration. Nothing in the core reads globals or the
//! environment; every limit reaches a grader through its constructor.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::errors::ConfigError;

/// Reporting order used when a suite config names no graders.
pub const DEFAULT_SUITE: [&str; 5] = [
    "budget",
    "loop",
    "schema",
    "memory_hygiene",
    "retrieval_relevance",
];

/// Flat key/value map handed to one grader. Unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GraderConfig {
    values: BTreeMap<String, Value>,
}

impl GraderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key).filter(|v| !v.is_null())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn u64_or(&self, key: &str, default: u64) -> Result<u64, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => v.as_u64().ok_or_else(|| invalid(key, "a non-negative integer")),
        }
    }

    pub fn f64_or(&self, key: &str, default: f64) -> Result<f64, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => v
                .as_f64()
                .filter(|f| f.is_finite())
                .ok_or_else(|| invalid(key, "a finite number")),
        }
    }

    pub fn bool_or(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => v.as_bool().ok_or_else(|| invalid(key, "a boolean")),
        }
    }

    pub fn str_or<'a>(&'a self, key: &str, default: &'a str) -> Result<&'a str, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => v.as_str().ok_or_else(|| invalid(key, "a string")),
        }
    }

    /// `None` when absent; a present key must be an array of strings.
    pub fn string_list(&self, key: &str) -> Result<Option<Vec<String>>, ConfigError> {
        let Some(v) = self.get(key) else {
            return Ok(None);
        };
        let arr = v.as_array().ok_or_else(|| invalid(key, "an array of strings"))?;
        arr.iter()
            .map(|item| {
                item.as_str()
                    .map(ToString::to_string)
                    .ok_or_else(|| invalid(key, "an array of strings"))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }

    pub fn object(&self, key: &str) -> Result<Option<&Map<String, Value>>, ConfigError> {
        match self.get(key) {
            None => Ok(None),
            Some(v) => v.as_object().map(Some).ok_or_else(|| invalid(key, "an object")),
        }
    }
}

impl From<Map<String, Value>> for GraderConfig {
    fn from(map: Map<String, Value>) -> Self {
        Self {
            values: map.into_iter().collect(),
        }
    }
}

fn invalid(key: &str, expected: &'static str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        expected,
    }
}

/// Suite file: `{"graders": [...], "<grader>": {flat map}}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SuiteConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graders: Option<Vec<String>>,
    #[serde(flatten)]
    pub per_grader: BTreeMap<String, GraderConfig>,
}

impl SuiteConfig {
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(raw).map_err(|e| ConfigError::invalid("suite", e.to_string()))
    }

    /// Configured grader names in reporting order.
    pub fn grader_names(&self) -> Vec<String> {
        match &self.graders {
            Some(names) => names.clone(),
            None => DEFAULT_SUITE.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Config for one grader; empty (all defaults) when not present.
    pub fn for_grader(&self, name: &str) -> GraderConfig {
        self.per_grader.get(name).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn getters_fall_back_to_defaults_and_ignore_unknown_keys() {
        let cfg = GraderConfig::new().set("max_tokens", 5000).set("mystery", "x");
        assert_eq!(cfg.u64_or("max_tokens", 100_000).unwrap(), 5000);
        assert_eq!(cfg.u64_or("max_tool_calls", 50).unwrap(), 50);
        assert!(cfg.bool_or("fail_on_stale", false).is_ok());
    }

    #[test]
    fn wrong_type_is_an_error_not_a_silent_default() {
        let cfg = GraderConfig::new().set("max_repeats", "three");
        let err = cfg.u64_or("max_repeats", 3).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                key: "max_repeats".into(),
                expected: "a non-negative integer"
            }
        );
    }

    #[test]
    fn explicit_null_means_default() {
        let cfg = GraderConfig::new().set("staleness_days", Value::Null);
        assert_eq!(cfg.u64_or("staleness_days", 90).unwrap(), 90);
    }

    #[test]
    fn string_list_validates_items() {
        let cfg = GraderConfig::new()
            .set("ok", json!(["a", "b"]))
            .set("bad", json!(["a", 1]));
        assert_eq!(cfg.string_list("ok").unwrap().unwrap(), vec!["a", "b"]);
        assert!(cfg.string_list("bad").is_err());
        assert!(cfg.string_list("absent").unwrap().is_none());
    }

    #[test]
    fn suite_config_parses_flat_sections() {
        let suite = SuiteConfig::from_json(
            r#"{"graders": ["loop", "budget"], "budget": {"max_tokens": 10}}"#,
        )
        .unwrap();
        assert_eq!(suite.grader_names(), vec!["loop", "budget"]);
        assert_eq!(suite.for_grader("budget").u64_or("max_tokens", 0).unwrap(), 10);
        assert_eq!(suite.for_grader("loop"), GraderConfig::default());
    }

    #[test]
    fn suite_defaults_to_full_order() {
        let suite = SuiteConfig::from_json("{}").unwrap();
        assert_eq!(suite.grader_names().len(), 5);
        assert_eq!(suite.grader_names()[0], "budget");
    }
}
