//! Tool allow/deny lists and per-tool argument schemas.

use std::collections::BTreeMap;

use ctxforge_core::canonical::{Canonicalizer, CanonicalizerConfig};
use ctxforge_core::trajectory::StepType;
use ctxforge_core::{
    ConfigError, Evidence, GradeError, Grader, GraderConfig, GraderResult, Requirements,
    Trajectory,
};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unconstrained {
    Allow,
    Deny,
}

pub struct SchemaGrader {
    allowed: Vec<String>,
    denied: Vec<String>,
    schemas: BTreeMap<String, jsonschema::Validator>,
    unconstrained: Unconstrained,
    canonicalizer: Canonicalizer,
}

impl std::fmt::Debug for SchemaGrader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaGrader")
            .field("allowed", &self.allowed)
            .field("denied", &self.denied)
            .field("schemas", &self.schemas.keys().collect::<Vec<_>>())
            .field("unconstrained", &self.unconstrained)
            .finish()
    }
}

/// `*` alone matches everything; `pre*`, `*suf` and `*mid*` match by
/// prefix, suffix and substring. Anything else is an exact name.
pub fn matches_tool_pattern(tool_name: &str, pattern: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if !pattern.contains('*') {
        return tool_name == pattern;
    }
    match (pattern.starts_with('*'), pattern.ends_with('*')) {
        (true, true) => {
            let inner = pattern.trim_matches('*');
            inner.is_empty() || tool_name.contains(inner)
        }
        (false, true) => {
            let prefix = pattern.trim_end_matches('*');
            !prefix.is_empty() && tool_name.starts_with(prefix)
        }
        (true, false) => {
            let suffix = pattern.trim_start_matches('*');
            !suffix.is_empty() && tool_name.ends_with(suffix)
        }
        (false, false) => tool_name == pattern,
    }
}

impl SchemaGrader {
    pub const NAME: &'static str = "schema";

    pub fn from_config(cfg: &GraderConfig) -> Result<Self, ConfigError> {
        let mut schemas = BTreeMap::new();
        if let Some(raw) = cfg.object("tool_schemas")? {
            for (tool, schema) in raw {
                let validator = jsonschema::options().build(schema).map_err(|e| {
                    ConfigError::invalid(Self::NAME, format!("invalid schema for tool '{tool}': {e}"))
                })?;
                schemas.insert(tool.clone(), validator);
            }
        }

        let allowed = match cfg.string_list("allowed_tools")? {
            Some(list) => list,
            None if !schemas.is_empty() => schemas.keys().cloned().collect(),
            None => {
                return Err(ConfigError::invalid(
                    Self::NAME,
                    "configure `allowed_tools` or `tool_schemas`",
                ))
            }
        };

        let unconstrained = match cfg.str_or("unconstrained_tools", "allow")? {
            "allow" => Unconstrained::Allow,
            "deny" => Unconstrained::Deny,
            _ => {
                return Err(ConfigError::InvalidValue {
                    key: "unconstrained_tools".to_string(),
                    expected: "\"allow\" or \"deny\"",
                })
            }
        };

        let canonicalizer = match cfg.string_list("redact_keys")? {
            None => Canonicalizer::default(),
            Some(redact_keys) => Canonicalizer::new(CanonicalizerConfig {
                redact_keys,
                ..CanonicalizerConfig::default()
            })
            .map_err(|e| ConfigError::invalid(Self::NAME, format!("redact_keys: {e}")))?,
        };

        Ok(Self {
            allowed,
            denied: cfg.string_list("denied_tools")?.unwrap_or_default(),
            schemas,
            unconstrained,
            canonicalizer,
        })
    }

    fn check_call(&self, step_id: &str, tool: &str, args: &Value) -> Vec<Evidence> {
        if let Some(pattern) = self.denied.iter().find(|p| matches_tool_pattern(tool, p)) {
            return vec![Evidence::error("tool_denied", format!("tool '{tool}' is denied"))
                .step(step_id)
                .detail("tool", tool)
                .detail("matched_pattern", pattern.clone())
                .detail("denied_tools", self.denied.clone())];
        }

        if !self.allowed.iter().any(|p| matches_tool_pattern(tool, p)) {
            return vec![Evidence::error(
                "tool_not_allowed",
                format!("tool '{tool}' is not in the allow-list"),
            )
            .step(step_id)
            .detail("tool", tool)
            .detail("allowed_tools", self.allowed.clone())];
        }

        match self.schemas.get(tool) {
            Some(validator) => {
                let mut errors = validator.iter_errors(args).peekable();
                if errors.peek().is_none() {
                    return Vec::new();
                }
                // Evidence is exported, so it only ever sees redacted arguments.
                let observed = self.canonicalizer.canonical_value(args);
                let mut secrets = Vec::new();
                redacted_strings(args, &observed, &mut secrets);
                errors
                    .map(|e| {
                        let constraint = mask(e.to_string(), &secrets);
                        Evidence::error(
                            "argument_schema_violation",
                            format!("tool '{tool}' arguments: {constraint}"),
                        )
                        .step(step_id)
                        .detail("tool", tool)
                        .detail("constraint", constraint)
                        .detail("observed", observed.clone())
                    })
                    .collect()
            }
            None if self.unconstrained == Unconstrained::Deny => {
                vec![Evidence::error(
                    "tool_unconstrained",
                    format!("tool '{tool}' has no argument schema"),
                )
                .step(step_id)
                .detail("tool", tool)
                .detail("unconstrained_tools", "deny")]
            }
            None => Vec::new(),
        }
    }
}

/// String leaves of `raw` that redaction replaced or removed in `redacted`.
fn redacted_strings(raw: &Value, redacted: &Value, out: &mut Vec<String>) {
    match (raw, redacted) {
        (Value::Object(a), Value::Object(b)) => {
            for (k, v) in a {
                match b.get(k) {
                    Some(w) => redacted_strings(v, w, out),
                    None => collect_strings(v, out),
                }
            }
        }
        (Value::Array(a), Value::Array(b)) if a.len() == b.len() => {
            for (v, w) in a.iter().zip(b) {
                redacted_strings(v, w, out);
            }
        }
        (Value::String(a), Value::String(b)) if a == b => {}
        (v, _) => collect_strings(v, out),
    }
}

fn collect_strings(v: &Value, out: &mut Vec<String>) {
    match v {
        Value::String(s) if !s.is_empty() => out.push(s.clone()),
        Value::Array(items) => items.iter().for_each(|i| collect_strings(i, out)),
        Value::Object(obj) => obj.values().for_each(|i| collect_strings(i, out)),
        _ => {}
    }
}

/// Replaces each secret's JSON-quoted form in a validator message.
fn mask(mut message: String, secrets: &[String]) -> String {
    for secret in secrets {
        let quoted = Value::String(secret.clone()).to_string();
        if message.contains(&quoted) {
            message = message.replace(&quoted, "\"[REDACTED]\"");
        }
    }
    message
}

impl Grader for SchemaGrader {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn requirements(&self) -> Requirements {
        Requirements::all_of([StepType::ToolCall])
    }

    fn grade(&self, record: &Trajectory) -> Result<GraderResult, GradeError> {
        self.requirements().check(self.name(), record)?;

        let mut evidence = Vec::new();
        let mut total = 0usize;
        let mut violating = 0usize;
        for (step, call) in record.tool_calls() {
            total += 1;
            let args = Value::Object(call.arguments.clone());
            let found = self.check_call(&step.step_id, &call.tool_name, &args);
            if !found.is_empty() {
                violating += 1;
            }
            evidence.extend(found);
        }

        let score = if total == 0 {
            1.0
        } else {
            (total - violating) as f64 / total as f64
        };
        evidence.push(
            Evidence::info(
                "schema_scan",
                format!("{violating} of {total} tool calls violated tool policy"),
            )
            .detail("tool_calls", total)
            .detail("violating_calls", violating),
        );

        Ok(GraderResult::new(self.name(), self.version(), violating == 0, score)
            .with_evidence(evidence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{llm_call, tool_call, trajectory};
    use serde_json::json;

    fn grader(cfg: Value) -> SchemaGrader {
        SchemaGrader::from_config(&GraderConfig::from(cfg.as_object().cloned().unwrap())).unwrap()
    }

    #[test]
    fn glob_patterns() {
        assert!(matches_tool_pattern("anything", "*"));
        assert!(matches_tool_pattern("fs_read", "fs_*"));
        assert!(matches_tool_pattern("db_delete", "*_delete"));
        assert!(matches_tool_pattern("do_exec_now", "*exec*"));
        assert!(!matches_tool_pattern("fs_read", "net_*"));
        assert!(!matches_tool_pattern("fs_read", "fs_"));
    }

    #[test]
    fn unknown_tool_fails_allow_list() {
        let g = grader(json!({"allowed_tools": ["search"]}));
        let r = g
            .grade(&trajectory(vec![
                tool_call("t1", "search", json!({})),
                tool_call("t2", "rm_rf", json!({})),
            ]))
            .unwrap();
        assert!(!r.passed);
        assert_eq!(r.score, 0.5);
        assert_eq!(r.evidence[0].check, "tool_not_allowed");
        assert_eq!(r.evidence[0].step_ids, vec!["t2"]);
    }

    #[test]
    fn deny_list_wins_over_allow_list() {
        let g = grader(json!({"allowed_tools": ["*"], "denied_tools": ["*delete*"]}));
        let r = g
            .grade(&trajectory(vec![tool_call("t1", "db_delete_row", json!({}))]))
            .unwrap();
        assert_eq!(r.evidence[0].check, "tool_denied");
        assert_eq!(r.evidence[0].details["matched_pattern"], "*delete*");
    }

    #[test]
    fn every_violated_constraint_is_reported() {
        let g = grader(json!({
            "tool_schemas": {
                "refund": {
                    "type": "object",
                    "required": ["order_id", "amount"],
                    "properties": {
                        "order_id": {"type": "string"},
                        "amount": {"type": "number", "maximum": 100}
                    }
                }
            }
        }));
        let r = g
            .grade(&trajectory(vec![tool_call("t1", "refund", json!({"amount": 500}))]))
            .unwrap();
        let violations: Vec<_> = r
            .evidence
            .iter()
            .filter(|e| e.check == "argument_schema_violation")
            .collect();
        assert_eq!(violations.len(), 2);
        assert!(violations.iter().all(|e| e.step_ids == vec!["t1"]));
        assert_eq!(r.score, 0.0);
    }

    #[test]
    fn violation_evidence_never_carries_secrets() {
        let g = grader(json!({
            "tool_schemas": {
                "login": {
                    "type": "object",
                    "properties": {
                        "user": {"type": "string"},
                        "password": {"type": "string", "minLength": 12},
                        "retries": {"type": "integer"}
                    }
                }
            }
        }));
        let r = g
            .grade(&trajectory(vec![tool_call(
                "t1",
                "login",
                json!({"user": "ada", "password": "hunter2", "retries": "many"}),
            )]))
            .unwrap();
        let violations: Vec<_> = r
            .evidence
            .iter()
            .filter(|e| e.check == "argument_schema_violation")
            .collect();
        assert_eq!(violations.len(), 2);
        let exported = serde_json::to_string(&r.evidence).unwrap();
        assert!(!exported.contains("hunter2"), "{exported}");
        assert_eq!(violations[0].details["observed"]["password"], "[REDACTED]");
        assert_eq!(violations[0].details["observed"]["user"], "ada");
    }

    #[test]
    fn schema_keys_become_allow_list() {
        let g = grader(json!({"tool_schemas": {"refund": {"type": "object"}}}));
        let r = g
            .grade(&trajectory(vec![tool_call("t1", "search", json!({}))]))
            .unwrap();
        assert_eq!(r.evidence[0].check, "tool_not_allowed");
    }

    #[test]
    fn unconstrained_deny_flags_tools_without_schema() {
        let g = grader(json!({"allowed_tools": ["search"], "unconstrained_tools": "deny"}));
        let r = g
            .grade(&trajectory(vec![tool_call("t1", "search", json!({}))]))
            .unwrap();
        assert_eq!(r.evidence[0].check, "tool_unconstrained");
    }

    #[test]
    fn configuration_errors() {
        assert!(SchemaGrader::from_config(&GraderConfig::new()).is_err());
        let bad = GraderConfig::from(
            json!({"tool_schemas": {"t": {"type": "not-a-type"}}})
                .as_object()
                .cloned()
                .unwrap(),
        );
        assert!(SchemaGrader::from_config(&bad).is_err());
    }

    #[test]
    fn records_without_tool_calls_are_skipped() {
        let g = grader(json!({"allowed_tools": ["search"]}));
        let err = g
            .grade(&trajectory(vec![llm_call("l1", "hi", None, None)]))
            .unwrap_err();
        assert!(matches!(err, GradeError::MissingCapability { .. }));
    }
}
