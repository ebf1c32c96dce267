//! Memory hygiene: data loss on writes and stale profile-like fields.
//!
//! The two checks are independent. Corruption is judged against declared
//! `changes` and against the state built up by earlier writes to the same
//! `(namespace, key)` slot; staleness only looks at timestamps.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use ctxforge_core::timefmt;
use ctxforge_core::trajectory::{MemoryOperation, MemoryWrite, StepKind, StepType};
use ctxforge_core::{
    ConfigError, Evidence, GradeError, Grader, GraderConfig, GraderResult, Requirements,
    Severity, Trajectory,
};
use serde_json::{json, Map, Value};

const SECS_PER_DAY: i64 = 86_400;

#[derive(Debug, Clone)]
pub struct MemoryHygieneGrader {
    pub staleness_days: u64,
    pub fail_on_data_loss: bool,
    pub fail_on_stale: bool,
    pub timestamp_fields: Vec<String>,
}

impl Default for MemoryHygieneGrader {
    fn default() -> Self {
        Self {
            staleness_days: 90,
            fail_on_data_loss: true,
            fail_on_stale: false,
            timestamp_fields: vec!["updated_at".to_string(), "last_updated".to_string()],
        }
    }
}

type Slot = (String, String);
type Leaves = BTreeMap<String, Value>;

/// Dotted leaf paths of `v`. A non-object root is stored under `$`.
fn flatten(v: &Value) -> Leaves {
    fn walk(prefix: &str, v: &Value, out: &mut Leaves) {
        match v {
            Value::Object(obj) if !obj.is_empty() => {
                for (k, child) in obj {
                    let path = if prefix.is_empty() {
                        k.clone()
                    } else {
                        format!("{prefix}.{k}")
                    };
                    walk(&path, child, out);
                }
            }
            other => {
                let path = if prefix.is_empty() { "$" } else { prefix };
                out.insert(path.to_string(), other.clone());
            }
        }
    }
    let mut out = Leaves::new();
    walk("", v, &mut out);
    out
}

fn related(a: &str, b: &str) -> bool {
    a == b
        || a.strip_prefix(b).is_some_and(|rest| rest.starts_with('.'))
        || b.strip_prefix(a).is_some_and(|rest| rest.starts_with('.'))
}

impl MemoryHygieneGrader {
    pub const NAME: &'static str = "memory_hygiene";

    pub fn from_config(cfg: &GraderConfig) -> Result<Self, ConfigError> {
        let d = Self::default();
        Ok(Self {
            staleness_days: cfg.u64_or("staleness_days", d.staleness_days)?,
            fail_on_data_loss: cfg.bool_or("fail_on_data_loss", d.fail_on_data_loss)?,
            fail_on_stale: cfg.bool_or("fail_on_stale", d.fail_on_stale)?,
            timestamp_fields: cfg
                .string_list("timestamp_fields")?
                .unwrap_or(d.timestamp_fields),
        })
    }

    /// Fields lost by `write`, keyed by path. Updates `state` in place.
    fn lost_fields(write: &MemoryWrite, state: &mut HashMap<Slot, Leaves>) -> Leaves {
        let mut lost = Leaves::new();
        if write.operation == MemoryOperation::Delete {
            if let Some(slot) = write.slot() {
                let prior = state.entry(slot).or_default();
                match &write.data {
                    Value::Object(obj) if !obj.is_empty() => {
                        let gone = flatten(&write.data);
                        prior.retain(|p, _| !gone.keys().any(|g| related(p, g)));
                    }
                    _ => prior.clear(),
                }
            }
            return lost;
        }

        for change in write.changes.iter().flatten() {
            let dropped = change.new_value.as_ref().map_or(true, Value::is_null);
            if let (Some(old), true) = (change.old_value.as_ref(), dropped) {
                lost.insert(change.path.clone(), old.clone());
            }
        }

        let Some(slot) = write.slot() else {
            return lost;
        };
        let incoming = flatten(&write.data);
        let prior = state.entry(slot).or_default();

        if write.operation == MemoryOperation::Put {
            for (path, old) in prior.iter() {
                let kept = incoming
                    .iter()
                    .any(|(p, v)| !v.is_null() && related(p, path));
                if !kept {
                    lost.entry(path.clone()).or_insert_with(|| old.clone());
                }
            }
        }
        // A null over an object drops every leaf beneath it.
        for (path, v) in &incoming {
            if v.is_null() {
                for (p, old) in prior.iter().filter(|(p, _)| related(p, path)) {
                    lost.entry(p.clone()).or_insert_with(|| old.clone());
                }
            }
        }

        if write.operation == MemoryOperation::Put {
            prior.clear();
        }
        for (path, v) in incoming {
            prior.retain(|p, _| !related(p, &path));
            if !v.is_null() {
                prior.insert(path, v);
            }
        }
        lost
    }

    fn corruption(&self, record: &Trajectory) -> (Vec<Evidence>, usize) {
        let mut state: HashMap<Slot, Leaves> = HashMap::new();
        let mut evidence = Vec::new();
        for step in &record.steps {
            let StepKind::MemoryWrite(write) = &step.kind else {
                continue;
            };
            let lost = Self::lost_fields(write, &mut state);
            if lost.is_empty() {
                continue;
            }
            let paths: Vec<&str> = lost.keys().map(String::as_str).collect();
            let description = format!(
                "memory write set {} previously non-null field(s) to null: {}",
                lost.len(),
                paths.join(", ")
            );
            let corrupted: Vec<Value> = lost
                .iter()
                .map(|(path, old)| json!({"path": path, "lost_value": old}))
                .collect();
            let severity = if self.fail_on_data_loss {
                Severity::Error
            } else {
                Severity::Warn
            };
            let (namespace, key) = write.slot().unwrap_or_default();
            evidence.push(
                Evidence::new("data_corruption", severity, description)
                    .step(step.step_id.clone())
                    .detail("corrupted_fields", corrupted)
                    .detail("namespace", namespace)
                    .detail("key", key)
                    .detail("operation", serde_json::to_value(write.operation).unwrap_or(Value::Null))
                    .detail("expected", "non-null")
                    .detail("observed", Value::Null),
            );
        }
        let tracked = state.values().map(BTreeMap::len).sum();
        (evidence, tracked)
    }

    fn declared_path(obj: &Map<String, Value>) -> Option<String> {
        ["path", "field", "key", "id"].iter().find_map(|k| match obj.get(*k) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            _ => None,
        })
    }

    fn timestamp_of(&self, obj: &Map<String, Value>) -> Option<DateTime<Utc>> {
        self.timestamp_fields.iter().find_map(|f| match obj.get(f) {
            Some(Value::String(s)) => timefmt::parse(s).ok(),
            _ => None,
        })
    }

    fn collect_timestamps(&self, v: &Value, path: &str, out: &mut Vec<(String, DateTime<Utc>)>) {
        match v {
            Value::Object(obj) => {
                if let Some(ts) = self.timestamp_of(obj) {
                    let declared = Self::declared_path(obj).unwrap_or_else(|| path.to_string());
                    out.push((declared, ts));
                }
                for (k, child) in obj {
                    if child.is_object() || child.is_array() {
                        self.collect_timestamps(child, &format!("{path}.{k}"), out);
                    }
                }
            }
            Value::Array(items) => {
                for (i, child) in items.iter().enumerate() {
                    self.collect_timestamps(child, &format!("{path}[{i}]"), out);
                }
            }
            _ => {}
        }
    }

    fn staleness(&self, record: &Trajectory) -> (Vec<Evidence>, usize) {
        let mut latest: BTreeMap<String, (DateTime<Utc>, String)> = BTreeMap::new();
        for step in &record.steps {
            let mut found = Vec::new();
            match &step.kind {
                StepKind::MemoryWrite(w) if w.operation != MemoryOperation::Delete => {
                    let root = match w.slot() {
                        Some((ns, key)) if ns.is_empty() => key,
                        Some((ns, key)) => format!("{ns}/{key}"),
                        None => "memory".to_string(),
                    };
                    self.collect_timestamps(&w.data, &root, &mut found);
                }
                StepKind::MemoryRead(r) => {
                    for (i, item) in r.results.iter().enumerate() {
                        self.collect_timestamps(item, &format!("memory_read[{i}]"), &mut found);
                    }
                }
                _ => {}
            }
            for (path, ts) in found {
                let newer = latest.get(&path).map_or(true, |(seen, _)| ts > *seen);
                if newer {
                    latest.insert(path, (ts, step.step_id.clone()));
                }
            }
        }

        let threshold_secs = i64::try_from(self.staleness_days)
            .unwrap_or(i64::MAX)
            .saturating_mul(SECS_PER_DAY);
        let severity = if self.fail_on_stale {
            Severity::Error
        } else {
            Severity::Warn
        };
        let evidence = latest
            .iter()
            .filter_map(|(path, (ts, step_id))| {
                let age = (record.started_at - *ts).num_seconds();
                (age > threshold_secs).then(|| {
                    let age_days = age / SECS_PER_DAY;
                    Evidence::new(
                        "stale_field",
                        severity,
                        format!(
                            "'{path}' last updated {age_days} days before the run (threshold {} days)",
                            self.staleness_days
                        ),
                    )
                    .step(step_id.clone())
                    .detail("path", path.clone())
                    .detail("last_updated", timefmt::format(ts))
                    .detail("age_days", age_days)
                    .detail("threshold_days", self.staleness_days)
                })
            })
            .collect();
        (evidence, latest.len())
    }
}

impl Grader for MemoryHygieneGrader {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn requirements(&self) -> Requirements {
        Requirements::any_of([StepType::MemoryRead, StepType::MemoryWrite])
    }

    fn grade(&self, record: &Trajectory) -> Result<GraderResult, GradeError> {
        self.requirements().check(self.name(), record)?;

        let (mut evidence, tracked_fields) = self.corruption(record);
        let (stale, timestamped_fields) = self.staleness(record);
        evidence.extend(stale);

        let errors = evidence
            .iter()
            .filter(|e| e.severity == Severity::Error)
            .count();
        evidence.push(
            Evidence::info(
                "memory_scan",
                format!(
                    "{} memory writes, {} memory reads checked",
                    record.steps_of(StepType::MemoryWrite).count(),
                    record.steps_of(StepType::MemoryRead).count()
                ),
            )
            .detail("tracked_fields", tracked_fields)
            .detail("timestamped_fields", timestamped_fields)
            .detail("staleness_days", self.staleness_days),
        );

        let score = (1.0 - 0.5 * errors as f64).max(0.0);
        Ok(GraderResult::new(self.name(), self.version(), errors == 0, score)
            .with_evidence(evidence))
    }
}
