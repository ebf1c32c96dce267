//! Repetition / thrash detection over tool calls and model calls.

use std::collections::HashMap;

use ctxforge_core::canonical::{Canonicalizer, CanonicalizerConfig};
use ctxforge_core::{
    ConfigError, Evidence, GradeError, Grader, GraderConfig, GraderResult, Trajectory,
};

use crate::text::{normalize, preview};

/// What identifies two model calls as "the same call".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelCallKey {
    Prompt,
    PromptAndResponse,
}

impl ModelCallKey {
    fn parse(raw: &str) -> Result<Self, ConfigError> {
        match raw {
            "prompt" => Ok(ModelCallKey::Prompt),
            "prompt_and_response" => Ok(ModelCallKey::PromptAndResponse),
            _ => Err(ConfigError::InvalidValue {
                key: "model_call_key".to_string(),
                expected: "\"prompt\" or \"prompt_and_response\"",
            }),
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            ModelCallKey::Prompt => "prompt",
            ModelCallKey::PromptAndResponse => "prompt_and_response",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoopGrader {
    pub max_repeats: u64,
    pub similarity_threshold: f64,
    pub model_call_key: ModelCallKey,
    pub include_model_calls: bool,
    canonicalizer: Canonicalizer,
}

impl Default for LoopGrader {
    fn default() -> Self {
        Self {
            max_repeats: 3,
            similarity_threshold: 1.0,
            model_call_key: ModelCallKey::Prompt,
            include_model_calls: true,
            canonicalizer: Canonicalizer::default(),
        }
    }
}

struct Group {
    key: String,
    label: String,
    step_ids: Vec<String>,
}

impl LoopGrader {
    pub const NAME: &'static str = "loop";

    pub fn from_config(cfg: &GraderConfig) -> Result<Self, ConfigError> {
        let d = Self::default();
        let similarity_threshold = cfg.f64_or("similarity_threshold", d.similarity_threshold)?;
        if !(0.0..=1.0).contains(&similarity_threshold) {
            return Err(ConfigError::InvalidValue {
                key: "similarity_threshold".to_string(),
                expected: "a number in [0, 1]",
            });
        }
        let canonicalizer = match cfg.string_list("redact_keys")? {
            None => Canonicalizer::default(),
            Some(redact_keys) => Canonicalizer::new(CanonicalizerConfig {
                redact_keys,
                ..CanonicalizerConfig::default()
            })
            .map_err(|e| ConfigError::invalid(Self::NAME, format!("redact_keys: {e}")))?,
        };
        Ok(Self {
            max_repeats: cfg.u64_or("max_repeats", d.max_repeats)?,
            similarity_threshold,
            model_call_key: ModelCallKey::parse(cfg.str_or("model_call_key", "prompt")?)?,
            include_model_calls: cfg.bool_or("include_model_calls", d.include_model_calls)?,
            canonicalizer,
        })
    }

    /// Exact grouping by canonical fingerprint of (tool, arguments).
    fn tool_groups(&self, record: &Trajectory) -> Vec<Group> {
        let mut groups: Vec<Group> = Vec::new();
        let mut by_key: HashMap<String, usize> = HashMap::new();
        for (step, call) in record.tool_calls() {
            let canonical = self.canonicalizer.canonicalize(&call.tool_name, &call.arguments);
            let idx = *by_key.entry(canonical.fingerprint.clone()).or_insert_with(|| {
                groups.push(Group {
                    key: canonical.arguments.clone(),
                    label: canonical.tool_name.clone(),
                    step_ids: Vec::new(),
                });
                groups.len() - 1
            });
            groups[idx].step_ids.push(step.step_id.clone());
        }
        groups
    }

    /// Groups by normalized text; below a threshold of 1.0 each call joins the
    /// first group whose first member is similar enough.
    fn model_groups(&self, record: &Trajectory) -> Vec<Group> {
        let mut groups: Vec<Group> = Vec::new();
        let mut exact: HashMap<String, usize> = HashMap::new();
        for (step, call) in record.llm_calls() {
            let prompt = normalize(&call.input.text());
            let key = match self.model_call_key {
                ModelCallKey::Prompt => prompt,
                ModelCallKey::PromptAndResponse => {
                    format!("{prompt}\n{}", normalize(&call.output.text()))
                }
            };

            let found = if self.similarity_threshold >= 1.0 {
                exact.get(&key).copied()
            } else {
                groups.iter().position(|g| {
                    strsim::normalized_levenshtein(&g.key, &key) >= self.similarity_threshold
                })
            };

            match found {
                Some(idx) => groups[idx].step_ids.push(step.step_id.clone()),
                None => {
                    exact.insert(key.clone(), groups.len());
                    groups.push(Group {
                        label: call.model.clone(),
                        key,
                        step_ids: vec![step.step_id.clone()],
                    });
                }
            }
        }
        groups
    }

    fn offending(&self, group: &Group) -> bool {
        group.step_ids.len() as u64 > self.max_repeats
    }
}

impl Grader for LoopGrader {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn grade(&self, record: &Trajectory) -> Result<GraderResult, GradeError> {
        self.requirements().check(self.name(), record)?;

        let tool_groups = self.tool_groups(record);
        let model_groups = if self.include_model_calls {
            self.model_groups(record)
        } else {
            Vec::new()
        };

        let grouped_steps: usize = tool_groups
            .iter()
            .chain(&model_groups)
            .map(|g| g.step_ids.len())
            .sum();
        let mut offending_steps = 0usize;
        let mut offending_groups = 0usize;
        let mut evidence = Vec::new();

        for g in tool_groups.iter().filter(|g| self.offending(g)) {
            offending_groups += 1;
            offending_steps += g.step_ids.len();
            evidence.push(
                Evidence::error(
                    "tool_call_thrash",
                    format!(
                        "tool '{}' called {} times with identical arguments (max_repeats {})",
                        g.label,
                        g.step_ids.len(),
                        self.max_repeats
                    ),
                )
                .steps(g.step_ids.iter().cloned())
                .detail("group_size", g.step_ids.len())
                .detail("threshold", self.max_repeats)
                .detail("tool", g.label.clone())
                .detail("arguments", g.key.clone()),
            );
        }

        for g in model_groups.iter().filter(|g| self.offending(g)) {
            offending_groups += 1;
            offending_steps += g.step_ids.len();
            evidence.push(
                Evidence::error(
                    "model_call_thrash",
                    format!(
                        "{} similar model calls to '{}' (max_repeats {})",
                        g.step_ids.len(),
                        g.label,
                        self.max_repeats
                    ),
                )
                .steps(g.step_ids.iter().cloned())
                .detail("group_size", g.step_ids.len())
                .detail("threshold", self.max_repeats)
                .detail("similarity_threshold", self.similarity_threshold)
                .detail("key", self.model_call_key.as_str())
                .detail("prompt_preview", preview(&g.key, 80)),
            );
        }

        evidence.push(
            Evidence::info(
                "loop_scan",
                format!(
                    "{} tool-call groups, {} model-call groups, {} over max_repeats",
                    tool_groups.len(),
                    model_groups.len(),
                    offending_groups
                ),
            )
            .detail("tool_call_groups", tool_groups.len())
            .detail("model_call_groups", model_groups.len())
            .detail("offending_groups", offending_groups)
            .detail("max_repeats", self.max_repeats)
            .detail("model_call_key", self.model_call_key.as_str()),
        );

        let score = if grouped_steps == 0 {
            1.0
        } else {
            1.0 - offending_steps as f64 / grouped_steps as f64
        };

        Ok(
            GraderResult::new(self.name(), self.version(), offending_groups == 0, score)
                .with_evidence(evidence)
                .with_metadata("grouped_steps", grouped_steps),
        )
    }
}
