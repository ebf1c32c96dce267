//! Share of retrieved context that the agent actually used later on.

use ctxforge_core::trajectory::{StepKind, StepType};
use ctxforge_core::{
    ConfigError, Evidence, GradeError, Grader, GraderConfig, GraderResult, Requirements,
    Severity, Step, Trajectory,
};

use crate::text::{contains_token, normalize, preview, string_leaves};

#[derive(Debug, Clone)]
pub struct RetrievalRelevanceGrader {
    pub min_usage_ratio: f64,
    pub content_probe_chars: usize,
}

impl Default for RetrievalRelevanceGrader {
    fn default() -> Self {
        Self {
            min_usage_ratio: 0.5,
            content_probe_chars: 64,
        }
    }
}

/// Normalized text a step exposes to "was this used?" matching, or `None`
/// for step kinds that cannot consume retrieved context.
fn consuming_text(step: &Step) -> Option<String> {
    let payload = match &step.kind {
        StepKind::LlmCall(c) => {
            return Some(normalize(&format!("{}\n{}", c.input.text(), c.output.text())))
        }
        StepKind::ToolCall(c) => serde_json::to_value(&c.arguments).ok()?,
        StepKind::MemoryWrite(w) => w.data.clone(),
        StepKind::StateChange(s) => s.new_value.clone(),
        StepKind::FinalOutput(f) => f.content.clone(),
        _ => return None,
    };
    let mut leaves = Vec::new();
    string_leaves(&payload, &mut leaves);
    Some(normalize(&leaves.join("\n")))
}

impl RetrievalRelevanceGrader {
    pub const NAME: &'static str = "retrieval_relevance";

    pub fn from_config(cfg: &GraderConfig) -> Result<Self, ConfigError> {
        let d = Self::default();
        let min_usage_ratio = cfg.f64_or("min_usage_ratio", d.min_usage_ratio)?;
        if !(0.0..=1.0).contains(&min_usage_ratio) {
            return Err(ConfigError::InvalidValue {
                key: "min_usage_ratio".to_string(),
                expected: "a number in [0, 1]",
            });
        }
        let probe = cfg.u64_or("content_probe_chars", d.content_probe_chars as u64)?;
        Ok(Self {
            min_usage_ratio,
            content_probe_chars: usize::try_from(probe).unwrap_or(usize::MAX),
        })
    }

    fn is_used(&self, content: &str, identifier: Option<&str>, later: &[String]) -> bool {
        let id = identifier.map(normalize).filter(|s| !s.is_empty());
        let content = normalize(content);
        let probe: String = content.chars().take(self.content_probe_chars).collect();
        // The probe is a cut prefix, so only its start must sit on a boundary.
        later.iter().any(|text| {
            id.as_deref().is_some_and(|id| contains_token(text, id, true))
                || contains_token(text, &content, true)
                || contains_token(text, &probe, false)
        })
    }
}

impl Grader for RetrievalRelevanceGrader {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn requirements(&self) -> Requirements {
        Requirements::all_of([StepType::Retrieval])
    }

    fn grade(&self, record: &Trajectory) -> Result<GraderResult, GradeError> {
        self.requirements().check(self.name(), record)?;

        let texts: Vec<Option<String>> = record.steps.iter().map(consuming_text).collect();
        let mut retrieved = 0usize;
        let mut wasted: Vec<Evidence> = Vec::new();

        for (idx, step) in record.steps.iter().enumerate() {
            let StepKind::Retrieval(r) = &step.kind else {
                continue;
            };
            let later: Vec<String> = texts[idx + 1..].iter().flatten().cloned().collect();
            for (item_idx, item) in r.results.iter().enumerate() {
                retrieved += 1;
                let identifier = item.identifier();
                if self.is_used(&item.content, identifier.as_deref(), &later) {
                    continue;
                }
                let mut ev = Evidence::warn(
                    "wasted_context",
                    format!(
                        "retrieved item {item_idx} of '{}' was never referenced",
                        r.query
                    ),
                )
                .step(step.step_id.clone())
                .detail("item_index", item_idx)
                .detail("query", r.query.clone())
                .detail("content_preview", preview(&item.content, 80));
                if let Some(id) = identifier {
                    ev = ev.detail("identifier", id);
                }
                if let Some(score) = item.score {
                    ev = ev.detail("score", score);
                }
                wasted.push(ev);
            }
        }

        let used = retrieved - wasted.len();
        let ratio = if retrieved == 0 {
            1.0
        } else {
            used as f64 / retrieved as f64
        };
        let passed = ratio >= self.min_usage_ratio;
        let severity = if passed { Severity::Info } else { Severity::Error };

        let mut evidence = vec![Evidence::new(
            "retrieval_usage",
            severity,
            format!("{used} of {retrieved} retrieved items referenced later"),
        )
        .detail("used", used)
        .detail("retrieved", retrieved)
        .detail("ratio", ratio)
        .detail("threshold", self.min_usage_ratio)];
        if !passed {
            for ev in &mut wasted {
                ev.severity = Severity::Error;
            }
        }
        evidence.extend(wasted);

        Ok(GraderResult::new(self.name(), self.version(), passed, ratio).with_evidence(evidence))
    }
}
