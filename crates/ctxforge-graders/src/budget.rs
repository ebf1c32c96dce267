//! Token, tool-call and latency budgets.

use ctxforge_core::trajectory::StepKind;
use ctxforge_core::{
    ConfigError, Evidence, GradeError, Grader, GraderConfig, GraderResult, Trajectory,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenField {
    Total,
    In,
    Out,
}

impl TokenField {
    fn parse(raw: &str) -> Result<Self, ConfigError> {
        match raw {
            "total" => Ok(TokenField::Total),
            "in" => Ok(TokenField::In),
            "out" => Ok(TokenField::Out),
            _ => Err(ConfigError::InvalidValue {
                key: "token_field".to_string(),
                expected: "one of \"total\", \"in\", \"out\"",
            }),
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            TokenField::Total => "total",
            TokenField::In => "in",
            TokenField::Out => "out",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BudgetGrader {
    pub max_tokens: u64,
    pub max_tool_calls: u64,
    pub max_latency_ms: u64,
    pub token_field: TokenField,
}

impl Default for BudgetGrader {
    fn default() -> Self {
        Self {
            max_tokens: 100_000,
            max_tool_calls: 50,
            max_latency_ms: 300_000,
            token_field: TokenField::Total,
        }
    }
}

/// Observed total for one resource plus the steps that contributed to it.
struct Usage {
    check: &'static str,
    resource: &'static str,
    observed: u64,
    limit: u64,
    step_ids: Vec<String>,
}

impl Usage {
    fn new(check: &'static str, resource: &'static str, limit: u64) -> Self {
        Self {
            check,
            resource,
            observed: 0,
            limit,
            step_ids: Vec::new(),
        }
    }

    fn add(&mut self, step_id: &str, amount: Option<u64>) {
        let amount = amount.unwrap_or(0);
        if amount > 0 {
            self.observed = self.observed.saturating_add(amount);
            self.step_ids.push(step_id.to_string());
        }
    }

    fn exceeded(&self) -> bool {
        self.observed > self.limit
    }

    fn score(&self) -> f64 {
        if !self.exceeded() {
            1.0
        } else if self.limit == 0 {
            0.0
        } else {
            self.limit as f64 / self.observed as f64
        }
    }

    fn evidence(self) -> Evidence {
        let utilization = format!("{}/{}", self.observed, self.limit);
        let mut ev = if self.exceeded() {
            Evidence::error(
                self.check,
                format!("{} budget exceeded: {utilization}", self.resource),
            )
            .steps(self.step_ids)
        } else {
            Evidence::info(
                self.check,
                format!("{} within budget: {utilization}", self.resource),
            )
        };
        ev = ev
            .detail("observed", self.observed)
            .detail("limit", self.limit)
            .detail("utilization", utilization);
        if self.limit > 0 {
            ev = ev.detail("ratio", self.observed as f64 / self.limit as f64);
        }
        ev
    }
}

impl BudgetGrader {
    pub const NAME: &'static str = "budget";

    pub fn from_config(cfg: &GraderConfig) -> Result<Self, ConfigError> {
        let d = Self::default();
        Ok(Self {
            max_tokens: cfg.u64_or("max_tokens", d.max_tokens)?,
            max_tool_calls: cfg.u64_or("max_tool_calls", d.max_tool_calls)?,
            max_latency_ms: cfg.u64_or("max_latency_ms", d.max_latency_ms)?,
            token_field: TokenField::parse(cfg.str_or("token_field", "total")?)?,
        })
    }

    fn usages(&self, record: &Trajectory) -> [Usage; 3] {
        let mut tokens = Usage::new("token_budget", "token", self.max_tokens);
        let mut tools = Usage::new("tool_call_budget", "tool-call", self.max_tool_calls);
        let mut latency = Usage::new("latency_budget", "latency", self.max_latency_ms);

        for step in &record.steps {
            match &step.kind {
                StepKind::LlmCall(call) => {
                    let amount = match self.token_field {
                        TokenField::Total => Some(call.total_tokens()),
                        TokenField::In => call.tokens_in,
                        TokenField::Out => call.tokens_out,
                    };
                    tokens.add(&step.step_id, amount);
                    latency.add(&step.step_id, call.latency_ms);
                }
                StepKind::ToolCall(call) => {
                    tools.add(&step.step_id, Some(1));
                    latency.add(&step.step_id, call.latency_ms);
                }
                StepKind::Retrieval(r) => latency.add(&step.step_id, r.latency_ms),
                _ => {}
            }
        }
        [tokens, tools, latency]
    }
}

impl Grader for BudgetGrader {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn grade(&self, record: &Trajectory) -> Result<GraderResult, GradeError> {
        self.requirements().check(self.name(), record)?;

        let usages = self.usages(record);
        let passed = usages.iter().all(|u| !u.exceeded());
        let score = usages.iter().map(Usage::score).fold(1.0_f64, f64::min);
        let evidence = usages.into_iter().map(Usage::evidence).collect();

        Ok(GraderResult::new(self.name(), self.version(), passed, score)
            .with_evidence(evidence)
            .with_metadata("token_field", self.token_field.as_str())
            .with_metadata("llm_calls", record.llm_calls().count())
            .with_metadata("tool_calls", record.total_tool_calls()))
    }
}
