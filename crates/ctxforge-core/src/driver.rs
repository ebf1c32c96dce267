//! Fan-out/fan-in execution of a grader suite over one record.
//!
//! Every configured grader gets exactly one outcome, in configured order,
//! whatever happens inside it: a grader that panics or returns nonsense is
//! reported as `errored` and the others still run.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::errors::GradeError;
use crate::grader::{Grader, GraderResult};
use crate::trajectory::Trajectory;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GradeStatus {
    Graded { result: GraderResult },
    Skipped { reason: String },
    Errored { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeOutcome {
    pub grader: String,
    #[serde(flatten)]
    pub status: GradeStatus,
}

impl GradeOutcome {
    pub fn result(&self) -> Option<&GraderResult> {
        match &self.status {
            GradeStatus::Graded { result } => Some(result),
            _ => None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.status, GradeStatus::Skipped { .. })
    }

    pub fn is_errored(&self) -> bool {
        matches!(self.status, GradeStatus::Errored { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteReport {
    pub run_id: String,
    pub outcomes: Vec<GradeOutcome>,
    pub passed: bool,
    pub score: f64,
}

impl SuiteReport {
    pub fn from_outcomes(run_id: &str, outcomes: Vec<GradeOutcome>) -> Self {
        let scores: Vec<f64> = outcomes
            .iter()
            .filter_map(|o| o.result().map(|r| r.score))
            .collect();
        let passed = outcomes.iter().all(|o| match &o.status {
            GradeStatus::Graded { result } => result.passed,
            GradeStatus::Skipped { .. } => true,
            GradeStatus::Errored { .. } => false,
        });
        let score = if scores.is_empty() {
            1.0
        } else {
            scores.iter().sum::<f64>() / scores.len() as f64
        };
        Self {
            run_id: run_id.to_string(),
            outcomes,
            passed,
            score,
        }
    }

    pub fn results(&self) -> impl Iterator<Item = &GraderResult> {
        self.outcomes.iter().filter_map(GradeOutcome::result)
    }

    pub fn outcome(&self, grader: &str) -> Option<&GradeOutcome> {
        self.outcomes.iter().find(|o| o.grader == grader)
    }

    pub fn counts(&self) -> (usize, usize, usize) {
        let graded = self.results().count();
        let skipped = self.outcomes.iter().filter(|o| o.is_skipped()).count();
        let errored = self.outcomes.iter().filter(|o| o.is_errored()).count();
        (graded, skipped, errored)
    }
}

#[derive(Clone, Default)]
pub struct GraderSuite {
    graders: Vec<Arc<dyn Grader>>,
}

impl std::fmt::Debug for GraderSuite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraderSuite")
            .field("graders", &self.names())
            .finish()
    }
}

impl GraderSuite {
    /// Vector order is the reporting order.
    pub fn new(graders: Vec<Arc<dyn Grader>>) -> Self {
        Self { graders }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.graders.iter().map(|g| g.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.graders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graders.is_empty()
    }

    /// One blocking task per grader, joined and put back in configured order.
    pub async fn evaluate(&self, record: Arc<Trajectory>) -> SuiteReport {
        let mut tasks = JoinSet::new();
        for (idx, grader) in self.graders.iter().enumerate() {
            let grader = Arc::clone(grader);
            let record = Arc::clone(&record);
            tasks.spawn_blocking(move || (idx, run_isolated(grader.as_ref(), &record)));
        }

        let mut slots: Vec<Option<GradeStatus>> = vec![None; self.graders.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, status)) => slots[idx] = Some(status),
                Err(e) => warn!(error = %e, "grader task failed to join"),
            }
        }

        let outcomes = self
            .graders
            .iter()
            .zip(slots)
            .map(|(grader, slot)| GradeOutcome {
                grader: grader.name().to_string(),
                status: slot.unwrap_or_else(|| GradeStatus::Errored {
                    reason: "grader task did not complete".to_string(),
                }),
            })
            .collect();
        finish(&record.run_id, outcomes)
    }

    /// Same semantics as [`GraderSuite::evaluate`] on the calling thread.
    pub fn evaluate_sequential(&self, record: &Trajectory) -> SuiteReport {
        let outcomes = self
            .graders
            .iter()
            .map(|grader| GradeOutcome {
                grader: grader.name().to_string(),
                status: run_isolated(grader.as_ref(), record),
            })
            .collect();
        finish(&record.run_id, outcomes)
    }
}

fn finish(run_id: &str, outcomes: Vec<GradeOutcome>) -> SuiteReport {
    let report = SuiteReport::from_outcomes(run_id, outcomes);
    let (graded, skipped, errored) = report.counts();
    info!(
        run_id = %report.run_id,
        passed = report.passed,
        score = report.score,
        graded,
        skipped,
        errored,
        "grader suite complete"
    );
    report
}

fn run_isolated(grader: &dyn Grader, record: &Trajectory) -> GradeStatus {
    match catch_unwind(AssertUnwindSafe(|| grader.grade(record))) {
        Ok(result) => classify(grader.name(), result),
        Err(payload) => {
            let reason = format!("grader panicked: {}", panic_message(payload.as_ref()));
            warn!(grader = grader.name(), %reason, "grader errored");
            GradeStatus::Errored { reason }
        }
    }
}

fn classify(grader: &str, result: Result<GraderResult, GradeError>) -> GradeStatus {
    match result {
        Ok(r) if !r.score_in_range() => {
            let reason = format!("score {} outside [0, 1]", r.score);
            warn!(grader, %reason, "grader errored");
            GradeStatus::Errored { reason }
        }
        Ok(result) => GradeStatus::Graded { result },
        Err(e) if e.is_skip() => {
            warn!(grader, reason = %e, "grader skipped");
            GradeStatus::Skipped {
                reason: e.to_string(),
            }
        }
        Err(e) => {
            warn!(grader, reason = %e, "grader errored");
            GradeStatus::Errored {
                reason: e.to_string(),
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
