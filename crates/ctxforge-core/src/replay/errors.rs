use thiserror::Error;

use super::ReplayMode;
use crate::recording::{Candidate, RecordingError};

#[derive(Debug, Error)]
pub enum ReplayError {
    /// No recording for this call in strict replay. Fatal to the run.
    #[error("replay miss: no recording for tool '{tool_name}' in trajectory '{trajectory_id}'\n  attempted: {canonical_arguments}{}", render_candidates(.candidates))]
    Miss {
        tool_name: String,
        canonical_arguments: String,
        trajectory_id: String,
        candidates: Vec<Candidate>,
    },

    #[error("replay timeout: deadline of {timeout_ms}ms exceeded")]
    Timeout { timeout_ms: u64 },

    #[error("no tool executor configured for {mode} mode")]
    NoExecutor { mode: ReplayMode },

    #[error("tool '{tool_name}' failed: {message}")]
    Execution { tool_name: String, message: String },

    #[error(transparent)]
    Store(#[from] RecordingError),
}

impl ReplayError {
    pub fn is_miss(&self) -> bool {
        matches!(self, ReplayError::Miss { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ReplayError::Timeout { .. })
    }
}

fn render_candidates(candidates: &[Candidate]) -> String {
    if candidates.is_empty() {
        return "\n  no stored candidates".to_string();
    }
    let mut out = String::from("\n  nearest stored:");
    for c in candidates {
        out.push_str(&format!(
            "\n    {} {} (similarity {:.2})",
            c.tool_name, c.arguments, c.similarity
        ));
    }
    out
}
