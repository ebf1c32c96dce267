use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use ctxforge_core::replay::replay_trajectory;
use ctxforge_core::{
    Canonicalizer, MatchPolicy, RecordingStore, ReplayError, ReplayMode, ReplaySession,
    ToolExecutor, Trajectory,
};
use serde_json::{Map, Value};

use super::{load_or_exit, write_output};
use crate::cli::args::ReplayArgs;
use crate::exit_codes;

/// Lenient fallback: answers a miss with the result the trace itself holds
/// for the same canonical call.
struct TraceResults {
    canonicalizer: Canonicalizer,
    by_fingerprint: HashMap<String, Value>,
}

impl TraceResults {
    fn new(record: &Trajectory) -> Self {
        let canonicalizer = Canonicalizer::default();
        let mut by_fingerprint = HashMap::new();
        for (_, call) in record.tool_calls() {
            if let Some(result) = &call.result {
                let fp = canonicalizer
                    .canonicalize(&call.tool_name, &call.arguments)
                    .fingerprint;
                by_fingerprint.entry(fp).or_insert_with(|| result.clone());
            }
        }
        Self {
            canonicalizer,
            by_fingerprint,
        }
    }
}

#[async_trait]
impl ToolExecutor for TraceResults {
    async fn execute(&self, tool_name: &str, arguments: &Map<String, Value>) -> anyhow::Result<Value> {
        let fp = self.canonicalizer.canonicalize(tool_name, arguments).fingerprint;
        self.by_fingerprint
            .get(&fp)
            .cloned()
            .with_context(|| format!("trace holds no result for tool '{tool_name}'"))
    }
}

pub async fn run(args: ReplayArgs) -> anyhow::Result<i32> {
    let record = match load_or_exit(&args.trace)? {
        Ok(t) => t,
        Err(code) => return Ok(code),
    };

    let store = RecordingStore::open(&args.store)
        .with_context(|| format!("failed to open store {}", args.store.display()))?;
    let trajectory_id = args
        .trajectory_id
        .clone()
        .unwrap_or_else(|| record.run_id.clone());

    let mut session = ReplaySession::new(trajectory_id, ReplayMode::Replay, Arc::new(store));
    if args.lenient {
        session = session
            .with_policy(MatchPolicy::Lenient)
            .with_executor(Arc::new(TraceResults::new(&record)));
    }
    if let Some(ms) = args.timeout_ms {
        session = session.with_timeout(Duration::from_millis(ms));
    }

    match replay_trajectory(&session, &record).await {
        Ok(replayed) => {
            write_output(args.output.as_deref(), &replayed.to_json_pretty()?)?;
            Ok(exit_codes::OK)
        }
        Err(e) => {
            eprintln!("{e}");
            Ok(exit_code_for(&e))
        }
    }
}

fn exit_code_for(err: &ReplayError) -> i32 {
    match err {
        ReplayError::Miss { .. } => exit_codes::GRADE_FAILED,
        ReplayError::Timeout { .. } => exit_codes::REPLAY_TIMEOUT,
        _ => exit_codes::CONFIG_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replay_errors_map_to_distinct_codes() {
        let miss = ReplayError::Miss {
            tool_name: "t".into(),
            canonical_arguments: "{}".into(),
            trajectory_id: "r".into(),
            candidates: vec![],
        };
        assert_eq!(exit_code_for(&miss), exit_codes::GRADE_FAILED);
        assert_eq!(
            exit_code_for(&ReplayError::Timeout { timeout_ms: 5 }),
            exit_codes::REPLAY_TIMEOUT
        );
        assert_eq!(
            exit_code_for(&ReplayError::NoExecutor {
                mode: ReplayMode::Replay
            }),
            exit_codes::CONFIG_ERROR
        );
    }
}
