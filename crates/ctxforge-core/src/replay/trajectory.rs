use serde_json::Value;
use tokio::task::JoinSet;
use tracing::{debug, info};

use super::{ReplayError, ReplaySession, ResponseSource};
use crate::canonical::Canonicalizer;
use crate::recording::{RecordingError, RecordingStore, ToolRecording};
use crate::trajectory::{StepKind, Trajectory};

/// Seeds `store` from the tool-call results already present in `record`.
/// Calls without a result are skipped. Returns the number of new entries.
pub fn record_from_trajectory(
    store: &RecordingStore,
    canonicalizer: &Canonicalizer,
    record: &Trajectory,
) -> Result<usize, RecordingError> {
    let mut written = 0usize;
    for (step, call) in record.tool_calls() {
        let Some(result) = call.result.as_ref() else {
            debug!(step = %step.step_id, tool = %call.tool_name, "no result to record");
            continue;
        };
        let canonical = canonicalizer.canonicalize(&call.tool_name, &call.arguments);
        let mut entry =
            ToolRecording::new(&record.run_id, &canonical, result.clone()).recorded_at(step.timestamp);
        entry.latency_ms = call.latency_ms;
        if store.record(entry)? {
            written += 1;
        }
    }
    info!(run_id = %record.run_id, written, "recorded tool calls from trajectory");
    Ok(written)
}

/// Re-drives every tool call in `record` through `session`, concurrently,
/// and returns a copy of the record with the resolved results substituted.
///
/// If any call fails the whole replay fails; the error reported is the one
/// for the earliest step so repeated runs report the same failure.
pub async fn replay_trajectory(
    session: &ReplaySession,
    record: &Trajectory,
) -> Result<Trajectory, ReplayError> {
    let mut tasks = JoinSet::new();
    for (idx, step) in record.steps.iter().enumerate() {
        if let StepKind::ToolCall(call) = &step.kind {
            let session = session.clone();
            let tool_name = call.tool_name.clone();
            let arguments = call.arguments.clone();
            tasks.spawn(async move { (idx, session.invoke(&tool_name, &arguments).await) });
        }
    }

    let mut resolved: Vec<(usize, Value, ResponseSource)> = Vec::new();
    let mut first_error: Option<(usize, ReplayError)> = None;
    while let Some(joined) = tasks.join_next().await {
        let (idx, outcome) = match joined {
            Ok(pair) => pair,
            Err(e) => (
                usize::MAX,
                Err(ReplayError::Execution {
                    tool_name: "<task>".to_string(),
                    message: e.to_string(),
                }),
            ),
        };
        match outcome {
            Ok(resp) => resolved.push((idx, resp.value, resp.source)),
            Err(err) => {
                if first_error.as_ref().map_or(true, |(i, _)| idx < *i) {
                    first_error = Some((idx, err));
                }
            }
        }
    }

    if let Some((_, err)) = first_error {
        return Err(err);
    }

    let mut replayed = record.clone();
    let mut live = 0usize;
    for (idx, value, source) in resolved {
        if source == ResponseSource::Live {
            live += 1;
        }
        if let Some(StepKind::ToolCall(call)) = replayed.steps.get_mut(idx).map(|s| &mut s.kind) {
            call.result = Some(value);
        }
    }
    info!(
        run_id = %record.run_id,
        mode = %session.mode(),
        tool_calls = record.total_tool_calls(),
        live,
        "replayed trajectory"
    );
    Ok(replayed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replay::{ReplayMode, ToolExecutor};
    use crate::timefmt;
    use crate::trajectory::{AgentInfo, RunOutcome, Step, ToolCall, TrajectoryBuilder};
    use serde_json::{json, Map};
    use std::sync::Arc;

    fn record() -> Trajectory {
        let t0 = timefmt::parse("2025-03-01T00:00:00Z").unwrap();
        let mut b = TrajectoryBuilder::new("run-7", AgentInfo::new("bot"), t0);
        for (i, id) in ["1", "2", "1"].iter().enumerate() {
            let mut args = Map::new();
            args.insert("order_id".into(), json!(id));
            let call = ToolCall::new("check_order_status", args)
                .with_result(json!({"order": id, "status": "shipped"}));
            b.push(Step::new(format!("t{i}"), t0, call)).unwrap();
        }
        b.seal(RunOutcome::Success, t0).unwrap()
    }

    struct Unreachable;

    #[async_trait::async_trait]
    impl ToolExecutor for Unreachable {
        async fn execute(&self, _tool: &str, _args: &Map<String, Value>) -> anyhow::Result<Value> {
            anyhow::bail!("live tool must not be called during strict replay")
        }
    }

    #[tokio::test]
    async fn seeded_store_replays_identically() {
        let store = Arc::new(RecordingStore::in_memory());
        let written = record_from_trajectory(&store, &Canonicalizer::default(), &record()).unwrap();
        assert_eq!(written, 2);

        let session = ReplaySession::new("run-7", ReplayMode::Replay, store)
            .with_executor(Arc::new(Unreachable));
        let replayed = replay_trajectory(&session, &record()).await.unwrap();
        assert_eq!(replayed, record());
    }

    #[tokio::test]
    async fn missing_recording_aborts_with_no_record() {
        let store = Arc::new(RecordingStore::in_memory());
        let session = ReplaySession::new("run-7", ReplayMode::Replay, store);
        let err = replay_trajectory(&session, &record()).await.unwrap_err();
        assert!(err.is_miss());
    }
}
