//! Step constructors for unit tests. Every record starts at 2025-06-01.

use chrono::{DateTime, Duration, Utc};
use ctxforge_core::timefmt;
use ctxforge_core::trajectory::{
    FieldChange, FinalOutput, LlmCall, LlmInput, LlmOutput, MemoryOperation, MemoryRead,
    MemoryWrite, Retrieval, RetrievedItem, ToolCall, UserInput,
};
use ctxforge_core::{AgentInfo, RunOutcome, Step, Trajectory, TrajectoryBuilder};
use serde_json::Value;

pub fn t0() -> DateTime<Utc> {
    timefmt::parse("2025-06-01T00:00:00Z").unwrap()
}

pub fn trajectory(steps: Vec<Step>) -> Trajectory {
    let mut b = TrajectoryBuilder::new("run-test", AgentInfo::new("test-agent"), t0());
    for step in steps {
        b.push(step).unwrap();
    }
    b.seal(RunOutcome::Success, t0() + Duration::minutes(5)).unwrap()
}

pub fn user_input(id: &str, content: &str) -> Step {
    Step::new(
        id,
        t0(),
        UserInput {
            content: content.to_string(),
            input_type: None,
        },
    )
}

pub fn llm_call(id: &str, prompt: &str, tokens_in: Option<u64>, tokens_out: Option<u64>) -> Step {
    Step::new(
        id,
        t0(),
        LlmCall {
            model: "gpt-test".to_string(),
            input: LlmInput::Text(prompt.to_string()),
            output: LlmOutput::Text("ok".to_string()),
            tokens_in,
            tokens_out,
            tokens_total: None,
            latency_ms: None,
            cost_estimate: None,
            provider: None,
        },
    )
}

pub fn tool_call(id: &str, tool: &str, args: Value) -> Step {
    let args = args.as_object().cloned().unwrap_or_default();
    Step::new(id, t0(), ToolCall::new(tool, args))
}

pub fn retrieval(id: &str, query: &str, items: Vec<Value>) -> Step {
    let results: Vec<RetrievedItem> = items
        .into_iter()
        .map(|v| serde_json::from_value(v).unwrap())
        .collect();
    Step::new(
        id,
        t0(),
        Retrieval {
            query: query.to_string(),
            results,
            match_count: None,
            latency_ms: None,
        },
    )
}

pub fn memory_read(id: &str, query: &str, results: Vec<Value>) -> Step {
    Step::new(
        id,
        t0(),
        MemoryRead {
            query: query.into(),
            results,
            match_count: None,
            relevance_scores: None,
            total_available: None,
        },
    )
}

pub fn memory_write(id: &str, op: MemoryOperation, namespace: &str, key: &str, data: Value) -> Step {
    let mut w = MemoryWrite::new(op, data);
    w.namespace = Some(namespace.into());
    w.key = Some(key.to_string());
    Step::new(id, t0(), w)
}

pub fn memory_write_with_changes(id: &str, data: Value, changes: Value) -> Step {
    let mut w = MemoryWrite::new(MemoryOperation::Update, data);
    let changes: Vec<FieldChange> = serde_json::from_value(changes).unwrap();
    w.changes = Some(changes);
    Step::new(id, t0(), w)
}

pub fn final_output(id: &str, content: Value) -> Step {
    Step::new(
        id,
        t0(),
        FinalOutput {
            content,
            format: None,
        },
    )
}
