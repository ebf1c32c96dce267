use chrono::{DateTime, Utc};
use ctxforge_core::timefmt;
use ctxforge_core::trajectory::{LlmCall, LlmInput, LlmOutput, MemoryOperation, MemoryWrite, ToolCall};
use ctxforge_core::{AgentInfo, Grader, RunOutcome, Step, Trajectory, TrajectoryBuilder};
use ctxforge_graders::{BudgetGrader, LoopGrader, MemoryHygieneGrader};
use proptest::prelude::*;
use serde_json::{json, Map, Value};

fn t0() -> DateTime<Utc> {
    timefmt::parse("2025-06-01T00:00:00Z").unwrap()
}

fn seal(steps: Vec<Step>) -> Trajectory {
    let mut b = TrajectoryBuilder::new("prop", AgentInfo::new("a"), t0());
    for s in steps {
        b.push(s).unwrap();
    }
    b.seal(RunOutcome::Success, t0()).unwrap()
}

fn llm(id: usize, tokens: u64) -> Step {
    Step::new(
        format!("l{id}"),
        t0(),
        LlmCall {
            model: "m".into(),
            input: LlmInput::Text(format!("prompt {id}")),
            output: LlmOutput::Text("r".into()),
            tokens_in: None,
            tokens_out: Some(tokens),
            tokens_total: None,
            latency_ms: Some(tokens % 97),
            cost_estimate: None,
            provider: None,
        },
    )
}

fn tool(id: &str, name: &str, args: Map<String, Value>) -> Step {
    Step::new(id, t0(), ToolCall::new(name, args))
}

fn observed(r: &ctxforge_core::GraderResult, check: &str) -> u64 {
    r.evidence
        .iter()
        .find(|e| e.check == check)
        .and_then(|e| e.details["observed"].as_u64())
        .unwrap()
}

fn arg_map() -> impl Strategy<Value = Map<String, Value>> {
    // keys drawn from letters that cannot spell a redacted key name
    prop::collection::btree_map("[b-h]{1,5}", "[a-z0-9]{0,8}", 1..5)
        .prop_map(|m| m.into_iter().map(|(k, v)| (k, Value::String(v))).collect())
}

proptest! {
    #[test]
    fn budget_utilization_never_decreases(tokens in prop::collection::vec(0u64..10_000, 0..12), extra in 0u64..10_000) {
        let g = BudgetGrader::default();
        let base: Vec<Step> = tokens.iter().enumerate().map(|(i, t)| llm(i, *t)).collect();
        let before = g.grade(&seal(base.clone())).unwrap();

        let mut more = base;
        more.push(llm(tokens.len(), extra));
        let after = g.grade(&seal(more)).unwrap();

        prop_assert!(observed(&after, "token_budget") >= observed(&before, "token_budget"));
        prop_assert!(observed(&after, "latency_budget") >= observed(&before, "latency_budget"));
        prop_assert!(after.score <= before.score);
    }

    #[test]
    fn identical_calls_share_a_group_and_different_ones_do_not(args in arg_map(), other in arg_map()) {
        let g = LoopGrader::from_config(&ctxforge_core::GraderConfig::new().set("max_repeats", 1)).unwrap();

        let same = seal(vec![tool("a", "lookup", args.clone()), tool("b", "lookup", args.clone())]);
        let r = g.grade(&same).unwrap();
        prop_assert!(!r.passed);

        let diff = seal(vec![tool("a", "lookup", args.clone()), tool("b", "lookup", other.clone())]);
        let r = g.grade(&diff).unwrap();
        prop_assert_eq!(r.passed, args != other);
    }

    #[test]
    fn nulling_a_field_is_always_flagged(
        noise in prop::collection::vec(0usize..3, 0..6),
        field in "[a-z]{1,8}",
        value in "[a-z0-9]{1,8}",
        nested in any::<bool>(),
        put in any::<bool>(),
    ) {
        let mut steps = Vec::new();
        let initial = if nested {
            json!({ field.clone(): {"inner": value} })
        } else {
            json!({ field.clone(): value })
        };
        let mut first = MemoryWrite::new(MemoryOperation::Put, initial);
        first.namespace = Some("users".into());
        first.key = Some("u1".into());
        steps.push(Step::new("w0", t0(), first));

        for (i, kind) in noise.iter().enumerate() {
            let id = format!("n{i}");
            steps.push(match kind {
                0 => llm(i, 10),
                1 => tool(&id, "search", Map::new()),
                _ => {
                    let mut w = MemoryWrite::new(MemoryOperation::Update, json!({"unrelated": i}));
                    w.namespace = Some("users".into());
                    w.key = Some("u1".into());
                    Step::new(id, t0(), w)
                }
            });
        }

        let op = if put { MemoryOperation::Put } else { MemoryOperation::Update };
        let mut nulling = MemoryWrite::new(op, json!({ field.clone(): null }));
        nulling.namespace = Some("users".into());
        nulling.key = Some("u1".into());
        steps.push(Step::new("w-null", t0(), nulling));

        let r = MemoryHygieneGrader::default().grade(&seal(steps)).unwrap();
        prop_assert!(!r.passed);
        let ev = r.evidence.iter().find(|e| e.check == "data_corruption").unwrap();
        prop_assert_eq!(ev.step_ids.clone(), vec!["w-null".to_string()]);
    }
}
