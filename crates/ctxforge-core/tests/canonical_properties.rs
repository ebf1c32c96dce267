use ctxforge_core::Canonicalizer;
use proptest::prelude::*;
use serde_json::{Map, Value};

fn json_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i32>().prop_map(Value::from),
        "[ -~]{0,24}".prop_map(Value::String),
        "Bearer [A-Za-z0-9]{4,12}".prop_map(Value::String),
        "sk-[A-Za-z0-9]{20,30}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map(
                prop_oneof!["[a-z_]{1,8}", Just("api_key".to_string()), Just("password".to_string())],
                inner,
                0..4
            )
            .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

fn arguments() -> impl Strategy<Value = Vec<(String, Value)>> {
    prop::collection::btree_map("[a-z]{1,6}", json_value(), 0..6)
        .prop_map(|m| m.into_iter().collect())
}

proptest! {
    #[test]
    fn canonicalization_is_idempotent(v in json_value()) {
        let c = Canonicalizer::default();
        let once = c.canonical_value(&v);
        prop_assert_eq!(c.canonical_value(&once), once.clone());
        prop_assert_eq!(c.canonical_json(&once), c.canonical_json(&v));
    }

    #[test]
    fn insertion_order_never_changes_the_fingerprint(pairs in arguments()) {
        let c = Canonicalizer::default();
        let forward: Map<String, Value> = pairs.iter().cloned().collect();
        let backward: Map<String, Value> = pairs.iter().rev().cloned().collect();
        let a = c.canonicalize("tool", &forward);
        let b = c.canonicalize("tool", &backward);
        prop_assert_eq!(a.arguments, b.arguments);
        prop_assert_eq!(a.fingerprint, b.fingerprint);
    }

    #[test]
    fn secrets_never_survive(secret in "[A-Za-z0-9]{20,30}") {
        let c = Canonicalizer::default();
        let mut args = Map::new();
        args.insert("password".into(), Value::String(secret.clone()));
        args.insert("header".into(), Value::String(format!("Bearer {secret}")));
        args.insert("note".into(), Value::String(format!("use sk-{secret} here")));
        let call = c.canonicalize("http", &args);
        prop_assert!(!call.arguments.contains(&secret));
    }
}
