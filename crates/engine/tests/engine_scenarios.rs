#![forbid(unsafe_code)]

use forge_core::adapter::{AdapterKind, Adapters};
use forge_core::change::{ChangeSet, ChangeSetStatus, OpOutcome};
use forge_core::conflict::{ConflictStatus, ConflictType};
use forge_core::hash::content_hash_text;
use forge_core::op::{Effect, EffectKind, Operation, Precondition, PySymbolKind, Target};
use forge_core::symbol::{SymbolId, SymbolKind};
use forge_engine::{Engine, EngineEvent};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

fn engine() -> Engine {
    Engine::new(Adapters::with_fallback_parser())
}

fn base_op(state: &str, target_symbol: &str, effect: Effect) -> Operation {
    let mut metadata = Map::new();
    metadata.insert("author".to_string(), Value::from("tester"));
    Operation {
        id: String::new(),
        state: state.to_string(),
        parents: Vec::new(),
        target: Target {
            symbol_id: target_symbol.to_string(),
            path_hint: None,
        },
        preconditions: Vec::new(),
        reads: Vec::new(),
        writes: vec![target_symbol.to_string()],
        effect,
        resolves: Vec::new(),
        metadata,
        accepted_at: None,
        canonical_order: None,
    }
}

fn upsert_op(state: &str, path: &str, content: &str) -> Operation {
    let symbol = SymbolId::document(AdapterKind::for_path(path).name(), path).to_string();
    let mut effect = Effect::new(EffectKind::UpsertFile {
        path: path.to_string(),
        content: content.to_string(),
    });
    let mut declared = BTreeMap::new();
    declared.insert(symbol.clone(), Some(content_hash_text(content)));
    effect.symbol_hashes = Some(declared);
    let mut op = base_op(state, &symbol, effect);
    op.target.path_hint = Some(path.to_string());
    op
}

fn delete_op(state: &str, path: &str) -> Operation {
    let symbol = SymbolId::document(AdapterKind::for_path(path).name(), path).to_string();
    let mut effect = Effect::new(EffectKind::DeleteFile {
        path: path.to_string(),
    });
    let mut declared = BTreeMap::new();
    declared.insert(symbol.clone(), None);
    effect.symbol_hashes = Some(declared);
    base_op(state, &symbol, effect)
}

fn py_replace_op(state: &str, path: &str, name: &str, before: &str, after: &str) -> Operation {
    let symbol = SymbolId::python(path, SymbolKind::Def, name).to_string();
    let mut effect = Effect::new(EffectKind::PythonReplaceSymbol {
        path: path.to_string(),
        symbol_kind: PySymbolKind::Def,
        symbol_name: name.to_string(),
        before_content: before.to_string(),
        after_content: after.to_string(),
    });
    let mut declared = BTreeMap::new();
    declared.insert(symbol.clone(), Some(content_hash_text(after)));
    effect.symbol_hashes = Some(declared);
    base_op(state, &symbol, effect)
}

fn submit_one(engine: &mut Engine, op: Operation) -> forge_engine::SubmitOutcome {
    let (outcome, _) = engine.submit_ops(vec![op]).expect("submit");
    outcome
}

fn submit_accepted(engine: &mut Engine, op: Operation) -> String {
    let outcome = submit_one(engine, op);
    assert_eq!(outcome.status, ChangeSetStatus::Accepted, "{outcome:?}");
    outcome.accepted[0].clone()
}

/// Submits with `parents` set to the state's current heads, the way a
/// client that has seen the latest snapshot would.
fn submit_chained(engine: &mut Engine, mut op: Operation) -> String {
    op.parents = engine.state(&op.state).expect("state").heads.clone();
    submit_accepted(engine, op)
}

const CALC_V1: &str = "def calc(x):\n    return 1\n";
const CALC_ALICE: &str = "def calc(x):\n    return 2\n";
const CALC_BOB: &str = "def calc(x):\n    return 20\n";
const CALC_RESOLVED: &str = "def calc(x):\n    return 3\n";

/// Engine state after S1 plus a Python module, forked into two workspaces
/// with divergent edits and alice's promoted first. Returns the conflict id
/// produced by bob's promotion.
fn diverged_engine() -> (Engine, String) {
    let mut engine = engine();
    submit_accepted(&mut engine, upsert_op("main", "a.txt", "hi\n"));
    submit_accepted(&mut engine, upsert_op("main", "demo.py", CALC_V1));

    engine.create_state("ws/alice", Some("main")).expect("fork alice");
    engine.create_state("ws/bob", Some("main")).expect("fork bob");
    submit_accepted(
        &mut engine,
        py_replace_op("ws/alice", "demo.py", "calc", CALC_V1, CALC_ALICE),
    );
    submit_accepted(
        &mut engine,
        py_replace_op("ws/bob", "demo.py", "calc", CALC_V1, CALC_BOB),
    );

    let (alice, _) = engine.promote("ws/alice", "main", "alice").expect("promote alice");
    assert!(alice.ok, "{alice:?}");
    assert_eq!(alice.accepted.len(), 1);

    let (bob, _) = engine.promote("ws/bob", "main", "bob").expect("promote bob");
    assert!(!bob.ok);
    assert_eq!(bob.conflicts.len(), 1, "{bob:?}");
    (engine, bob.conflicts[0].clone())
}

#[test]
fn s1_upsert_and_read_back() {
    let mut engine = engine();
    let op_id = submit_accepted(&mut engine, upsert_op("main", "a.txt", "hi\n"));

    let tree = engine.materialize("main");
    assert_eq!(tree.len(), 1);
    assert_eq!(tree.get("a.txt").map(String::as_str), Some("hi\n"));
    assert_eq!(
        engine.symbol_head("main", "sym://text/a.txt#document"),
        Some(op_id.as_str())
    );
    assert_eq!(
        engine.symbol_hash("main", "sym://text/a.txt#document"),
        Some(content_hash_text("hi\n").as_str())
    );
    assert_eq!(engine.state("main").unwrap().heads, vec![op_id]);
}

#[test]
fn s2_concurrent_divergent_writes_conflict_once() {
    let (engine, conflict_id) = diverged_engine();
    let conflict = engine.conflict(&conflict_id).expect("conflict recorded");
    assert_eq!(conflict.conflict_type, ConflictType::SemanticWriteConflict);
    assert_eq!(conflict.target, "sym://python/demo.py#def:calc");
    assert_eq!(conflict.state, "main");
    assert_eq!(conflict.status, ConflictStatus::Open);
    assert_eq!(conflict.ops.len(), 2);
    // Existing head first, incoming candidate second.
    assert_eq!(
        Some(conflict.ops[0].as_str()),
        engine.symbol_head("main", "sym://python/demo.py#def:calc")
    );
    assert!(conflict.ops[1].starts_with("op_promote_"));
    // The losing candidate never entered the log.
    assert!(engine.op(&conflict.ops[1]).is_none());
    assert_eq!(engine.materialize("main").get("demo.py").map(String::as_str), Some(CALC_ALICE));
}

#[test]
fn s3_signature_hash_mismatch_is_a_precondition_failure() {
    let mut engine = engine();
    submit_accepted(&mut engine, upsert_op("main", "demo.py", CALC_V1));
    let before = engine.materialize("main");

    let mut op = py_replace_op("main", "demo.py", "calc", "X", "def calc(x):\n    return 9\n");
    op.preconditions = vec![Precondition::SignatureHash {
        value: content_hash_text("Y"),
    }];
    let outcome = submit_one(&mut engine, op);
    assert_eq!(outcome.status, ChangeSetStatus::Conflicted);
    assert!(outcome.accepted.is_empty());
    let conflict = &outcome.conflict_details[0];
    assert_eq!(conflict.conflict_type, ConflictType::PreconditionFailure);
    assert!(conflict.reason.contains("signature hash mismatch"));
    assert!(conflict.reason.contains(&content_hash_text("Y")));
    assert_eq!(engine.materialize("main"), before);
}

#[test]
fn s4_python_duplicate_insert_is_a_verification_conflict() {
    let mut engine = engine();
    submit_accepted(&mut engine, upsert_op("main", "demo.py", CALC_V1));
    let ops_before = engine.ops_for_state("main").len();

    let symbol = SymbolId::python("demo.py", SymbolKind::Def, "calc").to_string();
    let effect = Effect::new(EffectKind::PythonInsertSymbol {
        path: "demo.py".to_string(),
        symbol_kind: PySymbolKind::Def,
        symbol_name: "calc".to_string(),
        after_content: "def calc(y):\n    return y\n".to_string(),
        insert_after_key: Some("def:calc".to_string()),
        insert_before_key: None,
    });
    let outcome = submit_one(&mut engine, base_op("main", &symbol, effect));
    assert_eq!(outcome.status, ChangeSetStatus::Conflicted);
    let conflict = &outcome.conflict_details[0];
    assert_eq!(conflict.conflict_type, ConflictType::VerificationConflict);
    assert!(conflict.reason.contains("def:calc"), "{}", conflict.reason);
    assert_eq!(engine.ops_for_state("main").len(), ops_before);
}

#[test]
fn s5_change_sets_are_atomic() {
    let mut engine = engine();
    let good = upsert_op("main", "a.txt", "hi\n");
    let mut bad = upsert_op("main", "b.txt", "bye\n");
    bad.preconditions = vec![Precondition::SignatureHash {
        value: content_hash_text("something else"),
    }];

    let change = ChangeSet {
        id: String::new(),
        state: "main".to_string(),
        metadata: Map::new(),
        ops: vec![good, bad],
    };
    let (outcome, _) = engine.submit(change).expect("submit");
    assert_eq!(outcome.status, ChangeSetStatus::Conflicted);
    assert!(outcome.accepted.is_empty());
    assert_eq!(outcome.results.len(), 2);
    assert_eq!(outcome.results[0].status, OpOutcome::Accepted);
    assert_eq!(outcome.results[1].status, OpOutcome::Conflicted);
    // Nothing reached the log or the tree.
    assert!(engine.materialize("main").is_empty());
    assert!(engine.op(&outcome.results[0].op_id).is_none());
    // The record is durable and queryable.
    let record = engine.change_set(&outcome.change_set_id).expect("record");
    assert_eq!(record.status, ChangeSetStatus::Conflicted);
    assert_eq!(record.conflicts, outcome.conflicts);
}

#[test]
fn s6_resolution_closes_the_conflict_and_is_a_normal_op() {
    let (mut engine, conflict_id) = diverged_engine();

    let mut resolver = py_replace_op("main", "demo.py", "calc", CALC_ALICE, CALC_RESOLVED);
    resolver.parents = engine.state("main").unwrap().heads.clone();
    resolver.preconditions = vec![Precondition::SignatureHash {
        value: content_hash_text(CALC_ALICE),
    }];

    let (outcome, events) = engine.resolve(&conflict_id, resolver).expect("resolve");
    assert_eq!(outcome.submit.status, ChangeSetStatus::Accepted);
    assert_eq!(outcome.conflict.status, ConflictStatus::Resolved);
    let resolver_id = outcome.submit.accepted[0].clone();
    assert_eq!(outcome.conflict.resolved_by.as_deref(), Some(resolver_id.as_str()));
    assert!(outcome.conflict.resolved_at.is_some());
    assert!(
        engine
            .ops_for_state("main")
            .iter()
            .any(|id| id == &resolver_id)
    );
    assert_eq!(
        engine.materialize("main").get("demo.py").map(String::as_str),
        Some(CALC_RESOLVED)
    );
    assert_eq!(engine.open_conflict_count("main"), 0);
    // The conflict event trails the resolving op's acceptance.
    let op_index = events
        .iter()
        .position(|event| matches!(event, EngineEvent::OpAccepted { .. }))
        .unwrap();
    let conflict_index = events
        .iter()
        .position(|event| {
            matches!(event, EngineEvent::Conflict { status: ConflictStatus::Resolved, .. })
        })
        .unwrap();
    assert!(conflict_index > op_index);
}

#[test]
fn s7_materialization_survives_snapshot_reload() {
    let mut engine = engine();
    submit_accepted(&mut engine, upsert_op("main", "base.txt", "root\n"));
    engine.create_state("s1", Some("main")).expect("create s1");
    submit_chained(&mut engine, upsert_op("s1", "one.txt", "1\n"));
    submit_chained(&mut engine, upsert_op("s1", "two.md", "# two\n"));
    submit_chained(&mut engine, upsert_op("s1", "one.txt", "1 again\n"));
    submit_chained(&mut engine, delete_op("s1", "two.md"));

    let raw = serde_json::to_string(&engine.snapshot()).expect("serialize");
    let doc = serde_json::from_str(&raw).expect("parse");
    let reloaded = Engine::from_snapshot(doc, Adapters::with_fallback_parser());

    assert_eq!(engine.materialize("s1"), reloaded.materialize("s1"));
    assert_eq!(engine.materialize("main"), reloaded.materialize("main"));
    assert_eq!(
        engine.state("s1").unwrap().heads,
        reloaded.state("s1").unwrap().heads
    );
    assert_eq!(
        engine.symbol_head("s1", "sym://text/one.txt#document"),
        reloaded.symbol_head("s1", "sym://text/one.txt#document")
    );
    // A second reload of the same document is byte-stable.
    let raw_again = serde_json::to_string(&reloaded.snapshot()).expect("serialize again");
    assert_eq!(raw, raw_again);
}

#[test]
fn duplicate_op_submission_is_flagged() {
    let mut engine = engine();
    let mut first = upsert_op("main", "a.txt", "hi\n");
    first.metadata.insert("timestamp".to_string(), Value::from(42));
    let second = first.clone();

    let outcome = submit_one(&mut engine, first);
    assert_eq!(outcome.status, ChangeSetStatus::Accepted);
    assert!(!outcome.results[0].duplicate);

    // Same op inside a differently-labelled change set: the log keeps one
    // record and the result is marked duplicate.
    let mut metadata = Map::new();
    metadata.insert("message".to_string(), Value::from("retry"));
    let change = ChangeSet {
        id: String::new(),
        state: "main".to_string(),
        metadata,
        ops: vec![second],
    };
    let (retry, _) = engine.submit(change).expect("resubmit");
    assert_eq!(retry.status, ChangeSetStatus::Accepted);
    assert!(retry.results[0].duplicate);
    assert!(retry.accepted.is_empty());
    assert_eq!(engine.ops_for_state("main").len(), 1);
}

#[test]
fn identical_change_set_replays_recorded_outcome() {
    let mut engine = engine();
    let mut op = upsert_op("main", "a.txt", "hi\n");
    op.metadata.insert("timestamp".to_string(), Value::from(42));
    let change = ChangeSet {
        id: String::new(),
        state: "main".to_string(),
        metadata: Map::new(),
        ops: vec![op],
    };

    let (first, _) = engine.submit(change.clone()).expect("submit");
    let (replay, events) = engine.submit(change).expect("replay");
    assert!(replay.replayed);
    assert!(events.is_empty());
    assert_eq!(replay.change_set_id, first.change_set_id);
    assert_eq!(replay.accepted, first.accepted);
    assert_eq!(replay.results, first.results);
}

#[test]
fn canonical_order_is_strictly_increasing() {
    let mut engine = engine();
    let mut ids = Vec::new();
    for index in 0..4 {
        ids.push(submit_accepted(
            &mut engine,
            upsert_op("main", &format!("f{index}.txt"), &format!("{index}\n")),
        ));
    }
    let orders: Vec<u64> = ids
        .iter()
        .map(|id| engine.op(id).unwrap().canonical_order.unwrap())
        .collect();
    for pair in orders.windows(2) {
        assert!(pair[0] < pair[1]);
    }
}

#[test]
fn symbol_head_always_points_at_a_writer() {
    let (engine, _) = diverged_engine();
    for state in ["main", "ws/alice", "ws/bob"] {
        for op_id in engine.ops_for_state(state) {
            let op = engine.op(op_id).unwrap();
            for symbol in &op.writes {
                if let Some(head) = engine.symbol_head(state, symbol) {
                    let head_op = engine.op(head).expect("head op exists");
                    assert!(head_op.writes.contains(symbol));
                }
            }
        }
    }
}

#[test]
fn promotion_is_idempotent() {
    let mut engine = engine();
    submit_accepted(&mut engine, upsert_op("main", "a.txt", "hi\n"));
    engine.create_state("ws/dev", Some("main")).expect("fork");
    submit_accepted(&mut engine, upsert_op("ws/dev", "b.txt", "dev\n"));
    submit_accepted(&mut engine, upsert_op("ws/dev", "c.txt", "dev\n"));

    let (first, _) = engine.promote("ws/dev", "main", "dev").expect("promote");
    assert!(first.ok);
    assert_eq!(first.accepted.len(), 2);

    let (second, _) = engine.promote("ws/dev", "main", "dev").expect("promote again");
    assert!(second.ok);
    assert!(second.accepted.is_empty());
    assert!(
        second
            .results
            .iter()
            .all(|result| result.status == OpOutcome::Skipped)
    );
    assert_eq!(engine.materialize("main").get("b.txt").map(String::as_str), Some("dev\n"));
}

#[test]
fn accepted_submission_emits_ordered_events() {
    let mut engine = engine();
    let (outcome, events) = engine
        .submit_ops(vec![upsert_op("main", "a.txt", "hi\n")])
        .expect("submit");
    assert_eq!(outcome.status, ChangeSetStatus::Accepted);
    assert_eq!(events.len(), 3);
    assert!(matches!(&events[0], EngineEvent::OpAccepted { state, .. } if state == "main"));
    assert!(matches!(
        &events[1],
        EngineEvent::ChangeSet { status: ChangeSetStatus::Accepted, .. }
    ));
    assert!(matches!(&events[2], EngineEvent::StateUpdate { state } if state == "main"));
}

#[test]
fn rejected_op_state_mismatch_skips_the_rest() {
    let mut engine = engine();
    engine.create_state("other", None).expect("state");
    let good = upsert_op("main", "a.txt", "hi\n");
    let stray = upsert_op("other", "b.txt", "bye\n");
    let trailing = upsert_op("main", "c.txt", "tail\n");
    let change = ChangeSet {
        id: String::new(),
        state: "main".to_string(),
        metadata: Map::new(),
        ops: vec![good, stray, trailing],
    };
    let (outcome, _) = engine.submit(change).expect("submit");
    assert_eq!(outcome.status, ChangeSetStatus::Rejected);
    assert_eq!(outcome.results[0].status, OpOutcome::Accepted);
    assert_eq!(outcome.results[1].status, OpOutcome::Rejected);
    assert_eq!(outcome.results[2].status, OpOutcome::Skipped);
    assert!(engine.materialize("main").is_empty());
}

#[test]
fn strict_policy_blocks_writes_while_conflicts_are_open() {
    let (mut engine, _conflict) = diverged_engine();
    // Promote main's accepted history into prod, then hand prod an open
    // conflict and watch the policy rule fire.
    engine.create_state("prod", Some("main")).expect("prod");
    // prod inherits main's open conflict count of zero (conflicts belong to
    // main), so first verify a clean write passes.
    submit_accepted(&mut engine, upsert_op("prod", "release.txt", "v1\n"));

    // Manufacture an open conflict on prod itself.
    let mut stale = upsert_op("prod", "release.txt", "v2\n");
    stale.preconditions = vec![Precondition::SignatureHash {
        value: content_hash_text("not the content"),
    }];
    let outcome = submit_one(&mut engine, stale);
    assert_eq!(outcome.status, ChangeSetStatus::Conflicted);

    // Now even a clean op is refused by policy while the conflict is open.
    let blocked = submit_one(&mut engine, upsert_op("prod", "other.txt", "x\n"));
    assert_eq!(blocked.status, ChangeSetStatus::Conflicted);
    assert_eq!(
        blocked.conflict_details[0].conflict_type,
        ConflictType::PolicyConflict
    );
}

#[test]
fn json_effects_round_trip_through_the_engine() {
    let mut engine = engine();
    let symbol = SymbolId::json_key("cfg.json", "retries").to_string();
    let mut effect = Effect::new(EffectKind::JsonSetKey {
        path: "cfg.json".to_string(),
        key: "retries".to_string(),
        value: Value::from(3),
    });
    let mut declared = BTreeMap::new();
    declared.insert(symbol.clone(), Some(forge_core::hash::content_hash_value(&Value::from(3))));
    effect.symbol_hashes = Some(declared);
    submit_accepted(&mut engine, base_op("main", &symbol, effect));

    assert_eq!(
        engine.materialize("main").get("cfg.json").map(String::as_str),
        Some("{\n  \"retries\": 3\n}\n")
    );

    // A signature precondition against the derived hash passes.
    let mut update = base_op(
        "main",
        &symbol,
        Effect::new(EffectKind::JsonSetKey {
            path: "cfg.json".to_string(),
            key: "retries".to_string(),
            value: Value::from(5),
        }),
    );
    update.parents = engine.state("main").unwrap().heads.clone();
    update.preconditions = vec![Precondition::SignatureHash {
        value: forge_core::hash::content_hash_value(&Value::from(3)),
    }];
    let outcome = submit_one(&mut engine, update);
    assert_eq!(outcome.status, ChangeSetStatus::Accepted, "{outcome:?}");
}
