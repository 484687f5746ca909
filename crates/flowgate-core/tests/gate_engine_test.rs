//! Integration tests for the gate decision engine over the SQLite store.

use std::sync::Arc;

use flowgate_core::rules::conditions::{field_equals, field_greater_than, field_is_not_null};
use flowgate_core::{
    AuditEventType, AuditQuery, Decision, FlowBuilder, FlowStore, GateEngine, NewNode, NewRule, Node,
    NodeKind, RuleStatus, RuleType, SqliteFlowStore,
};
use serde_json::{Value, json};

struct Fixture {
    store: Arc<SqliteFlowStore>,
    builder: FlowBuilder,
    flow_id: String,
    gate: Node,
}

fn fixture(gate_config: Value) -> Fixture {
    let store = Arc::new(SqliteFlowStore::open_in_memory().unwrap());
    let builder = FlowBuilder::new(store.clone());
    let flow = builder.create_flow("prd", "PRD quality gate", &json!({})).unwrap();
    let root = builder.add_node(NewNode::new(&flow.id, NodeKind::Root, "root")).unwrap();
    let gate = builder
        .add_node(NewNode::new(&flow.id, NodeKind::Gate, "quality").with_parent(&root.id).with_config(gate_config))
        .unwrap();
    Fixture { store, builder, flow_id: flow.id, gate }
}

fn run(fixture: &Fixture, context: Value) -> flowgate_core::GateDecision {
    let execution = fixture.store.create_execution(&fixture.flow_id, &context).unwrap();
    GateEngine::default()
        .evaluate_gate(&*fixture.store, &fixture.gate, &context, &execution.id)
        .unwrap()
}

#[test]
fn test_zero_rules_yield_configured_pass() {
    let fixture = fixture(json!({"decision_options": ["PASS", "HOLD"]}));
    let decision = run(&fixture, json!({}));
    assert_eq!(decision.decision, Decision::Pass);
    assert_eq!(decision.overall_score, 100.0);
    assert!(decision.rule_results.is_empty());
}

#[test]
fn test_auto_kill_wins_over_passing_rules() {
    let fixture = fixture(json!({"decision_options": ["GO", "RECYCLE", "KILL"]}));
    for (name, priority) in [("a", 1), ("b", 2), ("c", 3)] {
        fixture
            .builder
            .add_rule(
                NewRule::new(&fixture.flow_id, name, RuleType::Gate, field_is_not_null("doc"))
                    .for_node(&fixture.gate.id)
                    .with_priority(priority),
            )
            .unwrap();
    }
    fixture
        .builder
        .add_rule(
            NewRule::new(&fixture.flow_id, "license", RuleType::Gate, field_equals("doc.license", "MIT"))
                .for_node(&fixture.gate.id)
                .with_priority(2)
                .auto_kill(),
        )
        .unwrap();

    let decision = run(&fixture, json!({"doc": {"license": "GPL"}}));
    assert_eq!(decision.decision, Decision::Kill);
    assert_eq!(decision.reason, "Critical failure: license");
    assert_eq!(decision.rule_results.len(), 4);

    let statuses: Vec<RuleStatus> = decision.rule_results.iter().map(|r| r.status).collect();
    assert_eq!(statuses[0], RuleStatus::Pass);
    assert_eq!(statuses.iter().filter(|s| **s == RuleStatus::Skipped).count(), 1);
}

#[test]
fn test_auto_kill_yields_kill_with_default_options() {
    let fixture = fixture(json!({}));
    fixture
        .builder
        .add_rule(
            NewRule::new(&fixture.flow_id, "license", RuleType::Gate, field_equals("doc.license", "MIT"))
                .for_node(&fixture.gate.id)
                .auto_kill(),
        )
        .unwrap();

    let decision = run(&fixture, json!({"doc": {"license": "GPL"}}));
    assert_eq!(decision.decision, Decision::Kill);
    assert_eq!(decision.overall_score, 0.0);
}

#[test]
fn test_rule_results_match_enabled_rules() {
    let fixture = fixture(json!({}));
    fixture
        .builder
        .add_rule(NewRule::new(&fixture.flow_id, "on", RuleType::Gate, field_is_not_null("x")).for_node(&fixture.gate.id))
        .unwrap();
    fixture
        .builder
        .add_rule(
            NewRule::new(&fixture.flow_id, "off", RuleType::Gate, field_is_not_null("x"))
                .for_node(&fixture.gate.id)
                .enabled(false),
        )
        .unwrap();
    fixture
        .builder
        .add_rule(
            NewRule::new(&fixture.flow_id, "size", RuleType::Validation, field_greater_than("x.length", 2))
                .for_node(&fixture.gate.id),
        )
        .unwrap();

    let decision = run(&fixture, json!({"x": [1, 2, 3]}));
    assert_eq!(decision.rule_results.len(), 2);
    assert_eq!(decision.decision, Decision::Go);
    assert_eq!(decision.reason, "All checks passed (score: 100.0)");
}

#[test]
fn test_gate_writes_one_evaluation_per_rule_and_one_audit_entry() {
    let fixture = fixture(json!({"pass_threshold": 50}));
    for name in ["title", "owner"] {
        fixture
            .builder
            .add_rule(
                NewRule::new(&fixture.flow_id, name, RuleType::Gate, field_is_not_null(&format!("prd.{}", name)))
                    .for_node(&fixture.gate.id),
            )
            .unwrap();
    }

    let context = json!({"prd": {"title": "Launch"}});
    let execution = fixture.store.create_execution(&fixture.flow_id, &context).unwrap();
    let decision = GateEngine::default()
        .evaluate_gate(&*fixture.store, &fixture.gate, &context, &execution.id)
        .unwrap();
    assert_eq!(decision.overall_score, 50.0);
    assert!(decision.passed);

    let evaluations = fixture.store.list_gate_evaluations(&execution.id).unwrap();
    assert_eq!(evaluations.len(), 2);
    let owner = evaluations.iter().find(|e| e.status == RuleStatus::Fail).unwrap();
    assert_eq!(owner.context_snapshot, json!({"prd.owner": null}));
    assert!(owner.reason.contains("prd.owner"));

    let audit = fixture
        .store
        .get_audit_logs(&AuditQuery::for_execution(&execution.id).with_event_type(AuditEventType::GateEvaluation))
        .unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].event_data["rules_passed"], 1);
}
