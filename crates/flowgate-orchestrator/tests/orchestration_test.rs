//! Integration tests for flow orchestration
//!
//! Each test builds a small flow over an in-memory store and drives it with a
//! ScriptedInvoker, then inspects the recorded execution.

use async_trait::async_trait;
use flowgate_core::rules::conditions::{field_equals, field_is_not_null};
use flowgate_core::{
    AuditEventType, ExecutionStatus, FlowBuilder, FlowgateConfig, NewNode, NewRule, Node,
    NodeExecutionStatus, NodeKind, RuleType, SqliteFlowStore, StorageConfig, goal_signature,
};
use flowgate_orchestrator::{
    AgentInvoker, ExecutionStatusReport, FlowOrchestrator, InvocationError, ScriptedInvoker,
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    invoker: Arc<ScriptedInvoker>,
    orchestrator: FlowOrchestrator,
    builder: FlowBuilder,
    flow_id: String,
    root: Node,
}

impl Harness {
    fn new(invoker: ScriptedInvoker) -> Self {
        let store = Arc::new(SqliteFlowStore::open_in_memory().unwrap());
        let invoker = Arc::new(invoker);
        let orchestrator = FlowOrchestrator::new(store, invoker.clone());
        let builder = orchestrator.builder();
        let flow = builder.create_flow("test-flow", "", &json!({})).unwrap();
        let root = builder.add_node(NewNode::new(&flow.id, NodeKind::Root, "start")).unwrap();
        Self { invoker, orchestrator, builder, flow_id: flow.id, root }
    }

    fn agent(&self, parent: &Node, name: &str, config: Value) -> Node {
        let mut config = config;
        if config.get("goal").is_none() {
            config["goal"] = json!(name);
        }
        self.node(parent, NodeKind::Agent, name, config)
    }

    fn control(&self, parent: &Node, name: &str, config: Value) -> Node {
        self.node(parent, NodeKind::ControlFlow, name, config)
    }

    fn gate(&self, parent: &Node, name: &str, config: Value) -> Node {
        self.node(parent, NodeKind::Gate, name, config)
    }

    fn node(&self, parent: &Node, kind: NodeKind, name: &str, config: Value) -> Node {
        self.builder
            .add_node(NewNode::new(&self.flow_id, kind, name).with_parent(&parent.id).with_config(config))
            .unwrap()
    }

    async fn run(&self, initial_context: Value) -> ExecutionStatusReport {
        let execution_id = self.orchestrator.execute_flow(&self.flow_id, initial_context).await.unwrap();
        self.orchestrator.get_execution_status(&execution_id).unwrap()
    }
}

fn output(report: &ExecutionStatusReport) -> &Value {
    &report.execution.result.as_ref().expect("execution result")["output"]
}

fn events(report: &ExecutionStatusReport, event_type: AuditEventType) -> usize {
    report.audit_trail.iter().filter(|entry| entry.event_type == event_type).count()
}

// =========================================================================
// Workflow patterns
// =========================================================================

#[tokio::test]
async fn test_prompt_chaining_passes_output_forward() {
    let h = Harness::new(
        ScriptedInvoker::new().with_reply("a", json!({"step": "a"})).with_reply("b", json!({"step": "b"})),
    );
    let chain = h.control(&h.root, "chain", json!({"pattern": "prompt_chaining"}));
    h.agent(&chain, "a", json!({}));
    h.agent(&chain, "b", json!({}));
    h.agent(&chain, "c", json!({}));

    let report = h.run(json!({"topic": "rust"})).await;

    assert_eq!(report.execution.status, ExecutionStatus::Completed);
    let calls = h.invoker.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[0].input, json!({"topic": "rust"}));
    assert_eq!(calls[1].input, json!({"step": "a"}));
    assert_eq!(calls[2].input, json!({"step": "b"}));
    assert_eq!(output(&report), &json!({"goal": "c", "input": {"step": "b"}}));
}

#[tokio::test]
async fn test_prompt_chaining_stops_at_first_failure() {
    let h = Harness::new(ScriptedInvoker::new().with_failure("a", InvocationError::Provider("boom".to_string())));
    let chain = h.control(&h.root, "chain", json!({"pattern": "prompt_chaining"}));
    h.agent(&chain, "a", json!({}));
    h.agent(&chain, "b", json!({}));
    h.agent(&chain, "c", json!({}));

    let report = h.run(json!({})).await;

    assert_eq!(report.execution.status, ExecutionStatus::Failed);
    assert!(report.execution.error.as_deref().unwrap().contains("Agent 'a' failed"));
    assert_eq!(h.invoker.call_count("b"), 0);
    assert_eq!(h.invoker.call_count("c"), 0);

    // root, chain and a; each marked failed
    assert_eq!(report.node_executions.len(), 3);
    assert!(report.node_executions.iter().all(|visit| visit.status == NodeExecutionStatus::Failed));
    assert_eq!(events(&report, AuditEventType::NodeFailed), 3);
    assert_eq!(report.audit_trail.last().unwrap().event_type, AuditEventType::ExecutionFailed);
}

#[tokio::test]
async fn test_parallelization_isolates_failures() {
    let h = Harness::new(
        ScriptedInvoker::new()
            .with_reply("a", json!({"part": "a"}))
            .with_failure("b", InvocationError::Provider("rate limited".to_string())),
    );
    let fan = h.control(&h.root, "fan", json!({"pattern": "parallelization"}));
    h.agent(&fan, "a", json!({}));
    h.agent(&fan, "b", json!({}));

    let report = h.run(json!({"doc": 1})).await;

    assert_eq!(report.execution.status, ExecutionStatus::Completed);
    let result = output(&report);
    assert_eq!(result["success_count"], 1);
    assert_eq!(result["total_count"], 2);
    assert_eq!(result["parallel_results"][0]["status"], "completed");
    assert_eq!(result["parallel_results"][0]["output"], json!({"part": "a"}));
    assert_eq!(result["parallel_results"][1]["status"], "failed");
    assert!(result["parallel_results"][1]["error"].as_str().unwrap().contains("rate limited"));

    // both branches saw the same input
    assert!(h.invoker.calls().iter().all(|call| call.input == json!({"doc": 1})));
}

#[tokio::test]
async fn test_parallel_gate_rejection_fails_execution() {
    let h = Harness::new(ScriptedInvoker::new());
    let fan = h.control(&h.root, "fan", json!({"pattern": "parallelization"}));
    h.agent(&fan, "worker", json!({}));
    let gate = h.gate(&fan, "guard", json!({"decision_options": ["GO", "KILL"]}));
    h.builder
        .add_rule(NewRule::new(&h.flow_id, "has title", RuleType::Gate, field_is_not_null("title")).for_node(&gate.id).auto_kill())
        .unwrap();

    let report = h.run(json!({})).await;

    assert_eq!(report.execution.status, ExecutionStatus::Failed);
    // the sibling still ran to completion
    assert_eq!(h.invoker.call_count("worker"), 1);
    let worker_visit = report.node_executions.iter().find(|visit| visit.status == NodeExecutionStatus::Completed);
    assert!(worker_visit.is_some());
}

#[tokio::test]
async fn test_evaluator_optimizer_stops_at_threshold() {
    let h = Harness::new(
        ScriptedInvoker::new()
            .with_reply("generate", json!({"draft": 1}))
            .with_reply("generate", json!({"draft": 2}))
            .with_reply("generate", json!({"draft": 3}))
            .with_reply("evaluate", json!({"score": 0.5}))
            .with_reply("evaluate", json!({"score": 0.9}))
            .with_reply("evaluate", json!({"score": 0.95})),
    );
    let loop_node = h.control(
        &h.root,
        "refine",
        json!({"pattern": "evaluator_optimizer", "max_iterations": 3, "quality_threshold": 0.8}),
    );
    h.agent(&loop_node, "generate", json!({}));
    h.agent(&loop_node, "evaluate", json!({}));

    let report = h.run(json!({"brief": "x"})).await;

    assert_eq!(report.execution.status, ExecutionStatus::Completed);
    let result = output(&report);
    assert_eq!(result["total_iterations"], 2);
    assert_eq!(result["best_score"], 0.9);
    assert_eq!(result["best_result"], json!({"draft": 2}));
    assert_eq!(result["iterations"][0]["score"], 0.5);
    assert_eq!(h.invoker.call_count("generate"), 2);

    let evaluator_inputs: Vec<Value> =
        h.invoker.calls().into_iter().filter(|call| call.goal == "evaluate").map(|call| call.input).collect();
    assert_eq!(evaluator_inputs, vec![json!({"draft": 1}), json!({"draft": 2})]);
}

#[tokio::test]
async fn test_evaluator_optimizer_needs_two_children() {
    let h = Harness::new(ScriptedInvoker::new());
    let loop_node = h.control(&h.root, "refine", json!({"pattern": "evaluator_optimizer"}));
    h.agent(&loop_node, "generate", json!({}));

    let report = h.run(json!({})).await;

    assert_eq!(report.execution.status, ExecutionStatus::Failed);
    assert!(report.execution.error.as_deref().unwrap().contains("needs a generator and an evaluator"));
}

#[tokio::test]
async fn test_routing_picks_matching_child() {
    let h = Harness::new(ScriptedInvoker::new());
    let router = h.control(&h.root, "triage", json!({"pattern": "routing"}));
    h.agent(&router, "billing", json!({}));
    h.agent(&router, "support", json!({}));
    h.builder
        .add_rule(
            NewRule::new(&h.flow_id, "to billing", RuleType::Routing, field_equals("category", "billing"))
                .for_node(&router.id)
                .with_action(json!({"route_to": "billing"})),
        )
        .unwrap();

    let report = h.run(json!({"category": "billing"})).await;

    assert_eq!(report.execution.status, ExecutionStatus::Completed);
    assert_eq!(output(&report)["routed_to"], "billing");
    assert_eq!(h.invoker.call_count("billing"), 1);
    assert_eq!(h.invoker.call_count("support"), 0);
    assert_eq!(events(&report, AuditEventType::RoutingDecision), 1);
}

#[tokio::test]
async fn test_routing_without_match_runs_no_children() {
    let h = Harness::new(ScriptedInvoker::new());
    let router = h.control(&h.root, "triage", json!({"pattern": "routing"}));
    h.agent(&router, "billing", json!({}));
    h.agent(&router, "support", json!({}));
    h.builder
        .add_rule(
            NewRule::new(&h.flow_id, "to billing", RuleType::Routing, field_equals("category", "billing"))
                .for_node(&router.id)
                .with_action(json!({"route_to": "billing"})),
        )
        .unwrap();

    let report = h.run(json!({"category": "tech"})).await;

    assert_eq!(report.execution.status, ExecutionStatus::Failed);
    assert!(report.execution.error.as_deref().unwrap().contains("No routing rule matched"));
    assert!(h.invoker.calls().is_empty());
    assert_eq!(report.node_executions.len(), 2);
}

#[tokio::test]
async fn test_orchestrator_workers_runs_assigned_workers_only() {
    let h = Harness::new(ScriptedInvoker::new().with_reply(
        "plan",
        json!({"task_assignments": [{"worker": "w1", "input": {"part": 1}}]}),
    ));
    let team = h.control(&h.root, "team", json!({"pattern": "orchestrator_workers"}));
    h.agent(&team, "plan", json!({}));
    let w1 = h.agent(&team, "w1", json!({}));
    let w2 = h.agent(&team, "w2", json!({}));

    let report = h.run(json!({"job": "x"})).await;

    assert_eq!(report.execution.status, ExecutionStatus::Completed);
    let calls = h.invoker.calls();
    let w1_call = calls.iter().find(|call| call.goal == "w1").unwrap();
    assert_eq!(w1_call.input, json!({"part": 1}));
    assert_eq!(h.invoker.call_count("w2"), 0);

    let result = output(&report);
    assert_eq!(result["success_count"], 1);
    assert_eq!(result["worker_results"][0]["node"], "w1");

    let w1_visit = report.node_executions.iter().find(|visit| visit.node_id == w1.id).unwrap();
    assert_eq!(w1_visit.status, NodeExecutionStatus::Completed);
    let w2_visit = report.node_executions.iter().find(|visit| visit.node_id == w2.id).unwrap();
    assert_eq!(w2_visit.status, NodeExecutionStatus::Skipped);
    assert_eq!(events(&report, AuditEventType::NodeSkipped), 1);
}

#[tokio::test]
async fn test_unknown_pattern_falls_back_to_sequential() {
    let h = Harness::new(ScriptedInvoker::new());
    let group = h.control(&h.root, "group", json!({"pattern": "swarm"}));
    h.agent(&group, "a", json!({}));
    h.agent(&group, "b", json!({}));

    let report = h.run(json!({"n": 1})).await;

    assert_eq!(report.execution.status, ExecutionStatus::Completed);
    assert_eq!(output(&report)["child_results"].as_array().unwrap().len(), 2);
    assert!(h.invoker.calls().iter().all(|call| call.input == json!({"n": 1})));
    assert_eq!(events(&report, AuditEventType::PatternFallback), 1);
}

// =========================================================================
// Gates
// =========================================================================

#[tokio::test]
async fn test_gate_without_rules_passes_to_children() {
    let h = Harness::new(ScriptedInvoker::new());
    let gate = h.gate(&h.root, "open", json!({}));
    h.agent(&gate, "after", json!({}));

    let report = h.run(json!({"doc": "ok"})).await;

    assert_eq!(report.execution.status, ExecutionStatus::Completed);
    let result = output(&report);
    assert_eq!(result["gate_passed"], true);
    assert_eq!(result["decision"], "GO");
    assert_eq!(result["score"], 100.0);
    assert_eq!(h.invoker.call_count("after"), 1);
    assert_eq!(events(&report, AuditEventType::GateEvaluation), 1);
}

#[tokio::test]
async fn test_human_gate_blocks_pending_review() {
    let h = Harness::new(ScriptedInvoker::new());
    let gate = h.gate(&h.root, "signoff", json!({"gate_type": "human"}));
    h.agent(&gate, "after", json!({}));
    h.builder
        .add_rule(NewRule::new(&h.flow_id, "has title", RuleType::Gate, field_is_not_null("title")).for_node(&gate.id))
        .unwrap();

    let report = h.run(json!({"title": "t"})).await;

    assert_eq!(report.execution.status, ExecutionStatus::Completed);
    let result = report.execution.result.unwrap();
    assert_eq!(result["status"], "blocked");
    assert_eq!(result["decision"], "PENDING_HUMAN_REVIEW");
    assert_eq!(result["pending_review"], true);
    assert_eq!(h.invoker.call_count("after"), 0);
    assert_eq!(report.gate_evaluations.len(), 1);
}

#[tokio::test]
async fn test_gate_kill_fails_execution() {
    let h = Harness::new(ScriptedInvoker::new());
    let gate = h.gate(&h.root, "quality", json!({"decision_options": ["GO", "RECYCLE", "KILL"]}));
    h.agent(&gate, "after", json!({}));
    h.builder
        .add_rule(
            NewRule::new(&h.flow_id, "has title", RuleType::Gate, field_is_not_null("title"))
                .for_node(&gate.id)
                .auto_kill(),
        )
        .unwrap();

    let report = h.run(json!({"body": "no title"})).await;

    assert_eq!(report.execution.status, ExecutionStatus::Failed);
    let error = report.execution.error.as_deref().unwrap();
    assert!(error.contains("Gate 'quality' rejected with KILL"), "{error}");
    assert_eq!(h.invoker.call_count("after"), 0);
    assert_eq!(events(&report, AuditEventType::ExecutionFailed), 1);

    let trail = h.orchestrator.get_execution_audit_trail(&report.execution.id).unwrap();
    assert_eq!(trail.statistics.gate_decisions["KILL"], 1);
}

#[tokio::test]
async fn test_gate_transformations_shape_child_input() {
    let h = Harness::new(ScriptedInvoker::new());
    let gate = h.gate(&h.root, "normalize", json!({}));
    h.agent(&gate, "after", json!({}));
    h.builder
        .add_rule(
            NewRule::new(&h.flow_id, "mark reviewed", RuleType::Transformation, field_is_not_null("doc"))
                .for_node(&gate.id)
                .with_action(json!({"type": "set_field", "field": "meta.reviewed", "value": true})),
        )
        .unwrap();

    let report = h.run(json!({"doc": "d"})).await;

    assert_eq!(report.execution.status, ExecutionStatus::Completed);
    let calls = h.invoker.calls();
    assert_eq!(calls[0].input, json!({"doc": "d", "meta": {"reviewed": true}}));
    // transformation rules are not scored
    assert!(report.gate_evaluations.is_empty());
}

#[tokio::test]
async fn test_recycle_reruns_target_until_gate_passes() {
    let h = Harness::new(
        ScriptedInvoker::new()
            .with_reply("writer", json!({"approved": false}))
            .with_reply("writer", json!({"approved": true})),
    );
    let chain = h.control(&h.root, "chain", json!({"pattern": "prompt_chaining"}));
    let writer = h.agent(&chain, "writer", json!({"working_memory_output": ["approved"]}));
    let gate = h.gate(&chain, "review", json!({"recycle_target": "writer"}));
    h.builder
        .add_rule(
            NewRule::new(&h.flow_id, "approved", RuleType::Gate, field_equals("approved", true))
                .for_node(&gate.id)
                .critical(),
        )
        .unwrap();

    let report = h.run(json!({"brief": "b"})).await;

    assert_eq!(report.execution.status, ExecutionStatus::Completed);
    assert_eq!(h.invoker.call_count("writer"), 2);
    assert_eq!(events(&report, AuditEventType::Recycle), 1);
    assert_eq!(report.gate_evaluations.len(), 2);

    let writer_visits: Vec<_> = report.node_executions.iter().filter(|visit| visit.node_id == writer.id).collect();
    assert_eq!(writer_visits.len(), 2);
    assert_eq!(writer_visits[1].attempt_count, 2);
    // the re-run sees the input of the first visit
    assert_eq!(writer_visits[1].input, json!({"brief": "b"}));
}

#[tokio::test]
async fn test_recycle_is_bounded() {
    let h = Harness::new(ScriptedInvoker::new().with_reply("writer", json!({"approved": false})));
    let chain = h.control(&h.root, "chain", json!({"pattern": "prompt_chaining"}));
    h.agent(&chain, "writer", json!({"working_memory_output": ["approved"]}));
    let gate = h.gate(&chain, "review", json!({"recycle_target": "writer", "max_recycles": 2}));
    h.builder
        .add_rule(
            NewRule::new(&h.flow_id, "approved", RuleType::Gate, field_equals("approved", true))
                .for_node(&gate.id)
                .critical(),
        )
        .unwrap();

    let report = h.run(json!({})).await;

    assert_eq!(report.execution.status, ExecutionStatus::Failed);
    assert!(report.execution.error.as_deref().unwrap().contains("exceeded 2 recycles of 'writer'"));
    assert_eq!(h.invoker.call_count("writer"), 3);
    assert_eq!(events(&report, AuditEventType::Recycle), 2);
    assert_eq!(report.gate_evaluations.len(), 3);
}

#[tokio::test]
async fn test_recycle_without_target_is_structural() {
    let h = Harness::new(ScriptedInvoker::new());
    let gate = h.gate(&h.root, "review", json!({}));
    h.builder
        .add_rule(NewRule::new(&h.flow_id, "approved", RuleType::Gate, field_equals("approved", true)).for_node(&gate.id).critical())
        .unwrap();

    let report = h.run(json!({})).await;

    assert_eq!(report.execution.status, ExecutionStatus::Failed);
    assert!(report.execution.error.as_deref().unwrap().contains("without a recycle_target"));
}

#[tokio::test]
async fn test_recycle_to_enclosing_agent_runs_downstream_once() {
    let h = Harness::new(
        ScriptedInvoker::new()
            .with_reply("writer", json!({"approved": false}))
            .with_reply("writer", json!({"approved": true})),
    );
    let writer = h.agent(&h.root, "writer", json!({"working_memory_output": ["approved"]}));
    let gate = h.gate(&writer, "review", json!({"recycle_target": "writer"}));
    let after = h.agent(&gate, "after", json!({}));
    h.builder
        .add_rule(
            NewRule::new(&h.flow_id, "approved", RuleType::Gate, field_equals("approved", true))
                .for_node(&gate.id)
                .critical(),
        )
        .unwrap();

    let report = h.run(json!({"brief": "b"})).await;

    assert_eq!(report.execution.status, ExecutionStatus::Completed);
    assert_eq!(h.invoker.call_count("writer"), 2);
    assert_eq!(h.invoker.call_count("after"), 1);
    assert_eq!(report.gate_evaluations.len(), 2);
    assert_eq!(events(&report, AuditEventType::Recycle), 1);

    let visits = |node: &Node| report.node_executions.iter().filter(|visit| visit.node_id == node.id).count();
    assert_eq!(visits(&writer), 2);
    assert_eq!(visits(&gate), 2);
    assert_eq!(visits(&after), 1);
    assert_eq!(h.invoker.calls().last().unwrap().input, json!({"approved": true}));

    // the outer writer visit reports the re-run's output, not its stale first reply
    assert_eq!(output(&report), &json!({"approved": true}));
}

#[tokio::test]
async fn test_recycle_to_enclosing_agent_is_bounded() {
    let h = Harness::new(ScriptedInvoker::new().with_reply("writer", json!({"approved": false})));
    let writer = h.agent(&h.root, "writer", json!({"working_memory_output": ["approved"]}));
    let gate = h.gate(&writer, "review", json!({"recycle_target": "writer", "max_recycles": 2}));
    h.agent(&gate, "after", json!({}));
    h.builder
        .add_rule(
            NewRule::new(&h.flow_id, "approved", RuleType::Gate, field_equals("approved", true))
                .for_node(&gate.id)
                .critical(),
        )
        .unwrap();

    let report = h.run(json!({})).await;

    assert_eq!(report.execution.status, ExecutionStatus::Failed);
    assert!(report.execution.error.as_deref().unwrap().contains("exceeded 2 recycles of 'writer'"));
    assert_eq!(h.invoker.call_count("writer"), 3);
    assert_eq!(h.invoker.call_count("after"), 0);
    assert_eq!(report.gate_evaluations.len(), 3);
}

// =========================================================================
// Agents and memory
// =========================================================================

struct SlowInvoker;

#[async_trait]
impl AgentInvoker for SlowInvoker {
    async fn invoke(&self, _goal: &str, _context: &Value, _input: &Value) -> Result<Value, InvocationError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(json!({}))
    }
}

#[tokio::test]
async fn test_agent_timeout_fails_node() {
    let store = Arc::new(SqliteFlowStore::open_in_memory().unwrap());
    let orchestrator = FlowOrchestrator::new(store, Arc::new(SlowInvoker));
    let builder = orchestrator.builder();
    let flow = builder.create_flow("slow", "", &json!({})).unwrap();
    let root = builder.add_node(NewNode::new(&flow.id, NodeKind::Root, "start")).unwrap();
    builder
        .add_node(
            NewNode::new(&flow.id, NodeKind::Agent, "sleepy")
                .with_parent(&root.id)
                .with_config(json!({"goal": "wait", "timeout_secs": 1})),
        )
        .unwrap();

    let execution_id = orchestrator.execute_flow(&flow.id, json!({})).await.unwrap();
    let report = orchestrator.get_execution_status(&execution_id).unwrap();

    assert_eq!(report.execution.status, ExecutionStatus::Failed);
    assert!(report.execution.error.as_deref().unwrap().contains("timed out after 1s"));
    let invoked = report.audit_trail.iter().find(|entry| entry.event_type == AuditEventType::AgentInvoked).unwrap();
    assert_eq!(invoked.event_data["success"], false);
}

#[tokio::test]
async fn test_working_memory_contract_between_agents() {
    let h = Harness::new(ScriptedInvoker::new().with_reply("draft", json!({"summary": "s", "extra": 1})));
    let chain = h.control(&h.root, "chain", json!({"pattern": "prompt_chaining"}));
    let drafter = h.agent(&chain, "draft", json!({"working_memory_output": ["summary"]}));
    h.agent(&chain, "publish", json!({"working_memory_input": ["summary"]}));

    let report = h.run(json!({"topic": "t"})).await;

    assert_eq!(report.execution.status, ExecutionStatus::Completed);
    let calls = h.invoker.calls();
    assert_eq!(calls[1].context["working_memory"], json!({"summary": "s"}));
    assert_eq!(calls[0].context["working_memory"]["topic"], "t");

    let completed = report
        .audit_trail
        .iter()
        .find(|entry| entry.event_type == AuditEventType::ExecutionCompleted)
        .unwrap();
    let archived = &completed.event_data["working_memory"];
    assert_eq!(archived["summary"], "s");
    assert_eq!(archived[format!("node_{}_result", drafter.id)], json!({"summary": "s", "extra": 1}));

    // cleared once the execution finished
    assert!(h.orchestrator.memory().snapshot(&report.execution.id).unwrap().is_empty());
}

#[tokio::test]
async fn test_episodic_examples_feed_later_runs() {
    let h = Harness::new(ScriptedInvoker::new().with_reply("classify", json!({"label": "bug"})));
    h.agent(&h.root, "classify", json!({"store_episodic": true}));

    h.run(json!({"ticket": 1})).await;
    h.run(json!({"ticket": 2})).await;

    let calls = h.invoker.calls();
    assert_eq!(calls[0].context["episodic_examples"], json!([]));
    assert_eq!(
        calls[1].context["episodic_examples"],
        json!([{"input": {"ticket": 1}, "output": {"label": "bug"}}])
    );

    let stored = h.orchestrator.memory().recall(&h.flow_id, &goal_signature("classify"), 10).unwrap();
    assert_eq!(stored.len(), 2);
}

#[tokio::test]
async fn test_file_backed_orchestrator() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("flowgate.db");
    let config = FlowgateConfig {
        storage: StorageConfig { path: Some(path.to_string_lossy().into_owned()) },
        ..FlowgateConfig::default()
    };

    let orchestrator = FlowOrchestrator::from_config(&config, Arc::new(ScriptedInvoker::new()))?;
    let builder = orchestrator.builder();
    let flow = builder.create_flow("persisted", "", &json!({}))?;
    let root = builder.add_node(NewNode::new(&flow.id, NodeKind::Root, "start"))?;
    builder.add_node(NewNode::new(&flow.id, NodeKind::Agent, "echo").with_parent(&root.id))?;

    let execution_id = orchestrator.execute_flow(&flow.id, json!({"x": 1})).await?;
    drop(orchestrator);

    let reopened = FlowOrchestrator::from_config(&config, Arc::new(ScriptedInvoker::new()))?;
    let report = reopened.get_execution_status(&execution_id)?;
    assert_eq!(report.execution.status, ExecutionStatus::Completed);
    assert_eq!(reopened.list_flows()?.len(), 1);
    assert!(reopened.get_flow_tree(&flow.id)?.root.is_some());
    Ok(())
}
