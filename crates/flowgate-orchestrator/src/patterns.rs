//! Control-flow nodes and the five workflow patterns.

use flowgate_core::{
    AuditEventType, ControlFlowConfig, Node, NodeExecutionStatus, Rule, RuleType, WorkflowPattern,
};
use futures::future::join_all;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::error::{OrchestrationError, Result};
use crate::orchestrator::{ChildRun, ExecutionRun, FlowOrchestrator};
use crate::outcome::NodeOutcome;

/// Per-branch summary of a concurrent fan-out.
struct Branches {
    entries: Vec<Value>,
    success_count: usize,
}

impl FlowOrchestrator {
    pub(crate) async fn execute_control_flow(&self, run: &ExecutionRun, node: &Node, input: Value) -> Result<NodeOutcome> {
        let config = ControlFlowConfig::from_node(node).map_err(|e| Self::invalid_config(node, &e))?;
        let children = self.store.get_children(&node.id)?;

        match config.workflow_pattern() {
            Some(WorkflowPattern::PromptChaining) => self.prompt_chaining(run, &children, input).await,
            Some(WorkflowPattern::Routing) => self.routing(run, node, &children, input).await,
            Some(WorkflowPattern::Parallelization) => self.parallelization(run, &children, input).await,
            Some(WorkflowPattern::OrchestratorWorkers) => {
                self.orchestrator_workers(run, node, &children, input).await
            }
            Some(WorkflowPattern::EvaluatorOptimizer) => {
                self.evaluator_optimizer(run, node, &children, &config, input).await
            }
            None => self.sequential_fallback(run, node, &config.pattern, &children, input).await,
        }
    }

    /// Output of child i is the input of child i+1; stops at the first child that does not complete.
    async fn prompt_chaining(&self, run: &ExecutionRun, children: &[Node], input: Value) -> Result<NodeOutcome> {
        let mut current = input;
        for child in children {
            match self.execute_node(run, child, current.clone()).await? {
                NodeOutcome::Completed { output } => current = output,
                NodeOutcome::NoOp => {}
                blocked @ NodeOutcome::Blocked { .. } => return Ok(blocked),
            }
            if run.replay_pending() {
                break;
            }
        }
        Ok(NodeOutcome::completed(current))
    }

    /// First matching routing rule picks one child by name.
    async fn routing(&self, run: &ExecutionRun, node: &Node, children: &[Node], input: Value) -> Result<NodeOutcome> {
        let rules: Vec<Rule> = self
            .store
            .get_rules_for_flow(&run.flow_id, Some(RuleType::Routing))?
            .into_iter()
            .filter(|rule| rule.gate_node_id.as_deref().is_none_or(|id| id == node.id))
            .collect();
        let context = self.rule_context(run, &input)?;

        let Some((rule, _)) = self.engine.first_match(&rules, &context) else {
            self.store.append_audit(
                Some(&run.execution_id),
                Some(&node.id),
                AuditEventType::RoutingDecision,
                &json!({ "node_name": node.name, "matched": false, "rules_evaluated": rules.len() }),
            )?;
            return Err(OrchestrationError::NoRoutingMatch { node: node.name.clone() });
        };

        let target = rule
            .action
            .as_ref()
            .and_then(|action| action.get("route_to"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                OrchestrationError::Structural(format!("Routing rule '{}' has no route_to action", rule.name))
            })?;
        let child = children.iter().find(|child| child.name == target).ok_or_else(|| {
            OrchestrationError::Structural(format!(
                "Routing rule '{}' targets '{}', which is not a child of '{}'",
                rule.name, target, node.name
            ))
        })?;

        self.store.append_audit(
            Some(&run.execution_id),
            Some(&node.id),
            AuditEventType::RoutingDecision,
            &json!({
                "node_name": node.name,
                "matched": true,
                "rule_id": rule.id,
                "rule_name": rule.name,
                "routed_to": child.name,
            }),
        )?;
        info!(execution_id = %run.execution_id, node = %node.name, rule = %rule.name, routed_to = %child.name, "Routed");

        match self.execute_node(run, child, input).await? {
            NodeOutcome::Completed { output } => {
                Ok(NodeOutcome::completed(json!({ "routed_to": child.name, "result": output })))
            }
            NodeOutcome::NoOp => Ok(NodeOutcome::completed(json!({ "routed_to": child.name, "result": null }))),
            blocked @ NodeOutcome::Blocked { .. } => Ok(blocked),
        }
    }

    /// Every child at once with the same input; a failing branch does not stop its siblings.
    async fn parallelization(&self, run: &ExecutionRun, children: &[Node], input: Value) -> Result<NodeOutcome> {
        let branches = self
            .fan_out(run, children.iter().map(|child| (child, input.clone())).collect())
            .await?;
        Ok(NodeOutcome::completed(json!({
            "parallel_results": branches.entries,
            "success_count": branches.success_count,
            "total_count": children.len(),
        })))
    }

    /// First child plans, the named workers run concurrently with their assigned input.
    async fn orchestrator_workers(
        &self,
        run: &ExecutionRun,
        node: &Node,
        children: &[Node],
        input: Value,
    ) -> Result<NodeOutcome> {
        let Some((coordinator, workers)) = children.split_first() else {
            return Err(OrchestrationError::Structural(format!(
                "Orchestrator-workers node '{}' has no children",
                node.name
            )));
        };

        let plan = match self.execute_node(run, coordinator, input.clone()).await? {
            NodeOutcome::Completed { output } => output,
            NodeOutcome::NoOp => Value::Null,
            blocked @ NodeOutcome::Blocked { .. } => return Ok(blocked),
        };
        let assignments = plan.get("task_assignments").and_then(Value::as_array).ok_or_else(|| {
            OrchestrationError::Structural(format!("Orchestrator '{}' returned no task_assignments", coordinator.name))
        })?;

        let mut planned = Vec::with_capacity(assignments.len());
        let mut unknown = Vec::new();
        for assignment in assignments {
            let name = assignment.get("worker").or_else(|| assignment.get("worker_name")).and_then(Value::as_str);
            let worker_input = assignment
                .get("input")
                .or_else(|| assignment.get("worker_input"))
                .cloned()
                .unwrap_or_else(|| input.clone());
            match name.and_then(|name| workers.iter().find(|worker| worker.name == name)) {
                Some(worker) => planned.push((worker, worker_input)),
                None => {
                    warn!(node = %node.name, worker = ?name, "Assignment names no worker");
                    unknown.push(json!({ "node": name, "status": "failed", "error": "Unknown worker" }));
                }
            }
        }

        for worker in workers.iter().filter(|worker| !planned.iter().any(|(w, _)| w.id == worker.id)) {
            self.skip_node(run, worker, "No task assigned")?;
        }

        let assigned = planned.len();
        let mut branches = self.fan_out(run, planned).await?;
        branches.entries.extend(unknown);
        debug!(node = %node.name, assigned, succeeded = branches.success_count, "Workers finished");

        Ok(NodeOutcome::completed(json!({
            "orchestration": plan,
            "worker_results": branches.entries,
            "success_count": branches.success_count,
            "total_count": assignments.len(),
        })))
    }

    /// Generate, evaluate, keep the best; stop once the score reaches the threshold.
    async fn evaluator_optimizer(
        &self,
        run: &ExecutionRun,
        node: &Node,
        children: &[Node],
        config: &ControlFlowConfig,
        input: Value,
    ) -> Result<NodeOutcome> {
        let [generator, evaluator, rest @ ..] = children else {
            return Err(OrchestrationError::Structural(format!(
                "Evaluator-optimizer node '{}' needs a generator and an evaluator child",
                node.name
            )));
        };
        if !rest.is_empty() {
            warn!(node = %node.name, extra = rest.len(), "Ignoring children after the evaluator");
        }

        let mut best: Option<(Value, f64)> = None;
        let mut iterations = Vec::new();
        for iteration in 1..=config.max_iterations {
            let generation = match self.execute_node(run, generator, input.clone()).await? {
                NodeOutcome::Completed { output } => output,
                NodeOutcome::NoOp => Value::Null,
                blocked @ NodeOutcome::Blocked { .. } => return Ok(blocked),
            };
            let evaluation = match self.execute_node(run, evaluator, generation.clone()).await? {
                NodeOutcome::Completed { output } => output,
                NodeOutcome::NoOp => Value::Null,
                blocked @ NodeOutcome::Blocked { .. } => return Ok(blocked),
            };
            let score = evaluation.get("score").and_then(Value::as_f64).unwrap_or(0.0);
            debug!(node = %node.name, iteration, score, "Evaluated generation");

            iterations.push(json!({
                "iteration": iteration,
                "generation": generation,
                "evaluation": evaluation,
                "score": score,
            }));
            if best.as_ref().is_none_or(|(_, best_score)| score > *best_score) {
                best = Some((generation, score));
            }
            if score >= config.quality_threshold {
                info!(node = %node.name, iteration, score, "Quality threshold reached");
                break;
            }
        }

        let (best_result, best_score) = best.unwrap_or((Value::Null, 0.0));
        Ok(NodeOutcome::completed(json!({
            "best_result": best_result,
            "best_score": best_score,
            "total_iterations": iterations.len(),
            "iterations": iterations,
        })))
    }

    /// Unknown pattern: children in order, each with the same input.
    async fn sequential_fallback(
        &self,
        run: &ExecutionRun,
        node: &Node,
        pattern: &str,
        children: &[Node],
        input: Value,
    ) -> Result<NodeOutcome> {
        warn!(node = %node.name, pattern = %pattern, "Unknown workflow pattern, running children in order");
        self.store.append_audit(
            Some(&run.execution_id),
            Some(&node.id),
            AuditEventType::PatternFallback,
            &json!({ "node_name": node.name, "pattern": pattern }),
        )?;

        match self.run_children(run, children, &input).await? {
            ChildRun::Finished(outputs) => Ok(NodeOutcome::completed(json!({ "child_results": outputs }))),
            ChildRun::Stopped(outcome) => Ok(outcome),
        }
    }

    /// Runs branches concurrently and waits for all of them.
    ///
    /// Branch failures are reported in the entries; a gate rejection inside any branch is
    /// returned after every branch has finished.
    async fn fan_out(&self, run: &ExecutionRun, branches: Vec<(&Node, Value)>) -> Result<Branches> {
        let nodes: Vec<&Node> = branches.iter().map(|(node, _)| *node).collect();
        let results = join_all(branches.into_iter().map(|(node, input)| self.execute_node(run, node, input))).await;

        let mut summary = Branches { entries: Vec::with_capacity(nodes.len()), success_count: 0 };
        let mut terminating = None;
        for (node, result) in nodes.into_iter().zip(results) {
            match result {
                Ok(NodeOutcome::Completed { output }) => {
                    summary.success_count += 1;
                    summary.entries.push(json!({ "node": node.name, "status": "completed", "output": output }));
                }
                Ok(other) => {
                    summary.entries.push(json!({ "node": node.name, "status": other.status_str(), "outcome": other.to_value() }));
                }
                Err(err) => {
                    warn!(execution_id = %run.execution_id, node = %node.name, error = %err, "Branch failed");
                    summary.entries.push(json!({ "node": node.name, "status": "failed", "error": err.to_string() }));
                    if err.is_terminating() && terminating.is_none() {
                        terminating = Some(err);
                    }
                }
            }
        }

        match terminating {
            Some(err) => Err(err),
            None => Ok(summary),
        }
    }

    fn skip_node(&self, run: &ExecutionRun, node: &Node, reason: &str) -> Result<()> {
        self.store.create_node_execution(&run.execution_id, &node.id, &Value::Null, NodeExecutionStatus::Skipped)?;
        self.store.append_audit(
            Some(&run.execution_id),
            Some(&node.id),
            AuditEventType::NodeSkipped,
            &json!({ "node_name": node.name, "reason": reason }),
        )?;
        debug!(node = %node.name, reason, "Node skipped");
        Ok(())
    }
}
