//! Gate nodes: evaluate, then proceed, recycle, block or terminate.

use flowgate_core::{
    AuditEventType, DecisionClass, GateDecision, GateNodeConfig, Node, StorageError,
};
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::error::{OrchestrationError, Result};
use crate::orchestrator::{ChildRun, ExecutionRun, FlowOrchestrator};
use crate::outcome::NodeOutcome;

impl FlowOrchestrator {
    /// Evaluates the gate until it stops asking for recycles.
    ///
    /// Each RECYCLE re-runs the target node, then re-evaluates against fresh working
    /// memory. A target above the gate revisits the gate itself, so its re-run is the
    /// answer and the loop ends. The loop is bounded by the per-gate recycle counter.
    pub(crate) async fn execute_gate(&self, run: &ExecutionRun, node: &Node, input: Value) -> Result<NodeOutcome> {
        let config = GateNodeConfig::from_node(node).map_err(|e| Self::invalid_config(node, &e))?;

        loop {
            let context = self.rule_context(run, &input)?;
            let decision = self.engine.evaluate_gate(&*self.store, node, &context, &run.execution_id)?;

            match decision.decision.class() {
                DecisionClass::Proceed => return self.proceed(run, node, &decision, input).await,
                DecisionClass::Recycle => {
                    if let Some(outcome) = self.recycle(run, node, &config, &decision).await? {
                        return Ok(outcome);
                    }
                }
                DecisionClass::Block => return Ok(blocked(node, &decision, false)),
                DecisionClass::PendingReview => return Ok(blocked(node, &decision, true)),
                DecisionClass::Terminate => {
                    return Err(OrchestrationError::GateRejected {
                        gate: node.name.clone(),
                        decision: decision.decision,
                        reason: decision.reason,
                    });
                }
            }
        }
    }

    async fn proceed(&self, run: &ExecutionRun, gate: &Node, decision: &GateDecision, input: Value) -> Result<NodeOutcome> {
        let mut child_input = input;
        let rules = self.store.get_rules_for_node(&gate.id)?;
        let fired = self.engine.apply_transformations(&rules, &mut child_input)?;
        if !fired.is_empty() {
            debug!(gate = %gate.name, rules = ?fired, "Applied transformation rules");
        }

        let children = self.store.get_children(&gate.id)?;
        let child_results = match self.run_children(run, &children, &child_input).await? {
            ChildRun::Finished(outputs) => outputs,
            ChildRun::Stopped(outcome) => return Ok(outcome),
        };

        let evaluations: Vec<Value> = decision
            .rule_results
            .iter()
            .map(|result| json!({ "rule_id": result.rule_id, "status": result.status, "reason": result.reason }))
            .collect();
        Ok(NodeOutcome::completed(json!({
            "gate_passed": true,
            "decision": decision.decision,
            "score": decision.overall_score,
            "evaluations": evaluations,
            "child_results": child_results,
        })))
    }

    /// Re-runs the recycle target once.
    ///
    /// Returns an outcome when the target blocked or when the target encloses the gate; in
    /// the latter case the enclosing visit is superseded by the re-run.
    async fn recycle(
        &self,
        run: &ExecutionRun,
        gate: &Node,
        config: &GateNodeConfig,
        decision: &GateDecision,
    ) -> Result<Option<NodeOutcome>> {
        let target_ref = config.recycle_target.as_deref().ok_or_else(|| {
            OrchestrationError::Structural(format!("Gate '{}' decided RECYCLE without a recycle_target", gate.name))
        })?;
        let limit = config.max_recycles.unwrap_or(self.config.max_recycles);
        let attempt = run.bump_recycle(&gate.id);
        if attempt > limit {
            return Err(OrchestrationError::RecycleLimitExceeded {
                gate: gate.name.clone(),
                target: target_ref.to_string(),
                limit,
            });
        }

        let target = self.find_recycle_target(run, target_ref)?;
        let target_input = self.last_input(run, &target)?;
        self.store.append_audit(
            Some(&run.execution_id),
            Some(&gate.id),
            AuditEventType::Recycle,
            &json!({
                "gate_name": gate.name,
                "target_id": target.id,
                "target_name": target.name,
                "attempt": attempt,
                "max_recycles": limit,
                "score": decision.overall_score,
                "reason": decision.reason,
            }),
        )?;
        info!(
            execution_id = %run.execution_id,
            gate = %gate.name,
            target = %target.name,
            attempt,
            limit,
            "Recycling"
        );

        let encloses_gate = self.is_ancestor(&target, gate)?;
        let outcome = self.execute_node(run, &target, target_input).await?;
        if encloses_gate {
            debug!(gate = %gate.name, target = %target.name, "Recycle target encloses gate");
            run.supersede(&target.id, outcome.clone());
            return Ok(Some(outcome));
        }
        Ok(outcome.is_blocked().then_some(outcome))
    }

    /// Whether `candidate` lies on the parent chain of `node`.
    fn is_ancestor(&self, candidate: &Node, node: &Node) -> Result<bool> {
        let mut parent_id = node.parent_id.clone();
        while let Some(id) = parent_id {
            if id == candidate.id {
                return Ok(true);
            }
            parent_id = self.store.get_node(&id)?.parent_id;
        }
        Ok(false)
    }

    /// Looks the target up by name first, then by id, within the run's flow.
    fn find_recycle_target(&self, run: &ExecutionRun, target_ref: &str) -> Result<Node> {
        if let Some(node) = self.store.find_node_by_name(&run.flow_id, target_ref)? {
            return Ok(node);
        }
        match self.store.get_node(target_ref) {
            Ok(node) if node.flow_id == run.flow_id => Ok(node),
            Ok(_) | Err(StorageError::NotFound(_)) => Err(OrchestrationError::NodeNotFound(target_ref.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Input of the node's latest visit in this run; null when it never ran.
    fn last_input(&self, run: &ExecutionRun, node: &Node) -> Result<Value> {
        Ok(self
            .store
            .list_node_executions(&run.execution_id)?
            .into_iter()
            .rev()
            .find(|visit| visit.node_id == node.id)
            .map(|visit| visit.input)
            .unwrap_or(Value::Null))
    }
}

fn blocked(gate: &Node, decision: &GateDecision, pending_review: bool) -> NodeOutcome {
    info!(gate = %gate.name, decision = %decision.decision, pending_review, "Gate blocked branch");
    NodeOutcome::Blocked {
        node_id: gate.id.clone(),
        node_name: gate.name.clone(),
        decision: decision.decision,
        reason: decision.reason.clone(),
        pending_review,
    }
}
