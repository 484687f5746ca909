//! Agent nodes: one invocation of the external invoker per visit.

use flowgate_abstraction::InvocationError;
use flowgate_core::{AgentNodeConfig, AuditEventType, Node, goal_signature};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{OrchestrationError, Result};
use crate::orchestrator::{ChildRun, ExecutionRun, FlowOrchestrator};
use crate::outcome::NodeOutcome;

/// Working memory key every agent writes its full output to.
pub(crate) fn result_key(node: &Node) -> String {
    format!("node_{}_result", node.id)
}

impl FlowOrchestrator {
    pub(crate) async fn execute_agent(&self, run: &ExecutionRun, node: &Node, input: Value) -> Result<NodeOutcome> {
        let config = AgentNodeConfig::from_node(node).map_err(|e| Self::invalid_config(node, &e))?;
        let goal = config.goal_for(node);
        let signature = config.episodic_goal_signature.clone().unwrap_or_else(|| goal_signature(&goal));

        let examples: Vec<Value> = self
            .memory
            .recall(&run.flow_id, &signature, self.config.episodic_example_limit)?
            .into_iter()
            .map(|entry| entry.example)
            .collect();
        let example_count = examples.len();
        let working_memory = self.memory.snapshot_keys(&run.execution_id, &config.working_memory_input)?;
        let context = json!({
            "goal": goal,
            "input": input,
            "working_memory": working_memory,
            "episodic_examples": examples,
        });

        let timeout_secs = config.timeout_secs(self.config.default_agent_timeout_secs);
        debug!(
            execution_id = %run.execution_id,
            node = %node.name,
            goal_signature = %signature,
            examples = example_count,
            timeout_secs,
            "Invoking agent"
        );
        let invocation = tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            self.invoker.invoke(&goal, &context, &input),
        )
        .await
        .unwrap_or(Err(InvocationError::Timeout { seconds: timeout_secs }));

        self.store.append_audit(
            Some(&run.execution_id),
            Some(&node.id),
            AuditEventType::AgentInvoked,
            &json!({
                "node_name": node.name,
                "goal": goal,
                "goal_signature": signature,
                "episodic_examples": example_count,
                "timeout_secs": timeout_secs,
                "success": invocation.is_ok(),
                "error": invocation.as_ref().err().map(ToString::to_string),
            }),
        )?;

        if config.store_episodic {
            let (example, success) = match &invocation {
                Ok(output) => (json!({ "input": input, "output": output }), true),
                Err(e) => (json!({ "input": input, "error": e.to_string() }), false),
            };
            self.memory.remember(
                &run.flow_id,
                Some(&node.id),
                &signature,
                &example,
                success,
                &json!({ "execution_id": run.execution_id, "node_name": node.name }),
            )?;
        }

        let output = invocation.map_err(|source| OrchestrationError::Invocation { node: node.name.clone(), source })?;
        self.write_agent_outputs(run, node, &config, &output)?;
        info!(execution_id = %run.execution_id, node = %node.name, "Agent completed");

        let children = self.store.get_children(&node.id)?;
        if let ChildRun::Stopped(outcome) = self.run_children(run, &children, &output).await? {
            return Ok(outcome);
        }
        Ok(NodeOutcome::completed(output))
    }

    fn write_agent_outputs(&self, run: &ExecutionRun, node: &Node, config: &AgentNodeConfig, output: &Value) -> Result<()> {
        self.memory.put(&run.execution_id, Some(&node.id), &result_key(node), output)?;

        for key in &config.working_memory_output {
            match output.get(key.as_str()) {
                Some(value) => self.memory.put(&run.execution_id, Some(&node.id), key, value)?,
                None => warn!(node = %node.name, key = %key, "Declared output key missing from agent output"),
            }
        }
        Ok(())
    }
}
