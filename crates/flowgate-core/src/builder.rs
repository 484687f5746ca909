//! Flow definition surface.
//!
//! Flows are built once by appending nodes and rules; the builder rejects trees and rules
//! the orchestrator could not run.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::models::{AgentNodeConfig, Flow, NewNode, NewRule, Node, NodeKind, Rule};
use crate::rules::{ExpressionError, validate_syntax};
use crate::storage::{FlowStore, StorageError};

/// Errors raised while defining a flow.
#[derive(Error, Debug)]
pub enum BuildError {
    /// The flow does not exist.
    #[error("Unknown flow: {0}")]
    UnknownFlow(String),

    /// A second parentless node.
    #[error("Flow {flow_id} already has a root node")]
    DuplicateRoot {
        /// Flow being built.
        flow_id: String,
    },

    /// Root nodes are the only parentless nodes.
    #[error("Node '{node}' is misplaced: {reason}")]
    MisplacedNode {
        /// Node name.
        node: String,
        /// What is wrong.
        reason: String,
    },

    /// The parent is missing or belongs to another flow.
    #[error("Parent node {parent_id} not found in flow {flow_id}")]
    MissingParent {
        /// Requested parent.
        parent_id: String,
        /// Flow being built.
        flow_id: String,
    },

    /// A rule condition that does not parse.
    #[error("Rule '{rule}' has an invalid condition: {source}")]
    InvalidCondition {
        /// Rule name.
        rule: String,
        /// Parser error.
        source: ExpressionError,
    },

    /// A gate-scoped rule pointing at a node that cannot hold rules.
    #[error("Rule '{rule}' targets node {node_id}, which is not a gate or control-flow node of this flow")]
    InvalidRuleTarget {
        /// Rule name.
        rule: String,
        /// Target node.
        node_id: String,
    },

    /// Storage failure.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result type for flow building.
pub type BuildResult<T> = std::result::Result<T, BuildError>;

/// A working memory key an agent reads that no agent in the flow writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemoryContractWarning {
    /// Reading node.
    pub node_id: String,
    /// Reading node name.
    pub node_name: String,
    /// Unproduced key.
    pub key: String,
}

/// A node with its rules and children.
#[derive(Debug, Clone, Serialize)]
pub struct TreeNode {
    /// The node.
    pub node: Node,
    /// Enabled rules scoped to the node.
    pub rules: Vec<Rule>,
    /// Children in execution order.
    pub children: Vec<TreeNode>,
}

/// A flow and its node tree.
#[derive(Debug, Clone, Serialize)]
pub struct FlowTree {
    /// The flow.
    pub flow: Flow,
    /// Root node, absent for an empty flow.
    pub root: Option<TreeNode>,
    /// Enabled rules not scoped to any node.
    pub flow_rules: Vec<Rule>,
}

/// Builds flows on top of a [`FlowStore`].
#[derive(Clone)]
pub struct FlowBuilder {
    store: Arc<dyn FlowStore>,
}

impl FlowBuilder {
    /// Creates a builder writing to `store`.
    pub fn new(store: Arc<dyn FlowStore>) -> Self {
        Self { store }
    }

    /// Creates an empty flow.
    pub fn create_flow(&self, name: &str, description: &str, metadata: &Value) -> BuildResult<Flow> {
        let flow = self.store.create_flow(name, description, metadata)?;
        info!(flow_id = %flow.id, name = %name, "Defined flow");
        Ok(flow)
    }

    /// Appends a node.
    ///
    /// # Errors
    /// * `BuildError::UnknownFlow` - If the flow does not exist
    /// * `BuildError::DuplicateRoot` - If a parentless node is added to a flow that has a root
    /// * `BuildError::MisplacedNode` - If a root has a parent or a non-root has none
    /// * `BuildError::MissingParent` - If the parent is not a node of the same flow
    pub fn add_node(&self, node: NewNode) -> BuildResult<Node> {
        self.require_flow(&node.flow_id)?;

        match (&node.parent_id, node.kind) {
            (None, NodeKind::Root) => {
                if !self.store.get_root_nodes(&node.flow_id)?.is_empty() {
                    return Err(BuildError::DuplicateRoot { flow_id: node.flow_id });
                }
            }
            (None, kind) => {
                return Err(BuildError::MisplacedNode {
                    node: node.name,
                    reason: format!("{} nodes need a parent", kind),
                });
            }
            (Some(_), NodeKind::Root) => {
                return Err(BuildError::MisplacedNode {
                    node: node.name,
                    reason: "root nodes cannot have a parent".to_string(),
                });
            }
            (Some(parent_id), _) => {
                let parent = match self.store.get_node(parent_id) {
                    Ok(parent) => Some(parent),
                    Err(StorageError::NotFound(_)) => None,
                    Err(e) => return Err(e.into()),
                };
                if parent.is_none_or(|parent| parent.flow_id != node.flow_id) {
                    return Err(BuildError::MissingParent {
                        parent_id: parent_id.clone(),
                        flow_id: node.flow_id,
                    });
                }
            }
        }

        Ok(self.store.create_node(&node)?)
    }

    /// Attaches a rule.
    ///
    /// # Errors
    /// * `BuildError::InvalidCondition` - If the condition does not parse
    /// * `BuildError::InvalidRuleTarget` - If the scoped node is not a gate or control-flow
    ///   node of the same flow
    pub fn add_rule(&self, rule: NewRule) -> BuildResult<Rule> {
        self.require_flow(&rule.flow_id)?;

        validate_syntax(&rule.condition)
            .map_err(|source| BuildError::InvalidCondition { rule: rule.name.clone(), source })?;

        if let Some(node_id) = &rule.gate_node_id {
            let target = match self.store.get_node(node_id) {
                Ok(target) => Some(target),
                Err(StorageError::NotFound(_)) => None,
                Err(e) => return Err(e.into()),
            };
            let valid = target.is_some_and(|target| {
                target.flow_id == rule.flow_id && matches!(target.kind, NodeKind::Gate | NodeKind::ControlFlow)
            });
            if !valid {
                return Err(BuildError::InvalidRuleTarget { rule: rule.name, node_id: node_id.clone() });
            }
        }

        Ok(self.store.create_rule(&rule)?)
    }

    /// Lists agent inputs that no agent in the flow declares as an output.
    ///
    /// The initial context may still supply them, so these are warnings only.
    pub fn check_memory_contract(&self, flow_id: &str) -> BuildResult<Vec<MemoryContractWarning>> {
        self.require_flow(flow_id)?;
        let agents: Vec<(Node, AgentNodeConfig)> = self
            .store
            .get_flow_nodes(flow_id)?
            .into_iter()
            .filter(|node| node.kind == NodeKind::Agent)
            .filter_map(|node| AgentNodeConfig::from_node(&node).ok().map(|config| (node, config)))
            .collect();

        let produced: HashSet<String> = agents
            .iter()
            .flat_map(|(node, config)| {
                config
                    .working_memory_output
                    .iter()
                    .cloned()
                    .chain(std::iter::once(format!("node_{}_result", node.id)))
            })
            .collect();

        let warnings: Vec<MemoryContractWarning> = agents
            .iter()
            .flat_map(|(node, config)| {
                config
                    .working_memory_input
                    .iter()
                    .filter(|key| !produced.contains(*key))
                    .map(|key| MemoryContractWarning {
                        node_id: node.id.clone(),
                        node_name: node.name.clone(),
                        key: key.clone(),
                    })
            })
            .collect();

        for warning in &warnings {
            warn!(flow_id = %flow_id, node = %warning.node_name, key = %warning.key, "Working memory input has no producer");
        }
        Ok(warnings)
    }

    /// Loads a flow with its whole node tree.
    pub fn get_flow_tree(&self, flow_id: &str) -> BuildResult<FlowTree> {
        load_flow_tree(self.store.as_ref(), flow_id)
    }

    fn require_flow(&self, flow_id: &str) -> BuildResult<Flow> {
        match self.store.get_flow(flow_id) {
            Ok(flow) => Ok(flow),
            Err(StorageError::NotFound(_)) => Err(BuildError::UnknownFlow(flow_id.to_string())),
            Err(e) => Err(e.into()),
        }
    }
}

/// Loads a flow with its whole node tree from `store`.
pub fn load_flow_tree(store: &dyn FlowStore, flow_id: &str) -> BuildResult<FlowTree> {
    let flow = match store.get_flow(flow_id) {
        Ok(flow) => flow,
        Err(StorageError::NotFound(_)) => return Err(BuildError::UnknownFlow(flow_id.to_string())),
        Err(e) => return Err(e.into()),
    };
    let root = store.get_root_nodes(flow_id)?.into_iter().next().map(|root| load_subtree(store, root)).transpose()?;
    let flow_rules = store
        .get_rules_for_flow(flow_id, None)?
        .into_iter()
        .filter(|rule| rule.gate_node_id.is_none())
        .collect();
    Ok(FlowTree { flow, root, flow_rules })
}

fn load_subtree(store: &dyn FlowStore, node: Node) -> BuildResult<TreeNode> {
    let rules = store.get_rules_for_node(&node.id)?;
    let children = store
        .get_children(&node.id)?
        .into_iter()
        .map(|child| load_subtree(store, child))
        .collect::<BuildResult<Vec<_>>>()?;
    Ok(TreeNode { node, rules, children })
}
