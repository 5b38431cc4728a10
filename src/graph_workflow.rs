use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Local;
use petgraph::{
    Direction,
    graph::NodeIndex,
    prelude::StableGraph,
    visit::EdgeRef,
};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::catalog::{AgentCatalog, AgentKind};
use crate::logging::{CanvasLogger, LogLevel};

#[derive(Clone, Debug, Error, PartialEq)]
pub enum WorkflowGraphError {
    #[error("Agent '{0}' is not in the catalog")]
    UnknownAgent(String),
    #[error("Agent '{0}' is already placed in the workflow")]
    DuplicateAgent(String),
    #[error("No principal agent present in the workflow")]
    NoPrincipal,
    #[error("Node '{0}' not found")]
    NodeNotFound(String),
    #[error("Connections must go from a principal to a worker")]
    IllegalConnection,
}

/// Canvas coordinates of a placed node. Display-only.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

/// One placed agent instance.
#[derive(Clone, Debug)]
pub struct CanvasNode {
    pub node_id: String,
    pub agent_id: String,
    pub display_name: String,
    pub kind: AgentKind,
    pub position: Position,
}

/// Edge weight: the `(principal, worker)` agent pair a connection records.
#[derive(Clone, Debug, PartialEq)]
pub struct Link {
    pub source_agent_id: String,
    pub target_agent_id: String,
}

/// The derived view a run starts from.
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectedAgents {
    pub principal_agent_id: String,
    pub worker_agent_ids: BTreeSet<String>,
}

/// Emitted whenever a mutation invalidates previously derived state, so the
/// conversation session can reset itself.
#[derive(Clone, Debug)]
pub enum TopologyEvent {
    NodeRemoved {
        node_id: String,
        agent_id: String,
        kind: AgentKind,
    },
    Reset,
}

/// The workflow being composed on the canvas: placed agent nodes and the
/// directed principal-to-worker connections between them.
pub struct WorkflowGraph {
    workflow: StableGraph<CanvasNode, Link>,
    // Placement order; petgraph reuses slots after removals.
    order: Vec<NodeIndex>,
    node_to_idx: HashMap<String, NodeIndex>,
    agent_to_node: HashMap<String, String>,
    subscribers: Vec<mpsc::UnboundedSender<TopologyEvent>>,
    logger: Arc<dyn CanvasLogger>,
}

impl WorkflowGraph {
    pub fn new(logger: Arc<dyn CanvasLogger>) -> Self {
        Self {
            workflow: StableGraph::new(),
            order: Vec::new(),
            node_to_idx: HashMap::new(),
            agent_to_node: HashMap::new(),
            subscribers: Vec::new(),
            logger,
        }
    }

    /// Subscribe to topology-change notifications.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<TopologyEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    /// Place an agent from the catalog onto the canvas.
    ///
    /// Rejected when the agent is unknown, already placed, or is a worker
    /// while no principal node exists yet.
    pub fn place_node(
        &mut self,
        catalog: &AgentCatalog,
        agent_id: &str,
        position: Position,
    ) -> Result<&CanvasNode, WorkflowGraphError> {
        let descriptor = catalog
            .get(agent_id)
            .ok_or_else(|| WorkflowGraphError::UnknownAgent(agent_id.to_string()))?;

        if self.agent_to_node.contains_key(agent_id) {
            self.logger.log(
                LogLevel::Error,
                &format!(
                    "Cannot add {}: Agent is already connected in the workflow",
                    descriptor.display_name
                ),
            );
            return Err(WorkflowGraphError::DuplicateAgent(agent_id.to_string()));
        }

        if descriptor.kind == AgentKind::Worker && self.first_principal().is_none() {
            self.logger.log(
                LogLevel::Error,
                &format!(
                    "Cannot add {}: No Principal agent present in the workflow",
                    descriptor.display_name
                ),
            );
            return Err(WorkflowGraphError::NoPrincipal);
        }

        let node = CanvasNode {
            node_id: fresh_node_id(),
            agent_id: descriptor.id.clone(),
            display_name: descriptor.display_name.clone(),
            kind: descriptor.kind,
            position,
        };
        let node_id = node.node_id.clone();
        let display_name = node.display_name.clone();

        let idx = self.workflow.add_node(node);
        self.order.push(idx);
        self.node_to_idx.insert(node_id.clone(), idx);
        self.agent_to_node.insert(agent_id.to_string(), node_id);

        self.logger
            .log(LogLevel::Success, &format!("Created new node: {display_name}"));
        Ok(&self.workflow[idx])
    }

    /// Connect two placed nodes. Legal only from a principal to a worker.
    pub fn connect(
        &mut self,
        source_node_id: &str,
        target_node_id: &str,
    ) -> Result<Link, WorkflowGraphError> {
        let source_idx = self.index_of(source_node_id)?;
        let target_idx = self.index_of(target_node_id)?;

        let source = &self.workflow[source_idx];
        let target = &self.workflow[target_idx];
        if source.kind != AgentKind::Principal || target.kind != AgentKind::Worker {
            self.logger.log(
                LogLevel::Warning,
                &format!(
                    "Not a valid connection: {} -> {}",
                    source.display_name, target.display_name
                ),
            );
            return Err(WorkflowGraphError::IllegalConnection);
        }

        let link = Link {
            source_agent_id: source.agent_id.clone(),
            target_agent_id: target.agent_id.clone(),
        };
        let message = format!("Connected {} to {}", source.display_name, target.display_name);

        self.workflow.add_edge(source_idx, target_idx, link.clone());
        self.logger.log(LogLevel::Info, &message);
        Ok(link)
    }

    /// Wire a freshly placed worker node to the first principal node. No-op
    /// for principal nodes; logs a rejection when no principal exists.
    pub fn auto_connect(&mut self, node_id: &str) -> Result<Option<Link>, WorkflowGraphError> {
        let target_idx = self.index_of(node_id)?;
        if self.workflow[target_idx].kind == AgentKind::Principal {
            return Ok(None);
        }

        let Some(principal_idx) = self.first_principal() else {
            self.logger.log(
                LogLevel::Warning,
                "Auto-connect skipped: no principal agent in the workflow",
            );
            return Ok(None);
        };

        let source_node_id = self.workflow[principal_idx].node_id.clone();
        let target_node_id = self.workflow[target_idx].node_id.clone();
        self.connect(&source_node_id, &target_node_id).map(Some)
    }

    /// Delete a node and every edge incident to it.
    pub fn remove_node(&mut self, node_id: &str) -> Result<(), WorkflowGraphError> {
        let idx = self.index_of(node_id)?;
        // StableGraph drops incident edges with the node, so no dangling
        // edges can survive this.
        let removed = self
            .workflow
            .remove_node(idx)
            .ok_or_else(|| WorkflowGraphError::NodeNotFound(node_id.to_string()))?;

        self.order.retain(|&i| i != idx);
        self.node_to_idx.remove(&removed.node_id);
        self.agent_to_node.remove(&removed.agent_id);

        self.logger
            .log(LogLevel::Info, &format!("Removed node: {}", removed.display_name));
        self.notify(TopologyEvent::NodeRemoved {
            node_id: removed.node_id,
            agent_id: removed.agent_id,
            kind: removed.kind,
        });
        Ok(())
    }

    /// Clear nodes, edges and the derived projection in one step.
    pub fn reset(&mut self) {
        self.workflow.clear();
        self.order.clear();
        self.node_to_idx.clear();
        self.agent_to_node.clear();
        self.logger.log(LogLevel::Info, "Workflow reset");
        self.notify(TopologyEvent::Reset);
    }

    /// The first placed principal together with the set of workers reachable
    /// over its outgoing connections. `None` while no principal is placed.
    pub fn connected_agents(&self) -> Option<ConnectedAgents> {
        let principal_idx = self.first_principal()?;
        let worker_agent_ids = self
            .workflow
            .edges_directed(principal_idx, Direction::Outgoing)
            .map(|edge| edge.weight().target_agent_id.clone())
            .collect();
        Some(ConnectedAgents {
            principal_agent_id: self.workflow[principal_idx].agent_id.clone(),
            worker_agent_ids,
        })
    }

    /// Placed nodes in placement order.
    pub fn nodes(&self) -> impl Iterator<Item = &CanvasNode> {
        self.order.iter().map(|&idx| &self.workflow[idx])
    }

    pub fn node(&self, node_id: &str) -> Option<&CanvasNode> {
        self.node_to_idx.get(node_id).map(|&idx| &self.workflow[idx])
    }

    pub fn node_count(&self) -> usize {
        self.workflow.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.workflow.edge_count()
    }

    pub fn links(&self) -> impl Iterator<Item = &Link> {
        self.workflow.edge_weights()
    }

    fn index_of(&self, node_id: &str) -> Result<NodeIndex, WorkflowGraphError> {
        self.node_to_idx
            .get(node_id)
            .copied()
            .ok_or_else(|| WorkflowGraphError::NodeNotFound(node_id.to_string()))
    }

    fn first_principal(&self) -> Option<NodeIndex> {
        self.order
            .iter()
            .copied()
            .find(|&idx| self.workflow[idx].kind == AgentKind::Principal)
    }

    fn notify(&mut self, event: TopologyEvent) {
        self.subscribers
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// Unique within a session: wall-clock millis plus a random suffix.
fn fresh_node_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("node-{}-{}", Local::now().timestamp_millis(), &suffix[..8])
}
