use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::catalog::AgentCatalog;
use crate::conversation::{ConversationSession, SessionError, TurnOutcome};
use crate::graph_workflow::{
    Position, TopologyEvent, WorkflowGraph, WorkflowGraphError,
};
use crate::logging::{CanvasLogger, LogLevel};
use crate::orchestration_api::{HttpOrchestrationApi, OrchestrationApi};
use crate::run_controller::{RunControlError, RunController};
use crate::workflow_config::CanvasConfig;

#[derive(Debug, Error)]
pub enum CanvasError {
    #[error(transparent)]
    Graph(#[from] WorkflowGraphError),
    #[error(transparent)]
    Run(#[from] RunControlError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// One canvas instance: the agent palette, the workflow graph being
/// composed, the run animation and the chat session. All mutation happens
/// through `&mut self` on discrete host callbacks; there is no concurrent
/// writer.
pub struct AgentCanvas {
    api: Arc<dyn OrchestrationApi>,
    catalog: AgentCatalog,
    graph: WorkflowGraph,
    controller: RunController,
    session: ConversationSession,
    topology_events: mpsc::UnboundedReceiver<TopologyEvent>,
    config: CanvasConfig,
    logger: Arc<dyn CanvasLogger>,
    chat_open: bool,
}

impl AgentCanvas {
    pub fn new(config: CanvasConfig, logger: Arc<dyn CanvasLogger>) -> Self {
        let api = Arc::new(HttpOrchestrationApi::new(config.api_base_url.clone()));
        Self::with_api(config, api, logger)
    }

    /// Construction with an explicit API client, for hosts (and tests) that
    /// do not talk to the default HTTP backend.
    pub fn with_api(
        config: CanvasConfig,
        api: Arc<dyn OrchestrationApi>,
        logger: Arc<dyn CanvasLogger>,
    ) -> Self {
        let catalog = AgentCatalog::new(logger.clone());
        let mut graph = WorkflowGraph::new(logger.clone());
        let topology_events = graph.subscribe();
        let controller = RunController::new(&config.animation, logger.clone());
        let session = ConversationSession::new(api.clone(), logger.clone());
        Self {
            api,
            catalog,
            graph,
            controller,
            session,
            topology_events,
            config,
            logger,
            chat_open: false,
        }
    }

    /// Populate the worker side of the palette from the orchestrator.
    pub async fn load_catalog(&mut self) {
        let api = Arc::clone(&self.api);
        self.catalog.load_workers(api.as_ref()).await;
    }

    /// Drop an agent from the palette onto the canvas. When the auto-connect
    /// toggle is on, a worker node is wired to the principal immediately.
    pub fn place_agent(
        &mut self,
        agent_id: &str,
        position: Position,
    ) -> Result<String, WorkflowGraphError> {
        let node_id = self
            .graph
            .place_node(&self.catalog, agent_id, position)?
            .node_id
            .clone();
        if self.config.auto_connect {
            self.graph.auto_connect(&node_id)?;
        }
        Ok(node_id)
    }

    pub fn connect_nodes(
        &mut self,
        source_node_id: &str,
        target_node_id: &str,
    ) -> Result<(), WorkflowGraphError> {
        self.graph.connect(source_node_id, target_node_id).map(|_| ())
    }

    /// Start a run: kick off the marker animation and open the chat session
    /// against the current connected-agent projection.
    pub fn run(&mut self) -> Result<(), CanvasError> {
        let projection = self.graph.connected_agents();
        self.controller.start(projection.as_ref())?;
        if let Some(projection) = projection {
            let workers: Vec<String> =
                projection.worker_agent_ids.iter().cloned().collect();
            self.session.open(&projection.principal_agent_id, &workers)?;
            self.chat_open = true;
        }
        Ok(())
    }

    pub fn stop(&mut self) {
        self.controller.stop();
    }

    /// Full-canvas reset: graph, animation, session and chat panel.
    pub fn reset(&mut self) {
        self.controller.stop();
        self.graph.reset();
        self.drain_topology_events();
        self.chat_open = false;
    }

    /// Delete a single node; the session resets itself when the deletion
    /// invalidates the agents it was opened for.
    pub fn delete_node(&mut self, node_id: &str) -> Result<(), WorkflowGraphError> {
        self.graph.remove_node(node_id)?;
        self.drain_topology_events();
        Ok(())
    }

    pub fn close_chat(&mut self) {
        self.chat_open = false;
        self.session.reset();
    }

    pub async fn send_message(
        &mut self,
        text: impl Into<String>,
    ) -> Result<TurnOutcome, SessionError> {
        self.session.send_turn(text, false, true).await
    }

    /// Forward an adaptive card submit action as a conversation turn. The
    /// visible bubble shows only the payload's submit identifier.
    pub async fn submit_card_action(
        &mut self,
        data: serde_json::Value,
    ) -> Result<TurnOutcome, SessionError> {
        let payload = serde_json::to_string(&data)?;
        self.session.send_turn(payload, true, true).await
    }

    pub fn catalog(&self) -> &AgentCatalog {
        &self.catalog
    }

    pub fn graph(&self) -> &WorkflowGraph {
        &self.graph
    }

    pub fn controller(&self) -> &RunController {
        &self.controller
    }

    pub fn session(&self) -> &ConversationSession {
        &self.session
    }

    pub fn chat_open(&self) -> bool {
        self.chat_open
    }

    fn drain_topology_events(&mut self) {
        while let Ok(event) = self.topology_events.try_recv() {
            if self.session.handle_topology_event(&event) {
                // The run targeted agents that no longer exist; cancel the
                // sweep along with the chat.
                self.controller.stop();
                self.chat_open = false;
                if matches!(event, TopologyEvent::NodeRemoved { .. }) {
                    self.logger
                        .log(LogLevel::Info, "Chat cleared due to node deletion");
                }
            }
        }
    }
}
