use std::sync::Arc;

use crate::logging::{CanvasLogger, LogLevel};
use crate::orchestration_api::{AgentInfo, OrchestrationApi};

/// Whether an agent orchestrates a workflow or participates in one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AgentKind {
    Principal,
    Worker,
}

/// One agent available for placement on the canvas. Immutable once loaded.
#[derive(Clone, Debug)]
pub struct AgentDescriptor {
    pub id: String,
    pub display_name: String,
    pub description: String,
    pub kind: AgentKind,
}

/// The palette of placeable agents: a fixed pair of principals plus workers
/// fetched from the orchestrator.
pub struct AgentCatalog {
    agents: Vec<AgentDescriptor>,
    logger: Arc<dyn CanvasLogger>,
}

impl AgentCatalog {
    pub fn new(logger: Arc<dyn CanvasLogger>) -> Self {
        let agents = vec![
            AgentDescriptor {
                id: "PA_single_chat".to_string(),
                display_name: "Principal Agent - Single Chat".to_string(),
                description: "A principal agent that manages single chat interactions"
                    .to_string(),
                kind: AgentKind::Principal,
            },
            AgentDescriptor {
                id: "PA_intent_router".to_string(),
                display_name: "Principal Agent - Intent Router".to_string(),
                description:
                    "A principal agent that routes intents to appropriate worker agents"
                        .to_string(),
                kind: AgentKind::Principal,
            },
        ];
        Self { agents, logger }
    }

    /// Fetch the worker agent list from the orchestrator. A failed fetch
    /// leaves the worker list empty; the failure is logged, not returned.
    pub async fn load_workers(&mut self, api: &dyn OrchestrationApi) {
        match api.list_agents().await {
            Ok(infos) => {
                self.agents
                    .retain(|agent| agent.kind == AgentKind::Principal);
                self.agents
                    .extend(infos.into_iter().map(worker_descriptor));
                self.logger
                    .log(LogLevel::Success, "Worker agents loaded successfully");
            }
            Err(e) => {
                self.logger
                    .log(LogLevel::Error, &format!("Failed to load worker agents: {e}"));
            }
        }
    }

    pub fn get(&self, agent_id: &str) -> Option<&AgentDescriptor> {
        self.agents.iter().find(|agent| agent.id == agent_id)
    }

    pub fn kind_of(&self, agent_id: &str) -> Option<AgentKind> {
        self.get(agent_id).map(|agent| agent.kind)
    }

    pub fn principals(&self) -> impl Iterator<Item = &AgentDescriptor> {
        self.agents
            .iter()
            .filter(|agent| agent.kind == AgentKind::Principal)
    }

    pub fn workers(&self) -> impl Iterator<Item = &AgentDescriptor> {
        self.agents
            .iter()
            .filter(|agent| agent.kind == AgentKind::Worker)
    }

    #[cfg(test)]
    pub(crate) fn insert_workers_for_tests(&mut self, infos: Vec<AgentInfo>) {
        self.agents.extend(infos.into_iter().map(worker_descriptor));
    }
}

fn worker_descriptor(info: AgentInfo) -> AgentDescriptor {
    AgentDescriptor {
        display_name: prettify_name(&info.name),
        id: info.name,
        description: info.description,
        kind: AgentKind::Worker,
    }
}

/// `azure_agent_1` -> `Azure agent 1`.
fn prettify_name(name: &str) -> String {
    let spaced = name.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => spaced,
    }
}
