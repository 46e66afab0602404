// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Agent Lifecycle State Machine
//!
//! Application service over the agent store and its append-only transition
//! log. Every status change is one log append; the agent's `status` field
//! is only ever a projection of the latest record.
//!
//! # DDD Pattern: Application Service
//!
//! - **Layer:** Application
//! - **Responsibility:** Agent registration and status transitions
//! - **Collaborators:**
//!   - Domain: Agent aggregate, StatusTransition log, AgentRepository
//!   - Infrastructure: EventBus

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::agent::{
    Agent, AgentId, AgentStatus, StatusTransition, TransitionOutcome, TransitionRequest,
};
use crate::domain::error::{CoordinationError, EntityKind};
use crate::domain::events::AgentStateEvent;
use crate::domain::repository::AgentRepository;
use crate::infrastructure::event_bus::EventBus;

#[async_trait]
pub trait AgentStateMachine: Send + Sync {
    /// Register an agent in SPAWNING and seed its transition log.
    async fn register_agent(
        &self,
        name: &str,
        capabilities: Vec<String>,
        registered_by: &str,
    ) -> Result<Agent, CoordinationError>;

    /// Append a status transition. Illegal pairs are rejected with
    /// `InvalidTransition` unless the request carries the forced override,
    /// which bypasses the legality table but still lands in the log.
    async fn record_transition(
        &self,
        request: TransitionRequest,
    ) -> Result<StatusTransition, CoordinationError>;

    async fn get_agent(&self, agent_id: AgentId) -> Result<Agent, CoordinationError>;

    /// Current status projection.
    async fn agent_status(&self, agent_id: AgentId) -> Result<AgentStatus, CoordinationError>;

    async fn list_agents(&self) -> Result<Vec<Agent>, CoordinationError>;

    async fn agents_in_status(
        &self,
        status: AgentStatus,
    ) -> Result<Vec<Agent>, CoordinationError>;

    /// Transition records, most recent first.
    async fn transition_history(
        &self,
        agent_id: AgentId,
        limit: Option<usize>,
    ) -> Result<Vec<StatusTransition>, CoordinationError>;

    /// Eligibility for new work: only IDLE agents are assignable.
    async fn is_assignable(&self, agent_id: AgentId) -> Result<bool, CoordinationError>;
}

/// Standard implementation of AgentStateMachine.
pub struct StandardAgentStateMachine {
    agents: Arc<dyn AgentRepository>,
    event_bus: Arc<EventBus>,
}

impl StandardAgentStateMachine {
    pub fn new(agents: Arc<dyn AgentRepository>, event_bus: Arc<EventBus>) -> Self {
        Self { agents, event_bus }
    }
}

#[async_trait]
impl AgentStateMachine for StandardAgentStateMachine {
    async fn register_agent(
        &self,
        name: &str,
        capabilities: Vec<String>,
        registered_by: &str,
    ) -> Result<Agent, CoordinationError> {
        let agent = Agent::new(name, capabilities);
        self.agents.insert(agent.clone(), registered_by).await?;
        info!("Registered agent {} ({}) in {}", agent.id, agent.name, agent.status);
        self.event_bus
            .publish_agent_event(AgentStateEvent::AgentRegistered {
                agent_id: agent.id,
                name: agent.name.clone(),
                capabilities: agent.capabilities.clone(),
                registered_at: agent.registered_at,
            });
        Ok(agent)
    }

    async fn record_transition(
        &self,
        request: TransitionRequest,
    ) -> Result<StatusTransition, CoordinationError> {
        let agent_id = request.agent_id;
        match self
            .agents
            .append_transition(request)
            .await
            .map_err(CoordinationError::map_not_found(EntityKind::Agent, agent_id))?
        {
            TransitionOutcome::Applied(transition) => {
                if transition.forced {
                    warn!(
                        "Forced transition for agent {}: {:?} -> {} ({})",
                        agent_id, transition.from_status, transition.to_status, transition.reason
                    );
                } else {
                    info!(
                        "Agent {} transitioned {:?} -> {}",
                        agent_id, transition.from_status, transition.to_status
                    );
                }
                if let Some(from_status) = transition.from_status {
                    self.event_bus
                        .publish_agent_event(AgentStateEvent::StatusChanged {
                            agent_id,
                            from_status,
                            to_status: transition.to_status,
                            reason: transition.reason.clone(),
                            forced: transition.forced,
                            transitioned_at: transition.transitioned_at,
                        });
                }
                Ok(transition)
            }
            TransitionOutcome::Rejected { from, to } => {
                warn!(
                    "Rejected transition for agent {}: {} -> {}",
                    agent_id, from, to
                );
                Err(CoordinationError::InvalidTransition { agent_id, from, to })
            }
        }
    }

    async fn get_agent(&self, agent_id: AgentId) -> Result<Agent, CoordinationError> {
        self.agents
            .find_by_id(agent_id)
            .await?
            .ok_or_else(|| CoordinationError::UnknownEntity {
                kind: EntityKind::Agent,
                id: agent_id.to_string(),
            })
    }

    async fn agent_status(&self, agent_id: AgentId) -> Result<AgentStatus, CoordinationError> {
        Ok(self.get_agent(agent_id).await?.status)
    }

    async fn list_agents(&self) -> Result<Vec<Agent>, CoordinationError> {
        Ok(self.agents.list_all().await?)
    }

    async fn agents_in_status(
        &self,
        status: AgentStatus,
    ) -> Result<Vec<Agent>, CoordinationError> {
        Ok(self.agents.list_by_status(status).await?)
    }

    async fn transition_history(
        &self,
        agent_id: AgentId,
        limit: Option<usize>,
    ) -> Result<Vec<StatusTransition>, CoordinationError> {
        // Surface unknown agents instead of an empty history.
        self.get_agent(agent_id).await?;
        Ok(self.agents.history(agent_id, limit).await?)
    }

    async fn is_assignable(&self, agent_id: AgentId) -> Result<bool, CoordinationError> {
        Ok(self.get_agent(agent_id).await?.status.is_assignable())
    }
}
