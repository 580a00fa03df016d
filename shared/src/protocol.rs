//! Messages exchanged between peers, and the full-state transfer payload.

use crate::entity::{Agent, Entity, Obstacle, Projectile};
use crate::rules::{Rules, WorldDimensions};
use crate::state::{AgentState, EntityId, ObstacleState, PeerId, ProjectileState};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("failed to encode payload: {0}")]
    Encode(#[source] bincode::Error),
    #[error("failed to decode payload: {0}")]
    Decode(#[source] bincode::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    CreateAgent {
        id: EntityId,
        owner: PeerId,
        name: String,
        width: f32,
        height: f32,
        state: AgentState,
    },
    CreateProjectile {
        id: EntityId,
        owner: PeerId,
        agent_id: EntityId,
        width: f32,
        height: f32,
        state: ProjectileState,
    },
    CreateObstacle {
        id: EntityId,
        owner: PeerId,
        width: f32,
        height: f32,
        state: ObstacleState,
    },
    RulesUpdate {
        rules: Rules,
    },
    Delta(DeltaMessage),
}

impl Message {
    /// Creation message carrying the entity's current state.
    pub fn create(entity: &Entity) -> Self {
        match entity {
            Entity::Agent(agent) => Message::create_agent(agent),
            Entity::Projectile(projectile) => Message::create_projectile(projectile),
            Entity::Obstacle(obstacle) => Message::create_obstacle(obstacle),
        }
    }

    pub fn create_agent(agent: &Agent) -> Self {
        Message::CreateAgent {
            id: agent.id(),
            owner: agent.owner().clone(),
            name: agent.name().to_string(),
            width: agent.body().width(),
            height: agent.body().height(),
            state: (*agent.state()).clone(),
        }
    }

    pub fn create_projectile(projectile: &Projectile) -> Self {
        Message::CreateProjectile {
            id: projectile.id(),
            owner: projectile.owner().clone(),
            agent_id: projectile.agent_id(),
            width: projectile.body().width(),
            height: projectile.body().height(),
            state: (*projectile.state()).clone(),
        }
    }

    pub fn create_obstacle(obstacle: &Obstacle) -> Self {
        Message::CreateObstacle {
            id: obstacle.id(),
            owner: obstacle.owner().clone(),
            width: obstacle.body().width(),
            height: obstacle.body().height(),
            state: (*obstacle.state()).clone(),
        }
    }

    /// Builds the entity described by a creation message.
    ///
    /// Returns `None` for messages that create nothing, and for creation
    /// messages whose state does not carry the announced id.
    pub fn to_entity(&self) -> Option<Entity> {
        match self {
            Message::CreateAgent {
                id,
                owner,
                name,
                width,
                height,
                state,
            } if state.id == *id => Some(Entity::Agent(Arc::new(Agent::new(
                owner.clone(),
                name.clone(),
                *width,
                *height,
                state.clone(),
            )))),
            Message::CreateProjectile {
                id,
                owner,
                agent_id,
                width,
                height,
                state,
            } if state.id == *id => Some(Entity::Projectile(Arc::new(Projectile::new(
                owner.clone(),
                *agent_id,
                *width,
                *height,
                state.clone(),
            )))),
            Message::CreateObstacle {
                id,
                owner,
                width,
                height,
                state,
            } if state.id == *id => Some(Entity::Obstacle(Arc::new(Obstacle::new(
                owner.clone(),
                *width,
                *height,
                state.clone(),
            )))),
            _ => None,
        }
    }
}

/// Changes produced by one peer during one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeltaMessage {
    pub agent_states: Vec<AgentState>,
    pub projectile_states: Vec<ProjectileState>,
    pub removed_projectiles: Vec<EntityId>,
    /// One entry per hit; an agent hit twice appears twice.
    pub damaged_agents: Vec<EntityId>,
}

impl DeltaMessage {
    pub fn is_empty(&self) -> bool {
        self.agent_states.is_empty()
            && self.projectile_states.is_empty()
            && self.removed_projectiles.is_empty()
            && self.damaged_agents.is_empty()
    }

    /// Records a changed agent state, replacing an earlier one for the same id.
    pub fn push_agent_state(&mut self, state: AgentState) {
        match self.agent_states.iter_mut().find(|s| s.id == state.id) {
            Some(existing) => *existing = state,
            None => self.agent_states.push(state),
        }
    }

    pub fn push_projectile_state(&mut self, state: ProjectileState) {
        match self.projectile_states.iter_mut().find(|s| s.id == state.id) {
            Some(existing) => *existing = state,
            None => self.projectile_states.push(state),
        }
    }

    /// Marks a projectile as removed and drops any pending state for it.
    pub fn remove_projectile(&mut self, id: EntityId) {
        self.projectile_states.retain(|s| s.id != id);
        if !self.removed_projectiles.contains(&id) {
            self.removed_projectiles.push(id);
        }
    }
}

/// Payload handed to a joining peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub dimensions: WorldDimensions,
    /// Creation messages for every entity, carrying current states.
    pub entities: Vec<Message>,
    pub rules: Rules,
}

impl StateSnapshot {
    /// Messages that rebuild the snapshot through the regular inbound path.
    pub fn into_messages(self) -> impl Iterator<Item = Message> {
        self.entities
            .into_iter()
            .chain(std::iter::once(Message::RulesUpdate { rules: self.rules }))
    }
}

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    bincode::serialize(value).map_err(ProtocolError::Encode)
}

pub fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, ProtocolError> {
    bincode::deserialize(bytes).map_err(ProtocolError::Decode)
}
