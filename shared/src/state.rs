//! Immutable state snapshots carried by every entity.
//!
//! A state is replaced as a whole: the network never merges individual
//! fields, the most recently applied snapshot for an id wins.

use crate::rules::Rules;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Stable identifier of an entity, unique across all peers and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(Uuid);

impl EntityId {
    pub fn random() -> Self {
        EntityId(Uuid::new_v4())
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transport-level identity of a peer. The peer that created an entity owns
/// it for the entity's whole lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        PeerId(id.into())
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Center and rotation (degrees) of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub x: f32,
    pub y: f32,
    pub rotation: f32,
}

impl Pose {
    pub fn new(x: f32, y: f32, rotation: f32) -> Self {
        Pose { x, y, rotation }
    }
}

/// Capability shared by the state types of every entity kind.
pub trait EntityState: Clone + fmt::Debug + Send + Sync + 'static {
    /// Whether the entity moves along a heading and needs a move vector.
    const MOVABLE: bool;

    fn id(&self) -> EntityId;

    fn pose(&self) -> Pose;

    fn pose_mut(&mut self) -> &mut Pose;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentPhase {
    /// Freshly created, not placed yet. Cannot be hit and does not collide.
    Spawning,
    Active,
    /// Destroyed, waiting for its respawn time. Behaves like `Spawning`.
    Respawning,
}

/// State of a tank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub id: EntityId,
    pub pose: Pose,
    /// Turret rotation relative to the body, in degrees.
    pub turret_rotation: f32,
    pub damage: u32,
    pub score: u32,
    /// Set while spawning or respawning; the agent is placed once it elapses.
    pub respawn_at_millis: Option<u64>,
}

impl AgentState {
    pub fn spawning(id: EntityId, pose: Pose, spawn_at_millis: u64) -> Self {
        AgentState {
            id,
            pose,
            turret_rotation: 0.0,
            damage: 0,
            score: 0,
            respawn_at_millis: Some(spawn_at_millis),
        }
    }

    pub fn phase(&self, rules: &Rules) -> AgentPhase {
        match self.respawn_at_millis {
            None => AgentPhase::Active,
            Some(_) if self.damage >= rules.max_damage => AgentPhase::Respawning,
            Some(_) => AgentPhase::Spawning,
        }
    }

    /// Active agents are drawn, collide and can be hit.
    pub fn is_active(&self) -> bool {
        self.respawn_at_millis.is_none()
    }

    /// Absolute heading of the turret, in degrees.
    pub fn turret_heading(&self) -> f32 {
        self.pose.rotation + self.turret_rotation
    }
}

impl EntityState for AgentState {
    const MOVABLE: bool = true;

    fn id(&self) -> EntityId {
        self.id
    }

    fn pose(&self) -> Pose {
        self.pose
    }

    fn pose_mut(&mut self) -> &mut Pose {
        &mut self.pose
    }
}

/// State of a bullet. A bullet keeps the heading it was fired with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectileState {
    pub id: EntityId,
    pub pose: Pose,
}

impl EntityState for ProjectileState {
    const MOVABLE: bool = true;

    fn id(&self) -> EntityId {
        self.id
    }

    fn pose(&self) -> Pose {
        self.pose
    }

    fn pose_mut(&mut self) -> &mut Pose {
        &mut self.pose
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObstacleState {
    pub id: EntityId,
    pub pose: Pose,
}

impl EntityState for ObstacleState {
    const MOVABLE: bool = false;

    fn id(&self) -> EntityId {
        self.id
    }

    fn pose(&self) -> Pose {
        self.pose
    }

    fn pose_mut(&mut self) -> &mut Pose {
        &mut self.pose
    }
}
