pub mod entity;
pub mod geometry;
pub mod protocol;
pub mod rules;
pub mod state;

pub use entity::{Agent, Body, Entity, Geometry, Obstacle, Projectile};
pub use geometry::{Arena, Polygon, Vector2};
pub use protocol::{decode, encode, DeltaMessage, Message, ProtocolError, StateSnapshot};
pub use rules::{Rules, WorldDimensions, PIECE_SIZE};
pub use state::{
    AgentPhase, AgentState, EntityId, EntityState, ObstacleState, PeerId, Pose, ProjectileState,
};
