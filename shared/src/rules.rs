use crate::geometry::Arena;
use serde::{Deserialize, Serialize};

/// Edge length of one grid piece. Agents occupy exactly one piece.
pub const PIECE_SIZE: f32 = 32.0;

/// Game rules shared by every peer. Replaced as a whole, never merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rules {
    /// Damage at which an agent is destroyed and scheduled for respawn.
    pub max_damage: u32,
    /// Delay between creating an agent and placing it in the arena.
    pub spawn_delay_millis: u64,
    pub respawn_delay_millis: u64,
    /// Minimum time between two shots of the same agent.
    pub fire_cooldown_millis: u64,
    /// Units per second.
    pub agent_speed: f32,
    /// Degrees per second, for body and turret.
    pub rotation_speed: f32,
    /// Units per second.
    pub projectile_speed: f32,
}

impl Rules {
    /// Default rules with speeds scaled to the arena: an agent crosses the
    /// arena diagonal in fifteen seconds, a projectile twice as fast.
    pub fn for_dimensions(dimensions: &WorldDimensions) -> Self {
        let arena = dimensions.arena();
        let agent_speed = (arena.width * arena.width + arena.height * arena.height).sqrt() / 15.0;
        Rules {
            agent_speed,
            rotation_speed: agent_speed,
            projectile_speed: agent_speed * 2.0,
            ..Rules::default()
        }
    }
}

impl Default for Rules {
    fn default() -> Self {
        Rules {
            max_damage: 5,
            spawn_delay_millis: 3000,
            respawn_delay_millis: 5000,
            fire_cooldown_millis: 500,
            agent_speed: 100.0,
            rotation_speed: 100.0,
            projectile_speed: 200.0,
        }
    }
}

/// Size of the arena and of every entity kind, derived from the number of
/// grid pieces requested by the founder.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorldDimensions {
    pub pieces_x: u32,
    pub pieces_y: u32,
}

impl WorldDimensions {
    pub fn new(pieces_x: u32, pieces_y: u32) -> Self {
        WorldDimensions { pieces_x, pieces_y }
    }

    pub fn arena(&self) -> Arena {
        Arena {
            width: self.pieces_x as f32 * PIECE_SIZE,
            height: self.pieces_y as f32 * PIECE_SIZE,
        }
    }

    pub fn agent_size(&self) -> (f32, f32) {
        (PIECE_SIZE, PIECE_SIZE)
    }

    pub fn turret_size(&self) -> (f32, f32) {
        (PIECE_SIZE / 2.0, PIECE_SIZE * 3.0 / 4.0)
    }

    pub fn projectile_size(&self) -> (f32, f32) {
        (PIECE_SIZE / 4.0, (PIECE_SIZE / 3.0).floor())
    }

    /// Base size of an obstacle before random scaling.
    pub fn obstacle_size(&self) -> (f32, f32) {
        (PIECE_SIZE, PIECE_SIZE)
    }
}
