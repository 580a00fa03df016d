//! Session configuration for a peer process

use shared::WorldDimensions;

/// One locally controlled player
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerConfig {
    /// Name shown next to the agent
    pub name: String,
}

impl PlayerConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Everything a peer needs to join a session
#[derive(Debug, Clone, PartialEq)]
pub struct PeerConfig {
    pub room: String,
    /// Only used if this peer founds the world; joiners take the founder's.
    pub dimensions: WorldDimensions,
    pub players: Vec<PlayerConfig>,
    /// Obstacles generated per local player when founding
    pub obstacles_per_player: usize,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            room: "tanks".to_string(),
            dimensions: WorldDimensions::new(40, 24),
            players: vec![PlayerConfig::new("Player")],
            obstacles_per_player: 2,
        }
    }
}

impl PeerConfig {
    /// Number of obstacles a founder generates for this configuration
    pub fn obstacle_count(&self) -> usize {
        self.players.len() * self.obstacles_per_player
    }
}
