//! # Peer Library
//!
//! This library runs one peer of a serverless tanks session. Every peer keeps
//! a full replica of the world, simulates the agents it owns and broadcasts
//! what changed. There is no authority: each entity is simulated by the peer
//! that created it, for the entity's whole lifetime.
//!
//! ## Core Responsibilities
//!
//! ### Replication
//! Entity creations, rule changes and per-tick deltas are broadcast to the
//! group. Inbound messages are applied in arrival order; a state update
//! replaces the whole state of one entity.
//!
//! ### Membership
//! The first peer in a room founds the world. Later peers receive a full
//! snapshot from an existing member and replay it through the regular
//! inbound path. When a peer leaves, its agents and projectiles are removed;
//! obstacles stay as part of the arena.
//!
//! ### Reconciliation
//! A fixed-rate loop turns local input into validated moves, resolves damage
//! reported by other peers, respawns destroyed agents, advances projectiles
//! and publishes one delta per agent when something changed.
//!
//! ## Module Organization
//!
//! ### World Module (`world`)
//! The entity maps, the shared rules and the bindings of local agents.
//!
//! ### Membership Module (`membership`)
//! Known members and the entities each of them owns.
//!
//! ### Transport Module (`transport`)
//! The group-messaging boundary and an in-process implementation.
//!
//! ### Distributed Module (`distributed`)
//! Session lifecycle, inbound dispatch and publication.
//!
//! ### Logic Module (`logic`)
//! The per-tick reconciliation loop.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use peer::config::PlayerConfig;
//! use peer::distributed::DistributedWorld;
//! use peer::input::BotInput;
//! use peer::logic::Simulation;
//! use peer::transport::LocalGroup;
//! use shared::WorldDimensions;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let group = LocalGroup::new();
//!     let peer = Arc::new(DistributedWorld::new(
//!         Arc::new(group.endpoint()),
//!         tokio::runtime::Handle::current(),
//!     ));
//!     peer.connect("lobby", WorldDimensions::new(40, 24)).await?;
//!     peer.spawn_agent(&PlayerConfig::new("Alice"), BotInput::new(1))?;
//!
//!     let mut simulation = Simulation::new(Arc::clone(&peer));
//!     simulation.tick(peer::utils::get_timestamp(), 1.0 / 30.0)?;
//!
//!     peer.shutdown();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod distributed;
pub mod error;
pub mod input;
pub mod logic;
pub mod membership;
pub mod transport;
pub mod utils;
pub mod world;

pub use distributed::{DistributedWorld, SessionStatus};
pub use error::{PeerError, TransportError};
pub use logic::{FireFeedback, Simulation, TickReport};
pub use transport::{GroupTransport, LocalGroup, TransportEvent};
pub use world::{LocalAgentBinding, World};
