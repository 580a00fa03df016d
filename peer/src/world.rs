//! The replicated world: every known entity, the shared rules, and the
//! bindings of the agents this process simulates.
//!
//! All maps are safe to use from the simulation thread and the inbound
//! message task at the same time. Readers get snapshots, never live views.

use crate::input::{InputAxes, InputSource};
use log::debug;
use shared::{
    Agent, AgentState, Arena, Entity, EntityId, Message, Obstacle, PeerId, Projectile,
    ProjectileState, Rules, StateSnapshot, WorldDimensions,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Per-process bookkeeping for an agent simulated by this process.
pub struct LocalAgentBinding {
    agent_id: EntityId,
    input: Mutex<Box<dyn InputSource>>,
    last_fire_millis: AtomicU64,
    pending_damage: AtomicU32,
}

impl LocalAgentBinding {
    pub fn new(agent_id: EntityId, input: impl InputSource + 'static) -> Self {
        Self {
            agent_id,
            input: Mutex::new(Box::new(input)),
            last_fire_millis: AtomicU64::new(0),
            pending_damage: AtomicU32::new(0),
        }
    }

    pub fn agent_id(&self) -> EntityId {
        self.agent_id
    }

    pub fn sample_input(&self) -> InputAxes {
        self.input
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sample()
    }

    pub fn last_fire_millis(&self) -> u64 {
        self.last_fire_millis.load(Ordering::Acquire)
    }

    pub fn set_last_fire_millis(&self, millis: u64) {
        self.last_fire_millis.store(millis, Ordering::Release);
    }

    /// Counts one hit reported by the network. Applied on the next tick.
    pub fn add_pending_damage(&self) {
        self.pending_damage.fetch_add(1, Ordering::AcqRel);
    }

    pub fn take_pending_damage(&self) -> u32 {
        self.pending_damage.swap(0, Ordering::AcqRel)
    }
}

impl std::fmt::Debug for LocalAgentBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalAgentBinding")
            .field("agent_id", &self.agent_id)
            .field("last_fire_millis", &self.last_fire_millis())
            .field("pending_damage", &self.pending_damage.load(Ordering::Relaxed))
            .finish()
    }
}

#[derive(Debug)]
pub struct World {
    dimensions: WorldDimensions,
    agents: RwLock<HashMap<EntityId, Arc<Agent>>>,
    projectiles: RwLock<HashMap<EntityId, Arc<Projectile>>>,
    obstacles: RwLock<HashMap<EntityId, Arc<Obstacle>>>,
    rules: RwLock<Arc<Rules>>,
    local_agents: RwLock<HashMap<EntityId, Arc<LocalAgentBinding>>>,
}

impl World {
    pub fn new(dimensions: WorldDimensions) -> Self {
        Self {
            dimensions,
            agents: RwLock::new(HashMap::new()),
            projectiles: RwLock::new(HashMap::new()),
            obstacles: RwLock::new(HashMap::new()),
            rules: RwLock::new(Arc::new(Rules::for_dimensions(&dimensions))),
            local_agents: RwLock::new(HashMap::new()),
        }
    }

    pub fn dimensions(&self) -> WorldDimensions {
        self.dimensions
    }

    pub fn arena(&self) -> Arena {
        self.dimensions.arena()
    }

    /// Adds an entity unless one with the same id is already known.
    ///
    /// Returns true if the entity was inserted.
    pub fn add_entity(&self, entity: Entity) -> bool {
        let id = entity.id();
        let inserted = match entity {
            Entity::Agent(agent) => insert_absent(&self.agents, id, agent),
            Entity::Projectile(projectile) => insert_absent(&self.projectiles, id, projectile),
            Entity::Obstacle(obstacle) => insert_absent(&self.obstacles, id, obstacle),
        };
        if !inserted {
            debug!("Ignoring duplicate creation of {}", id);
        }
        inserted
    }

    /// Replaces the state of a known agent. Unknown ids are ignored.
    pub fn apply_agent_state(&self, state: AgentState) -> bool {
        match self.lookup_agent(&state.id) {
            Some(agent) => {
                agent.body().apply(state);
                true
            }
            None => false,
        }
    }

    /// Replaces the state of a known projectile. Unknown ids are ignored.
    pub fn apply_projectile_state(&self, state: ProjectileState) -> bool {
        match self.lookup_projectile(&state.id) {
            Some(projectile) => {
                projectile.body().apply(state);
                true
            }
            None => false,
        }
    }

    pub fn remove_projectile(&self, id: &EntityId) -> Option<Arc<Projectile>> {
        write(&self.projectiles).remove(id)
    }

    /// Removes every agent and projectile whose owner matches, together with
    /// the local bindings of removed agents. Obstacles stay: they make up the
    /// arena layout for the rest of the session. Returns the removed ids.
    pub fn remove_where_owner<P>(&self, predicate: P) -> Vec<EntityId>
    where
        P: Fn(&PeerId) -> bool,
    {
        let mut removed = Vec::new();
        let removed_agents = retain_owned(&self.agents, |agent| predicate(agent.owner()));
        {
            let mut local_agents = write(&self.local_agents);
            for id in &removed_agents {
                local_agents.remove(id);
            }
        }
        removed.extend(removed_agents);
        removed.extend(retain_owned(&self.projectiles, |projectile| {
            predicate(projectile.owner())
        }));
        removed
    }

    /// Marks an agent as simulated by this process. The agent itself may
    /// not be known yet.
    pub fn bind_local_agent(&self, binding: LocalAgentBinding) -> Arc<LocalAgentBinding> {
        let binding = Arc::new(binding);
        write(&self.local_agents).insert(binding.agent_id(), Arc::clone(&binding));
        binding
    }

    pub fn local_binding(&self, id: &EntityId) -> Option<Arc<LocalAgentBinding>> {
        read(&self.local_agents).get(id).cloned()
    }

    /// Local bindings whose agent is already known.
    pub fn local_agents(&self) -> Vec<(Arc<LocalAgentBinding>, Arc<Agent>)> {
        let bindings: Vec<Arc<LocalAgentBinding>> =
            read(&self.local_agents).values().cloned().collect();
        bindings
            .into_iter()
            .filter_map(|binding| {
                let agent = self.lookup_agent(&binding.agent_id())?;
                Some((binding, agent))
            })
            .collect()
    }

    pub fn lookup_agent(&self, id: &EntityId) -> Option<Arc<Agent>> {
        read(&self.agents).get(id).cloned()
    }

    pub fn lookup_projectile(&self, id: &EntityId) -> Option<Arc<Projectile>> {
        read(&self.projectiles).get(id).cloned()
    }

    pub fn lookup_obstacle(&self, id: &EntityId) -> Option<Arc<Obstacle>> {
        read(&self.obstacles).get(id).cloned()
    }

    pub fn agents(&self) -> Vec<Arc<Agent>> {
        read(&self.agents).values().cloned().collect()
    }

    pub fn projectiles(&self) -> Vec<Arc<Projectile>> {
        read(&self.projectiles).values().cloned().collect()
    }

    pub fn obstacles(&self) -> Vec<Arc<Obstacle>> {
        read(&self.obstacles).values().cloned().collect()
    }

    pub fn entities(&self) -> Vec<Entity> {
        let mut entities: Vec<Entity> = self.agents().into_iter().map(Entity::Agent).collect();
        entities.extend(self.projectiles().into_iter().map(Entity::Projectile));
        entities.extend(self.obstacles().into_iter().map(Entity::Obstacle));
        entities
    }

    pub fn entity_count(&self) -> usize {
        read(&self.agents).len() + read(&self.projectiles).len() + read(&self.obstacles).len()
    }

    pub fn rules(&self) -> Arc<Rules> {
        Arc::clone(&read(&self.rules))
    }

    pub fn set_rules(&self, rules: Rules) {
        *write(&self.rules) = Arc::new(rules);
    }

    /// Everything a joining peer needs. Local bindings stay private.
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            dimensions: self.dimensions,
            entities: self.entities().iter().map(Message::create).collect(),
            rules: (*self.rules()).clone(),
        }
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn insert_absent<T>(map: &RwLock<HashMap<EntityId, Arc<T>>>, id: EntityId, value: Arc<T>) -> bool {
    let mut map = write(map);
    if map.contains_key(&id) {
        return false;
    }
    map.insert(id, value);
    true
}

fn retain_owned<T, P>(map: &RwLock<HashMap<EntityId, Arc<T>>>, owned: P) -> Vec<EntityId>
where
    P: Fn(&T) -> bool,
{
    let mut map = write(map);
    let removed: Vec<EntityId> = map
        .iter()
        .filter(|(_, value)| owned(value))
        .map(|(id, _)| *id)
        .collect();
    for id in &removed {
        map.remove(id);
    }
    removed
}
