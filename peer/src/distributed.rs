//! Distributed world facade: session lifecycle, inbound dispatch and
//! publication of locally created entities.
//!
//! One task per session drains the transport's events and is the only
//! place where remote messages, membership views and state transfers touch
//! the replica. Local publication goes through the same dispatch at publish
//! time, so a peer sees its own messages exactly once.

use crate::config::PlayerConfig;
use crate::error::PeerError;
use crate::input::InputSource;
use crate::membership::MembershipTracker;
use crate::transport::{GroupTransport, TransportEvent};
use crate::utils::{get_timestamp, sample_range};
use crate::world::{LocalAgentBinding, World};
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::{
    decode, encode, Agent, AgentState, EntityId, Message, Obstacle, ObstacleState, PeerId, Pose,
    Projectile, ProjectileState, Rules, StateSnapshot, Vector2, WorldDimensions,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio::runtime::Handle;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

/// Lifecycle of a session, observable through [`DistributedWorld::status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Disconnected,
    /// Connected, waiting to found a world or to receive one.
    Connecting,
    Active,
    Failed(String),
    Closed,
}

struct Replica {
    world: Option<Arc<World>>,
    membership: MembershipTracker,
    /// Messages received before the world existed, in arrival order.
    backlog: Vec<(PeerId, Message)>,
    dimensions: WorldDimensions,
    state_requested: bool,
}

impl Replica {
    fn new(dimensions: WorldDimensions) -> Self {
        Self {
            world: None,
            membership: MembershipTracker::new(),
            backlog: Vec::new(),
            dimensions,
            state_requested: false,
        }
    }

    fn prune(&mut self, departed: &[PeerId]) {
        self.backlog.retain(|(sender, _)| !departed.contains(sender));
        let Some(world) = &self.world else {
            return;
        };
        for peer in departed {
            let removed = world.remove_where_owner(|owner| owner == peer);
            info!("Pruned {} entities owned by {}", removed.len(), peer);
        }
    }
}

/// Applies one message to the world. Unknown ids are ignored.
fn dispatch(world: &World, membership: &mut MembershipTracker, message: Message) {
    match message {
        Message::RulesUpdate { rules } => world.set_rules(rules),
        Message::Delta(delta) => {
            for state in delta.agent_states {
                world.apply_agent_state(state);
            }
            for state in delta.projectile_states {
                world.apply_projectile_state(state);
            }
            for id in delta.removed_projectiles {
                if let Some(projectile) = world.remove_projectile(&id) {
                    membership.forget_entity(projectile.owner(), &id);
                }
            }
            for id in delta.damaged_agents {
                match world.local_binding(&id) {
                    Some(binding) => binding.add_pending_damage(),
                    None => debug!("Damage for {} is handled by its owner", id),
                }
            }
        }
        creation => match creation.to_entity() {
            Some(entity) => {
                let owner = entity.owner().clone();
                let id = entity.id();
                if world.add_entity(entity) {
                    membership.record_owner(&owner, id);
                }
            }
            None => warn!("Dropping malformed creation message"),
        },
    }
}

/// State shared between the facade and its event task.
struct Session {
    transport: Arc<dyn GroupTransport>,
    local_id: RwLock<Option<PeerId>>,
    replica: Mutex<Replica>,
    status: watch::Sender<SessionStatus>,
    founder: AtomicBool,
}

impl Session {
    fn local_id(&self) -> Option<PeerId> {
        self.local_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_local_id(&self, id: Option<PeerId>) {
        *self.local_id.write().unwrap_or_else(PoisonError::into_inner) = id;
    }

    fn replica(&self) -> MutexGuard<'_, Replica> {
        self.replica.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    fn fail(&self, reason: String) {
        self.status.send_if_modified(|status| {
            if matches!(status, SessionStatus::Connecting | SessionStatus::Active) {
                error!("Session failed: {}", reason);
                *status = SessionStatus::Failed(reason.clone());
                true
            } else {
                false
            }
        });
    }

    /// Returns false once the session cannot continue.
    fn handle_event(&self, event: TransportEvent) -> bool {
        if !matches!(
            self.status(),
            SessionStatus::Connecting | SessionStatus::Active
        ) {
            return false;
        }

        let result = match event {
            TransportEvent::MessageReceived { sender, payload } => {
                self.handle_message(sender, &payload);
                Ok(())
            }
            TransportEvent::ViewChanged { members } => self.handle_view(&members),
            TransportEvent::StateTransferRequested { reply } => {
                self.provide_state(reply);
                Ok(())
            }
            TransportEvent::StateTransferReceived { payload } => self.bootstrap(&payload),
            TransportEvent::TransportFailed { reason } => Err(PeerError::SessionFailed(reason)),
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                self.fail(e.to_string());
                false
            }
        }
    }

    fn handle_message(&self, sender: PeerId, payload: &[u8]) {
        if self.local_id().as_ref() == Some(&sender) {
            debug!("Ignoring own message delivered by the transport");
            return;
        }
        let message: Message = match decode(payload) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping payload from {}: {}", sender, e);
                return;
            }
        };

        let mut replica = self.replica();
        let replica = &mut *replica;
        replica.membership.touch(&sender);
        match &replica.world {
            Some(world) => dispatch(world, &mut replica.membership, message),
            None => replica.backlog.push((sender, message)),
        }
    }

    fn handle_view(&self, members: &[PeerId]) -> Result<(), PeerError> {
        let local_id = self.local_id().ok_or(PeerError::NotConnected)?;
        let mut replica = self.replica();

        let departed = replica.membership.apply_view(members);
        if !departed.is_empty() {
            replica.prune(&departed);
        }

        if replica.world.is_some() {
            return Ok(());
        }
        if members.len() == 1 && members[0] == local_id {
            self.found(&mut replica, &local_id);
        } else if !replica.state_requested {
            replica.state_requested = true;
            self.transport.request_state()?;
            debug!("{} requested the world state", local_id);
        }
        Ok(())
    }

    fn found(&self, replica: &mut Replica, local_id: &PeerId) {
        let world = Arc::new(World::new(replica.dimensions));
        for (_, message) in replica.backlog.drain(..) {
            dispatch(&world, &mut replica.membership, message);
        }
        replica.world = Some(world);
        self.founder.store(true, Ordering::Release);
        info!(
            "{} founded a {}x{} world",
            local_id, replica.dimensions.pieces_x, replica.dimensions.pieces_y
        );
        self.status.send_replace(SessionStatus::Active);
    }

    fn provide_state(&self, reply: oneshot::Sender<Vec<u8>>) {
        let replica = self.replica();
        let Some(world) = &replica.world else {
            debug!("No world yet, cannot provide state");
            return;
        };
        match encode(&world.snapshot()) {
            Ok(payload) => {
                debug!("Providing {} bytes of state", payload.len());
                if reply.send(payload).is_err() {
                    debug!("Joiner left before receiving state");
                }
            }
            Err(e) => error!("Failed to encode state: {}", e),
        }
    }

    fn bootstrap(&self, payload: &[u8]) -> Result<(), PeerError> {
        let snapshot: StateSnapshot = decode(payload)?;
        let mut replica = self.replica();
        if replica.world.is_some() {
            return Err(PeerError::WorldExists);
        }

        let world = Arc::new(World::new(snapshot.dimensions));
        let replica = &mut *replica;
        for message in snapshot.into_messages() {
            dispatch(&world, &mut replica.membership, message);
        }
        for (sender, message) in replica.backlog.drain(..) {
            replica.membership.touch(&sender);
            dispatch(&world, &mut replica.membership, message);
        }
        replica.world = Some(Arc::clone(&world));

        // Owners that left before the snapshot arrived.
        let view = replica.membership.current_view().to_vec();
        if !view.is_empty() {
            let departed = replica.membership.apply_view(&view);
            replica.prune(&departed);
        }

        info!(
            "Joined a {}x{} world with {} entities",
            world.dimensions().pieces_x,
            world.dimensions().pieces_y,
            world.entity_count()
        );
        self.status.send_replace(SessionStatus::Active);
        Ok(())
    }

    fn events_ended(&self) {
        self.fail("transport closed".to_string());
    }
}

/// Handle to one peer's replica of the shared world.
pub struct DistributedWorld {
    session: Arc<Session>,
    runtime: Handle,
    rng: Mutex<StdRng>,
    event_task: Mutex<Option<JoinHandle<()>>>,
}

impl DistributedWorld {
    pub fn new(transport: Arc<dyn GroupTransport>, runtime: Handle) -> Self {
        Self::with_rng(transport, runtime, StdRng::from_entropy())
    }

    /// Same as [`DistributedWorld::new`] with reproducible obstacle layouts.
    pub fn with_seed(transport: Arc<dyn GroupTransport>, runtime: Handle, seed: u64) -> Self {
        Self::with_rng(transport, runtime, StdRng::seed_from_u64(seed))
    }

    fn with_rng(transport: Arc<dyn GroupTransport>, runtime: Handle, rng: StdRng) -> Self {
        let (status, _) = watch::channel(SessionStatus::Disconnected);
        Self {
            session: Arc::new(Session {
                transport,
                local_id: RwLock::new(None),
                replica: Mutex::new(Replica::new(WorldDimensions::new(0, 0))),
                status,
                founder: AtomicBool::new(false),
            }),
            runtime,
            rng: Mutex::new(rng),
            event_task: Mutex::new(None),
        }
    }

    /// Joins `room` and waits until this peer has a world, either founded
    /// with `dimensions` or received from an existing member.
    ///
    /// Imposes no timeout.
    pub async fn connect(&self, room: &str, dimensions: WorldDimensions) -> Result<(), PeerError> {
        let mut starting = false;
        self.session.status.send_if_modified(|status| {
            if matches!(status, SessionStatus::Disconnected | SessionStatus::Closed) {
                *status = SessionStatus::Connecting;
                starting = true;
                true
            } else {
                false
            }
        });
        if !starting {
            return Err(PeerError::AlreadyConnected);
        }

        *self.session.replica() = Replica::new(dimensions);
        self.session.founder.store(false, Ordering::Release);

        let connection = match self.session.transport.connect(room) {
            Ok(connection) => connection,
            Err(e) => {
                self.session.fail(e.to_string());
                return Err(e.into());
            }
        };
        info!("Connected to room {} as {}", room, connection.local_id);
        self.session.set_local_id(Some(connection.local_id));

        let mut status = self.session.status.subscribe();
        let session = Arc::clone(&self.session);
        let mut events = connection.events;
        let task = self.runtime.spawn(async move {
            while let Some(event) = events.recv().await {
                if !session.handle_event(event) {
                    break;
                }
            }
            session.events_ended();
        });
        *self
            .event_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(task);

        loop {
            let current = status.borrow_and_update().clone();
            match current {
                SessionStatus::Active => return Ok(()),
                SessionStatus::Failed(reason) => return Err(PeerError::SessionFailed(reason)),
                SessionStatus::Closed => {
                    return Err(PeerError::SessionFailed("closed during bootstrap".to_string()))
                }
                SessionStatus::Disconnected | SessionStatus::Connecting => {}
            }
            if status.changed().await.is_err() {
                return Err(PeerError::NotConnected);
            }
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.session.status()
    }

    pub fn local_id(&self) -> Option<PeerId> {
        self.session.local_id()
    }

    /// True if this peer created the world instead of receiving it.
    pub fn is_founder(&self) -> bool {
        self.session.founder.load(Ordering::Acquire)
    }

    pub fn world(&self) -> Result<Arc<World>, PeerError> {
        self.session.replica().world.clone().ok_or(PeerError::NoWorld)
    }

    /// Known members, sorted.
    pub fn members(&self) -> Vec<PeerId> {
        self.session.replica().membership.members()
    }

    /// Creates an agent owned and simulated by this peer. It is placed in
    /// the arena once its spawn delay has passed.
    pub fn spawn_agent(
        &self,
        player: &PlayerConfig,
        input: impl InputSource + 'static,
    ) -> Result<EntityId, PeerError> {
        self.spawn_agent_at(player, input, get_timestamp())
    }

    pub fn spawn_agent_at(
        &self,
        player: &PlayerConfig,
        input: impl InputSource + 'static,
        now_millis: u64,
    ) -> Result<EntityId, PeerError> {
        let world = self.world()?;
        let owner = self.local_id().ok_or(PeerError::NotConnected)?;
        let rules = world.rules();
        let arena = world.arena();
        let (width, height) = world.dimensions().agent_size();

        let id = EntityId::random();
        let state = AgentState::spawning(
            id,
            Pose::new(arena.width / 2.0, arena.height / 2.0, 0.0),
            now_millis.saturating_add(rules.spawn_delay_millis),
        );
        let agent = Agent::new(owner, player.name.clone(), width, height, state);
        world.bind_local_agent(LocalAgentBinding::new(id, input));
        self.broadcast(Message::create_agent(&agent))?;
        info!("Spawned agent {} for {}", id, player.name);
        Ok(id)
    }

    /// Fires a projectile from the turret of a known agent.
    pub fn create_projectile(&self, agent_id: EntityId) -> Result<EntityId, PeerError> {
        let world = self.world()?;
        let agent = world
            .lookup_agent(&agent_id)
            .ok_or(PeerError::UnknownAgent(agent_id))?;
        let state = agent.state();
        self.fire_from(&world, &agent, &state)
    }

    /// Fires from the turret tip as described by `state`, which may be newer
    /// than the agent's installed state.
    pub(crate) fn fire_from(
        &self,
        world: &World,
        agent: &Agent,
        state: &AgentState,
    ) -> Result<EntityId, PeerError> {
        let owner = self.local_id().ok_or(PeerError::NotConnected)?;
        let dimensions = world.dimensions();
        let (_, turret_height) = dimensions.turret_size();
        let (width, height) = dimensions.projectile_size();

        let heading = state.turret_heading();
        let tip = Vector2::new(state.pose.x, state.pose.y)
            .add(&Vector2::heading(heading).scale(turret_height / 2.0));
        let id = EntityId::random();
        let projectile = Projectile::new(
            owner,
            agent.id(),
            width,
            height,
            ProjectileState {
                id,
                pose: Pose::new(tip.x, tip.y, heading),
            },
        );
        self.broadcast(Message::create_projectile(&projectile))?;
        debug!("Agent {} fired {}", agent.id(), id);
        Ok(id)
    }

    /// Creates a randomly sized and placed obstacle owned by this peer.
    pub fn create_obstacle(&self) -> Result<EntityId, PeerError> {
        let world = self.world()?;
        let owner = self.local_id().ok_or(PeerError::NotConnected)?;
        let arena = world.arena();
        let (base_width, base_height) = world.dimensions().obstacle_size();

        let (width, height, pose) = {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            let width = base_width * sample_range(&mut *rng, 1.0, 3.0);
            let height = base_height * sample_range(&mut *rng, 1.0, 3.0);
            let pose = Pose::new(
                sample_range(&mut *rng, 0.0, arena.width),
                sample_range(&mut *rng, 0.0, arena.height),
                sample_range(&mut *rng, 0.0, 360.0),
            );
            (width, height, pose)
        };

        let id = EntityId::random();
        let obstacle = Obstacle::new(owner, width, height, ObstacleState { id, pose });
        self.broadcast(Message::create_obstacle(&obstacle))?;
        debug!("Created obstacle {} ({}x{})", id, width, height);
        Ok(id)
    }

    /// Replaces the rules on every peer.
    pub fn update_rules(&self, rules: Rules) -> Result<(), PeerError> {
        self.broadcast(Message::RulesUpdate { rules })
    }

    /// Applies `message` locally, then sends it to the other members.
    ///
    /// A send failure ends the session.
    pub fn broadcast(&self, message: Message) -> Result<(), PeerError> {
        match self.status() {
            SessionStatus::Active => {}
            SessionStatus::Failed(reason) => return Err(PeerError::SessionFailed(reason)),
            _ => return Err(PeerError::NotConnected),
        }
        let local_id = self.local_id().ok_or(PeerError::NotConnected)?;
        let payload = encode(&message)?;

        {
            let mut replica = self.session.replica();
            let replica = &mut *replica;
            let world = replica.world.as_ref().ok_or(PeerError::NoWorld)?;
            replica.membership.touch(&local_id);
            dispatch(world, &mut replica.membership, message);
        }

        self.session.transport.send(payload).map_err(|e| {
            self.session.fail(e.to_string());
            PeerError::from(e)
        })
    }

    /// Leaves the room and discards the world. In-flight messages are lost.
    pub fn shutdown(&self) {
        let was_open = self.session.status.send_if_modified(|status| {
            if matches!(
                status,
                SessionStatus::Connecting | SessionStatus::Active | SessionStatus::Failed(_)
            ) {
                *status = SessionStatus::Closed;
                true
            } else {
                false
            }
        });
        if let Some(task) = self
            .event_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
        if !was_open {
            return;
        }

        self.session.transport.close();
        let dimensions = self.session.replica().dimensions;
        *self.session.replica() = Replica::new(dimensions);
        self.session.set_local_id(None);
        self.session.founder.store(false, Ordering::Release);
        info!("Session closed");
    }
}

impl Drop for DistributedWorld {
    fn drop(&mut self) {
        self.shutdown();
    }
}
