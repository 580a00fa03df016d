//! Replicated entities.
//!
//! Every entity wraps its current state in a [`Body`], which swaps whole
//! snapshots and keeps the derived collision geometry next to them. Local
//! read-modify-write goes through [`Body::transform`], a compare-and-swap
//! retry loop; network updates go through [`Body::apply`].

use crate::geometry::{self, Polygon, Vector2};
use crate::state::{
    AgentState, EntityId, EntityState, ObstacleState, PeerId, Pose, ProjectileState,
};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Geometry derived from a state's pose.
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    pub bounds: Polygon,
    /// Unit vector along the heading; only present for movable kinds.
    pub move_vector: Option<Vector2>,
}

#[derive(Debug, Clone)]
struct Slot<S> {
    state: Arc<S>,
    geometry: Arc<Geometry>,
}

/// State holder shared by all entity kinds.
#[derive(Debug)]
pub struct Body<S: EntityState> {
    width: f32,
    height: f32,
    reach: f32,
    slot: RwLock<Slot<S>>,
}

impl<S: EntityState> Body<S> {
    pub fn new(width: f32, height: f32, state: S) -> Self {
        let geometry = Arc::new(Self::compute_geometry(width, height, &state.pose()));
        Body {
            width,
            height,
            reach: geometry::reach(width, height),
            slot: RwLock::new(Slot {
                state: Arc::new(state),
                geometry,
            }),
        }
    }

    pub fn id(&self) -> EntityId {
        self.state().id()
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn height(&self) -> f32 {
        self.height
    }

    /// Half diagonal, used to reject distant pairs before the exact test.
    pub fn reach(&self) -> f32 {
        self.reach
    }

    /// Latest snapshot. Only waits for a concurrent writer's pointer swap.
    pub fn state(&self) -> Arc<S> {
        Arc::clone(&self.read_slot().state)
    }

    pub fn geometry(&self) -> Arc<Geometry> {
        Arc::clone(&self.read_slot().geometry)
    }

    /// Replaces the current state unconditionally.
    pub fn apply(&self, new_state: S) {
        let mut slot = self.write_slot();
        let geometry = self.geometry_after(&slot, &new_state);
        *slot = Slot {
            state: Arc::new(new_state),
            geometry,
        };
    }

    /// Atomically updates the state.
    ///
    /// Reads the current snapshot, gives up if `still_needed` rejects it,
    /// otherwise applies `change` to a clone and installs it if no other
    /// writer got in first. On a lost race the whole sequence is retried
    /// against the newer snapshot. Returns whether a new state was installed.
    pub fn transform<P, M>(&self, mut still_needed: P, mut change: M) -> bool
    where
        P: FnMut(&S) -> bool,
        M: FnMut(&mut S),
    {
        loop {
            let observed = self.read_slot().clone();
            if !still_needed(&observed.state) {
                return false;
            }

            let mut next = S::clone(&observed.state);
            change(&mut next);
            let geometry = self.geometry_after(&observed, &next);

            let mut slot = self.write_slot();
            if Arc::ptr_eq(&slot.state, &observed.state) {
                *slot = Slot {
                    state: Arc::new(next),
                    geometry,
                };
                return true;
            }
        }
    }

    /// Bounds this body would have at `pose`.
    pub fn bounds_at(&self, pose: &Pose) -> Polygon {
        Polygon::oriented_rect(Vector2::new(pose.x, pose.y), self.width, self.height, pose.rotation)
    }

    /// Distance between centers if the current bounds intersect `other`.
    pub fn intersects(&self, other_bounds: &Polygon, other_reach: f32) -> Option<f32> {
        geometry::intersects(&self.geometry().bounds, self.reach, other_bounds, other_reach)
    }

    pub fn intersects_body<T: EntityState>(&self, other: &Body<T>) -> Option<f32> {
        self.intersects(&other.geometry().bounds, other.reach)
    }

    pub fn contains(&self, x: f32, y: f32) -> bool {
        self.geometry().bounds.contains(x, y)
    }

    /// Returns `state` moved `distance` units along its heading.
    ///
    /// Reuses the cached move vector while `state` shares the installed
    /// rotation.
    pub fn advanced(&self, state: &S, distance: f32) -> S {
        let rotation = state.pose().rotation;
        let heading = {
            let slot = self.read_slot();
            match slot.geometry.move_vector {
                Some(cached) if slot.state.pose().rotation == rotation => cached,
                _ => Vector2::heading(rotation),
            }
        };
        let mut next = state.clone();
        let pose = next.pose_mut();
        pose.x += heading.x * distance;
        pose.y += heading.y * distance;
        next
    }

    pub fn set_center(&self, x: f32, y: f32) -> bool {
        self.transform(
            |state| state.pose().x != x || state.pose().y != y,
            |state| {
                let pose = state.pose_mut();
                pose.x = x;
                pose.y = y;
            },
        )
    }

    pub fn set_rotation(&self, rotation: f32) -> bool {
        self.transform(
            |state| state.pose().rotation != rotation,
            |state| state.pose_mut().rotation = rotation,
        )
    }

    fn geometry_after(&self, previous: &Slot<S>, next: &S) -> Arc<Geometry> {
        let next_pose = next.pose();
        if previous.state.pose() == next_pose {
            Arc::clone(&previous.geometry)
        } else {
            Arc::new(Self::compute_geometry(self.width, self.height, &next_pose))
        }
    }

    fn compute_geometry(width: f32, height: f32, pose: &Pose) -> Geometry {
        Geometry {
            bounds: Polygon::oriented_rect(Vector2::new(pose.x, pose.y), width, height, pose.rotation),
            move_vector: S::MOVABLE.then(|| Vector2::heading(pose.rotation)),
        }
    }

    fn read_slot(&self) -> RwLockReadGuard<'_, Slot<S>> {
        self.slot.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_slot(&self) -> RwLockWriteGuard<'_, Slot<S>> {
        self.slot.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A tank.
#[derive(Debug)]
pub struct Agent {
    owner: PeerId,
    name: String,
    body: Body<AgentState>,
}

impl Agent {
    pub fn new(owner: PeerId, name: impl Into<String>, width: f32, height: f32, state: AgentState) -> Self {
        Agent {
            owner,
            name: name.into(),
            body: Body::new(width, height, state),
        }
    }

    pub fn id(&self) -> EntityId {
        self.body.id()
    }

    pub fn owner(&self) -> &PeerId {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn body(&self) -> &Body<AgentState> {
        &self.body
    }

    pub fn state(&self) -> Arc<AgentState> {
        self.body.state()
    }

    pub fn set_turret_rotation(&self, turret_rotation: f32) -> bool {
        self.body.transform(
            |state| state.turret_rotation != turret_rotation,
            |state| state.turret_rotation = turret_rotation,
        )
    }

    pub fn fired(&self, projectile: &Projectile) -> bool {
        projectile.agent_id() == self.id()
    }
}

/// A bullet, always owned by the peer of the agent that fired it.
#[derive(Debug)]
pub struct Projectile {
    owner: PeerId,
    agent_id: EntityId,
    body: Body<ProjectileState>,
}

impl Projectile {
    pub fn new(owner: PeerId, agent_id: EntityId, width: f32, height: f32, state: ProjectileState) -> Self {
        Projectile {
            owner,
            agent_id,
            body: Body::new(width, height, state),
        }
    }

    pub fn id(&self) -> EntityId {
        self.body.id()
    }

    pub fn owner(&self) -> &PeerId {
        &self.owner
    }

    /// The agent that fired this projectile.
    pub fn agent_id(&self) -> EntityId {
        self.agent_id
    }

    pub fn body(&self) -> &Body<ProjectileState> {
        &self.body
    }

    pub fn state(&self) -> Arc<ProjectileState> {
        self.body.state()
    }
}

#[derive(Debug)]
pub struct Obstacle {
    owner: PeerId,
    body: Body<ObstacleState>,
}

impl Obstacle {
    pub fn new(owner: PeerId, width: f32, height: f32, state: ObstacleState) -> Self {
        Obstacle {
            owner,
            body: Body::new(width, height, state),
        }
    }

    pub fn id(&self) -> EntityId {
        self.body.id()
    }

    pub fn owner(&self) -> &PeerId {
        &self.owner
    }

    pub fn body(&self) -> &Body<ObstacleState> {
        &self.body
    }

    pub fn state(&self) -> Arc<ObstacleState> {
        self.body.state()
    }
}

/// Any replicated entity.
#[derive(Debug, Clone)]
pub enum Entity {
    Agent(Arc<Agent>),
    Projectile(Arc<Projectile>),
    Obstacle(Arc<Obstacle>),
}

impl Entity {
    pub fn id(&self) -> EntityId {
        match self {
            Entity::Agent(agent) => agent.id(),
            Entity::Projectile(projectile) => projectile.id(),
            Entity::Obstacle(obstacle) => obstacle.id(),
        }
    }

    pub fn owner(&self) -> &PeerId {
        match self {
            Entity::Agent(agent) => agent.owner(),
            Entity::Projectile(projectile) => projectile.owner(),
            Entity::Obstacle(obstacle) => obstacle.owner(),
        }
    }

    pub fn geometry(&self) -> Arc<Geometry> {
        match self {
            Entity::Agent(agent) => agent.body().geometry(),
            Entity::Projectile(projectile) => projectile.body().geometry(),
            Entity::Obstacle(obstacle) => obstacle.body().geometry(),
        }
    }
}
