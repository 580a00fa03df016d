//! Membership tracking for the peers sharing a world
//!
//! This module keeps track of which peers are known to this process and which
//! entities each of them owns:
//! - Members learned from membership views and from entity ownership
//! - Per-member ownership sets, used to prune a departed peer's entities
//! - Activity timestamps for diagnostics
//!
//! Ownership never moves between peers. When a peer leaves, its agents and
//! projectiles are removed from the world rather than handed to a survivor.

use log::info;
use shared::{EntityId, PeerId};
use std::collections::{HashMap, HashSet};
use std::time::Instant;

/// A peer known to this process and the entities it owns
#[derive(Debug)]
pub struct Member {
    /// Transport-level identity of the peer
    pub id: PeerId,
    /// Last time a message from this peer was handled
    pub last_seen: Instant,
    /// Entities created by this peer that are still alive
    pub owned: HashSet<EntityId>,
}

impl Member {
    /// Creates a member that owns nothing yet and was seen just now
    pub fn new(id: PeerId) -> Self {
        Self {
            id,
            last_seen: Instant::now(),
            owned: HashSet::new(),
        }
    }

    /// Records ownership of an entity and marks the member as active
    pub fn add_owned(&mut self, entity_id: EntityId) -> bool {
        self.last_seen = Instant::now();
        self.owned.insert(entity_id)
    }
}

/// Tracks members of the group and their owned entities
///
/// The tracker is mutated only while holding the replica lock of the
/// distributed world, so it needs no interior synchronization. Every entity
/// id known to the world appears in exactly one member's ownership set until
/// the entity or its owner is removed.
#[derive(Debug, Default)]
pub struct MembershipTracker {
    /// Known members indexed by identity
    members: HashMap<PeerId, Member>,
    /// Member identities of the most recent view, in transport order
    current_view: Vec<PeerId>,
}

impl MembershipTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a member if it is not known yet
    ///
    /// Returns true if the member was added.
    pub fn add_member(&mut self, id: PeerId) -> bool {
        if self.members.contains_key(&id) {
            return false;
        }
        info!("Member {} joined", id);
        self.members.insert(id.clone(), Member::new(id));
        true
    }

    /// Removes a member and returns the ids of the entities it owned
    ///
    /// Returns None if the member was not known.
    pub fn remove_member(&mut self, id: &PeerId) -> Option<HashSet<EntityId>> {
        let member = self.members.remove(id)?;
        info!(
            "Member {} left owning {} entities, last heard from {:.1?} ago",
            id,
            member.owned.len(),
            member.last_seen.elapsed()
        );
        Some(member.owned)
    }

    /// Records that `owner` created `entity_id`
    ///
    /// Owners learned this way are tracked even if no view has mentioned them
    /// yet, e.g. entities received through a state transfer.
    pub fn record_owner(&mut self, owner: &PeerId, entity_id: EntityId) {
        self.members
            .entry(owner.clone())
            .or_insert_with(|| Member::new(owner.clone()))
            .add_owned(entity_id);
    }

    /// Drops an entity from its owner's set, e.g. after a projectile is removed
    pub fn forget_entity(&mut self, owner: &PeerId, entity_id: &EntityId) -> bool {
        match self.members.get_mut(owner) {
            Some(member) => member.owned.remove(entity_id),
            None => false,
        }
    }

    /// Marks a member as active; unknown senders are ignored
    pub fn touch(&mut self, id: &PeerId) {
        if let Some(member) = self.members.get_mut(id) {
            member.last_seen = Instant::now();
        }
    }

    /// Installs a new membership view
    ///
    /// Members in the view that were unknown are added. Known members missing
    /// from the view are removed and returned so the caller can prune their
    /// entities from the world.
    pub fn apply_view(&mut self, view: &[PeerId]) -> Vec<PeerId> {
        let present: HashSet<&PeerId> = view.iter().collect();
        let mut departed: Vec<PeerId> = self
            .members
            .keys()
            .filter(|id| !present.contains(id))
            .cloned()
            .collect();
        departed.sort();

        for id in &departed {
            self.remove_member(id);
        }
        for id in view {
            self.add_member(id.clone());
        }
        self.current_view = view.to_vec();
        departed
    }

    /// Member identities of the most recent view
    pub fn current_view(&self) -> &[PeerId] {
        &self.current_view
    }

    /// Returns the ids of the entities owned by a member
    pub fn owned_by(&self, id: &PeerId) -> Vec<EntityId> {
        self.members
            .get(id)
            .map(|member| member.owned.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.members.contains_key(id)
    }

    /// Returns all known member identities, sorted
    pub fn members(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self.members.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Returns the number of known members
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Returns true if no members are known
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Tests cover member lifecycle, ownership bookkeeping and view changes.
#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn peer(id: &str) -> PeerId {
        PeerId::new(id)
    }

    #[test]
    fn test_member_creation() {
        let member = Member::new(peer("a"));
        assert_eq!(member.id, peer("a"));
        assert!(member.owned.is_empty());
    }

    #[test]
    fn test_member_add_owned_refreshes_last_seen() {
        let mut member = Member::new(peer("a"));
        member.last_seen = Instant::now() - Duration::from_secs(2);
        let id = EntityId::random();

        assert!(member.add_owned(id));
        assert!(!member.add_owned(id));
        assert!(member.last_seen.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_tracker_creation() {
        let tracker = MembershipTracker::new();
        assert!(tracker.is_empty());
        assert_eq!(tracker.len(), 0);
        assert!(tracker.current_view().is_empty());
    }

    #[test]
    fn test_add_and_remove_member() {
        let mut tracker = MembershipTracker::new();
        assert!(tracker.add_member(peer("a")));
        assert!(!tracker.add_member(peer("a")));
        assert_eq!(tracker.len(), 1);

        assert!(tracker.remove_member(&peer("a")).is_some());
        assert!(tracker.remove_member(&peer("a")).is_none());
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_record_owner_adds_unknown_member() {
        let mut tracker = MembershipTracker::new();
        let id = EntityId::random();
        tracker.record_owner(&peer("b"), id);

        assert!(tracker.contains(&peer("b")));
        assert_eq!(tracker.owned_by(&peer("b")), vec![id]);
    }

    #[test]
    fn test_forget_entity() {
        let mut tracker = MembershipTracker::new();
        let id = EntityId::random();
        tracker.record_owner(&peer("a"), id);

        assert!(tracker.forget_entity(&peer("a"), &id));
        assert!(!tracker.forget_entity(&peer("a"), &id));
        assert!(!tracker.forget_entity(&peer("z"), &id));
        assert!(tracker.owned_by(&peer("a")).is_empty());
    }

    #[test]
    fn test_apply_view_reports_departed_members() {
        let mut tracker = MembershipTracker::new();
        tracker.apply_view(&[peer("a"), peer("b")]);
        let b_entity = EntityId::random();
        tracker.record_owner(&peer("b"), b_entity);
        tracker.record_owner(&peer("c"), EntityId::random());

        let departed = tracker.apply_view(&[peer("a")]);

        assert_eq!(departed, vec![peer("b"), peer("c")]);
        assert_eq!(tracker.members(), vec![peer("a")]);
        assert_eq!(tracker.current_view(), &[peer("a")]);
        assert!(tracker.owned_by(&peer("b")).is_empty());
    }

    #[test]
    fn test_apply_view_adds_new_members() {
        let mut tracker = MembershipTracker::new();
        assert!(tracker.apply_view(&[peer("a")]).is_empty());
        assert!(tracker.apply_view(&[peer("a"), peer("b")]).is_empty());
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn test_touch_refreshes_known_member() {
        let mut tracker = MembershipTracker::new();
        tracker.add_member(peer("a"));
        let stale = Instant::now() - Duration::from_secs(5);
        if let Some(member) = tracker.members.get_mut(&peer("a")) {
            member.last_seen = stale;
        }

        tracker.touch(&peer("a"));

        assert!(tracker.members[&peer("a")].last_seen > stale);
    }

    #[test]
    fn test_touch_unknown_member_is_ignored() {
        let mut tracker = MembershipTracker::new();
        tracker.touch(&peer("ghost"));
        assert!(tracker.is_empty());
    }
}
