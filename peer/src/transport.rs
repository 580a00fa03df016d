//! Boundary to the group-communication layer, and an in-process implementation
//!
//! A transport joins a room, delivers broadcasts to the other members,
//! reports membership views and moves full-state snapshots from an existing
//! member to a joiner. Everything it has to say arrives as a
//! [`TransportEvent`] on one channel, drained by a single task of the
//! distributed world.

use crate::error::TransportError;
use log::{debug, info, warn};
use shared::PeerId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, oneshot};

/// Everything a transport reports to its owner
#[derive(Debug)]
pub enum TransportEvent {
    /// A broadcast from another member
    MessageReceived { sender: PeerId, payload: Vec<u8> },
    /// The current members of the room, in transport order
    ViewChanged { members: Vec<PeerId> },
    /// A joiner wants a snapshot; the encoded snapshot goes into `reply`.
    /// Dropping `reply` fails the joiner's transfer.
    StateTransferRequested { reply: oneshot::Sender<Vec<u8>> },
    /// The snapshot requested through [`GroupTransport::request_state`]
    StateTransferReceived { payload: Vec<u8> },
    /// The transport cannot continue; the session is over
    TransportFailed { reason: String },
}

/// An established membership in a room
#[derive(Debug)]
pub struct Connection {
    pub local_id: PeerId,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Group messaging as consumed by the distributed world.
///
/// Delivery is best effort and unordered. Broadcasts are not looped back to
/// the sender.
pub trait GroupTransport: Send + Sync {
    fn connect(&self, room: &str) -> Result<Connection, TransportError>;

    fn send(&self, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Asks an existing member for a full-state snapshot. The answer arrives
    /// as [`TransportEvent::StateTransferReceived`].
    fn request_state(&self) -> Result<(), TransportError>;

    /// Leaves the room. Closing twice is harmless.
    fn close(&self);
}

struct Member {
    id: PeerId,
    events: mpsc::UnboundedSender<TransportEvent>,
}

#[derive(Default)]
struct Room {
    /// Join order; the first member answers state transfers.
    members: Vec<Member>,
}

impl Room {
    fn view(&self) -> Vec<PeerId> {
        self.members.iter().map(|member| member.id.clone()).collect()
    }

    fn announce_view(&self) {
        let view = self.view();
        for member in &self.members {
            // A member whose receiver is gone is about to close.
            let _ = member.events.send(TransportEvent::ViewChanged {
                members: view.clone(),
            });
        }
    }
}

#[derive(Default)]
struct Hub {
    rooms: HashMap<String, Room>,
    next_peer: u64,
}

/// In-process group: rooms of endpoints exchanging messages over channels.
///
/// Cloning shares the same rooms.
#[derive(Clone, Default)]
pub struct LocalGroup {
    hub: Arc<Mutex<Hub>>,
}

impl LocalGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh, unconnected endpoint on this group.
    pub fn endpoint(&self) -> LocalEndpoint {
        LocalEndpoint {
            group: self.clone(),
            session: Mutex::new(None),
        }
    }

    /// Current members of a room, in join order.
    pub fn members(&self, room: &str) -> Vec<PeerId> {
        self.lock()
            .rooms
            .get(room)
            .map(Room::view)
            .unwrap_or_default()
    }

    /// Reports a failure to one member, as a broken link would.
    pub fn fail(&self, room: &str, peer: &PeerId, reason: &str) -> bool {
        let hub = self.lock();
        let member = hub
            .rooms
            .get(room)
            .and_then(|room| room.members.iter().find(|member| &member.id == peer));
        match member {
            Some(member) => member
                .events
                .send(TransportEvent::TransportFailed {
                    reason: reason.to_string(),
                })
                .is_ok(),
            None => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Hub> {
        self.hub.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Clone)]
struct Session {
    room: String,
    local_id: PeerId,
}

/// One process's membership in a [`LocalGroup`].
pub struct LocalEndpoint {
    group: LocalGroup,
    session: Mutex<Option<Session>>,
}

impl LocalEndpoint {
    fn session(&self) -> Result<Session, TransportError> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(TransportError::Closed)
    }
}

impl GroupTransport for LocalEndpoint {
    fn connect(&self, room: &str) -> Result<Connection, TransportError> {
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        if session.is_some() {
            return Err(TransportError::Connect {
                room: room.to_string(),
                reason: "endpoint already joined a room".to_string(),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let mut hub = self.group.lock();
        hub.next_peer += 1;
        let local_id = PeerId::new(format!("peer-{}", hub.next_peer));

        let members = hub.rooms.entry(room.to_string()).or_default();
        members.members.push(Member {
            id: local_id.clone(),
            events: tx,
        });
        members.announce_view();
        info!("{} joined room {}", local_id, room);

        *session = Some(Session {
            room: room.to_string(),
            local_id: local_id.clone(),
        });
        Ok(Connection {
            local_id,
            events: rx,
        })
    }

    fn send(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        let session = self.session()?;
        let hub = self.group.lock();
        let room = hub.rooms.get(&session.room).ok_or(TransportError::Closed)?;
        for member in room.members.iter().filter(|m| m.id != session.local_id) {
            if member
                .events
                .send(TransportEvent::MessageReceived {
                    sender: session.local_id.clone(),
                    payload: payload.clone(),
                })
                .is_err()
            {
                debug!("Dropping message for departing member {}", member.id);
            }
        }
        Ok(())
    }

    fn request_state(&self) -> Result<(), TransportError> {
        let session = self.session()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TransportError::StateTransfer(e.to_string()))?;

        let hub = self.group.lock();
        let room = hub.rooms.get(&session.room).ok_or(TransportError::Closed)?;
        let requester = room
            .members
            .iter()
            .find(|m| m.id == session.local_id)
            .map(|m| m.events.clone())
            .ok_or(TransportError::Closed)?;
        let Some(coordinator) = room.members.iter().find(|m| m.id != session.local_id) else {
            debug!("{} is alone in {}, nobody to ask for state", session.local_id, session.room);
            return Ok(());
        };

        let (reply, answer) = oneshot::channel();
        coordinator
            .events
            .send(TransportEvent::StateTransferRequested { reply })
            .map_err(|_| TransportError::StateTransfer(format!("{} is gone", coordinator.id)))?;
        debug!("{} asked {} for state", session.local_id, coordinator.id);

        runtime.spawn(async move {
            let event = match answer.await {
                Ok(payload) => TransportEvent::StateTransferReceived { payload },
                Err(_) => TransportEvent::TransportFailed {
                    reason: "state provider gave no snapshot".to_string(),
                },
            };
            if requester.send(event).is_err() {
                warn!("State transfer finished after the requester left");
            }
        });
        Ok(())
    }

    fn close(&self) {
        let Some(session) = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };

        let mut hub = self.group.lock();
        if let Some(room) = hub.rooms.get_mut(&session.room) {
            room.members.retain(|member| member.id != session.local_id);
            if room.members.is_empty() {
                hub.rooms.remove(&session.room);
            } else {
                room.announce_view();
            }
        }
        info!("{} left room {}", session.local_id, session.room);
    }
}

impl Drop for LocalEndpoint {
    fn drop(&mut self) {
        self.close();
    }
}
