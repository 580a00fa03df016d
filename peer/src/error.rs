use shared::ProtocolError;
use thiserror::Error;

/// Failures reported by the group transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("could not join room {room}: {reason}")]
    Connect { room: String, reason: String },

    #[error("transport is not connected")]
    Closed,

    #[error("failed to send message: {0}")]
    Send(String),

    #[error("state transfer failed: {0}")]
    StateTransfer(String),
}

/// Errors surfaced by the distributed world.
///
/// Transport and protocol failures end the session. The remaining variants
/// are misuse of the session lifecycle.
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error("malformed payload: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("already connected")]
    AlreadyConnected,

    #[error("not connected")]
    NotConnected,

    #[error("no world: bootstrap has not completed")]
    NoWorld,

    #[error("world already exists")]
    WorldExists,

    #[error("unknown agent {0}")]
    UnknownAgent(shared::EntityId),

    #[error("session failed: {0}")]
    SessionFailed(String),
}
