//! Error types for the lobby layer.

use squadforge_protocol::{MemberId, SquadId};

/// Errors raised by squad commands and squad/manager operations.
#[derive(Debug, thiserror::Error)]
pub enum SquadError {
    /// The command names a member that is not in the squad.
    #[error("member {0} not found")]
    MemberNotFound(MemberId),

    /// A member with this id is already in the squad.
    #[error("member {0} already joined")]
    AlreadyJoined(MemberId),

    /// The member's current state does not allow the action, e.g. readying
    /// while disconnected.
    #[error("invalid state for member {member}: {reason}")]
    InvalidState { member: MemberId, reason: String },

    /// The roster is at its configured bound.
    #[error("squad {0} is full")]
    SquadFull(SquadId),

    /// The squad has started (or is handing off) and refuses roster changes.
    #[error("squad {0} has already started")]
    Locked(SquadId),

    /// No squad with this id is registered.
    #[error("squad {0} not found")]
    NotFound(SquadId),

    /// The squad actor's queue is closed.
    #[error("squad {0} is unavailable")]
    Unavailable(SquadId),

    /// The reconnect token does not belong to any member of the squad.
    #[error("invalid reconnect token")]
    InvalidToken,

    /// The member's grace window is over (or was never opened).
    #[error("reconnection window for member {0} has closed")]
    ReconnectExpired(MemberId),

    /// The member already belongs to another squad.
    #[error("member {0} is already in squad {1}")]
    AlreadyInSquad(MemberId, SquadId),
}

impl SquadError {
    /// HTTP-style status code reported to the client that caused the error.
    pub fn code(&self) -> u16 {
        match self {
            Self::MemberNotFound(_) | Self::NotFound(_) => 404,
            Self::InvalidToken => 401,
            Self::InvalidState { .. } => 422,
            Self::ReconnectExpired(_) => 410,
            Self::Unavailable(_) => 503,
            Self::AlreadyJoined(_)
            | Self::SquadFull(_)
            | Self::Locked(_)
            | Self::AlreadyInSquad(..) => 409,
        }
    }
}
