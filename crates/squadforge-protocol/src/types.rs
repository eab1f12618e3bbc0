//! Protocol types: identities, the lobby model clients observe, and the
//! messages that flow in each direction.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Named channel carrying full lobby snapshots.
pub const STATE_CHANNEL: &str = "state";

/// Named channel carrying seat reservations on a successful start.
pub const RESERVATION_CHANNEL: &str = "battle-royale-matchmaking-reservation";

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Identity of a squad member.
///
/// Issued by whoever owns the client connection (the session id) and stable
/// for the member's whole lifetime, including across a reconnect.
/// Serializes as a plain number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(pub u64);

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "M-{}", self.0)
    }
}

/// Identity of one squad lobby.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SquadId(pub u64);

impl fmt::Display for SquadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}", self.0)
    }
}

/// Identity of a match instance owned by the match-hosting service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatchInstanceId(pub u64);

impl fmt::Display for MatchInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "I-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Lobby model
// ---------------------------------------------------------------------------

/// A point in the lobby's 2-D arrangement area.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Applies a partial update field by field. `None` leaves the current
    /// coordinate untouched.
    pub fn merge(&mut self, update: PositionUpdate) {
        if let Some(x) = update.x {
            self.x = x;
        }
        if let Some(y) = update.y {
            self.y = y;
        }
    }
}

/// A partial position: any omitted coordinate keeps its current value.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PositionUpdate {
    #[serde(default)]
    pub x: Option<f64>,
    #[serde(default)]
    pub y: Option<f64>,
}

/// Readiness of a single member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemberState {
    NotReady,
    Ready,
    /// Connection lost; the slot is held for the reconnection grace window.
    Disconnected,
}

impl fmt::Display for MemberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotReady => write!(f, "NOT_READY"),
            Self::Ready => write!(f, "READY"),
            Self::Disconnected => write!(f, "DISCONNECTED"),
        }
    }
}

/// One member as clients see it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberView {
    pub id: MemberId,
    pub name: String,
    pub pos: Position,
    pub state: MemberState,
}

/// Full lobby snapshot broadcast after every mutating command.
///
/// `members` is sorted by id so two snapshots of the same state compare
/// and serialize identically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SquadView {
    pub members: Vec<MemberView>,
    pub owner: Option<MemberId>,
    pub ready_to_start: bool,
    pub started: bool,
}

impl SquadView {
    /// Looks up a member in the snapshot.
    pub fn member(&self, id: MemberId) -> Option<&MemberView> {
        self.members.iter().find(|m| m.id == id)
    }
}

/// A seat held for one member in a hosted match instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatReservation {
    pub match_instance_id: MatchInstanceId,
    /// Secret the client presents to the match instance to claim its seat.
    pub seat_token: String,
    /// Seconds the seat stays held after it was granted.
    pub expiry: u64,
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// What a squad client can ask for.
///
/// Internally tagged: `{ "type": "Ready", "ready": true }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientIntent {
    /// Take a slot in the squad. `name` falls back to `Member N`.
    Join {
        #[serde(default)]
        name: Option<String>,
    },
    Ready {
        ready: bool,
    },
    /// Partial position update; omitted coordinates are kept.
    Move {
        #[serde(default)]
        x: Option<f64>,
        #[serde(default)]
        y: Option<f64>,
    },
    /// Deliberate leave. Implicit leaves come from the transport on
    /// disconnect and never travel as an intent.
    Leave,
    /// Owner asks to hand the squad off to a match.
    Start,
}

/// What the lobby sends to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Sent once to the joining client. The token lets the same member
    /// reattach after a dropped connection.
    Joined {
        member_id: MemberId,
        reconnect_token: String,
    },
    State(SquadView),
    Reservation(SeatReservation),
    /// Handoff could not reserve every seat; the squad is open again.
    StartFailed {
        reason: String,
    },
    /// A command from this client was rejected. `code` follows HTTP
    /// conventions (404 unknown member, 409 conflict, 422 invalid state).
    Error {
        code: u16,
        message: String,
    },
}

impl ServerMessage {
    /// The named channel this message is delivered on.
    pub fn channel(&self) -> &'static str {
        match self {
            Self::Reservation(_) => RESERVATION_CHANNEL,
            _ => STATE_CHANNEL,
        }
    }
}

/// Delivery guarantee requested for a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub enum Delivery {
    #[default]
    ReliableOrdered,
    /// Latest value wins; suitable for position updates.
    Unreliable,
}

/// Content of an envelope, adjacently tagged so a receiver can reject the
/// wrong direction before looking inside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Payload {
    Intent(ClientIntent),
    Message(ServerMessage),
}

/// Top-level frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Per-direction sequence number.
    pub seq: u64,
    /// Milliseconds since the sender started.
    pub timestamp: u64,
    #[serde(default)]
    pub delivery: Delivery,
    /// Named channel for server messages (see [`ServerMessage::channel`]).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    pub payload: Payload,
}
