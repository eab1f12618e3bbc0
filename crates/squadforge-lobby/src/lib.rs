//! Squad lobby coordination for Squadforge.
//!
//! Each squad runs as an isolated Tokio task (actor model) that applies
//! commands one at a time, in arrival order. Slow work never runs on the
//! actor itself: reconnection grace windows and match handoff live in
//! background tasks that report back through the same queue.
//!
//! # Key types
//!
//! - [`SquadState`]: members, owner, aggregate readiness, start flag
//! - [`SquadCommand`]: the closed set of state transitions
//! - [`ReconnectionSupervisor`]: per-member cancellable grace timers
//! - [`MatchHost`]: the external match-hosting service, and
//!   [`InMemoryMatchHost`] as a local stand-in
//! - [`SquadHandle`]: send commands to a running squad actor
//! - [`SquadManager`]: opens, routes to, and retires squads

mod command;
mod config;
mod error;
mod handoff;
mod host;
mod manager;
mod room;
mod state;
mod supervisor;
mod token;

pub use command::{CommandContext, Effect, SquadCommand};
pub use config::{LobbyPhase, SquadConfig};
pub use error::SquadError;
pub use handoff::{
    HandoffFailure, HandoffOutcome, HandoffPlan, RetryPolicy, SeatRequest, hand_off,
};
pub use host::{
    HostError, InMemoryMatchHost, InstanceFilter, InstanceOptions, MatchHost,
    MatchInstance, MemberSettings,
};
pub use manager::{SquadManager, open_squads};
pub use room::{ClientSender, JoinTicket, SquadHandle, SquadInfo};
pub use state::{SquadMember, SquadState};
pub use supervisor::{GraceExpiry, ReconnectionSupervisor};
