//! # Squadforge
//!
//! Pre-match squad lobbies for session-based games.
//!
//! A squad is a small group of players that gathers, declares readiness,
//! and is handed off together to a separately hosted match. Squadforge runs
//! every squad as its own actor, holds a dropped member's slot for a grace
//! window, and reserves match seats for the whole squad or for nobody.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use squadforge::prelude::*;
//!
//! # async fn run() -> Result<(), SquadforgeError> {
//! squadforge::telemetry::init_tracing("info");
//!
//! let gateway = GatewayBuilder::new().build(Arc::new(InMemoryMatchHost::new()));
//! let squad = gateway.open_squad().await;
//! let mut link = gateway.connect(squad, MemberId(1), Some("Ann".into())).await?;
//!
//! // Feed inbound frames with `gateway.handle_frame(member, &bytes)` and
//! // write every outbound frame back to the client.
//! let _joined = link.recv().await;
//! # Ok(())
//! # }
//! ```

mod error;
mod gateway;
pub mod telemetry;

pub use error::SquadforgeError;
pub use gateway::{ClientLink, Gateway, GatewayBuilder};

/// Everything needed to run squads behind a gateway.
pub mod prelude {
    pub use crate::{ClientLink, Gateway, GatewayBuilder, SquadforgeError};

    pub use squadforge_protocol::{
        ClientIntent, Codec, Delivery, Envelope, JsonCodec, MatchInstanceId, MemberId,
        MemberState, MemberView, Payload, Position, SeatReservation, ServerMessage, SquadId,
        SquadView,
    };

    pub use squadforge_lobby::{
        HostError, InMemoryMatchHost, InstanceFilter, InstanceOptions, JoinTicket, LobbyPhase,
        MatchHost, MatchInstance, MemberSettings, SquadConfig, SquadError, SquadInfo,
        SquadManager,
    };
}
