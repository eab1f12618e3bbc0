//! Wire-level vocabulary for Squadforge.
//!
//! This crate defines what squad clients and the server exchange:
//!
//! - **Identity** ([`MemberId`], [`SquadId`], [`MatchInstanceId`]): opaque
//!   newtypes that travel as plain numbers.
//! - **Lobby model** ([`Position`], [`PositionUpdate`], [`MemberState`],
//!   [`SquadView`]): the state every client sees after each change.
//! - **Messages** ([`ClientIntent`], [`ServerMessage`], [`Envelope`]): the
//!   commands clients send and what the lobby sends back.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): bytes in, bytes out.
//!
//! The protocol layer knows nothing about connections or actors:
//!
//! ```text
//! Transport (bytes) → Protocol (Envelope) → Lobby (squad commands)
//! ```

mod codec;
mod error;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use types::{
    ClientIntent, Delivery, Envelope, MatchInstanceId, MemberId, MemberState,
    MemberView, Payload, Position, PositionUpdate, RESERVATION_CHANNEL,
    STATE_CHANNEL, SeatReservation, ServerMessage, SquadId, SquadView,
};
