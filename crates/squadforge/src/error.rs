//! Unified error type for the Squadforge façade.

use squadforge_lobby::SquadError;
use squadforge_protocol::ProtocolError;

/// Wraps every crate-specific error so callers of the `squadforge` crate
/// handle a single type; `?` converts through the `#[from]` impls.
#[derive(Debug, thiserror::Error)]
pub enum SquadforgeError {
    /// A frame could not be encoded or decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A squad refused the operation or is gone. Match host failures never
    /// surface here: they end a handoff and reach clients as `StartFailed`.
    #[error(transparent)]
    Squad(#[from] SquadError),
}

impl SquadforgeError {
    /// Status code reported to the client.
    pub fn code(&self) -> u16 {
        match self {
            Self::Protocol(_) => 400,
            Self::Squad(e) => e.code(),
        }
    }
}
