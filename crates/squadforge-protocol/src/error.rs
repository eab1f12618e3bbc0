//! Error types for the protocol layer.

/// Errors raised while turning frames into messages and back.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// A value could not be serialized.
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// A frame could not be parsed: malformed JSON, a missing field, or an
    /// unknown intent tag.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The frame parsed but carries something the receiver cannot accept,
    /// e.g. a server message arriving from a client.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
