//! Byte codecs for envelopes and messages.
//!
//! The lobby never looks at bytes. Squads exchange typed values
//! ([`ClientIntent`](crate::ClientIntent), [`ServerMessage`](crate::ServerMessage))
//! and whoever owns a connection converts them at the edge with a
//! [`Codec`]. Keeping serialization behind a trait means the wire format
//! can change without touching squad logic, and the gateway can be generic
//! over it.
//!
//! [`JsonCodec`] is the only implementation today. It is what browser and
//! engine clients expect, and a JSON frame can be read straight out of a
//! log line when a client misbehaves. A compact binary codec would plug in
//! the same way.

use serde::{de::DeserializeOwned, Serialize};

use crate::ProtocolError;

/// Converts serde types to frames and back.
///
/// ## Bounds
///
/// One codec value is shared by every client connection of a gateway and
/// cloned into each outbound pump task, which Tokio may run on any worker
/// thread. Hence `Send + Sync`, and `'static`: a codec owns whatever
/// configuration it needs and borrows nothing from its creator.
///
/// ## Generic methods
///
/// Both methods are generic over the value, so the same codec handles
/// whole [`Envelope`](crate::Envelope)s as well as bare payloads in tests.
/// Decoding asks for `DeserializeOwned` rather than `Deserialize<'de>`:
/// the result must not borrow from the frame, because the frame buffer is
/// dropped as soon as the intent has been routed.
pub trait Codec: Send + Sync + 'static {
    /// Serializes `value` into a frame.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Encode`] if the value cannot be represented
    /// in this format.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Parses a frame into `T`.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Decode`] for malformed or truncated input,
    /// and for well-formed input that does not match `T`, such as an intent
    /// with an unknown `type` tag.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

/// JSON frames via `serde_json`.
///
/// Enum payloads are internally tagged (`{"type": "Ready", "ready": true}`),
/// which is the shape hand-written clients find easiest to produce. The
/// codec sits behind the default `json` feature so a build that only needs
/// the types can leave `serde_json` out.
///
/// ```rust
/// use squadforge_protocol::{ClientIntent, Codec, Delivery, Envelope, JsonCodec, Payload};
///
/// let codec = JsonCodec;
/// let frame = Envelope {
///     seq: 3,
///     timestamp: 1200,
///     delivery: Delivery::ReliableOrdered,
///     channel: None,
///     payload: Payload::Intent(ClientIntent::Ready { ready: true }),
/// };
///
/// let bytes = codec.encode(&frame).unwrap();
/// let back: Envelope = codec.decode(&bytes).unwrap();
/// assert_eq!(frame, back);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}
