//! Random secrets handed to clients.

use rand::Rng;

/// 32 lowercase hex characters (128 bits of entropy). Used for reconnect
/// tokens and seat tokens.
pub(crate) fn generate_token() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
