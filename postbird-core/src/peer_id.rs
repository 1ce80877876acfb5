//! Peer identifier generation.

use rand::distr::Alphanumeric;
use rand::Rng;

/// Length of generated peer identifiers.
pub const PEER_ID_LEN: usize = 17;

/// Generates a random identifier drawn from `[A-Za-z0-9]`.
///
/// Identifiers are not guaranteed to be unique; the peer registry redraws
/// on collision with a live peer.
pub fn generate_peer_id() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(PEER_ID_LEN)
        .map(char::from)
        .collect()
}
