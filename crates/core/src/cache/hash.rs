//! Payload checksums and share token generation.

use sha2::{Digest, Sha256};

/// SHA-256 hex digest of an uncompressed payload.
pub fn payload_checksum(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

/// Generate an opaque, unguessable share token.
///
/// A v4 UUID supplies the randomness; hashing it keeps the token format
/// independent of the UUID layout.
pub fn new_share_token() -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"relctx-share\n");
    hasher.update(uuid::Uuid::new_v4().as_bytes());
    hex::encode(&hasher.finalize()[..20])
}
