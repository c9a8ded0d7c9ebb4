//! SHA-256 helpers for uploads

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of an in-memory upload
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Returns true if `s` is exactly 64 ASCII hex characters.
pub fn is_valid_sha256(s: &str) -> bool {
    s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit())
}
