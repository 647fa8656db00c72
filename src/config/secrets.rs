//! Secret handling utilities.
//!
//! Re-exports secrecy types and provides helpers for comparing
//! client-supplied credentials against configured secrets.

pub use secrecy::{ExposeSecret, SecretString};

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of a secret. Clients send this instead of the raw key.
pub fn sha256_hex(secret: &SecretString) -> String {
    hex::encode(Sha256::digest(secret.expose_secret().as_bytes()))
}

/// Compare two strings without short-circuiting on the first mismatch.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
