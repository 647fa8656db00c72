//! Request signature and collection session hashes.

use crate::config::secrets::{ExposeSecret, SecretString};
use crate::event::Collection;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha256};

/// `base64(sha256(time "|" hex(md5(body)) "|" shared_secret))`.
pub fn sign(body: &[u8], time: &str, shared_secret: &SecretString) -> String {
    let body_hash = hex::encode(md5::compute(body).0);

    let mut hasher = Sha256::new();
    hasher.update(time.as_bytes());
    hasher.update(b"|");
    hasher.update(body_hash.as_bytes());
    hasher.update(b"|");
    hasher.update(shared_secret.expose_secret().as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// `hex(md5(device_id ":" client_id ":" system_version ":" product_version))`.
pub fn session(collection: &Collection) -> String {
    let joined = format!(
        "{}:{}:{}:{}",
        collection.device_id,
        collection.client_id,
        collection.system_version,
        collection.product_version
    );
    hex::encode(md5::compute(joined.as_bytes()).0)
}
