//! Gzip framing for batch payloads.

use crate::error::{Error, Result};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::io::Write;

/// Gzip `payload` at the default compression level.
pub fn gzip(payload: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(payload.len() / 4), Compression::default());
    encoder
        .write_all(payload)
        .map_err(|e| Error::Convert(format!("gzip failed: {e}")))?;
    encoder
        .finish()
        .map_err(|e| Error::Convert(format!("gzip failed: {e}")))
}

/// File extension for a batch: `json`, `csv`, or with `.gz` appended.
pub fn extension(file_format: &str, compressed: bool) -> String {
    if compressed {
        format!("{file_format}.gz")
    } else {
        file_format.to_string()
    }
}
