//! Content hashing helpers.
//!
//! Two hash forms exist side by side: whole-file hashes are bare lowercase
//! hex, position source hashes carry a `"sha256:"` prefix. Callers that
//! compare across the boundary must normalize with [`with_prefix`] /
//! [`strip_prefix`].

use std::fs;
use std::path::Path;

use graft_types::{Error, Result, SHA256_PREFIX};
use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of a byte slice.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// `"sha256:" + hex` of a byte slice, the position source-hash form.
pub fn sha256_prefixed(bytes: &[u8]) -> String {
    format!("{SHA256_PREFIX}{}", sha256_hex(bytes))
}

/// Lowercase hex SHA-256 of a file's bytes.
///
/// A missing file surfaces as `Error::Io` with `NotFound`, which callers
/// distinguish via [`Error::is_not_found`].
pub fn file_sha256_hex(path: &Path) -> Result<String> {
    let bytes = fs::read(path).map_err(|e| Error::io(path, e))?;
    Ok(sha256_hex(&bytes))
}

/// Ensure the `"sha256:"` prefix is present.
pub fn with_prefix(hash: &str) -> String {
    if hash.starts_with(SHA256_PREFIX) {
        hash.to_string()
    } else {
        format!("{SHA256_PREFIX}{hash}")
    }
}

/// Strip the `"sha256:"` prefix when present.
pub fn strip_prefix(hash: &str) -> &str {
    hash.strip_prefix(SHA256_PREFIX).unwrap_or(hash)
}
