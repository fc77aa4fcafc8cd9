// src/fingerprint.rs

//! Deterministic content-addressed cache keys.
//!
//! A fingerprint is the blake3 hex digest of a version byte, the function
//! ref and the canonical JSON of the (already ref-resolved) argument list.
//! Equal `(function_ref, args)` pairs hash to equal keys; anything outside
//! the JSON value set fails with `PardagError::Fingerprint`.

use blake3::Hasher;

use crate::errors::{PardagError, Result};
use crate::value::Value;

/// Bumping this invalidates every existing cache entry.
pub const FINGERPRINT_VERSION: u8 = 1;

pub fn fingerprint(function_ref: &str, args: &[Value]) -> Result<String> {
    for (i, arg) in args.iter().enumerate() {
        arg.check_json_representable().map_err(|msg| {
            PardagError::Fingerprint(format!("argument {i} of '{function_ref}': {msg}"))
        })?;
    }

    let payload = Value::Seq(args.to_vec())
        .canonical_json()
        .map_err(|e| PardagError::Fingerprint(e.to_string()))?;

    let mut hasher = Hasher::new();
    hasher.update(&[FINGERPRINT_VERSION]);
    hasher.update(function_ref.as_bytes());
    // NUL keeps ("f", [1]) distinct from ("f[", "1]")-style splits.
    hasher.update(&[0]);
    hasher.update(payload.as_bytes());

    Ok(hasher.finalize().to_hex().to_string())
}
