//! Hashing - SHA-256 fingerprints of executions
//!
//! Same template version + same request must give the same fingerprint, and
//! the same rendered result the same digest.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt::Write;

use crate::execute::ExecutionResult;
use crate::templates::ExecutionRequest;

/// JSON with object keys in byte order at every depth and no whitespace.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(&ordered(serde_json::to_value(value)?))
}

fn ordered(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map.into_iter().map(|(k, v)| (k, ordered(v))).collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(ordered).collect()),
        other => other,
    }
}

/// Lowercase hex SHA-256 over `parts` joined by ':'.
fn digest_parts(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update(b":");
        }
        hasher.update(part.as_bytes());
    }
    hasher.finalize().iter().fold(String::with_capacity(64), |mut out, b| {
        let _ = write!(out, "{:02x}", b);
        out
    })
}

/// sha256(template_id : template_version : canonical request)
pub fn execution_fingerprint(
    template_id: &str,
    template_version: u64,
    request: &ExecutionRequest,
) -> Result<String, serde_json::Error> {
    let canonical = canonical_json(request)?;
    Ok(digest_parts(&[template_id, &template_version.to_string(), &canonical]))
}

/// sha256(canonical result)
pub fn result_digest(result: &ExecutionResult) -> Result<String, serde_json::Error> {
    Ok(digest_parts(&[&canonical_json(result)?]))
}
