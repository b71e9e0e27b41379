//! Cache keys for stage executions.

use crate::core::StageId;
use sha2::{Digest, Sha256};

/// Prefix that versions the key layout.
const KEY_PREFIX: &str = "gateflow-cache-v1";

/// Hashes the configuration payload.
///
/// `serde_json` objects keep their keys sorted, so the encoding is
/// canonical for equal values.
#[must_use]
pub fn hash_config(config: &serde_json::Value) -> String {
    let json = serde_json::to_string(config).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    hex::encode(hasher.finalize())
}

/// Computes the cache key of one stage execution.
///
/// The key covers the stage id, its configuration, the identities of the
/// artifacts bound to its inputs (sorted by input name) and the
/// fingerprint of any external input the stage reads.
#[must_use]
pub fn cache_key(
    stage: &StageId,
    config: &serde_json::Value,
    inputs: &[(String, Option<String>)],
    fingerprint: Option<&str>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(KEY_PREFIX.as_bytes());
    hasher.update(b"\0stage:");
    hasher.update(stage.as_str().as_bytes());
    hasher.update(b"\0config:");
    hasher.update(hash_config(config).as_bytes());
    for (name, artifact) in inputs {
        hasher.update(b"\0input:");
        hasher.update(name.as_bytes());
        hasher.update(b"=");
        hasher.update(artifact.as_deref().unwrap_or("-").as_bytes());
    }
    hasher.update(b"\0fingerprint:");
    hasher.update(fingerprint.unwrap_or("-").as_bytes());
    hex::encode(hasher.finalize())
}
