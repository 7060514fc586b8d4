use sha2::{Digest, Sha256};

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Short stable id with a namespacing prefix, e.g. `evt_3fa9c1d2e07b44a1`.
pub fn prefixed_id(prefix: &str, payload: &str) -> String {
    let digest = sha256_hex(payload.as_bytes());
    format!("{}_{}", prefix, &digest[..16])
}
