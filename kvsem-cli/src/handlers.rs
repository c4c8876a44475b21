use serde::{Deserialize, Serialize};

// ─── Validation Helpers ─────────────────────────────────────────────────────

/// Keys are non-empty and never start with `/` once routed.
pub fn validate_key(key: &str) -> Result<(), String> {
    if key.is_empty() {
        return Err("Missing key name".to_string());
    }
    if key.contains("//") {
        return Err(format!("Invalid key '{}': empty path segment", key));
    }
    Ok(())
}

/// Consul treats a present-but-empty flag (`?recurse`) as set.
pub fn flag_set(flag: &Option<String>) -> bool {
    match flag.as_deref() {
        None => false,
        Some(value) => !matches!(value, "false" | "0"),
    }
}

// ─── Query Types ────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct KvGetQuery {
    pub recurse: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct KvPutQuery {
    pub acquire: Option<String>,
    pub cas: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct KvDeleteQuery {
    pub recurse: Option<String>,
}

// ─── Response Types ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub sessions: usize,
    pub version: String,
}
