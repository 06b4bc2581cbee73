//! Command handler modules for prk-cli.
//!
//! Shared utilities used by multiple command paths live here.
//! Command-specific logic lives in the submodules.

pub mod ingest;

use anyhow::{anyhow, Context, Result};
use prk_config::LoadedConfig;
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Load `--config` layers in merge order; no layers means built-in defaults.
pub fn load_config(paths: &[String]) -> Result<LoadedConfig> {
    if paths.is_empty() {
        return LoadedConfig::empty();
    }
    let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
    prk_config::load_layered_yaml(&path_refs)
}

/// Pool size from `/store/max_connections`.
pub fn max_connections(config_json: &Value) -> Result<u32> {
    match config_json.pointer("/store/max_connections") {
        None | Some(Value::Null) => Ok(prk_db::DEFAULT_MAX_CONNECTIONS),
        Some(Value::Number(n)) => n
            .as_u64()
            .filter(|n| *n > 0)
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| anyhow!("store.max_connections must be a positive integer (got {n})")),
        Some(other) => Err(anyhow!(
            "store.max_connections must be a positive integer (got {other})"
        )),
    }
}

pub fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s.trim()).with_context(|| format!("invalid uuid '{}'", s))
}
