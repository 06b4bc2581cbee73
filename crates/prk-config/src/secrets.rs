//! Runtime secret resolution.
//!
//! - Config YAML stores only env var NAMES (e.g. `store.url_env: "PRK_DATABASE_URL"`).
//! - Callers invoke [`resolve_secrets_for_mode`] once at startup and pass the
//!   result into constructors.
//! - `Debug` output redacts values; errors name the variable, never its value.
//!
//! | Mode    | Required              |
//! |---------|-----------------------|
//! | INGEST  | database url          |
//! | DRY_RUN | nothing               |

use anyhow::{bail, Result};
use serde_json::Value;

use crate::ConfigMode;

/// Env var holding the PostgreSQL URL when the config does not name one.
pub const DEFAULT_DB_URL_ENV: &str = "PRK_DATABASE_URL";

/// Secrets resolved from the environment for one CLI invocation.
#[derive(Clone)]
pub struct ResolvedSecrets {
    /// PostgreSQL connection URL. `None` if the named env var was absent or empty.
    pub database_url: Option<String>,
    /// Name of the env var the URL was read from (safe to print).
    pub database_url_env: String,
}

impl std::fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSecrets")
            .field(
                "database_url",
                &self.database_url.as_ref().map(|_| "<REDACTED>"),
            )
            .field("database_url_env", &self.database_url_env)
            .finish()
    }
}

fn read_str_at(config: &Value, pointer: &str) -> Option<String> {
    let s = config.pointer(pointer)?.as_str()?;
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn resolve_env(var_name: &str) -> Option<String> {
    match std::env::var(var_name) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

/// Env var name for the database URL: `/store/url_env`, else [`DEFAULT_DB_URL_ENV`].
pub fn database_url_env_name(config_json: &Value) -> String {
    read_str_at(config_json, "/store/url_env").unwrap_or_else(|| DEFAULT_DB_URL_ENV.to_string())
}

/// Resolve secrets for `mode`.
///
/// # Errors
/// `SECRETS_MISSING` naming the env var when INGEST has no database url.
pub fn resolve_secrets_for_mode(config_json: &Value, mode: ConfigMode) -> Result<ResolvedSecrets> {
    let database_url_env = database_url_env_name(config_json);
    let database_url = resolve_env(&database_url_env);

    if mode == ConfigMode::Ingest && database_url.is_none() {
        bail!(
            "SECRETS_MISSING mode={}: required env var '{}' \
             (database url) is not set or empty",
            mode.as_str(),
            database_url_env,
        );
    }

    Ok(ResolvedSecrets {
        database_url,
        database_url_env,
    })
}
