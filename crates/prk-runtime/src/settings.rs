//! Engine and runtime knobs read from the canonical config JSON.
//!
//! Every key is optional; an empty document yields the defaults.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use prk_feed::CodePolicy;
use prk_reconcile::{BucketGranularity, EngineRules, ReplacePolicy, RuleTableVersion, RuleTable};
use serde_json::Value;

pub const DEFAULT_WORKERS: usize = 1;
pub const DEFAULT_QUEUE_DEPTH: usize = 256;
pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_CONFLICT_RETRIES: u32 = 0;

const MAX_WORKERS: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeSettings {
    pub rules: EngineRules,
    pub code_policy: CodePolicy,
    /// 1 = one sequential pass; more = shards keyed by (parking, matricula).
    pub workers: usize,
    pub queue_depth: usize,
    pub store_timeout: Duration,
    /// How many times a conflicted event is re-run from a fresh match.
    pub conflict_retries: u32,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            rules: EngineRules::default(),
            code_policy: CodePolicy::default(),
            workers: DEFAULT_WORKERS,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            store_timeout: Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS),
            conflict_retries: DEFAULT_CONFLICT_RETRIES,
        }
    }
}

impl RuntimeSettings {
    /// Build from canonical config JSON (produced by prk-config).
    ///
    /// Reads `/engine/*` and `/runtime/*`; anything else is ignored here and
    /// left to the unused-key report.
    pub fn from_config_json(cfg: &Value) -> Result<Self> {
        let mut s = Self::default();

        if let Some(g) = str_at(cfg, "/engine/granularity")? {
            s.rules.granularity = BucketGranularity::parse(g)
                .ok_or_else(|| anyhow!("engine.granularity must be hour|half_hour (got '{g}')"))?;
        }
        if let Some(v) = str_at(cfg, "/engine/rule_table")? {
            let version = RuleTableVersion::parse(v)
                .ok_or_else(|| anyhow!("engine.rule_table must be v1|v2 (got '{v}')"))?;
            s.rules.rule_table = RuleTable::for_version(version);
        }
        if let Some(p) = str_at(cfg, "/engine/unknown_code_policy")? {
            s.code_policy = CodePolicy::parse(p).ok_or_else(|| {
                anyhow!("engine.unknown_code_policy must be strict|default_to_other (got '{p}')")
            })?;
        }
        if let Some(p) = str_at(cfg, "/engine/replace_policy")? {
            s.rules.replace_policy = ReplacePolicy::parse(p)
                .ok_or_else(|| anyhow!("engine.replace_policy must be insert_new|overwrite (got '{p}')"))?;
        }
        if let Some(o) = str_at(cfg, "/engine/offer_type")? {
            if o.trim().is_empty() {
                return Err(anyhow!("engine.offer_type must not be empty"));
            }
            s.rules.offer_type = o.to_string();
        }
        if let Some(n) = u64_at(cfg, "/engine/max_occupancy_buckets")? {
            if n == 0 {
                return Err(anyhow!("engine.max_occupancy_buckets must be > 0"));
            }
            s.rules.max_occupancy_buckets = usize::try_from(n)
                .context("engine.max_occupancy_buckets does not fit in usize")?;
        }

        if let Some(n) = u64_at(cfg, "/runtime/workers")? {
            let n = n as usize;
            if !(1..=MAX_WORKERS).contains(&n) {
                return Err(anyhow!("runtime.workers out of bounds (1..={MAX_WORKERS}): {n}"));
            }
            s.workers = n;
        }
        if let Some(n) = u64_at(cfg, "/runtime/queue_depth")? {
            if n == 0 {
                return Err(anyhow!("runtime.queue_depth must be > 0"));
            }
            s.queue_depth = n as usize;
        }
        if let Some(ms) = u64_at(cfg, "/runtime/store_timeout_ms")? {
            if ms == 0 {
                return Err(anyhow!("runtime.store_timeout_ms must be > 0"));
            }
            s.store_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = u64_at(cfg, "/runtime/conflict_retries")? {
            s.conflict_retries = u32::try_from(n).context("runtime.conflict_retries too large")?;
        }

        Ok(s)
    }
}

fn str_at<'a>(cfg: &'a Value, pointer: &str) -> Result<Option<&'a str>> {
    match cfg.pointer(pointer) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(other) => Err(anyhow!("{pointer} must be a string (got {other})")),
    }
}

/// Non-negative integer; numeric strings are accepted.
fn u64_at(cfg: &Value, pointer: &str) -> Result<Option<u64>> {
    match cfg.pointer(pointer) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| anyhow!("{pointer} must be a non-negative integer (got {n})")),
        Some(Value::String(s)) => s
            .trim()
            .parse::<u64>()
            .map(Some)
            .with_context(|| format!("{pointer} must be a non-negative integer (got '{s}')")),
        Some(other) => Err(anyhow!("{pointer} must be a non-negative integer (got {other})")),
    }
}
