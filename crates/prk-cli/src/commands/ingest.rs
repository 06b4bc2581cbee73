//! `prk ingest`: decode one feed file and reconcile it into the store.
//!
//! Skipped records (malformed, unknown code, validation, conflict) are
//! counted and logged; only file, decode-structure, and store failures make
//! the command fail.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;
use prk_config::{report_unused_keys, secrets::resolve_secrets_for_mode, ConfigMode, UnusedKeyPolicy};
use prk_db::{MemoryTransactionStore, PgTransactionStore};
use prk_feed::{decode_file, FeedFormat, FeedKind};
use prk_reconcile::TransactionStore;
use prk_runtime::{BatchReport, Reconciler, RuntimeSettings};
use prk_schemas::Parking;
use serde::Serialize;
use tracing::{info, warn};

use super::{load_config, max_connections};

#[derive(Debug, Args)]
pub struct IngestArgs {
    /// Feed file to reconcile
    #[arg(long)]
    pub file: PathBuf,

    /// exit | payment | credential | transit (or saidas | pagamentos | credenciados | transactions)
    #[arg(long)]
    pub kind: String,

    /// csv | xml; inferred from the file extension when omitted
    #[arg(long)]
    pub format: Option<String>,

    #[arg(long = "parking-id")]
    pub parking_id: i64,

    #[arg(long = "parking-name")]
    pub parking_name: String,

    #[arg(long = "parking-slug")]
    pub parking_slug: String,

    /// YAML layers in merge order (repeatable)
    #[arg(long = "config")]
    pub config: Vec<String>,

    /// Reconcile against an empty in-memory store; nothing is written
    #[arg(long = "dry-run", default_value_t = false)]
    pub dry_run: bool,

    /// Print the report as JSON instead of key=value lines
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
pub struct IngestOutcome {
    pub config_hash: String,
    pub kind: FeedKind,
    pub format: &'static str,
    pub dry_run: bool,
    pub report: BatchReport,
    pub skipped: usize,
}

impl IngestOutcome {
    pub fn print(&self, json: bool) -> Result<()> {
        if json {
            let s = serde_json::to_string_pretty(self).context("serialize ingest report")?;
            println!("{s}");
            return Ok(());
        }

        let r = &self.report;
        println!("config_hash={}", self.config_hash);
        println!("kind={} format={} dry_run={}", self.kind, self.format, self.dry_run);
        println!("records={}", r.records);
        println!("created={}", r.created);
        println!("updated={}", r.updated);
        println!("replaced={}", r.replaced);
        println!("fanned_out={}", r.fanned_out);
        println!("malformed={}", r.malformed);
        println!("unknown_code={}", r.unknown_code);
        println!("validation_failures={}", r.validation_failures);
        println!("conflicts={}", r.conflicts);
        println!("duplicate_key={}", r.duplicate_key);
        println!("decode_rejects={}", r.decode_rejects);
        println!("skipped={}", self.skipped);
        Ok(())
    }
}

pub async fn run(args: &IngestArgs) -> Result<IngestOutcome> {
    let mode = if args.dry_run {
        ConfigMode::DryRun
    } else {
        ConfigMode::Ingest
    };

    let loaded = load_config(&args.config)?;
    let unused = report_unused_keys(mode, &loaded.config_json, UnusedKeyPolicy::Warn)?;
    if !unused.is_clean() {
        warn!(
            mode = mode.as_str(),
            unused = ?unused.unused_leaf_pointers,
            "config keys not read by this command"
        );
    }
    let secrets = resolve_secrets_for_mode(&loaded.config_json, mode)?;
    let settings = RuntimeSettings::from_config_json(&loaded.config_json)
        .context("invalid engine/runtime config")?;

    let kind = FeedKind::parse(&args.kind)?;
    let format = match &args.format {
        Some(f) => FeedFormat::parse(f)?,
        None => FeedFormat::infer(&args.file, kind),
    };

    let feed = decode_file(&args.file, kind, format)
        .with_context(|| format!("decode {} feed '{}'", kind, args.file.display()))?;

    let store: Arc<dyn TransactionStore> = if args.dry_run {
        Arc::new(MemoryTransactionStore::new())
    } else {
        let url = secrets
            .database_url
            .clone()
            .with_context(|| format!("missing env var {}", secrets.database_url_env))?;
        let pool = prk_db::connect(&url, max_connections(&loaded.config_json)?).await?;
        prk_db::migrate(&pool).await?;
        Arc::new(PgTransactionStore::new(pool))
    };

    let parking = Parking::new(args.parking_id, &args.parking_name, &args.parking_slug);
    info!(
        config_hash = %loaded.config_hash,
        kind = kind.as_str(),
        format = format.as_str(),
        parking_id = parking.id,
        records = feed.records.len(),
        rejected = feed.rejected.len(),
        workers = settings.workers,
        dry_run = args.dry_run,
        "ingest start"
    );

    let reconciler = Reconciler::new(store, parking, settings);
    let report = tokio::select! {
        res = reconciler.run_batch(kind, feed) => res?,
        _ = tokio::signal::ctrl_c() => bail!("ingest interrupted; batch abandoned"),
    };

    let skipped = report.skipped();
    info!(
        created = report.created,
        updated = report.updated,
        replaced = report.replaced,
        skipped,
        "ingest done"
    );

    Ok(IngestOutcome {
        config_hash: loaded.config_hash,
        kind,
        format: format.as_str(),
        dry_run: args.dry_run,
        report,
        skipped,
    })
}
