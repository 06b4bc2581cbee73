use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use prk_db::PgTransactionStore;
use prk_reconcile::TransactionStore;

mod commands;

use commands::ingest::IngestArgs;

#[derive(Parser)]
#[command(name = "prk")]
#[command(about = "Parking transaction reconciliation CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile one exit / payment / credential / transit feed file
    Ingest(IngestArgs),

    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> site -> overrides...)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Administrative transaction commands
    Tx {
        #[command(subcommand)]
        cmd: TxCmd,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,

    /// Apply embedded SQL migrations.
    Migrate,
}

#[derive(Subcommand)]
enum TxCmd {
    /// Soft-delete a transaction; it stops taking part in matching.
    Delete {
        #[arg(long)]
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // dev-time convenience; absent file is fine
    let _ = dotenvy::from_filename(".env.local");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Ingest(args) => {
            let outcome = commands::ingest::run(&args).await?;
            outcome.print(args.json)?;
        }

        Commands::Db { cmd } => {
            let pool = prk_db::connect_from_env().await?;
            match cmd {
                DbCmd::Status => {
                    let s = prk_db::status(&pool).await?;
                    println!(
                        "db_ok={} has_transactions_table={} live_transactions={}",
                        s.ok, s.has_transactions_table, s.live_transactions
                    );
                }
                DbCmd::Migrate => {
                    prk_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::ConfigHash { paths } => {
            let loaded = commands::load_config(&paths)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::Tx { cmd } => match cmd {
            TxCmd::Delete { id } => {
                let id = commands::parse_uuid(&id)?;
                let pool = prk_db::connect_from_env().await?;
                let store = PgTransactionStore::new(pool);
                let deleted = store
                    .soft_delete(id)
                    .await
                    .with_context(|| format!("soft delete {id}"))?;
                tracing::info!(%id, deleted, "tx delete");
                println!("deleted={} id={}", deleted, id);
            }
        },
    }

    Ok(())
}
