/// # bucket-migrate CLI Interface (Module)
///
/// This module implements the CLI surface of bucket-migrate: command parsing,
/// wiring the S3 and cache adapters into the core pipeline, and printing results.
///
/// All migration logic (listing, fingerprinting, copying, recording) lives in the
/// [`bucket-migrate-core`] crate. This module is strictly CLI glue.
///
/// ## Commands
/// - `migrate`: copy every new or changed object under a prefix and print the summary.
/// - `audit`: list the live transfer records.
/// - `forget`: delete one transfer record so the object is copied again next run.
///
/// ## How To Use
/// - For command-line users: use the installed `bucket-migrate` binary with `--help`.
/// - For programmatic/integration use: call [`run`] with a constructed [`Cli`].
///
/// [`bucket-migrate-core`]: ../../bucket_migrate_core/
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use bucket_migrate_core::contract::CacheBackend;
use bucket_migrate_core::fingerprint::Fingerprint;
use bucket_migrate_core::migrate::{MigrateRequest, Migrator};
use bucket_migrate_core::store::FingerprintStore;
use clap::{Parser, Subcommand};
use futures::stream::{self, Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cache::CliCache;
use crate::load_config::{destination_credentials_from_env, load_config, CliConfig};
use crate::report::{render_records, render_summary};
use crate::storage::{S3DestinationStore, S3SourceStore};

/// CLI for bucket-migrate: one-way, idempotent bucket-to-bucket object migration.
#[derive(Parser)]
#[clap(
    name = "bucket-migrate",
    version,
    about = "Migrate objects from an S3 bucket to an S3-compatible destination, skipping objects already migrated"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Copy every new or changed object under the configured prefix
    Migrate {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Override `source.prefix`
        #[clap(long)]
        prefix: Option<String>,
        /// Copy objects even if they were migrated before
        #[clap(long)]
        force: bool,
        /// Print the summary as JSON
        #[clap(long)]
        json: bool,
    },
    /// List all live transfer records
    Audit {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Print the records as JSON
        #[clap(long)]
        json: bool,
    },
    /// Delete one transfer record so its object is copied again
    Forget {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Hex fingerprint of the record to delete
        #[clap(long)]
        fingerprint: String,
    },
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    // Emit a top-level 'trace_initialised' event at the very start
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Migrate {
            config,
            prefix,
            force,
            json,
        } => migrate(config, prefix, force, json).await,
        Commands::Audit { config, json } => audit(config, json).await,
        Commands::Forget {
            config,
            fingerprint,
        } => forget(config, fingerprint).await,
    }
}

async fn open_fingerprints(config: &CliConfig) -> Result<FingerprintStore<CliCache>> {
    let response_timeout = Duration::from_millis(config.cache.response_timeout_ms);
    let backend = CliCache::open(&config.cache.url, response_timeout)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to connect to the fingerprint cache");
            anyhow::Error::new(e).context("Failed to connect to the fingerprint cache")
        })?;
    Ok(FingerprintStore::new(backend, config.cache.key_prefix.clone()))
}

/// Exit status used when a second interrupt aborts the process.
const ABORT_EXIT_CODE: i32 = 130;

/// Cancels `cancel` on the first interrupt. Returns `true` if a second
/// interrupt arrives, `false` if the interrupt source ends first.
async fn watch_interrupts<S>(interrupts: S, cancel: CancellationToken) -> bool
where
    S: Stream<Item = ()>,
{
    let mut interrupts = std::pin::pin!(interrupts);
    if interrupts.next().await.is_none() {
        return false;
    }
    warn!("Interrupt received, finishing objects in flight; interrupt again to abort");
    cancel.cancel();
    interrupts.next().await.is_some()
}

fn ctrl_c_events() -> impl Stream<Item = ()> {
    stream::unfold((), |()| async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => Some(((), ())),
            Err(e) => {
                warn!(error = %e, "Cannot listen for interrupts");
                None
            }
        }
    })
}

async fn close_fingerprints<C: CacheBackend>(store: &FingerprintStore<C>) {
    if let Err(e) = store.close().await {
        warn!(error = %e, "Closing fingerprint store failed");
    }
}

async fn migrate(config_path: PathBuf, prefix: Option<String>, force: bool, json: bool) -> Result<()> {
    let config = load_config(&config_path)?;
    // Credentials are validated before any connection is opened.
    let credentials = destination_credentials_from_env()?;
    let options = config.migrate_options();
    options.trace_loaded();

    let source = S3SourceStore::from_config(&config.source).await;
    let destination = S3DestinationStore::from_config(&config.destination, &credentials);
    let fingerprints = open_fingerprints(&config).await?;

    let request = MigrateRequest {
        source_bucket: config.source.bucket.clone(),
        prefix: prefix.unwrap_or_else(|| config.source.prefix.clone()),
        force_update: force || config.transfer.force_update,
    };
    info!(command = "migrate", bucket = %request.source_bucket, prefix = %request.prefix, "Starting migration");

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    let interrupt = tokio::spawn(async move {
        if watch_interrupts(ctrl_c_events(), on_interrupt).await {
            error!("Second interrupt received, aborting");
            std::process::exit(ABORT_EXIT_CODE);
        }
    });

    let result = Migrator::new(source, destination, fingerprints, options)
        .run(&request, cancel)
        .await;
    interrupt.abort();

    let summary = match result {
        Ok(summary) => summary,
        Err(e) => {
            error!(command = "migrate", error = %e, "Migration failed");
            return Err(anyhow::Error::new(e));
        }
    };
    info!(command = "migrate", total = summary.total_processed(), "Migration finished");

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print!("{}", render_summary(&summary));
    }
    Ok(())
}

async fn audit(config_path: PathBuf, json: bool) -> Result<()> {
    let config = load_config(&config_path)?;
    let fingerprints = open_fingerprints(&config).await?;
    let records = fingerprints.list_all().await;
    close_fingerprints(&fingerprints).await;

    let records = records.map_err(|e| {
        error!(command = "audit", error = %e, "Listing transfer records failed");
        anyhow::Error::new(e)
    })?;
    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else {
        print!("{}", render_records(&records));
    }
    Ok(())
}

async fn forget(config_path: PathBuf, fingerprint: String) -> Result<()> {
    let config = load_config(&config_path)?;
    let fingerprints = open_fingerprints(&config).await?;
    let fingerprint = Fingerprint::from_hex(fingerprint);
    let result = fingerprints.forget(&fingerprint).await;
    close_fingerprints(&fingerprints).await;

    result.map_err(|e| {
        error!(command = "forget", error = %e, "Deleting transfer record failed");
        anyhow::Error::new(e)
    })?;
    println!("Forgot {fingerprint}");
    Ok(())
}
