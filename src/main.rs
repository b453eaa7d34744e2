// ABOUTME: CLI entry point for sqlite-rowsync
// ABOUTME: Parses commands and routes to the synchronization provider

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sqlite_rowsync::{
    anchors, Anchor, ChangeItem, ChangeSet, ConflictResolution, SyncConfig, SyncProvider,
    TableConfig,
};

#[derive(Parser)]
#[command(name = "sqlite-rowsync")]
#[command(about = "Bidirectional row-level synchronization for SQLite databases", long_about = None)]
#[command(version)]
struct Cli {
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install the change-log and tracking triggers in a database
    Init {
        /// Path to the SQLite database
        #[arg(long)]
        db: String,
        /// Table to track (repeatable)
        #[arg(long = "table", required = true)]
        tables: Vec<String>,
    },
    /// Show the current change-log version and pending entry count
    Status {
        #[arg(long)]
        db: String,
        #[arg(long = "table", required = true)]
        tables: Vec<String>,
        /// Count entries newer than this version
        #[arg(long, default_value_t = 0)]
        since: i64,
    },
    /// Print the changes recorded since a version, as JSON
    Changes {
        #[arg(long)]
        db: String,
        #[arg(long = "table", required = true)]
        tables: Vec<String>,
        #[arg(long, default_value_t = 0)]
        since: i64,
    },
    /// Print every tracked row as an insert change set, as JSON
    Snapshot {
        #[arg(long)]
        db: String,
        #[arg(long = "table", required = true)]
        tables: Vec<String>,
    },
    /// Pull changes from a source database and apply them to a target
    Sync {
        #[arg(long)]
        source: String,
        #[arg(long)]
        target: String,
        #[arg(long = "table", required = true)]
        tables: Vec<String>,
        /// Apply incoming updates and deletes even when the target row
        /// has newer local changes
        #[arg(long)]
        force: bool,
    },
}

fn provider_for(db: &str, tables: &[String]) -> Result<SyncProvider> {
    let declarations = tables.iter().map(|name| TableConfig::new(name.as_str())).collect();
    let config = SyncConfig::new(db, declarations).context("invalid configuration")?;
    Ok(SyncProvider::new(config))
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init { db, tables } => {
            let provider = provider_for(&db, &tables)?;
            provider
                .initialize()
                .with_context(|| format!("failed to initialize '{db}'"))?;
            let anchor = provider.current_anchor()?;
            println!(
                "Initialized change tracking for {} tables in {} (version {})",
                tables.len(),
                db,
                anchor.version
            );
        }
        Commands::Status { db, tables, since } => {
            let provider = provider_for(&db, &tables)?;
            provider.initialize()?;
            let anchor = provider.current_anchor()?;
            let pending = provider.pending_since(&Anchor::sqlite(since))?;
            println!("Database: {db}");
            println!("Current version: {}", anchor.version);
            println!("Entries newer than version {since}: {pending}");
        }
        Commands::Changes { db, tables, since } => {
            let provider = provider_for(&db, &tables)?;
            let change_set = provider.get_incremental_changes(&Anchor::sqlite(since))?;
            println!("{}", serde_json::to_string_pretty(&change_set)?);
        }
        Commands::Snapshot { db, tables } => {
            let provider = provider_for(&db, &tables)?;
            let change_set = provider.get_initial_set()?;
            println!("{}", serde_json::to_string_pretty(&change_set)?);
        }
        Commands::Sync {
            source,
            target,
            tables,
            force,
        } => {
            let source_provider = provider_for(&source, &tables)?;
            let target_provider = provider_for(&target, &tables)?;

            let mut store = anchors::load()?;
            let pair = store.pair(&source, &target);

            let pulled = source_provider
                .get_incremental_changes(&Anchor::sqlite(pair.pulled))
                .with_context(|| format!("failed to extract changes from '{source}'"))?;

            if pulled.is_empty() {
                println!("No changes in {source} since version {}", pair.pulled);
            }

            let mut force_all = |item: &ChangeItem| -> ConflictResolution {
                tracing::warn!(
                    "Forcing conflicting {:?} on '{}'",
                    item.change_type,
                    item.qualified_table()
                );
                ConflictResolution::ForceWrite
            };
            let resolver: Option<&mut dyn FnMut(&ChangeItem) -> ConflictResolution> =
                if force { Some(&mut force_all) } else { None };

            // Conflict detection on the target compares against the
            // target version we saw on the previous apply, not against
            // the source's extraction anchor
            let outgoing = ChangeSet {
                anchor: Anchor::sqlite(pair.applied),
                items: pulled.items,
            };
            let applied = target_provider
                .apply_changes(&outgoing, resolver)
                .with_context(|| format!("failed to apply changes to '{target}'"))?;

            store.record(
                &source,
                &target,
                anchors::PairAnchors {
                    pulled: pulled.anchor.version,
                    applied: applied.version,
                },
            );
            anchors::save(&store)?;

            println!(
                "Applied {} changes from {} (version {}) to {} (version {})",
                outgoing.items.len(),
                source,
                pulled.anchor.version,
                target,
                applied.version
            );
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log.clone()));

    // Keep stdout clean for the JSON-emitting subcommands
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    run(cli)
}
