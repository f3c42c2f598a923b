//! Health Record CLI
//!
//! Thin wrapper around healthrecord-core for command-line usage.
//!
//! ## Usage
//!
//! ```bash
//! # Import a legacy record or an exported snapshot
//! healthrecord import record.json
//!
//! # Export the current record as an encoded snapshot
//! healthrecord export --output snapshot.json
//!
//! # Show the current record
//! healthrecord show
//!
//! # Show record and connectivity status
//! healthrecord status
//!
//! # Change connectivity preferences
//! healthrecord prefs enable
//! healthrecord prefs signaler wss://signal.example
//!
//! # Follow the record and keep peer connectivity in line with it
//! healthrecord serve
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use healthrecord_core::storage::{IS_ACTIVE_FLAG, RECORD_KEY};
use healthrecord_core::{
    ConnectivityConfig, ConnectivityController, ImportKind, LocalHub, RecordError, RecordStore,
    Storage, UpdateOrigin,
};
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Health Record - replicated health record
#[derive(Parser)]
#[command(name = "healthrecord")]
#[command(version = "0.1.0")]
#[command(about = "Health Record - replicated health record")]
#[command(
    long_about = "A health record kept as a CRDT, migrated from older snapshot versions and shared with peers according to preferences stored in the record itself."
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Data directory (default: ~/.healthrecord/data)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Signaler to use when the record names none
    #[arg(long, global = true, conflicts_with = "no_dev_signaler")]
    dev_signaler: Option<String>,

    /// Never fall back to a development signaler
    #[arg(long, global = true)]
    no_dev_signaler: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import a snapshot file ("-" reads stdin)
    Import {
        /// Legacy record or exported snapshot
        file: PathBuf,
    },

    /// Export the current record as an encoded snapshot
    Export {
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show the current record as JSON
    Show,

    /// Show record and connectivity status
    Status,

    /// Connectivity preferences
    Prefs {
        #[command(subcommand)]
        action: PrefsAction,
    },

    /// Follow the record and manage peer connectivity until stopped
    Serve {
        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<u64>,
    },
}

#[derive(Subcommand)]
enum PrefsAction {
    /// Join peers of this record
    Enable,
    /// Leave peers of this record
    Disable,
    /// Use a specific signaler
    Signaler {
        /// Signaler URL
        url: String,
    },
    /// Forget the preferred signaler
    ClearSignaler,
}

fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();
}

/// Get the default data directory (~/.healthrecord/data)
fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".healthrecord")
        .join("data")
}

fn connectivity_config(cli: &Cli) -> ConnectivityConfig {
    if cli.no_dev_signaler {
        ConnectivityConfig::without_dev_signaler()
    } else if let Some(url) = &cli.dev_signaler {
        ConnectivityConfig::with_dev_signaler(url.clone())
    } else {
        ConnectivityConfig::default()
    }
}

/// Open storage and an empty store that reports activity to it
fn open_store(data_dir: &Path) -> Result<(Storage, RecordStore)> {
    let storage = Storage::new(data_dir.join("healthrecord.redb"))
        .with_context(|| format!("Failed to open storage in {}", data_dir.display()))?;
    let store = RecordStore::with_activity_flag(Arc::new(storage.clone()))?;
    Ok((storage, store))
}

/// Load the saved record into the store, if there is one
fn restore(storage: &Storage, store: &RecordStore) -> Result<bool> {
    match storage.load_document(RECORD_KEY)? {
        Some(bytes) => {
            store.reload(&bytes).context("Saved record is corrupt")?;
            Ok(true)
        }
        None => Ok(false),
    }
}

fn persist(storage: &Storage, store: &RecordStore) -> Result<()> {
    match store.export_bytes() {
        Ok(bytes) => storage.save_document(RECORD_KEY, &bytes)?,
        Err(RecordError::NotLoaded) => debug!("No record to save"),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

fn require_record(storage: &Storage, store: &RecordStore) -> Result<()> {
    if !restore(storage, store)? {
        anyhow::bail!("No record loaded. Import one with `healthrecord import <file>`.");
    }
    Ok(())
}

fn read_input(file: &Path) -> Result<String> {
    if file == Path::new("-") {
        std::io::read_to_string(std::io::stdin()).context("Failed to read stdin")
    } else {
        std::fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let config = connectivity_config(&cli);
    let data_dir = cli.data_dir.clone().unwrap_or_else(default_data_dir);
    let (storage, store) = open_store(&data_dir)?;

    match cli.command {
        Commands::Import { file } => {
            let text = read_input(&file)?;
            restore(&storage, &store)?;

            let kind = store.load(&text)?;
            store.settle()?;
            persist(&storage, &store)?;

            match kind {
                ImportKind::LegacyRecord { declared, steps } => {
                    println!("Imported legacy record (declared version: {})", declared);
                    for step in steps {
                        println!("  - {}", step);
                    }
                }
                ImportKind::EncodedState { changes_applied } => {
                    println!("Merged encoded state ({} new changes)", changes_applied);
                }
            }
            if let Some(current) = store.current() {
                println!("  ID: {}", current.id()?);
            }
            if let Err(gap) = store.read(|doc| doc.check_migrated()) {
                println!("Warning: {}", gap);
            }
        }

        Commands::Export { output } => {
            require_record(&storage, &store)?;
            let snapshot = serde_json::to_string_pretty(&store.export()?)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, snapshot)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    println!("Exported to {}", path.display());
                }
                None => println!("{}", snapshot),
            }
        }

        Commands::Show => {
            require_record(&storage, &store)?;
            let summary = store.read(|doc| doc.summary())?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }

        Commands::Status => {
            let loaded = restore(&storage, &store)?;
            println!("Health Record");
            if loaded {
                let (id, version, prefs) = store.read(|doc| -> Result<_, RecordError> {
                    Ok((doc.id()?, doc.version()?, doc.webrtc_preferences()?))
                })?;
                println!("  ID: {}", if id.is_empty() { "(none)" } else { id.as_str() });
                println!("  Version: {}", version);
                match store.read(|doc| doc.check_migrated()) {
                    Ok(()) => println!("  Migration: complete"),
                    Err(gap) => println!("  Migration: {}", gap),
                }
                println!("  Active: {}", yes_no(storage.get_flag(IS_ACTIVE_FLAG)?));
                println!();
                println!("Connectivity:");
                match prefs {
                    Some(prefs) => {
                        println!("  Enabled: {}", yes_no(prefs.enabled));
                        println!("  Signaler: {}", prefs.signaler().unwrap_or("(none)"));
                        let signaling = config.resolve_signaling(&prefs);
                        if signaling.is_empty() {
                            println!("  Signaling: (none)");
                        } else {
                            println!("  Signaling: {}", signaling.join(", "));
                        }
                    }
                    None => println!("  (no preferences)"),
                }
            } else {
                println!("  (no record loaded)");
            }
            println!();
            println!("Data directory: {}", data_dir.display());
        }

        Commands::Prefs { action } => {
            require_record(&storage, &store)?;
            store.update(UpdateOrigin::Local, |doc| match &action {
                PrefsAction::Enable => doc.set_webrtc(Some(true), None),
                PrefsAction::Disable => doc.set_webrtc(Some(false), None),
                PrefsAction::Signaler { url } => doc.set_webrtc(None, Some(Some(url.as_str()))),
                PrefsAction::ClearSignaler => doc.set_webrtc(None, Some(None)),
            })?;
            persist(&storage, &store)?;

            if let Some(prefs) = store.read(|doc| doc.webrtc_preferences())? {
                println!("Connectivity preferences updated");
                println!("  Enabled: {}", yes_no(prefs.enabled));
                println!("  Signaler: {}", prefs.signaler().unwrap_or("(none)"));
            }
        }

        Commands::Serve { duration } => {
            let mut controller =
                ConnectivityController::new(store.clone(), LocalHub::new(), config);
            let mut state_rx = controller.watch_state();
            let mut peers_rx = controller.peer_count();
            let mut events = store.subscribe();

            let controller_task = tokio::spawn(async move {
                controller.run().await;
            });

            if !restore(&storage, &store)? {
                println!("No record loaded yet; waiting for one.");
            }

            println!("Health record node is running. Press Ctrl+C to stop.");
            println!();

            let deadline = async {
                match duration {
                    Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::pin!(deadline);

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        println!();
                        println!("Received shutdown signal...");
                        break;
                    }
                    _ = &mut deadline => {
                        info!("Serve duration elapsed");
                        break;
                    }
                    changed = state_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        println!("[Connectivity] {}", *state_rx.borrow_and_update());
                    }
                    changed = peers_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        println!("[Peers] {}", *peers_rx.borrow_and_update());
                    }
                    event = events.recv() => {
                        match event {
                            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {
                                persist(&storage, &store)?;
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            }

            controller_task.abort();
            let _ = controller_task.await;
            persist(&storage, &store)?;
            println!("Stopped.");
        }
    }

    Ok(())
}
