//! `hearth` – interactive shell for the spatial anchor registry.
//!
//! 1. Loads `~/.hearth/config.toml`, writing the defaults on first run.
//! 2. Opens the SQLite record store and restores every saved anchor against
//!    the simulated platform.
//! 3. Drops the user into a REPL (`/place`, `/find`, `/erase`, …).
//! 4. Intercepts **Ctrl-C** so the shell exits at the next prompt.

mod config;
mod repl;

use colored::Colorize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

use hearth_platform::SimulatedPlatform;
use hearth_registry::AnchorRegistry;
use hearth_store::{KeyValueStorage, PersistentRecordStore, SqliteStorage};

fn main() {
    // Logs go to stderr via tracing; the shell's own output uses println!.
    let _tracing = hearth_registry::init_tracing("hearth");

    print_banner();

    // ── Shutdown flag ─────────────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – exiting after the current command …".yellow().bold());
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler");
    }

    // ── Configuration ─────────────────────────────────────────────────────
    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => {
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            match config::save(&cfg) {
                Ok(()) => println!(
                    "  {} Default config written to {}",
                    "✓".green().bold(),
                    config::config_path().display().to_string().bold()
                ),
                Err(e) => println!("{}: {}", "Error saving config".red(), e),
            }
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };

    // ── Record store ──────────────────────────────────────────────────────
    let Some(storage) = open_storage(&cfg) else {
        std::process::exit(1);
    };
    let store = PersistentRecordStore::new(storage);

    // ── Registry ──────────────────────────────────────────────────────────
    let platform = SimulatedPlatform::new().with_ready_delay(cfg.sim_ready_delay_ticks);
    let registry = AnchorRegistry::new(cfg.registry.clone(), Box::new(platform), store);
    let mut shell = repl::Shell::new(registry);

    shell.execute(repl::Command::Load);
    info!(live = shell.registry().len(), "startup restore complete");

    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    repl::run(shell, shutdown);
}

/// Open the configured SQLite file, falling back to an in-memory database
/// when it cannot be opened.
fn open_storage(cfg: &config::Config) -> Option<Box<dyn KeyValueStorage>> {
    if let Some(parent) = cfg.storage_path.parent()
        && let Err(e) = std::fs::create_dir_all(parent)
    {
        warn!(path = %parent.display(), error = %e, "cannot create storage directory");
    }
    match SqliteStorage::open(&cfg.storage_path) {
        Ok(storage) => {
            println!(
                "  Anchor records in {}",
                cfg.storage_path.display().to_string().bold()
            );
            return Some(Box::new(storage));
        }
        Err(e) => {
            println!(
                "{}: {} ({})",
                "Cannot open record store".red(),
                cfg.storage_path.display(),
                e
            );
        }
    }
    match SqliteStorage::open_in_memory() {
        Ok(storage) => {
            println!("  {}", "Anchors will not survive this session.".yellow());
            Some(Box::new(storage))
        }
        Err(e) => {
            println!("{}: {}", "In-memory store failed".red(), e);
            None
        }
    }
}

fn print_banner() {
    println!();
    println!("  {} {}",
        "Hearth".bold().cyan(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Spatial anchor registry shell");
    println!();
}
