//! XP console application.
//!
//! A headless front end for the experience and leveling engine, reading one
//! command per line from stdin. Logs go to stderr.
//!
//! ```bash
//! RUST_LOG=debug cargo run -p xp -- --data ./xp_data.json
//! ```

mod command;
mod console;

use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use xp_core::{ProgressionConfig, ProgressionService};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }

    let mut config = ProgressionConfig::from_env()?;
    if let Some(path) = arg_value(&args, "--data") {
        config.data_path = path.into();
    }
    if let Some(path) = arg_value(&args, "--config") {
        let data_path = config.data_path.clone();
        config = ProgressionConfig::load_json(path).await?;
        if arg_value(&args, "--data").is_some() {
            config.data_path = data_path;
        }
    }

    info!("XP console v{} starting", env!("CARGO_PKG_VERSION"));
    let service = Arc::new(ProgressionService::init(config).await?);

    // Announce level-ups from any source
    let mut notifications = service.subscribe();
    tokio::spawn(async move {
        loop {
            match notifications.recv().await {
                Ok(n) => info!(
                    user = %n.user,
                    level = n.new_level,
                    prestige = n.new_prestige,
                    "advancement"
                ),
                Err(RecvError::Lagged(missed)) => warn!(missed, "notification listener lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    tokio::select! {
        result = console::run(Arc::clone(&service)) => {
            if let Err(e) = result {
                error!(error = %e, "console input failed");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
        }
    }

    service.shutdown().await?;
    Ok(())
}

fn arg_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn print_help() {
    println!("XP console - experience and leveling engine");
    println!();
    println!("Usage: xp [--data <path>] [--config <file.json>]");
    println!();
    println!("Options:");
    println!("  --data <path>         Records document (default: xp_data.json or XP_DATA_FILE)");
    println!("  --config <file.json>  Load tunables from a JSON file");
    println!("  -h, --help            Show this help");
    println!();
    println!("Environment:");
    println!("  XP_BASE, XP_EXPONENT, XP_PRESTIGE_MULTIPLIER, XP_LEVEL_CAP,");
    println!("  XP_COOLDOWN_SECS, XP_GRANT_MIN, XP_GRANT_MAX, XP_LEADERBOARD_SIZE,");
    println!("  XP_SAVE_RETRIES, XP_RETRY_BACKOFF_MS, RUST_LOG");
    println!();
    println!("Commands:");
    println!("{}", command::HELP);
}
