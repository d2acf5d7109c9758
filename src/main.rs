mod api;
mod cli;
mod clock;
mod config;
mod history;
mod logging;
mod models;
mod session;

use anyhow::{anyhow, Result};
use api::transport::UreqTransport;
use api::ApiClient;
use clap::Parser;
use clock::SystemClock;
use session::storage::{FileStorage, MemoryStorage};
use session::{LoadOutcome, SessionStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(
    name = "restora",
    about = "Command-line client for the photo restoration service"
)]
pub struct Args {
    #[arg(long, help = "Config file path")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "RESTORA_API_URL", help = "API base URL (overrides config)")]
    pub base_url: Option<String>,

    #[arg(long, help = "Directory holding the persisted session")]
    pub state_dir: Option<PathBuf>,

    #[arg(long, help = "Keep the session in memory only")]
    pub ephemeral: bool,

    #[arg(long, help = "Verbose output")]
    pub verbose: bool,

    #[arg(long, help = "Debug output (print HTTP details and settings)")]
    pub debug: bool,

    #[command(subcommand)]
    pub command: cli::Command,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut cfg = if let Some(config_path) = &args.config {
        config::Config::load_from(config_path)?
    } else {
        config::Config::load()?
    };

    // CLI overrides
    if let Some(base_url) = &args.base_url {
        cfg.api.base_url = base_url.clone();
    }
    if let Some(state_dir) = &args.state_dir {
        cfg.session.state_dir = Some(state_dir.clone());
    }

    if let Err(errors) = cfg.validate() {
        for e in &errors {
            eprintln!("Config error {}", e);
        }
        return Err(anyhow!("Invalid configuration ({} errors)", errors.len()));
    }

    logging::init(&logging::level_for(
        &cfg.logging.level,
        args.verbose,
        args.debug,
    ))?;

    let state_dir = if args.ephemeral { None } else { cfg.state_dir() };
    let (store, outcome) = match &state_dir {
        Some(dir) => SessionStore::open(FileStorage::new(dir), SystemClock),
        None => {
            if !args.ephemeral {
                warn!("No home directory; session will not persist");
            }
            SessionStore::open(MemoryStorage::new(), SystemClock)
        }
    };
    match outcome {
        LoadOutcome::Expired => eprintln!("Your previous session has expired. Please log in again."),
        LoadOutcome::Corrupt(_) => eprintln!("Stored session was unreadable and has been cleared."),
        LoadOutcome::Empty | LoadOutcome::Restored => {}
    }

    info!(
        base_url = %cfg.api.base_url,
        state_dir = ?state_dir,
        "Starting"
    );

    let transport = UreqTransport::new(Duration::from_millis(cfg.api.timeout_ms));
    let client = ApiClient::new(&cfg.api.base_url, store.clone(), Arc::new(transport))
        .with_upload_timeout(Duration::from_millis(cfg.api.upload_timeout_ms))
        .with_auth_failure_hook(|failure, route| {
            info!(reason = failure.as_str(), route, "Login required");
        });

    let ctx = cli::Context {
        config: cfg,
        store,
        client,
        state_dir,
    };

    cli::run(&ctx, args.command)
}
