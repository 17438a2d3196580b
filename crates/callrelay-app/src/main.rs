//! callrelay binary - composition root.
//!
//! 1. Parse CLI arguments and load configuration from TOML
//! 2. Open the durable queue (SQLite)
//! 3. Pick the radio backend and the outbox transport
//! 4. Run the requested command against the engine

mod cli;
mod outbox;
mod radio;
mod source;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use callrelay_core::config::RelayConfig;
use callrelay_engine::{DispatchSettings, DrainOutcome, NetworkSettings, RelayEngine};
use callrelay_storage::{Database, EventQueue};

use cli::{CliArgs, Command};
use outbox::OutboxTransport;

fn init_tracing(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Read events from stdin until EOF or Ctrl-C.
async fn run(engine: Arc<RelayEngine>) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let handle = engine.start()?;
    tracing::info!("Reading events from stdin");

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let interrupted = tokio::select! {
        result = source::read_events(stdin, |raw| handle.submit(raw)) => {
            match result {
                Ok(count) => tracing::info!(count, "Input closed"),
                Err(e) => tracing::error!(error = %e, "Input failed"),
            }
            false
        }
        _ = tokio::signal::ctrl_c() => true,
    };

    if interrupted {
        tracing::info!("Interrupted; stopping");
        handle.shutdown();
        handle.join().await;
        // The blocking stdin read cannot be cancelled and would hold up
        // runtime shutdown.
        std::process::exit(0);
    }

    let outcome = handle.finish().await;
    tracing::info!(outcome = ?outcome, "Final drain");
    Ok(ExitCode::SUCCESS)
}

async fn drain(engine: Arc<RelayEngine>) -> ExitCode {
    let outcome = engine.drain_now().await;
    engine.network().cancel_radio_off();

    let report = match &outcome {
        DrainOutcome::Empty => serde_json::json!({ "result": "empty" }),
        DrainOutcome::Delivered { count } => {
            serde_json::json!({ "result": "delivered", "count": count })
        }
        DrainOutcome::Failed { count, reason } => {
            serde_json::json!({ "result": "failed", "count": count, "reason": reason })
        }
        DrainOutcome::Skipped => serde_json::json!({ "result": "skipped" }),
    };
    println!("{}", report);

    if outcome.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config is read before tracing so its log level can apply.
    let config_file = args.resolve_config_path();
    let loaded = RelayConfig::load(&config_file);
    let level = args.resolve_log_level(
        loaded
            .as_ref()
            .ok()
            .map(|config| config.general.log_level.as_str()),
    );
    init_tracing(&level);

    tracing::info!("Starting callrelay v{}", env!("CARGO_PKG_VERSION"));

    let config = match loaded {
        Ok(config) => {
            tracing::info!(path = %config_file.display(), "Configuration loaded");
            config
        }
        Err(e) => {
            tracing::warn!(
                path = %config_file.display(),
                error = %e,
                "Failed to load config; using defaults"
            );
            RelayConfig::default()
        }
    };

    // Storage.
    let data_dir = args.resolve_data_dir(&config.general.data_dir);
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
        return Err(e.into());
    }

    let db_path = data_dir.join("callrelay.db");
    let db = Arc::new(Database::new(&db_path)?);
    let queue = EventQueue::new(db);
    tracing::info!(path = %db_path.display(), "Queue database opened");

    if args.command() == Command::Status {
        let pending = queue.pending_count()?;
        println!(
            "{}",
            serde_json::json!({ "pending": pending, "database": db_path.display().to_string() })
        );
        return Ok(ExitCode::SUCCESS);
    }

    // Capabilities.
    let radio = radio::from_backend(&config.network.radio_backend)?;
    tracing::info!(backend = %radio.name(), "Radio backend ready");

    let transport = Arc::new(OutboxTransport::new(
        data_dir.join("outbox"),
        config.channels.clone(),
    ));
    if config.channels.email_target().is_none() {
        tracing::warn!("Email channel disabled; notifications will not be written");
    }
    tracing::info!(dir = %transport.dir().display(), "Outbox transport ready");

    let engine = Arc::new(RelayEngine::new(
        queue,
        radio,
        transport,
        NetworkSettings::from(&config.network),
        DispatchSettings::from(&config),
    ));

    match args.command() {
        Command::Drain => Ok(drain(engine).await),
        _ => run(engine).await,
    }
}
