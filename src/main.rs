//! Polycache shell
//!
//! Reads cache commands from stdin and runs them against the engine selected
//! by the environment (see `CacheConfig::from_env`).

use anyhow::Context;
use serde_json::{Map, Value};
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use polycache::shell::{self, Command, USAGE};
use polycache::{CacheConfig, CacheRegistry};

/// Entry point for the polycache shell.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Resolve the engine through the registry
/// 4. Execute stdin lines until `quit`, EOF or Ctrl+C
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "polycache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = CacheConfig::from_env();
    let registry = CacheRegistry::new();
    let cache = registry
        .instance(&config)
        .context("failed to build cache engine from environment")?;
    info!(engine = %cache.engine(), consistency = ?cache.consistency(), "Polycache shell ready");

    let mut lines = BufReader::new(io::stdin()).lines();
    let mut stdout = io::stdout();
    stdout.write_all(format!("{}\n", USAGE).as_bytes()).await?;

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read stdin")?,
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
        };
        let Some(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let reply = match Command::parse(&line) {
            Ok(Command::Quit) => break,
            Ok(command) => shell::render(&shell::execute(cache.as_ref(), command).await),
            Err(err) => {
                warn!(error = %err, "Unparseable command");
                let mut reply = Map::new();
                reply.insert("parse_error".to_string(), Value::from(err.to_string()));
                Value::Object(reply).to_string()
            }
        };
        stdout.write_all(format!("{}\n", reply).as_bytes()).await?;
        stdout.flush().await?;
    }

    info!("Polycache shell stopped");
    Ok(())
}
