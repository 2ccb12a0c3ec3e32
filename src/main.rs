//! toolgate - JSON-lines tool gateway over stdin/stdout.
//!
//! Loads configuration, registers the built-in tools, starts the periodic
//! sweep and serves requests until stdin closes or Ctrl-C.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use toolgate::engine::{ExecutionEngine, SweepService};
use toolgate::Config;

#[derive(Debug, Parser)]
#[command(name = "toolgate", version, about = "Tool-execution gateway over JSON lines")]
struct Cli {
    /// Path to a JSON configuration file.
    #[arg(long, env = "TOOLGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Print the configuration JSON Schema and exit.
    #[arg(long)]
    print_config_schema: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.print_config_schema {
        println!("{}", serde_json::to_string_pretty(&Config::json_schema())?);
        return Ok(());
    }

    let config = Config::load(cli.config.as_deref())?;
    toolgate::observability::init_tracing_with(&config.observability);

    let engine = Arc::new(ExecutionEngine::from_config(&config)?);
    tracing::info!(
        "toolgate_starting: tools={}, cache_ttl_ms={}",
        engine.registry().len(),
        engine.cache_ttl().as_millis()
    );

    let mut sweeper = SweepService::new(engine.clone(), config.sweep.clone());
    let sweep_handle = config.sweep.enabled.then(|| sweeper.start());

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown_signal_received");
            on_signal.cancel();
        }
    });

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let result = toolgate::stdio::serve(engine, stdin, tokio::io::stdout(), cancel).await;

    sweeper.stop();
    if let Some(handle) = sweep_handle {
        if let Err(e) = handle.await {
            tracing::warn!("sweep_task_failed: error={}", e);
        }
    }
    tracing::info!("toolgate_stopped");

    result?;
    Ok(())
}
