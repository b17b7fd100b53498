//! Access Guard Agent CLI.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::info;
use tracing_subscriber::EnvFilter;
use zentinel_agent_access_guard::protocol::{serve, ServeOptions};
use zentinel_agent_access_guard::{AccessGuardAgent, Config};

#[derive(Parser, Debug)]
#[command(name = "zentinel-agent-access-guard")]
#[command(about = "Access Guard agent for Zentinel - risk-scored access decisions from identity, behavior and external signals")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "ACCESS_GUARD_CONFIG", default_value = "access-guard.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: String,

    /// Print example configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,

    /// Messages evaluated concurrently
    #[arg(long, env = "ACCESS_GUARD_MAX_IN_FLIGHT", default_value_t = 64)]
    max_in_flight: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle --print-config
    if args.print_config {
        println!("{}", Config::example());
        return Ok(());
    }

    // Logs go to stderr; stdout carries responses
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Load configuration
    info!(config = %args.config.display(), "Loading configuration");
    let config = Config::load(&args.config)?;

    // Handle --validate
    if args.validate {
        info!("Configuration is valid");
        return Ok(());
    }

    let agent = Arc::new(AccessGuardAgent::new(config).await?);
    let options = ServeOptions {
        max_in_flight: args.max_in_flight,
        ..ServeOptions::default()
    };

    info!(max_in_flight = options.max_in_flight, "Reading requests from stdin");
    serve(agent, BufReader::new(tokio::io::stdin()), tokio::io::stdout(), options).await?;

    info!("Input closed, shut down");
    Ok(())
}
