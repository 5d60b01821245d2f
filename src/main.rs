use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use atal_ratelimit::config::{AtalConfig, LoggingConfig};
use atal_ratelimit::ratelimit::{spawn_sweeper, LimiterName, RateLimiters};

/// Rate limiting for ATAL AI authentication flows.
#[derive(Parser, Debug)]
#[command(name = "atal-ratelimit", version, about)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read `<limiter> <identifier>` lines from stdin and print each decision
    Simulate,
    /// Print limiter stats as JSON
    ///
    /// Buckets live only in this process, so a fresh process reports zero
    /// tracked keys. `simulate` prints the populated stats when it finishes.
    Stats,
    /// Print the configured policies
    Policies,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AtalConfig::from_file(path)?,
        None => AtalConfig::default(),
    };
    init_tracing(&config.logging, cli.json_logs);

    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let limiters = Arc::new(RateLimiters::new(&config.limiters)?);

    match cli.command {
        Command::Simulate => simulate(limiters, &config).await?,
        Command::Stats => {
            println!("{}", serde_json::to_string_pretty(&limiters.stats())?);
        }
        Command::Policies => {
            for name in LimiterName::ALL {
                let limiter = limiters.limiter(name);
                println!(
                    "{:<16} burst {:<4} {}",
                    name,
                    limiter.config().max_tokens(),
                    limiter.config().describe()
                );
            }
        }
    }

    Ok(())
}

fn init_tracing(logging: &LoggingConfig, force_json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.clone()));

    // Logs go to stderr so stdout stays machine-readable
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if logging.json || force_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn simulate(limiters: Arc<RateLimiters>, config: &AtalConfig) -> anyhow::Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = config
        .sweeper
        .enabled
        .then(|| spawn_sweeper(limiters.clone(), config.sweeper.clone(), shutdown_rx));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = &mut shutdown => None,
        };
        let Some(line) = line else { break };

        let mut parts = line.split_whitespace();
        let (Some(name), Some(identifier)) = (parts.next(), parts.next()) else {
            if !line.trim().is_empty() {
                warn!(line = %line, "Expected `<limiter> <identifier>`");
            }
            continue;
        };

        let name: LimiterName = match name.parse() {
            Ok(name) => name,
            Err(e) => {
                warn!(error = %e, "Skipping line");
                continue;
            }
        };

        let decision = if limiters.check(name, identifier) {
            "allow"
        } else {
            "deny"
        };
        let remaining = limiters.remaining(name, identifier);
        let output = format!(
            "{} {} {} remaining={}\n",
            decision, name, identifier, remaining
        );
        stdout.write_all(output.as_bytes()).await?;
        stdout.flush().await?;
    }

    let _ = shutdown_tx.send(true);
    if let Some(sweeper) = sweeper {
        sweeper.await?;
    }

    let stats = serde_json::to_string_pretty(&limiters.stats())?;
    stdout.write_all(format!("{}\n", stats).as_bytes()).await?;
    stdout.flush().await?;

    info!("Simulation finished");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        }
    }
}
