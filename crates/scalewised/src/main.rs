//! scalewised: the scalewise daemon.
//!
//! Single binary that assembles the scalewise subsystems:
//! - Telemetry window
//! - Forecast and anomaly adapters
//! - Scaling controller
//! - Observer registry and health heartbeat
//! - Optional telemetry replay
//! - REST + websocket API
//!
//! # Usage
//!
//! ```text
//! scalewised serve --config /etc/scalewise/scalewise.toml --port 8000
//! scalewised check-config --config scalewise.toml
//! ```

mod serve;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use scalewise_core::ScalewiseConfig;

#[derive(Parser)]
#[command(name = "scalewised", about = "scalewise autoscaling daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the decision API and observer websocket.
    Serve {
        /// Path to scalewise.toml. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on, overriding the config file.
        #[arg(long)]
        port: Option<u16>,

        /// Emit JSON log lines.
        #[arg(long)]
        log_json: bool,
    },
    /// Validate the configuration and print it as TOML.
    CheckConfig {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            config,
            port,
            log_json,
        } => {
            let mut config = ScalewiseConfig::load(config.as_deref())?;
            if let Some(port) = port {
                config.server.port = port;
            }
            init_tracing(&config.logging.filter, log_json || config.logging.json);
            serve::run(config).await
        }
        Command::CheckConfig { config } => {
            let config = ScalewiseConfig::load(config.as_deref())?;
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

/// `RUST_LOG` wins over the configured filter.
fn init_tracing(default_filter: &str, json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
