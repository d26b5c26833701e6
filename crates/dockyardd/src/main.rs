use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use dockyardd::{Daemon, load_config};

#[derive(Parser)]
#[command(name = "dockyardd", about = "Dockyard lifecycle daemon")]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon until Ctrl-C.
    Run {
        /// Path to dockyard.toml; built-in defaults when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Override `api.port`.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Parse and validate a configuration file, then print it normalized.
    CheckConfig {
        #[arg(long)]
        config: PathBuf,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,dockyard=debug"));
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Run { config, port } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(port) = port {
                config.api.port = port;
            }
            let addr: SocketAddr = format!("{}:{}", config.api.bind, config.api.port)
                .parse()
                .context("parse api bind address")?;

            info!("dockyard daemon starting");
            let daemon = Daemon::build(config).await?;
            let listener = tokio::net::TcpListener::bind(addr).await?;
            daemon
                .run(listener, async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        error!(error = %e, "ctrl-c handler failed, running until killed");
                        std::future::pending::<()>().await;
                    }
                })
                .await
        }
        Command::CheckConfig { config } => {
            let parsed = load_config(Some(&config))?;
            println!("{}", parsed.to_toml_string()?);
            info!(path = %config.display(), "configuration is valid");
            Ok(())
        }
    }
}
