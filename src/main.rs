use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use pi_agent::{AgentConfig, ProcessRunner, SocketIoConnector, SystemRunner, agent};

/// Pi Agent - executes LED and camera commands from a control server
#[derive(Parser)]
#[command(name = "pi-agent", version, about)]
struct Cli {
    /// Control server URL (e.g. "https://my-app.up.railway.app")
    server_url: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,pi_agent=info"));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Needed before the first `wss://` handshake
    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("tls crypto provider already installed");
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = AgentConfig::from_env(cli.server_url)?;
    tracing::debug!(?config, "loaded configuration");

    tracing::info!(
        server_url = %config.server_url,
        device_id = %config.identity.id(),
        capabilities = ?config.identity.capabilities(),
        "starting pi agent"
    );

    let runner: Arc<dyn ProcessRunner> = Arc::new(SystemRunner);
    let mut session = agent::build_session(&config, &runner)?;

    // Set up shutdown signal
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
    tokio::spawn(agent::forward_shutdown(tokio::signal::ctrl_c(), shutdown_tx));

    session.run(&SocketIoConnector::default(), &mut shutdown_rx).await?;

    Ok(())
}
