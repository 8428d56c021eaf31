//! HLS Key Server - token-gated delivery of HLS content keys

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use hls_key_server::{
    auth::{AuthSettings, SystemClock, TokenIssuer},
    cli::{Cli, Command},
    config::Config,
    server::KeyServer,
    setup_tracing, Result,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            // Apply CLI overrides
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(ref host) = cli.host {
                config.server.host = host.clone();
            }
            config
        }
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let log_format = cli
        .log_format
        .as_deref()
        .or_else(|| config.app.is_production().then_some("json"));
    if let Err(e) = setup_tracing(&cli.log_level, log_format) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match cli.command {
        Some(Command::Token { username }) => run_token(&config, username),
        Some(Command::Serve) | None => run_server(config).await,
    }
}

/// Print a freshly issued token to stdout
fn run_token(config: &Config, username: Option<String>) -> ExitCode {
    match issue_token(config, username) {
        Ok(token) => {
            println!("{token}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Failed to issue token: {e}");
            ExitCode::FAILURE
        }
    }
}

fn issue_token(config: &Config, username: Option<String>) -> Result<String> {
    config.validate()?;

    let settings = Arc::new(AuthSettings::from_config(&config.jwt)?);
    let subject = username.unwrap_or_else(|| settings.allowed_user.clone());
    let issuer = TokenIssuer::new(settings, Arc::new(SystemClock));

    Ok(issuer.issue(&subject)?)
}

async fn run_server(config: Config) -> ExitCode {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        directory = %config.keys.directory.display(),
        "Starting HLS key server"
    );

    let server = match KeyServer::new(config).await {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to start key server: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Run with graceful shutdown
    if let Err(e) = server.run().await {
        error!("Key server error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Key server shutdown complete");
    ExitCode::SUCCESS
}
