//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// HLS key server - token-gated delivery of content keys
#[derive(Parser, Debug)]
#[command(name = "hls-key-server")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "HLS_KEY_SERVER_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "HLS_KEY_SERVER_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "HLS_KEY_SERVER_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "HLS_KEY_SERVER_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "HLS_KEY_SERVER_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Start the key server (default)
    Serve,

    /// Issue an access token and print it to stdout
    Token {
        /// Subject to issue the token for (defaults to `jwt.user`)
        #[arg(short, long)]
        username: Option<String>,
    },
}
