//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// AuthHub - identity and authorization broker
#[derive(Parser, Debug)]
#[command(name = "authhub")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "AUTHHUB_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "AUTHHUB_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "AUTHHUB_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "AUTHHUB_LOG_LEVEL", global = true)]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "AUTHHUB_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the broker server (default)
    Serve,

    /// Generate a P-256 signing keypair as PEM files
    Keygen {
        /// Directory to write private_key.pem / public_key.pem into
        #[arg(default_value = "keys")]
        out_dir: PathBuf,
    },
}
