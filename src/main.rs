//! AuthHub - identity and authorization broker for a fleet of downstream
//! systems.

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use authhub::{
    cli::{Cli, Command},
    config::Config,
    keys::KeyStore,
    server::AuthServer,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    // .env is optional; ignore a missing file
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match cli.command {
        Some(Command::Keygen { ref out_dir }) => run_keygen(out_dir),
        Some(Command::Serve) | None => run_server(cli).await,
    }
}

/// Generate a P-256 keypair for ES256 deployments.
fn run_keygen(out_dir: &Path) -> ExitCode {
    let (private_pem, public_pem) = match KeyStore::generate_p256() {
        Ok(pair) => pair,
        Err(e) => {
            error!("Key generation failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    let private_path = out_dir.join("private_key.pem");
    let public_path = out_dir.join("public_key.pem");
    if private_path.exists() || public_path.exists() {
        error!("Refusing to overwrite existing key files in {}", out_dir.display());
        return ExitCode::FAILURE;
    }

    let write = std::fs::create_dir_all(out_dir)
        .and_then(|()| std::fs::write(&private_path, private_pem))
        .and_then(|()| std::fs::write(&public_path, public_pem));
    if let Err(e) = write {
        error!("Failed to write key files: {e}");
        return ExitCode::FAILURE;
    }

    println!("Wrote {}", private_path.display());
    println!("Wrote {}", public_path.display());
    println!("Set jwt.algorithm: ES256 to use this keypair.");
    ExitCode::SUCCESS
}

/// Run the broker server
async fn run_server(cli: Cli) -> ExitCode {
    let config = match Config::load(cli.config.as_deref().and_then(Path::to_str)) {
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
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        algorithm = %config.jwt.algorithm,
        "Starting AuthHub"
    );

    let server = match AuthServer::new(config) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to start: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = server.run().await {
        error!("Server error: {e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
