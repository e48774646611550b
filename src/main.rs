//! Chat Lobby Server - Entry Point
//!
//! Loads the shared secret, starts the Registry actor and the stats
//! reporter, then accepts connections.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use lobby_chat::config::{load_secret, DEFAULT_HOST, DEFAULT_PORT};
use lobby_chat::error::{EXIT_BAD_ARGS, EXIT_COMMS};
use lobby_chat::{handle_connection, Registry, ServerConfig, StatsFormat};

const USAGE: &str = "Usage: lobby_server authfile [port]";

/// Multi-client chat lobby server
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// File whose first line is the shared secret
    authfile: PathBuf,
    /// Port to listen on (0 picks a free port)
    #[arg(default_value_t = DEFAULT_PORT)]
    port: u16,
    /// Address to bind to
    #[arg(short = 'H', long, default_value = DEFAULT_HOST)]
    host: String,
    /// Format of the SIGHUP stats report
    #[arg(long, value_enum, default_value_t = StatsFormat::Text)]
    stats_format: StatsFormat,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
        Err(_) => {
            eprintln!("{USAGE}");
            return ExitCode::from(EXIT_BAD_ARGS);
        }
    };

    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=lobby_chat=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("lobby_chat=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let secret = match load_secret(&args.authfile).await {
        Ok(secret) => secret,
        Err(e) => {
            error!("{}", e);
            eprintln!("{USAGE}");
            return ExitCode::from(EXIT_BAD_ARGS);
        }
    };

    let config = ServerConfig {
        secret,
        host: args.host,
        port: args.port,
    };
    let bind_addr = config.bind_addr();

    let listener = match TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", bind_addr, e);
            eprintln!("Communications error");
            return ExitCode::from(EXIT_COMMS);
        }
    };
    let local_addr = match listener.local_addr() {
        Ok(addr) => addr,
        Err(e) => {
            error!("Failed to read bound address: {}", e);
            return ExitCode::from(EXIT_COMMS);
        }
    };
    // The bound port on its own line, for scripts and clients
    eprintln!("{}", local_addr.port());
    info!("Chat lobby listening on {}", local_addr);

    let registry = Registry::spawn(config);

    #[cfg(unix)]
    {
        let server_name = std::env::args()
            .next()
            .map(|path| lobby_chat::stats::server_name_from_path(&path))
            .unwrap_or_else(|| "lobby_server".to_string());
        let registry = registry.clone();
        let format = args.stats_format;
        tokio::spawn(async move {
            if let Err(e) = lobby_chat::stats::run_sighup_reporter(registry, server_name, format).await {
                error!("Stats reporter failed: {}", e);
            }
        });
    }

    // Connection accept loop
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("New connection from {}", addr);
                let registry = registry.clone();

                // Failures are logged by the handler and end only this connection
                tokio::spawn(async move {
                    let _ = handle_connection(stream, registry).await;
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
