//! Chat Lobby Client - Entry Point
//!
//! Joins the lobby under the given name and chats over stdin/stdout.

use std::path::PathBuf;

use clap::error::ErrorKind;
use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use lobby_chat::client;
use lobby_chat::config::{load_secret, ClientConfig, DEFAULT_HOST};
use lobby_chat::error::{AppError, EXIT_BAD_ARGS, EXIT_OK};

const USAGE: &str = "Usage: lobby_client name authfile port";

/// Chat lobby client
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Display name to request
    name: String,
    /// File whose first line is the shared secret
    authfile: PathBuf,
    /// Server port
    port: u16,
    /// Server address
    #[arg(short = 'H', long, default_value = DEFAULT_HOST)]
    host: String,
}

fn report(err: &AppError) {
    match err {
        AppError::Kicked => eprintln!("Kicked"),
        AppError::AuthenticationFailed => eprintln!("Authentication error"),
        AppError::AuthFile { .. } => eprintln!("{USAGE}"),
        AppError::Abandoned => {}
        _ => eprintln!("Communications error"),
    }
}

#[tokio::main]
async fn main() {
    let args = match Args::try_parse() {
        Ok(args) if !args.name.is_empty() => args,
        Ok(_) => {
            eprintln!("{USAGE}");
            std::process::exit(EXIT_BAD_ARGS.into());
        }
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = e.print();
            std::process::exit(EXIT_OK.into());
        }
        Err(_) => {
            eprintln!("{USAGE}");
            std::process::exit(EXIT_BAD_ARGS.into());
        }
    };

    // Chat output owns stdout; logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("lobby_chat=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = match load_secret(&args.authfile).await {
        Ok(secret) => {
            client::run(ClientConfig {
                name: args.name,
                secret,
                host: args.host,
                port: args.port,
            })
            .await
        }
        Err(e) => Err(e),
    };

    let code = match result {
        Ok(()) => EXIT_OK,
        Err(e) => {
            debug!("Client finished: {}", e);
            report(&e);
            e.exit_code()
        }
    };

    // A pending stdin read would otherwise hold the runtime open
    std::process::exit(code.into());
}
