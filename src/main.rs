//! `hikup` - the client CLI.

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "hikup", version, about = "Client for the hikup file store")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Upload a file; prints its hash and, if available, an HTTP link
    Up {
        /// File to upload
        file: PathBuf,
        /// Server address (host or host:port)
        server: String,
    },
    /// Download a file by hash into the current directory
    Down {
        /// Content hash printed at upload time
        hash: String,
        server: String,
    },
    /// Remove a file by hash
    Rm {
        hash: String,
        server: String,
    },
    /// List stored files (requires server credentials)
    Ls {
        user: String,
        pass: String,
        server: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Command::Up { file, server } => hikup::client::upload(&file, &server).await,
        Command::Down { hash, server } => hikup::client::download(&hash, &server).await,
        Command::Rm { hash, server } => hikup::client::remove(&hash, &server).await,
        Command::Ls { user, pass, server } => hikup::client::list(&user, &pass, &server).await,
    };

    if let Err(e) = result {
        eprintln!("{}", e.to_string().red());
        std::process::exit(1);
    }
}
