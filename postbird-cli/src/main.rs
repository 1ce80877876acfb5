//! postbird-cli - Command-line interface for postbird
//!
//! Calls functions on a running server and listens for calls it broadcasts.

mod commands;

use clap::{Parser, Subcommand};
use colored::Colorize;
use postbird_client::{Client, ClientConfig};
use postbird_protocol::{TransportKind, DEFAULT_PORT, DEFAULT_REMOTE_ADDRESS};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "postbird-cli")]
#[command(about = "Command-line interface for postbird servers")]
#[command(version)]
struct Cli {
    /// Server host
    #[arg(long, env = "POSTBIRD_REMOTE_ADDRESS", default_value = DEFAULT_REMOTE_ADDRESS)]
    host: String,

    /// Server port
    #[arg(short, long, env = "POSTBIRD_REMOTE_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Transport the server speaks (raw_tcp or push_channel)
    #[arg(short, long, env = "POSTBIRD_TRANSPORT", default_value_t = TransportKind::PushChannel)]
    transport: TransportKind,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Call a function on the server
    Call {
        /// Function name
        name: String,

        /// Arguments; each is parsed as JSON, falling back to a plain string
        args: Vec<String>,
    },

    /// Print calls the server broadcasts until it disconnects
    Listen {
        /// Stop after this many calls
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    tracing::debug!("Connecting to {}:{} ({})", cli.host, cli.port, cli.transport);
    let config =
        ClientConfig::new(format!("{}:{}", cli.host, cli.port)).with_transport(cli.transport);
    let client = Client::new(config);

    if let Err(e) = client.connect().await {
        eprintln!(
            "{} Failed to connect to {}:{}: {}",
            "Error:".red(),
            cli.host,
            cli.port,
            e
        );
        std::process::exit(1);
    }

    let result = commands::execute(&client, cli.command).await;
    let _ = client.close().await;

    match result {
        Ok(output) => println!("{}", output),
        Err(e) => {
            eprintln!("{} {}", "Error:".red(), e);
            std::process::exit(1);
        }
    }
}
