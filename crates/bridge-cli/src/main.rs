mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "bridge-daemon")]
#[command(about = "Local IPC broker exposing a curated catalog of library operations over a socket", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the broker daemon: bind the endpoint, register modules, serve
    /// connections until a shutdown signal arrives.
    Serve {
        /// Path to the YAML configuration file.
        #[arg(short, long, default_value = "bridge.yaml")]
        config: String,
    },

    /// One-shot dispatch: read a single request envelope from stdin, run
    /// it through the broker pipeline in-process, write the response
    /// envelope to stdout. Used as the client transport's subprocess
    /// fallback; never attempts a daemon connection itself.
    Once {
        /// Path to the YAML configuration file, if any.
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Manual client test: call `system.ping` through the client transport
    /// and print the response envelope.
    Ping {
        /// Seconds to wait before giving up.
        #[arg(short, long, default_value_t = 5)]
        timeout: u64,
    },
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Serve { config } => commands::serve::execute(&config).await?,
        Commands::Once { config } => commands::once::execute(config.as_deref()).await?,
        Commands::Ping { timeout } => commands::ping::execute(timeout).await?,
    };

    std::process::exit(code);
}
