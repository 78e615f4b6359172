use anyhow::Result;
use clap::{Parser, Subcommand};
use engram::config::EngramConfig;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "engram", version, about = "Memory lifecycle and retrieval coordinator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the background worker (salience, lifecycle, distillation loops)
    Worker,
    /// Run one salience aggregation pass
    Salience,
    /// Run one lifecycle maintenance pass
    Lifecycle,
    /// Run one distillation scan
    Distill,
    /// Show memory store statistics
    Stats {
        /// Restrict memory counts to one user
        #[arg(long)]
        user: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load config (for log level)
    let config = EngramConfig::load()?;

    // Logs go to stderr so stdout stays clean for command output.
    let filter =
        EnvFilter::try_new(&config.server.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Worker => engram::cli::jobs::worker(config).await?,
        Command::Salience => engram::cli::jobs::salience_once(&config).await?,
        Command::Lifecycle => engram::cli::jobs::lifecycle_once(&config)?,
        Command::Distill => engram::cli::jobs::distill_once(&config).await?,
        Command::Stats { user } => engram::cli::stats::stats(&config, user.as_deref())?,
    }

    Ok(())
}
