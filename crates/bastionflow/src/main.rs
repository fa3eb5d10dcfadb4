mod commands;
mod ip;
mod prompt;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "bastion")]
#[command(
    about = "Provision a bastion host with a private database on AWS, and roll it back",
    long_about = None
)]
struct Cli {
    /// Directory holding rollback ledgers (default: current directory)
    #[arg(long, global = true, env = "BASTIONFLOW_STATE_DIR")]
    state_dir: Option<PathBuf>,

    /// AWS region
    #[arg(long, global = true, env = "AWS_REGION")]
    region: Option<String>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the VPC, bastion instance and database
    Create(commands::create::CreateArgs),
    /// Delete the resources recorded in a rollback ledger
    Rollback {
        /// Deployment name
        #[arg(long, conflicts_with = "file")]
        name: Option<String>,
        /// Path to a *_rollback.json ledger
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// List stored rollback ledgers
    List,
    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    // Version needs no settings
    if matches!(cli.command, Commands::Version) {
        println!("bastionflow {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let context = commands::Context::load(cli.state_dir, cli.region)?;

    match cli.command {
        Commands::Create(args) => commands::create::handle(&context, args).await?,
        Commands::Rollback { name, file } => {
            commands::rollback::handle(&context, name, file).await?;
        }
        Commands::List => commands::list::handle(&context).await?,
        Commands::Version => unreachable!("Version is handled before settings are loaded"),
    }

    Ok(())
}
