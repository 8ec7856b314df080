use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mls")]
#[command(version, about = "Paced, acknowledged file uploads", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a file to a storage server
    Upload {
        /// Ticket of the storage server
        ticket: String,

        /// File to upload (interactive if not provided)
        path: Option<PathBuf>,

        /// Throughput ceiling in MiB/s
        #[arg(long)]
        rate_mib: Option<u64>,

        /// Chunk size in KiB
        #[arg(long)]
        block_kib: Option<usize>,

        /// Seconds to wait for the last acknowledgments once everything is sent
        #[arg(long)]
        drain_timeout: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match cli.command {
        Commands::Upload {
            ticket,
            path,
            rate_mib,
            block_kib,
            drain_timeout,
        } => {
            mls_cli::run_upload(mls_cli::UploadArgs {
                ticket,
                path,
                rate_mib,
                block_kib,
                drain_timeout: drain_timeout.map(Duration::from_secs),
            })
            .await?;
        }
    }

    Ok(())
}
