use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use console::style;
use dialoguer::{theme::ColorfulTheme, Input, Select};
use indicatif::{ProgressBar, ProgressStyle};
use mls_core::{CancellationToken, MlsClient, ServerTicket, UploadConfig, UploadProgress};
use tokio::sync::mpsc;
use tracing::debug;

/// Options for a single upload, as given on the command line
#[derive(Debug, Clone)]
pub struct UploadArgs {
    pub ticket: String,
    pub path: Option<PathBuf>,
    pub rate_mib: Option<u64>,
    pub block_kib: Option<usize>,
    pub drain_timeout: Option<Duration>,
}

impl UploadArgs {
    fn config(&self) -> Result<UploadConfig> {
        let mut config = UploadConfig::default();
        if let Some(rate) = self.rate_mib {
            let Some(bytes) = rate.checked_mul(1024 * 1024) else {
                anyhow::bail!("--rate-mib {} is too large", rate);
            };
            config = config.with_throughput(bytes);
        }
        if let Some(block) = self.block_kib {
            let Some(bytes) = block.checked_mul(1024) else {
                anyhow::bail!("--block-kib {} is too large", block);
            };
            config = config.with_block_size(bytes);
        }
        if let Some(timeout) = self.drain_timeout {
            config = config.with_drain_timeout(timeout);
        }
        config.validate().context("invalid upload options")?;
        Ok(config)
    }
}

pub async fn run_upload(args: UploadArgs) -> Result<()> {
    let ticket: ServerTicket = args
        .ticket
        .parse()
        .context("could not read the server ticket")?;

    // Interactive file selection if no path provided
    let path = match args.path.clone() {
        Some(p) => p,
        None => select_file_interactive()?,
    };

    if !path.is_file() {
        anyhow::bail!("Not a file: {}", path.display());
    }

    let file_name = path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());

    println!(
        "\n{} Uploading: {}",
        style("⚡").cyan(),
        style(&file_name).green()
    );
    println!("{}", style("Connecting to storage server...").dim());

    let client = MlsClient::connect(&ticket, args.config()?).await?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("interrupt received, cancelling upload");
            ctrl_c.cancel();
        }
    });

    let (progress_tx, mut progress_rx) = mpsc::channel(32);
    let upload = tokio::spawn(async move { client.upload(path, cancel, progress_tx).await });

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta}) {msg}")?
            .progress_chars("=>-"),
    );

    while let Some(progress) = progress_rx.recv().await {
        match progress {
            UploadProgress::Connected => {
                println!("{}", style("Connected!").green());
            }
            UploadProgress::Streaming {
                bytes_sent,
                total_bytes,
            } => {
                pb.set_length(total_bytes);
                pb.set_position(bytes_sent);
            }
            UploadProgress::Draining {
                pending,
                total_chunks,
            } => {
                pb.set_message(format!(
                    "waiting for {}/{} acknowledgments",
                    pending, total_chunks
                ));
            }
            UploadProgress::Complete => {
                pb.finish_with_message("done");
            }
            UploadProgress::Error(_) => {
                pb.abandon();
            }
        }
    }

    let report = upload.await.context("upload task panicked")??;

    println!(
        "\n{} Uploaded {} ({} in {} chunks, {:.1}s)",
        style("✓").green().bold(),
        style(&report.file.name).cyan(),
        format_bytes(report.bytes),
        report.chunks,
        report.elapsed.as_secs_f64()
    );

    Ok(())
}

/// Interactive file selection
fn select_file_interactive() -> Result<PathBuf> {
    println!(
        "\n{} What would you like to upload?",
        style("⚡").cyan()
    );

    let options = vec!["Select a file", "Enter path manually"];
    let selection = Select::with_theme(&ColorfulTheme::default())
        .items(&options)
        .default(0)
        .interact()?;

    match selection {
        0 => {
            // List regular files in the current directory
            let cwd = std::env::current_dir()?;
            let mut entries: Vec<_> = std::fs::read_dir(&cwd)?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_file())
                .collect();
            entries.sort();

            if entries.is_empty() {
                anyhow::bail!("No files in current directory");
            }

            let display_names: Vec<String> = entries
                .iter()
                .map(|p| {
                    p.file_name()
                        .map(|s| s.to_string_lossy().to_string())
                        .unwrap_or_default()
                })
                .collect();

            let selection = Select::with_theme(&ColorfulTheme::default())
                .with_prompt("Select file")
                .items(&display_names)
                .default(0)
                .interact()?;

            Ok(entries[selection].clone())
        }
        _ => {
            let input: String = Input::with_theme(&ColorfulTheme::default())
                .with_prompt("Enter path")
                .interact_text()?;

            Ok(expand_path(&input))
        }
    }
}

fn expand_path(input: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(input.trim()).to_string())
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
