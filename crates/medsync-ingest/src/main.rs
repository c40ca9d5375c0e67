//! Medsync Ingest - command line client for the import API

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use medsync_common::checksum;
use medsync_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use medsync_common::ImportResult;
use medsync_ingest::client::{ImportClient, DEFAULT_SERVER_URL};
use medsync_ingest::output;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "medsync-ingest")]
#[command(author, version, about = "Medsync import client")]
struct Cli {
    /// Base URL of the Medsync server
    #[arg(long, global = true, env = "MEDSYNC_SERVER_URL", default_value = DEFAULT_SERVER_URL)]
    server: String,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a spreadsheet to a file-mode source
    Upload {
        source: String,
        file: PathBuf,

        /// Directory for error_report.csv / info_report.csv
        #[arg(short, long)]
        reports: Option<PathBuf>,
    },

    /// Pull a cloud source on the server and follow its progress
    Sync {
        source: String,

        /// Directory for error_report.csv / info_report.csv
        #[arg(short, long)]
        reports: Option<PathBuf>,
    },

    /// List the configured import sources
    Sources,

    /// Show recent import runs
    History {
        #[arg(short, long)]
        source: Option<String>,

        #[arg(short, long, default_value_t = 20)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Warn
    };
    // The progress bar owns the terminal unless --verbose
    let log_config = LogConfig::builder()
        .level(level)
        .output(if cli.verbose {
            LogOutput::Console
        } else {
            LogOutput::File
        })
        .log_file_prefix("medsync-ingest")
        .build()
        .merge_env()?;
    let _guard = init_logging(&log_config)?;

    let client = ImportClient::new(&cli.server)
        .with_context(|| format!("Failed to create client for {}", cli.server))?;

    match cli.command {
        Command::Upload {
            source,
            file,
            reports,
        } => {
            // Same fingerprint the server records in the run history
            let digest = checksum::sha256_file(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            info!(source = %source, file = %file.display(), sha256 = %digest, "Uploading file");

            let spinner = ProgressBar::new_spinner();
            spinner.set_message(format!("Importing {} into {source}", file.display()));
            spinner.enable_steady_tick(Duration::from_millis(120));

            let result = client.upload(&source, &file).await;
            spinner.finish_and_clear();
            finish(&source, &result?, reports).await?;
            println!("File SHA-256: {digest}");
        },
        Command::Sync { source, reports } => {
            let bar = ProgressBar::new(100);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos:>3}% {msg}")?
                    .progress_chars("#>-"),
            );

            let result = client
                .sync(&source, |event| {
                    if let Some(pct) = event.pct {
                        bar.set_position(u64::from(pct));
                    }
                    bar.set_message(event.status.clone());
                })
                .await;
            match &result {
                Ok(_) => bar.finish_with_message("done"),
                Err(_) => bar.abandon_with_message("failed"),
            }
            finish(&source, &result?, reports).await?;
        },
        Command::Sources => {
            let sources = client.sources().await?;
            print!("{}", output::sources_table(&sources));
        },
        Command::History { source, limit } => {
            let entries = client.history(source.as_deref(), Some(limit)).await?;
            print!("{}", output::history_table(&entries));
        },
    }

    Ok(())
}

async fn finish(source: &str, result: &ImportResult, reports: Option<PathBuf>) -> Result<()> {
    print!("{}", output::summarize(source, result));

    if let Some(dir) = reports {
        let written = output::write_reports(&dir, result)
            .await
            .with_context(|| format!("Failed to write reports to {}", dir.display()))?;
        for path in written {
            info!(path = %path.display(), "Report written");
            println!("Report written to {}", path.display());
        }
    }
    Ok(())
}
