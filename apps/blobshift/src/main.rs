//! blobshift entry point.

mod app;
mod config;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "blobshift")]
#[command(version)]
#[command(about = "Copy one large object to a multipart object store")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Override the part size in bytes
    #[arg(long)]
    part_size: Option<u64>,

    /// Override the number of concurrent part uploads
    #[arg(long)]
    max_in_flight: Option<usize>,

    /// Re-hash the destination file after copying
    #[arg(long)]
    verify: bool,

    /// Print the outcome as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> anyhow::Result<ExitCode> {
    // Logs go to stderr so JSON output stays parseable.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = config::Config::load(&cli.config)?;
    if let Some(part_size) = cli.part_size {
        config.part_size = part_size;
    }
    if let Some(max_in_flight) = cli.max_in_flight {
        config.max_in_flight = max_in_flight;
    }
    config.verify |= cli.verify;

    let output = if cli.json {
        app::Output::Json
    } else {
        app::Output::Text
    };

    let rt = tokio::runtime::Runtime::new()?;
    let success = rt.block_on(app::run(config, output))?;

    Ok(if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
