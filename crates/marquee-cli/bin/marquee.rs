//! Marquee binary entry point.
//!
//! This is a thin wrapper around the marquee-cli library that:
//! 1. Initializes logging
//! 2. Parses command-line arguments
//! 3. Runs the command and exits with its status
//!
//! Logs go to stderr so `--json` output stays machine-readable.

use anyhow::Result;
use clap::Parser;
use marquee_cli::{Cli, run};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let code = run(cli).await?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
