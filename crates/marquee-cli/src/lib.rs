//! Command-line driver for the marquee catalog client
//!
//! The binary parses [`Cli`], builds a [`CatalogClient`] and runs one
//! [`Command`] under a cancellation token that Ctrl-C trips.
//!
//! ```no_run
//! use clap::Parser;
//! use marquee_cli::{Cli, run};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let cli = Cli::parse_from(["marquee", "search", "alien", "--json"]);
//! let code = run(cli).await?;
//! std::process::exit(code);
//! # }
//! ```

#![allow(clippy::return_self_not_must_use)]

pub mod args;
pub mod output;

pub use args::{Cli, Command};
pub use output::CommandOutput;

use marquee_catalog::{CancellationToken, CatalogClient, CatalogError, MovieId};
use tracing::{debug, info};

/// Exit status for a command that failed
pub const EXIT_FAILURE: i32 = 1;

/// Exit status after Ctrl-C
pub const EXIT_INTERRUPTED: i32 = 130;

/// Run one command against the client
pub async fn execute(
    client: &CatalogClient,
    command: &Command,
    cancel: &CancellationToken,
) -> Result<CommandOutput, CatalogError> {
    match command {
        Command::Popular { page } => client.fetch_page(*page, cancel).await.map(CommandOutput::Page),
        Command::Search { query, page } => client
            .search(query, *page, cancel)
            .await
            .map(CommandOutput::Page),
        Command::Details { id } => client
            .fetch_by_id(&MovieId::from(id.as_str()), cancel)
            .await
            .map(CommandOutput::Movie),
        Command::Trending { window } => client
            .fetch_trending(*window, cancel)
            .await
            .map(CommandOutput::Trending),
        Command::Metrics => Ok(CommandOutput::Metrics(client.metrics())),
    }
}

/// Parse-to-print entry point used by the binary; returns the exit status
pub async fn run(cli: Cli) -> anyhow::Result<i32> {
    let config = cli.load_config()?;
    info!("Using catalog API at {}", config.api_base_url);

    let client = CatalogClient::new(config)?;
    if let Some(tier) = cli.tier {
        client.quality().force_tier(tier);
    }

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("interrupt received, cancelling");
            interrupt.cancel();
        }
    });

    match execute(&client, &cli.command, &cancel).await {
        Ok(output) => {
            println!("{}", output.render(cli.json)?.trim_end());
            Ok(0)
        }
        Err(error) => {
            debug!("command failed: {error}");
            match error.user_message() {
                Some(message) => {
                    eprintln!("{message}");
                    Ok(EXIT_FAILURE)
                }
                None => Ok(EXIT_INTERRUPTED),
            }
        }
    }
}
