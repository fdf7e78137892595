//! Command-line arguments

use clap::{Parser, Subcommand};
use marquee_catalog::{CatalogConfig, QualityTier, TrendingWindow};
use std::path::PathBuf;

/// Browse the movie catalog from the terminal
#[derive(Debug, Clone, Parser)]
#[command(name = "marquee", about = "Query a movie catalog through the marquee client", version)]
pub struct Cli {
    /// JSON configuration file; environment variables are used otherwise
    #[arg(long, global = true, env = "MARQUEE_CONFIG")]
    pub config: Option<PathBuf>,

    /// API key, overriding the configuration
    #[arg(long, global = true, env = "MARQUEE_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Asset quality tier (compressed, standard, hd)
    #[arg(long, global = true)]
    pub tier: Option<QualityTier>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Catalog operations
#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// List popular movies
    Popular {
        /// 1-based page number
        #[arg(long, default_value_t = 1)]
        page: u32,
    },
    /// Search movies by title
    Search {
        /// Search text
        query: String,
        /// 1-based page number
        #[arg(long, default_value_t = 1)]
        page: u32,
    },
    /// Show one movie
    Details {
        /// Movie identifier
        id: String,
    },
    /// List trending movies
    Trending {
        /// Aggregation window (day, week)
        #[arg(long, default_value = "day")]
        window: TrendingWindow,
    },
    /// Print breaker and cache metrics
    Metrics,
}

impl Cli {
    /// Resolve the client configuration from the file or environment,
    /// then apply command-line overrides
    pub fn load_config(&self) -> anyhow::Result<CatalogConfig> {
        let mut config = match &self.config {
            Some(path) => CatalogConfig::from_json_file(path)?,
            None => CatalogConfig::from_env()?,
        };
        if let Some(api_key) = &self.api_key {
            config.api_key = Some(api_key.clone());
        }
        Ok(config)
    }
}
