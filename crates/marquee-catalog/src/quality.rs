//! Adaptive asset quality selection
//!
//! A network-quality signal picks one of three asset tiers. Tier changes
//! are published on a `watch` channel; nothing in flight waits on them.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use tokio::sync::watch;
use tracing::debug;

/// Categorical network-quality signal
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkQuality {
    /// Fast connection; the default when no signal is available
    #[default]
    High,
    /// Moderate connection
    Medium,
    /// Slow or metered connection
    Low,
}

impl NetworkQuality {
    /// Map browser-style effective connection types (`4g`, `3g`, `2g`,
    /// `slow-2g`); unknown values yield `None`
    pub fn from_effective_type(effective_type: &str) -> Option<Self> {
        match effective_type.trim().to_ascii_lowercase().as_str() {
            "4g" | "5g" | "wifi" | "ethernet" => Some(Self::High),
            "3g" => Some(Self::Medium),
            "2g" | "slow-2g" => Some(Self::Low),
            _ => None,
        }
    }
}

/// Asset resolution tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    /// Smallest images
    Compressed,
    /// Medium images
    Standard,
    /// Largest images
    Hd,
}

impl QualityTier {
    /// Fixed mapping from network quality to tier
    pub fn for_network(quality: NetworkQuality) -> Self {
        match quality {
            NetworkQuality::Low => Self::Compressed,
            NetworkQuality::Medium => Self::Standard,
            NetworkQuality::High => Self::Hd,
        }
    }

    /// Name used in configuration and on the command line
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Compressed => "compressed",
            Self::Standard => "standard",
            Self::Hd => "hd",
        }
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QualityTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "compressed" => Ok(Self::Compressed),
            "standard" => Ok(Self::Standard),
            "hd" => Ok(Self::Hd),
            other => Err(format!("unknown quality tier: {other}")),
        }
    }
}

/// URL layout per tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityConfig {
    /// Image host base URL, without trailing slash
    pub image_base_url: String,
    /// Size segment for [`QualityTier::Compressed`]
    pub compressed_size: String,
    /// Size segment for [`QualityTier::Standard`]
    pub standard_size: String,
    /// Size segment for [`QualityTier::Hd`]
    pub hd_size: String,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            image_base_url: "https://image.tmdb.org/t/p".to_string(),
            compressed_size: "w185".to_string(),
            standard_size: "w342".to_string(),
            hd_size: "w780".to_string(),
        }
    }
}

impl QualityConfig {
    /// Size segment for `tier`
    pub fn size_for(&self, tier: QualityTier) -> &str {
        match tier {
            QualityTier::Compressed => &self.compressed_size,
            QualityTier::Standard => &self.standard_size,
            QualityTier::Hd => &self.hd_size,
        }
    }
}

/// Selects the asset tier from the latest network signal
#[derive(Debug)]
pub struct QualitySelector {
    config: QualityConfig,
    tier: watch::Sender<QualityTier>,
}

impl QualitySelector {
    /// Create a selector at the default (high quality) tier
    pub fn new(config: QualityConfig) -> Self {
        let (tier, _) = watch::channel(QualityTier::for_network(NetworkQuality::default()));
        Self { config, tier }
    }

    /// Get the URL configuration
    pub fn config(&self) -> &QualityConfig {
        &self.config
    }

    /// Currently selected tier
    pub fn current_tier(&self) -> QualityTier {
        *self.tier.borrow()
    }

    /// Feed a new network signal; `None` means no signal and falls back to high
    ///
    /// Returns the selected tier. Subscribers are notified only when it
    /// changes.
    pub fn update(&self, quality: Option<NetworkQuality>) -> QualityTier {
        self.set_tier(QualityTier::for_network(quality.unwrap_or_default()))
    }

    /// Feed connection metadata; `save_data` forces the lowest tier
    pub fn update_from_connection(
        &self,
        effective_type: Option<&str>,
        save_data: bool,
    ) -> QualityTier {
        let quality = if save_data {
            Some(NetworkQuality::Low)
        } else {
            effective_type.and_then(NetworkQuality::from_effective_type)
        };
        self.update(quality)
    }

    /// Select `tier` directly, bypassing the network mapping
    ///
    /// The next [`update`](Self::update) replaces it.
    pub fn force_tier(&self, tier: QualityTier) -> QualityTier {
        self.set_tier(tier)
    }

    fn set_tier(&self, next: QualityTier) -> QualityTier {
        let changed = self.tier.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            debug!("asset quality tier changed to {next}");
        }
        next
    }

    /// Receive tier changes
    pub fn subscribe(&self) -> watch::Receiver<QualityTier> {
        self.tier.subscribe()
    }

    /// Absolute URL for an asset path fragment
    ///
    /// Accepts fragments with or without a leading slash. Returns `None` for
    /// an empty fragment.
    pub fn resolve(&self, fragment: &str, tier_override: Option<QualityTier>) -> Option<String> {
        let fragment = fragment.trim().trim_start_matches('/');
        if fragment.is_empty() {
            return None;
        }
        let tier = tier_override.unwrap_or_else(|| self.current_tier());
        Some(format!(
            "{}/{}/{fragment}",
            self.config.image_base_url.trim_end_matches('/'),
            self.config.size_for(tier)
        ))
    }
}

impl Default for QualitySelector {
    fn default() -> Self {
        Self::new(QualityConfig::default())
    }
}
