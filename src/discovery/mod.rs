//! URL discovery for catalog items.
//!
//! Discovery is layered: the sitemap walk is authoritative, the Wayback CDX
//! index recovers URLs when the sitemap is gated, and the live index monitor
//! supplements both with freshly published items. All three are best-effort;
//! only a run that discovers nothing at all ends early.

pub mod live_index;
pub mod sitemap;
pub mod wayback;

pub use live_index::LiveIndexMonitor;
pub use sitemap::SitemapWalker;
pub use wayback::ArchiveSource;

/// Error type for discovery operations.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] crate::fetch::FetchError),

    #[error("failed to parse response: {0}")]
    Parse(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// A discovered URL with the metadata discovery attaches to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredUrl {
    pub url: String,

    /// Classification tag carried from the discovery source, e.g. the
    /// sitemap path segment a catalog encodes its item type in.
    pub category: Option<String>,
}

impl DiscoveredUrl {
    pub fn new(url: String) -> Self {
        Self {
            url,
            category: None,
        }
    }

    pub fn with_category(mut self, category: Option<String>) -> Self {
        self.category = category;
        self
    }
}
