//! Live search-index monitor.
//!
//! Supplements sitemap and archive discovery with pages a search index saw
//! recently - items too new to appear anywhere else yet. Strictly
//! best-effort: any failure or empty result falls through silently.

use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::discovery::DiscoveredUrl;
use crate::fetch::Fetcher;

/// Default recency window.
pub const DEFAULT_WINDOW: &str = "24h";

#[derive(Debug, Deserialize)]
struct IndexedPage {
    url: String,
}

/// Polls a search-index snapshot endpoint for recently indexed pages.
pub struct LiveIndexMonitor {
    fetcher: Fetcher,
    endpoint: String,
}

impl LiveIndexMonitor {
    pub fn new(fetcher: Fetcher, endpoint: String) -> Self {
        Self { fetcher, endpoint }
    }

    /// Pages indexed under `site_prefix` within `window` (e.g. `"24h"`).
    ///
    /// Returns an empty list on any failure.
    pub async fn recent(&self, site_prefix: &str, window: &str) -> Vec<DiscoveredUrl> {
        // Percent-encode the parameters; site prefixes carry slashes and
        // occasionally query-significant characters.
        let mut endpoint = match Url::parse(&self.endpoint) {
            Ok(u) => u,
            Err(e) => {
                debug!("Invalid live index endpoint {:?}: {}", self.endpoint, e);
                return Vec::new();
            }
        };
        endpoint
            .query_pairs_mut()
            .append_pair("site", site_prefix)
            .append_pair("range", window);
        let query = endpoint.to_string();

        let body = match self.fetcher.fetch(&query).await {
            Ok(b) => b,
            Err(e) => {
                debug!("Live index query failed: {}", e);
                return Vec::new();
            }
        };

        let pages: Vec<IndexedPage> = match serde_json::from_str(&body) {
            Ok(p) => p,
            Err(e) => {
                debug!("Live index returned unparseable payload: {}", e);
                return Vec::new();
            }
        };

        debug!(
            "Live index returned {} pages for {} within {}",
            pages.len(),
            site_prefix,
            window
        );

        pages
            .into_iter()
            .map(|p| DiscoveredUrl::new(p.url))
            .collect()
    }
}
