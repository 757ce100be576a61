//! Sitemap discovery source.
//!
//! Resolves sitemap-of-sitemaps indirection into a flat set of item URLs.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::discovery::{DiscoveredUrl, DiscoveryError};
use crate::fetch::Fetcher;

/// Upper bound on sitemap documents visited in one walk. Guards against
/// pathological or self-referential sitemap graphs.
const MAX_SITEMAPS: usize = 100;

/// Walks a sitemap tree and collects leaf item URLs.
///
/// Whether a `<loc>` entry is itself a sub-sitemap to recurse into or a leaf
/// to collect is decided by the caller-supplied predicate; the distinction
/// is a deployment-specific path pattern (e.g. `sitemap-N.xml`). Current
/// catalogs nest exactly two levels, but the walk handles arbitrary depth
/// and is cycle-safe.
pub struct SitemapWalker {
    fetcher: Fetcher,
    is_sub_sitemap: fn(&str) -> bool,
    category_for: fn(&str) -> Option<String>,
}

impl SitemapWalker {
    pub fn new(
        fetcher: Fetcher,
        is_sub_sitemap: fn(&str) -> bool,
        category_for: fn(&str) -> Option<String>,
    ) -> Self {
        Self {
            fetcher,
            is_sub_sitemap,
            category_for,
        }
    }

    /// Walk the sitemap tree rooted at `root_url`.
    ///
    /// A sub-sitemap fetch failure is logged and excluded from the result;
    /// the walk continues with whatever else is reachable (best-effort
    /// union). Returns deduplicated leaf URLs.
    pub async fn walk(&self, root_url: &str) -> Result<Vec<DiscoveredUrl>, DiscoveryError> {
        let mut collected: Vec<DiscoveredUrl> = Vec::new();
        let mut seen_leaves: HashSet<String> = HashSet::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut pending: Vec<(String, Option<String>)> = vec![(root_url.to_string(), None)];

        while let Some((sitemap_url, category)) = pending.pop() {
            if visited.contains(&sitemap_url) || visited.len() >= MAX_SITEMAPS {
                continue;
            }
            visited.insert(sitemap_url.clone());

            debug!("Fetching sitemap: {}", sitemap_url);
            let body = match self.fetcher.fetch(&sitemap_url).await {
                Ok(b) => b,
                Err(e) => {
                    warn!("Failed to fetch sitemap {}: {}", sitemap_url, e);
                    continue;
                }
            };

            for loc in extract_locs(&body) {
                if (self.is_sub_sitemap)(&loc) {
                    if !visited.contains(&loc) {
                        let category = (self.category_for)(&loc);
                        pending.push((loc, category));
                    }
                } else if seen_leaves.insert(loc.clone()) {
                    collected.push(DiscoveredUrl::new(loc).with_category(category.clone()));
                }
            }
        }

        debug!(
            "Sitemap walk from {} found {} URLs across {} documents",
            root_url,
            collected.len(),
            visited.len()
        );

        Ok(collected)
    }
}

/// Extract `<loc>` text values from a sitemap document.
///
/// Sitemaps use XML namespaces that selector-based parsers handle poorly,
/// so this scans for the tags directly. Works on minified single-line
/// documents as well as pretty-printed ones.
pub fn extract_locs(xml: &str) -> Vec<String> {
    let mut locs = Vec::new();
    let mut rest = xml;

    while let Some(start) = rest.find("<loc>") {
        rest = &rest[start + 5..];
        let Some(end) = rest.find("</loc>") else {
            break;
        };
        let raw = rest[..end].trim();
        locs.push(unescape_xml(raw));
        rest = &rest[end + 6..];
    }

    locs
}

fn unescape_xml(value: &str) -> String {
    value
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
}
