//! Data models for modelpulse.

use chrono::{DateTime, Utc};

/// A catalog item with its extracted popularity metric.
///
/// Keyed by normalized URL. `first_seen_at` is set on the first successful
/// persistence and preserved across later upserts; `last_updated_at` moves
/// on every successful write.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemRecord {
    /// Canonical item URL, the unique key for persistence and dedup.
    pub url: String,

    /// Extracted popularity count, unit suffixes already expanded.
    pub metric: u64,

    /// Catalog-specific classification tag, when the discovery source
    /// encodes one (e.g. a sitemap path segment).
    pub category: Option<String>,

    /// Timestamp of the oldest known web-archive capture, when enrichment
    /// is enabled. Kept via COALESCE on upsert since it may only be
    /// discovered in a later run than the row's first insert.
    pub archived_at: Option<DateTime<Utc>>,

    pub first_seen_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

impl ItemRecord {
    /// Create a record stamped with the current time.
    pub fn new(url: String, metric: u64) -> Self {
        let now = Utc::now();
        Self {
            url,
            metric,
            category: None,
            archived_at: None,
            first_seen_at: now,
            last_updated_at: now,
        }
    }

    pub fn with_category(mut self, category: Option<String>) -> Self {
        self.category = category;
        self
    }

    pub fn with_archived_at(mut self, archived_at: Option<DateTime<Utc>>) -> Self {
        self.archived_at = archived_at;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_start_equal() {
        let record = ItemRecord::new("https://example.com/a/b".to_string(), 12300);
        assert_eq!(record.first_seen_at, record.last_updated_at);
        assert!(record.category.is_none());
    }

    #[test]
    fn builders() {
        let record = ItemRecord::new("https://example.com/a/b".to_string(), 5)
            .with_category(Some("models".to_string()));
        assert_eq!(record.category.as_deref(), Some("models"));
    }
}
