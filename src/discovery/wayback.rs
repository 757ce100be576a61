//! Wayback Machine CDX discovery source.
//!
//! Recovers item URLs from the Internet Archive's CDX index when a site's
//! live sitemap yields nothing (robots/CDN gating). Pagination uses the
//! server-provided resume cursor; collection is best-effort and returns
//! whatever it has gathered when a page cannot be fetched.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use tracing::{debug, warn};

use crate::discovery::{DiscoveredUrl, DiscoveryError};
use crate::fetch::Fetcher;
use crate::retry::RetryPolicy;

/// Public CDX API endpoint.
pub const CDX_API_URL: &str = "https://web.archive.org/cdx/search/cdx";

/// Archive date range, `YYYYMMDD` integers as the CDX API expects.
#[derive(Debug, Clone, Copy)]
pub struct DateRange {
    pub from: u32,
    pub to: u32,
}

impl DateRange {
    /// Range covering the trailing `days` up to today.
    pub fn trailing_days(days: i64) -> Self {
        let to = Utc::now().date_naive();
        let from = to - chrono::Duration::days(days);
        Self {
            from: compact(from),
            to: compact(to),
        }
    }
}

fn compact(date: NaiveDate) -> u32 {
    date.format("%Y%m%d")
        .to_string()
        .parse()
        .unwrap_or_default()
}

/// Tuning for CDX collection.
#[derive(Debug, Clone)]
pub struct ArchiveConfig {
    /// CDX endpoint; injectable for tests.
    pub api_url: String,

    /// Maximum number of entries to collect overall.
    pub max_count: usize,

    /// Entries requested per page. Must not exceed `max_count`; the
    /// upstream service expects modest pages.
    pub chunk_size: usize,

    /// Mandatory pause between page requests. The archive's rate
    /// expectations make this a hard requirement, not a tuning knob.
    pub page_delay: Duration,

    pub retry: RetryPolicy,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            api_url: CDX_API_URL.to_string(),
            max_count: 5000,
            chunk_size: 4000,
            page_delay: Duration::from_secs(5),
            retry: RetryPolicy::archive_default(),
        }
    }
}

/// Paginated CDX collector.
#[derive(Clone)]
pub struct ArchiveSource {
    fetcher: Fetcher,
    config: ArchiveConfig,
}

impl ArchiveSource {
    pub fn new(fetcher: Fetcher, config: ArchiveConfig) -> Self {
        Self { fetcher, config }
    }

    /// Collect archived URLs under `url_prefix` within `range`.
    ///
    /// Pages forward with the server's resume cursor. Terminates early when
    /// the server returns fewer than two rows (end of index) or when the
    /// cursor stops advancing (stuck/looping protection). Per-page failures
    /// are retried with exponential backoff up to the attempt budget, then
    /// the partial result is returned; this path never hard-fails the run.
    pub async fn collect(
        &self,
        url_prefix: &str,
        range: DateRange,
    ) -> Result<Vec<DiscoveredUrl>, DiscoveryError> {
        if self.config.chunk_size > self.config.max_count {
            return Err(DiscoveryError::Config(
                "chunk size must not exceed max count".to_string(),
            ));
        }

        let prefix = strip_scheme(url_prefix);
        let pages = self.config.max_count / self.config.chunk_size;
        let mut collected: Vec<DiscoveredUrl> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut cursor = String::new();

        for page in 0..pages {
            let page_url = self.page_url(&prefix, range, &cursor);

            let rows = match self.fetch_page(&page_url).await {
                Some(rows) => rows,
                None => {
                    warn!(
                        "Giving up CDX pagination after {} attempts, returning {} URLs",
                        self.config.retry.max_attempts,
                        collected.len()
                    );
                    return Ok(collected);
                }
            };

            if rows.len() < 2 {
                debug!("CDX index exhausted after {} pages", page);
                break;
            }

            // Last row's first column is the next resume cursor. A cursor
            // that does not advance means the server is looping; bail with
            // what we have.
            let next_cursor = rows
                .last()
                .and_then(|row| row.first())
                .cloned()
                .unwrap_or_default();
            if next_cursor.is_empty() || next_cursor == cursor {
                debug!("CDX resume cursor did not advance, stopping");
                break;
            }
            cursor = next_cursor;

            // Skip the header row and the trailing blank + cursor rows.
            let data_end = rows.len().saturating_sub(2).max(1);
            for row in &rows[1..data_end] {
                let original = row.get(2);
                let status = row.get(4).map(|s| s.as_str());
                if status != Some("200") {
                    continue;
                }
                if let Some(url) = original {
                    if seen.insert(url.clone()) {
                        collected.push(DiscoveredUrl::new(url.clone()));
                    }
                }
            }

            if page + 1 < pages {
                tokio::time::sleep(self.config.page_delay).await;
            }
        }

        debug!("CDX collected {} unique URLs for {}", collected.len(), prefix);
        Ok(collected)
    }

    /// Timestamp of the oldest capture of a single URL, if any.
    ///
    /// Best-effort enrichment; failures are logged and swallowed.
    pub async fn oldest_capture(&self, url: &str) -> Option<DateTime<Utc>> {
        let query = format!(
            "{}?url={}&output=json&fl=timestamp&limit=1",
            self.config.api_url,
            strip_scheme(url)
        );

        let body = match self.fetcher.fetch(&query).await {
            Ok(b) => b,
            Err(e) => {
                debug!("Oldest-capture lookup failed for {}: {}", url, e);
                return None;
            }
        };

        let rows: Vec<Vec<String>> = serde_json::from_str(&body).ok()?;
        let timestamp = rows.get(1)?.first()?;
        let parsed = NaiveDateTime::parse_from_str(timestamp, "%Y%m%d%H%M%S").ok()?;
        Some(parsed.and_utc())
    }

    fn page_url(&self, prefix: &str, range: DateRange, cursor: &str) -> String {
        let mut url = format!(
            "{}?url={}&collapse=urlkey&filter=statuscode:200&showResumeKey=true&matchType=prefix&from={}&to={}&limit={}&output=json",
            self.config.api_url, prefix, range.from, range.to, self.config.chunk_size
        );
        if !cursor.is_empty() {
            url.push_str("&resumeKey=");
            url.push_str(cursor);
        }
        url
    }

    /// Fetch and parse one CDX page within the retry budget.
    ///
    /// Returns `None` once the budget is exhausted or a permanent fetch
    /// error occurs.
    async fn fetch_page(&self, page_url: &str) -> Option<Vec<Vec<String>>> {
        for attempt in 0..self.config.retry.max_attempts {
            let result: Result<Vec<Vec<String>>, DiscoveryError> =
                match self.fetcher.fetch(page_url).await {
                    Ok(body) => serde_json::from_str(&body)
                        .map_err(|e| DiscoveryError::Parse(format!("unparseable CDX page: {}", e))),
                    Err(e) if e.is_transient() => Err(DiscoveryError::Http(e)),
                    Err(e) => {
                        warn!("CDX page fetch failed permanently: {}", e);
                        return None;
                    }
                };

            match result {
                Ok(rows) => return Some(rows),
                Err(e) => {
                    warn!("CDX page attempt {} failed: {}", attempt + 1, e);
                    if self.config.retry.has_next(attempt) {
                        tokio::time::sleep(self.config.retry.delay(attempt)).await;
                    }
                }
            }
        }
        None
    }
}

fn strip_scheme(url: &str) -> String {
    url.trim_start_matches("https://")
        .trim_start_matches("http://")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::retry::Backoff;

    fn test_config(api_url: String, max_count: usize, chunk_size: usize) -> ArchiveConfig {
        ArchiveConfig {
            api_url,
            max_count,
            chunk_size,
            page_delay: Duration::from_millis(1),
            retry: RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(1),
                backoff: Backoff::Exponential,
            },
        }
    }

    fn cdx_row(original: &str, status: &str) -> String {
        format!(
            r#"["co,example)/x","20240101000000","{}","text/html","{}","HASH","1024"]"#,
            original, status
        )
    }

    fn cdx_page(rows: &[String], cursor: &str) -> String {
        let header = r#"["urlkey","timestamp","original","mimetype","statuscode","digest","length"]"#;
        let mut all = vec![header.to_string()];
        all.extend(rows.iter().cloned());
        all.push("[]".to_string());
        all.push(format!(r#"["{}"]"#, cursor));
        format!("[{}]", all.join(","))
    }

    #[test]
    fn page_url_carries_all_parameters() {
        let source = ArchiveSource::new(
            Fetcher::new(),
            test_config(CDX_API_URL.to_string(), 100, 50),
        );
        let url = source.page_url(
            "huggingface.co/spaces/",
            DateRange {
                from: 20240101,
                to: 20241231,
            },
            "",
        );

        assert!(url.contains("url=huggingface.co/spaces/"));
        assert!(url.contains("matchType=prefix"));
        assert!(url.contains("from=20240101"));
        assert!(url.contains("to=20241231"));
        assert!(url.contains("limit=50"));
        assert!(url.contains("filter=statuscode:200"));
        assert!(url.contains("showResumeKey=true"));
        assert!(!url.contains("resumeKey="));

        let with_cursor = source.page_url(
            "huggingface.co/spaces/",
            DateRange {
                from: 20240101,
                to: 20241231,
            },
            "abc",
        );
        assert!(with_cursor.contains("resumeKey=abc"));
    }

    #[tokio::test]
    async fn chunk_larger_than_max_is_rejected() {
        let source = ArchiveSource::new(
            Fetcher::new(),
            test_config(CDX_API_URL.to_string(), 10, 50),
        );
        let range = DateRange {
            from: 20240101,
            to: 20241231,
        };
        let err = source.collect("example.com/", range).await;
        assert!(matches!(err, Err(DiscoveryError::Config(_))));
    }

    #[tokio::test]
    async fn stuck_cursor_terminates_pagination() {
        let mut server = mockito::Server::new_async().await;
        let api = format!("{}/cdx", server.url());

        let page_one = cdx_page(
            &[
                cdx_row("https://h.example/spaces/a/b", "200"),
                cdx_row("https://h.example/spaces/gone", "404"),
                cdx_row("https://h.example/spaces/a/b", "200"),
            ],
            "CUR1",
        );
        // Second page repeats the same cursor: the server is stuck.
        let page_two = cdx_page(&[cdx_row("https://h.example/spaces/c/d", "200")], "CUR1");

        let first = server
            .mock("GET", mockito::Matcher::Regex("^/cdx".to_string()))
            .with_status(200)
            .with_body(&page_one)
            .create_async()
            .await;
        let second = server
            .mock("GET", mockito::Matcher::Regex("^/cdx".to_string()))
            .match_query(mockito::Matcher::UrlEncoded(
                "resumeKey".to_string(),
                "CUR1".to_string(),
            ))
            .with_status(200)
            .with_body(&page_two)
            .create_async()
            .await;

        let source = ArchiveSource::new(Fetcher::new(), test_config(api, 6, 2));
        let range = DateRange {
            from: 20240101,
            to: 20241231,
        };
        let urls = source.collect("h.example/spaces/", range).await.unwrap();

        // Only page one's 200-status rows, deduplicated; the stuck second
        // page stops the walk before a third request.
        assert_eq!(urls.len(), 1);
        assert_eq!(urls[0].url, "https://h.example/spaces/a/b");
        first.assert_async().await;
        second.assert_async().await;
    }

    #[tokio::test]
    async fn short_page_means_end_of_index() {
        let mut server = mockito::Server::new_async().await;
        let api = format!("{}/cdx", server.url());

        let _mock = server
            .mock("GET", mockito::Matcher::Regex("^/cdx".to_string()))
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let source = ArchiveSource::new(Fetcher::new(), test_config(api, 6, 2));
        let range = DateRange {
            from: 20240101,
            to: 20241231,
        };
        let urls = source.collect("h.example/spaces/", range).await.unwrap();
        assert!(urls.is_empty());
    }

    #[tokio::test]
    async fn unparseable_pages_exhaust_budget_without_hanging() {
        let mut server = mockito::Server::new_async().await;
        let api = format!("{}/cdx", server.url());

        let mock = server
            .mock("GET", mockito::Matcher::Regex("^/cdx".to_string()))
            .with_status(200)
            .with_body("not json")
            .expect(2)
            .create_async()
            .await;

        let source = ArchiveSource::new(Fetcher::new(), test_config(api, 6, 2));
        let range = DateRange {
            from: 20240101,
            to: 20241231,
        };
        let urls = source.collect("h.example/spaces/", range).await.unwrap();

        assert!(urls.is_empty());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn oldest_capture_parses_timestamp() {
        let mut server = mockito::Server::new_async().await;
        let api = format!("{}/cdx", server.url());

        let _mock = server
            .mock("GET", mockito::Matcher::Regex("^/cdx".to_string()))
            .with_status(200)
            .with_body(r#"[["timestamp"],["20201011120000"]]"#)
            .create_async()
            .await;

        let source = ArchiveSource::new(Fetcher::new(), test_config(api, 6, 2));
        let captured = source
            .oldest_capture("https://h.example/spaces/a/b")
            .await
            .unwrap();
        assert_eq!(captured.to_rfc3339(), "2020-10-11T12:00:00+00:00");
    }
}
