//! Popularity metric extraction.
//!
//! Each catalog renders its run count differently, and the markup drifts.
//! The stable seam is the [`MetricExtractor`] trait; selector values live on
//! the catalog registry as data, not as a contract.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use tracing::debug;

static DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").unwrap());

/// Parses a page body into an optional popularity count.
///
/// `None` means the expected element is absent (layout mismatch, item
/// removed) - an extraction miss, not an error. Misses are logged and the
/// URL is skipped, never retried.
pub trait MetricExtractor: Send + Sync {
    fn extract(&self, body: &str) -> Option<u64>;
}

/// Expand a rendered metric string into an integer count.
///
/// Unit suffixes are multiplied out and truncated: `"12.3k"` becomes
/// `12300`, `"1.5m"` becomes `1500000`, `"842"` stays `842`. Thousands
/// separators are dropped. Falls back to the first digit run for strings
/// with surrounding text (`"1,234 runs"`).
pub fn parse_metric(text: &str) -> Option<u64> {
    let cleaned = text.trim().to_lowercase().replace(',', "");

    for (suffix, factor) in [("k", 1_000f64), ("m", 1_000_000f64)] {
        if let Some(number) = cleaned.strip_suffix(suffix) {
            let value: f64 = number.trim().parse().ok()?;
            if value < 0.0 {
                return None;
            }
            return Some((value * factor) as u64);
        }
    }

    DIGITS
        .find(&cleaned)
        .and_then(|m| m.as_str().parse().ok())
}

/// Extractor that reads the metric out of the nth match of a CSS selector.
pub struct SelectorMetricExtractor {
    selector: String,
    index: usize,
}

impl SelectorMetricExtractor {
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            index: 0,
        }
    }

    /// Use the nth selector match instead of the first (some catalogs
    /// render the count in the middle of a stats table).
    pub fn nth(mut self, index: usize) -> Self {
        self.index = index;
        self
    }
}

impl MetricExtractor for SelectorMetricExtractor {
    fn extract(&self, body: &str) -> Option<u64> {
        let selector = match Selector::parse(&self.selector) {
            Ok(s) => s,
            Err(e) => {
                debug!("Invalid metric selector {:?}: {:?}", self.selector, e);
                return None;
            }
        };

        let document = Html::parse_document(body);
        let element = document.select(&selector).nth(self.index)?;
        let text: String = element.text().collect::<Vec<_>>().join("");
        parse_metric(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_unit_suffixes() {
        assert_eq!(parse_metric("12.3k"), Some(12_300));
        assert_eq!(parse_metric("1.5m"), Some(1_500_000));
        assert_eq!(parse_metric("842"), Some(842));
        assert_eq!(parse_metric("2K"), Some(2_000));
    }

    #[test]
    fn strips_separators_and_surrounding_text() {
        assert_eq!(parse_metric("1,234"), Some(1_234));
        assert_eq!(parse_metric("  97 runs  "), Some(97));
    }

    #[test]
    fn garbage_is_a_miss() {
        assert_eq!(parse_metric("n/a"), None);
        assert_eq!(parse_metric(""), None);
        assert_eq!(parse_metric("xk"), None);
    }

    #[test]
    fn selector_reads_first_match() {
        let body = r#"<html><body><div class="stats"><span class="runs">12.3k</span></div></body></html>"#;
        let extractor = SelectorMetricExtractor::new("span.runs");
        assert_eq!(extractor.extract(body), Some(12_300));
    }

    #[test]
    fn selector_reads_nth_match() {
        let body = r#"<html><body><table>
            <tr class="stat"><td>Downloads</td><td>5</td></tr>
            <tr class="stat"><td>1,234</td></tr>
            <tr class="stat"><td>7</td></tr>
        </table></body></html>"#;
        let extractor = SelectorMetricExtractor::new("tr.stat").nth(1);
        assert_eq!(extractor.extract(body), Some(1_234));
    }

    #[test]
    fn missing_element_is_a_miss() {
        let body = "<html><body><p>nothing here</p></body></html>";
        let extractor = SelectorMetricExtractor::new("span.runs");
        assert_eq!(extractor.extract(body), None);
    }
}
