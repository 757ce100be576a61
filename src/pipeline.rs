//! Run orchestration.
//!
//! A run moves through discover, normalize+dedup, bounded fetch+extract,
//! persist, and summarize. Per-URL failures are isolated: a page that
//! cannot be fetched, parsed, or stored is logged and counted, never
//! allowed to abort sibling work. Only a run that discovers nothing at all
//! ends early, as an empty-result run rather than an error.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::discovery::wayback::DateRange;
use crate::discovery::{live_index, ArchiveSource, DiscoveredUrl, LiveIndexMonitor, SitemapWalker};
use crate::fetch::Fetcher;
use crate::models::ItemRecord;
use crate::store::UpsertStore;
use crate::utils::normalize_item_url;

/// Progress events for UI layers. The pipeline itself renders nothing.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// Discovery and dedup finished; this many items will be processed.
    Discovered { total: usize },
    Fetched { url: String },
    /// Page fetched but no metric found on it (layout mismatch).
    Missed { url: String },
    Persisted { url: String },
    Failed { url: String, error: String },
}

/// Counts reported at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub discovered: usize,
    pub fetched: usize,
    pub extracted: usize,
    pub persisted: usize,
    pub failed: usize,
}

/// Per-run tuning.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Sitemap yields below this engage archive fallback discovery.
    pub min_sitemap_yield: usize,

    /// Cap on items processed per run; 0 means unlimited.
    pub max_items: usize,

    /// Whether archive fallback may run at all.
    pub use_fallback: bool,

    /// Days of history to search when falling back to the archive.
    pub archive_window_days: i64,

    /// Look up each item's oldest archive capture and persist it.
    pub archive_dates: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_sitemap_yield: 1,
            max_items: 0,
            use_fallback: true,
            archive_window_days: 365,
            archive_dates: false,
        }
    }
}

enum TaskOutcome {
    Cancelled,
    FetchFailed,
    Miss,
    StoreFailed,
    Persisted,
}

/// One crawl of one catalog.
pub struct Pipeline {
    catalog: Catalog,
    fetcher: Fetcher,
    store: UpsertStore,
    archive: ArchiveSource,
    live_index: Option<LiveIndexMonitor>,
    config: PipelineConfig,
    cancel: CancellationToken,
    events: Option<mpsc::Sender<PipelineEvent>>,
}

impl Pipeline {
    pub fn new(
        catalog: Catalog,
        fetcher: Fetcher,
        store: UpsertStore,
        archive: ArchiveSource,
        config: PipelineConfig,
    ) -> Self {
        Self {
            catalog,
            fetcher,
            store,
            archive,
            live_index: None,
            config,
            cancel: CancellationToken::new(),
            events: None,
        }
    }

    /// Supplement discovery with a live search-index monitor.
    pub fn with_live_index(mut self, monitor: LiveIndexMonitor) -> Self {
        self.live_index = Some(monitor);
        self
    }

    /// Emit progress events to the given channel.
    pub fn with_events(mut self, events: mpsc::Sender<PipelineEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Cooperative cancellation: once the token fires, no new fetches are
    /// issued and in-flight ones drain.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Execute the run and return its summary.
    pub async fn run(&self) -> anyhow::Result<RunSummary> {
        let mut summary = RunSummary::default();

        self.store.ensure_table().await?;

        let discovered = self.discover().await;
        let mut items = dedup_normalized(discovered, self.catalog.base_prefix.as_deref());
        if items.is_empty() {
            info!("No URLs discovered for {}, ending run", self.catalog.id);
            return Ok(summary);
        }
        if self.config.max_items > 0 && items.len() > self.config.max_items {
            items.truncate(self.config.max_items);
        }
        summary.discovered = items.len();
        self.emit(PipelineEvent::Discovered { total: items.len() })
            .await;

        info!(
            "Processing {} items for {} with fallback={}",
            items.len(),
            self.catalog.id,
            self.config.use_fallback
        );

        let mut tasks: JoinSet<TaskOutcome> = JoinSet::new();
        for (url, category) in items {
            if self.cancel.is_cancelled() {
                debug!("Cancelled before scheduling {}", url);
                break;
            }

            let fetcher = self.fetcher.clone();
            let store = self.store.clone();
            let extractor = self.catalog.extractor.clone();
            let archive = self.config.archive_dates.then(|| self.archive.clone());
            let cancel = self.cancel.clone();
            let events = self.events.clone();

            tasks.spawn(async move {
                if cancel.is_cancelled() {
                    return TaskOutcome::Cancelled;
                }

                let body = match fetcher.fetch(&url).await {
                    Ok(body) => body,
                    Err(e) => {
                        warn!("Failed to fetch {}: {}", url, e);
                        if let Some(tx) = &events {
                            let _ = tx
                                .send(PipelineEvent::Failed {
                                    url,
                                    error: e.to_string(),
                                })
                                .await;
                        }
                        return TaskOutcome::FetchFailed;
                    }
                };
                if let Some(tx) = &events {
                    let _ = tx.send(PipelineEvent::Fetched { url: url.clone() }).await;
                }

                let Some(metric) = extractor.extract(&body) else {
                    debug!("No metric found on {}", url);
                    if let Some(tx) = &events {
                        let _ = tx.send(PipelineEvent::Missed { url }).await;
                    }
                    return TaskOutcome::Miss;
                };

                let archived_at = match &archive {
                    Some(archive) => archive.oldest_capture(&url).await,
                    None => None,
                };

                let record = ItemRecord::new(url.clone(), metric)
                    .with_category(category)
                    .with_archived_at(archived_at);

                match store.upsert(&record).await {
                    Ok(()) => {
                        if let Some(tx) = &events {
                            let _ = tx.send(PipelineEvent::Persisted { url }).await;
                        }
                        TaskOutcome::Persisted
                    }
                    Err(e) => {
                        warn!("Failed to persist {}: {}", url, e);
                        if let Some(tx) = &events {
                            let _ = tx
                                .send(PipelineEvent::Failed {
                                    url,
                                    error: e.to_string(),
                                })
                                .await;
                        }
                        TaskOutcome::StoreFailed
                    }
                }
            });
        }

        // Explicit join point: every task's outcome is observed, including
        // panics, without taking down siblings.
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(TaskOutcome::Cancelled) => {}
                Ok(TaskOutcome::FetchFailed) => summary.failed += 1,
                Ok(TaskOutcome::Miss) => summary.fetched += 1,
                Ok(TaskOutcome::StoreFailed) => {
                    summary.fetched += 1;
                    summary.extracted += 1;
                    summary.failed += 1;
                }
                Ok(TaskOutcome::Persisted) => {
                    summary.fetched += 1;
                    summary.extracted += 1;
                    summary.persisted += 1;
                }
                Err(e) => {
                    warn!("Worker task failed: {}", e);
                    summary.failed += 1;
                }
            }
        }

        info!(
            "Run complete for {}: {} discovered, {} fetched, {} extracted, {} persisted, {} failed",
            self.catalog.id,
            summary.discovered,
            summary.fetched,
            summary.extracted,
            summary.persisted,
            summary.failed
        );

        Ok(summary)
    }

    /// Multi-source discovery: sitemap first, archive fallback when the
    /// yield is below the usefulness threshold, live index as supplement.
    async fn discover(&self) -> Vec<DiscoveredUrl> {
        let walker = SitemapWalker::new(
            self.fetcher.clone(),
            self.catalog.is_sub_sitemap,
            self.catalog.category_for,
        );

        let mut discovered = match walker.walk(&self.catalog.root_sitemap).await {
            Ok(urls) => urls,
            Err(e) => {
                warn!("Sitemap walk failed for {}: {}", self.catalog.id, e);
                Vec::new()
            }
        };
        debug!("Sitemap yielded {} URLs", discovered.len());

        if discovered.len() < self.config.min_sitemap_yield && self.config.use_fallback {
            info!(
                "Sitemap yield {} below threshold {}, engaging archive fallback",
                discovered.len(),
                self.config.min_sitemap_yield
            );
            let range = DateRange::trailing_days(self.config.archive_window_days);
            match self.archive.collect(&self.catalog.archive_prefix, range).await {
                Ok(urls) => {
                    debug!("Archive fallback recovered {} URLs", urls.len());
                    discovered.extend(urls);
                }
                Err(e) => warn!("Archive fallback failed: {}", e),
            }
        }

        if let Some(monitor) = &self.live_index {
            let recent = monitor
                .recent(&self.catalog.archive_prefix, live_index::DEFAULT_WINDOW)
                .await;
            debug!("Live index supplied {} URLs", recent.len());
            discovered.extend(recent);
        }

        discovered
    }

    async fn emit(&self, event: PipelineEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event).await;
        }
    }
}

/// Canonicalize every discovered URL and collapse to one entry each.
///
/// The first category seen for a URL wins, except that a missing category
/// is filled in by a later source that has one.
fn dedup_normalized(
    discovered: Vec<DiscoveredUrl>,
    base_prefix: Option<&str>,
) -> Vec<(String, Option<String>)> {
    let mut by_url: HashMap<String, Option<String>> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for entry in discovered {
        let Some(url) = normalize_item_url(&entry.url, base_prefix) else {
            continue;
        };
        match by_url.get_mut(&url) {
            Some(existing) => {
                if existing.is_none() && entry.category.is_some() {
                    *existing = entry.category;
                }
            }
            None => {
                by_url.insert(url.clone(), entry.category);
                order.push(url);
            }
        }
    }

    order
        .into_iter()
        .map(|url| {
            let category = by_url.remove(&url).unwrap_or_default();
            (url, category)
        })
        .collect()
}
