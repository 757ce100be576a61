//! Configuration for modelpulse.
//!
//! Credentials come from the environment (a `.env` file is loaded in main);
//! crawl tuning has defaults that the CLI can override. Everything the
//! pipeline consumes is a typed value here - nothing reads the environment
//! past startup.

use std::env;
use std::time::Duration;

use anyhow::Context;

use crate::discovery::wayback::ArchiveConfig;
use crate::fetch::{DEFAULT_MAX_IN_FLIGHT, DEFAULT_TIMEOUT};
use crate::retry::RetryPolicy;

/// Remote store endpoint and credentials.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    /// Base URL of the SQL-over-HTTP endpoint; statements go to
    /// `{base_url}/query`.
    pub base_url: String,
    pub token: String,
    pub timeout: Duration,
}

/// Fetch tuning shared by the whole run.
#[derive(Debug, Clone)]
pub struct CrawlSettings {
    /// Global in-flight request ceiling.
    pub max_in_flight: usize,
    pub timeout: Duration,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Fully resolved runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub store: StoreSettings,
    pub crawl: CrawlSettings,
    pub archive: ArchiveConfig,
    pub store_retry: RetryPolicy,

    /// Days of archive history to search during fallback discovery.
    pub archive_window_days: i64,

    /// Query the archive for each item's oldest capture and persist it.
    pub archive_dates: bool,

    /// Search-index snapshot endpoint; live discovery is skipped when
    /// unset.
    pub live_index_endpoint: Option<String>,
}

impl Settings {
    /// Assemble settings from the environment.
    ///
    /// The store endpoint is either `MODELPULSE_STORE_URL` or composed from
    /// the Cloudflare account/database ids.
    pub fn from_env() -> anyhow::Result<Self> {
        let token = env::var("CLOUDFLARE_API_TOKEN")
            .context("CLOUDFLARE_API_TOKEN is not set")?;

        let base_url = match env::var("MODELPULSE_STORE_URL") {
            Ok(url) => url,
            Err(_) => {
                let account = env::var("CLOUDFLARE_ACCOUNT_ID")
                    .context("CLOUDFLARE_ACCOUNT_ID is not set")?;
                let database = env::var("CLOUDFLARE_D1_DATABASE_ID")
                    .context("CLOUDFLARE_D1_DATABASE_ID is not set")?;
                format!(
                    "https://api.cloudflare.com/client/v4/accounts/{}/d1/database/{}",
                    account, database
                )
            }
        };

        Ok(Self {
            store: StoreSettings {
                base_url,
                token,
                timeout: Duration::from_secs(30),
            },
            crawl: CrawlSettings::default(),
            archive: ArchiveConfig::default(),
            store_retry: RetryPolicy::store_default(),
            archive_window_days: 365,
            archive_dates: false,
            live_index_endpoint: env::var("MODELPULSE_LIVE_INDEX_URL").ok(),
        })
    }
}
