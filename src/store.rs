//! Remote SQL-over-HTTP persistence.
//!
//! Rows live in a remote relational store reached through a query RPC:
//! `POST {base}/query` with a JSON `{"sql": ...}` body and bearer-token
//! auth (Cloudflare D1's HTTP endpoint). The store layer is split into the
//! transport ([`QueryExecutor`]) and the upsert logic ([`UpsertStore`]) so
//! the latter is testable without a network.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::StatusCode;
use serde_json::json;
use tracing::{debug, warn};

use crate::models::ItemRecord;
use crate::retry::RetryPolicy;

/// Error type for store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("store returned {status}")]
    Status { status: StatusCode },
}

impl StoreError {
    /// Network errors, timeouts, 5xx, and 429 are retryable.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            StoreError::Status { status } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
        }
    }
}

/// Executes a single SQL statement against the remote store.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, sql: &str) -> Result<(), StoreError>;
}

/// Cloudflare D1 query-endpoint client.
pub struct D1Client {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl D1Client {
    pub fn new(base_url: String, token: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            base_url,
            token,
        }
    }
}

#[async_trait]
impl QueryExecutor for D1Client {
    async fn execute(&self, sql: &str) -> Result<(), StoreError> {
        let url = format!("{}/query", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&json!({ "sql": sql }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::Status { status });
        }
        Ok(())
    }
}

/// Idempotent insert-or-update of item records.
///
/// One row per normalized URL: inserts set both timestamps, conflicts
/// update the metric and `last_updated_at` while `first_seen_at` and the
/// COALESCE-kept columns retain their existing values.
#[derive(Clone)]
pub struct UpsertStore {
    executor: Arc<dyn QueryExecutor>,
    table: String,
    retry: RetryPolicy,
}

impl UpsertStore {
    pub fn new(executor: Arc<dyn QueryExecutor>, table: String, retry: RetryPolicy) -> Self {
        Self {
            executor,
            table,
            retry,
        }
    }

    /// Create the destination table if absent. Idempotent; run once before
    /// any upsert.
    pub async fn ensure_table(&self) -> Result<(), StoreError> {
        let sql = self.create_table_sql();
        self.execute_with_retry(&sql).await?;
        debug!("Table {} checked/created", self.table);
        Ok(())
    }

    /// Persist one record, retrying transient failures within the budget.
    ///
    /// The statement is idempotent, so a retry after an ambiguous failure
    /// cannot produce a duplicate row.
    pub async fn upsert(&self, record: &ItemRecord) -> Result<(), StoreError> {
        let sql = self.upsert_sql(record);
        self.execute_with_retry(&sql).await?;
        debug!("Upserted {} with metric {}", record.url, record.metric);
        Ok(())
    }

    async fn execute_with_retry(&self, sql: &str) -> Result<(), StoreError> {
        let mut attempt = 0;
        loop {
            match self.executor.execute(sql).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && self.retry.has_next(attempt) => {
                    warn!(
                        "Store write attempt {} failed: {}, retrying in {:?}",
                        attempt + 1,
                        e,
                        self.retry.delay(attempt)
                    );
                    tokio::time::sleep(self.retry.delay(attempt)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn create_table_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n\
             url TEXT PRIMARY KEY,\n\
             metric INTEGER,\n\
             category TEXT,\n\
             archived_at TEXT,\n\
             first_seen_at TEXT,\n\
             last_updated_at TEXT\n\
             );",
            self.table
        )
    }

    fn upsert_sql(&self, record: &ItemRecord) -> String {
        let table = &self.table;
        format!(
            "INSERT INTO {table} (url, metric, category, archived_at, first_seen_at, last_updated_at)\n\
             VALUES ({url}, {metric}, {category}, {archived_at}, {first_seen}, {last_updated})\n\
             ON CONFLICT (url) DO UPDATE SET\n\
             metric = excluded.metric,\n\
             category = COALESCE({table}.category, excluded.category),\n\
             archived_at = COALESCE({table}.archived_at, excluded.archived_at),\n\
             last_updated_at = excluded.last_updated_at;",
            url = sql_text(&record.url),
            metric = record.metric,
            category = sql_opt_text(record.category.as_deref()),
            archived_at = sql_opt_timestamp(record.archived_at.as_ref()),
            first_seen = sql_timestamp(&record.first_seen_at),
            last_updated = sql_timestamp(&record.last_updated_at),
        )
    }
}

fn sql_text(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn sql_opt_text(value: Option<&str>) -> String {
    value.map(sql_text).unwrap_or_else(|| "NULL".to_string())
}

fn sql_timestamp(value: &DateTime<Utc>) -> String {
    sql_text(&value.to_rfc3339_opts(SecondsFormat::Secs, true))
}

fn sql_opt_timestamp(value: Option<&DateTime<Utc>>) -> String {
    value
        .map(sql_timestamp)
        .unwrap_or_else(|| "NULL".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crate::retry::Backoff;

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            backoff: Backoff::Fixed,
        }
    }

    /// Executor that fails transiently a set number of times, recording
    /// every statement that actually executed.
    struct FlakyExecutor {
        failures: AtomicUsize,
        executed: Mutex<Vec<String>>,
    }

    impl FlakyExecutor {
        fn failing(times: usize) -> Self {
            Self {
                failures: AtomicUsize::new(times),
                executed: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl QueryExecutor for FlakyExecutor {
        async fn execute(&self, sql: &str) -> Result<(), StoreError> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(StoreError::Status {
                    status: StatusCode::SERVICE_UNAVAILABLE,
                });
            }
            self.executed.lock().unwrap().push(sql.to_string());
            Ok(())
        }
    }

    fn record() -> ItemRecord {
        ItemRecord::new(
            "https://huggingface.co/spaces/AP123/IllusionDiffusion".to_string(),
            12_300,
        )
        .with_category(Some("models".to_string()))
    }

    #[test]
    fn upsert_sql_preserves_first_seen() {
        let store = UpsertStore::new(
            Arc::new(FlakyExecutor::failing(0)),
            "huggingface_spaces_data".to_string(),
            fast_retry(),
        );
        let sql = store.upsert_sql(&record());

        assert!(sql.contains("ON CONFLICT (url) DO UPDATE"));
        assert!(sql.contains("metric = excluded.metric"));
        // first_seen_at must not appear in the update clause.
        let update_clause = sql.split("DO UPDATE SET").nth(1).unwrap();
        assert!(!update_clause.contains("first_seen_at"));
        // Archive-derived columns keep their existing value once set.
        assert!(update_clause
            .contains("archived_at = COALESCE(huggingface_spaces_data.archived_at, excluded.archived_at)"));
    }

    #[test]
    fn sql_text_escapes_quotes() {
        assert_eq!(sql_text("O'Brien"), "'O''Brien'");
        assert_eq!(sql_opt_text(None), "NULL");
    }

    #[test]
    fn create_table_is_idempotent_sql() {
        let store = UpsertStore::new(
            Arc::new(FlakyExecutor::failing(0)),
            "t".to_string(),
            fast_retry(),
        );
        assert!(store.create_table_sql().starts_with("CREATE TABLE IF NOT EXISTS t"));
    }

    #[tokio::test]
    async fn transient_failures_retry_then_persist_once() {
        let executor = Arc::new(FlakyExecutor::failing(2));
        let store = UpsertStore::new(
            Arc::clone(&executor) as Arc<dyn QueryExecutor>,
            "t".to_string(),
            fast_retry(),
        );

        store.upsert(&record()).await.unwrap();

        // Two failed attempts, one successful execution - never a
        // duplicate statement.
        let executed = executor.executed.lock().unwrap();
        assert_eq!(executed.len(), 1);
        assert!(executed[0].contains("INSERT INTO t"));
    }

    #[tokio::test]
    async fn budget_exhaustion_reports_failure() {
        let executor = Arc::new(FlakyExecutor::failing(5));
        let store = UpsertStore::new(
            Arc::clone(&executor) as Arc<dyn QueryExecutor>,
            "t".to_string(),
            fast_retry(),
        );

        let err = store.upsert(&record()).await.unwrap_err();
        assert!(err.is_transient());
        assert!(executor.executed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn d1_client_posts_query() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/query")
            .match_header("authorization", "Bearer sekrit")
            .match_body(mockito::Matcher::PartialJson(
                serde_json::json!({"sql": "SELECT 1;"}),
            ))
            .with_status(200)
            .with_body(r#"{"success":true}"#)
            .create_async()
            .await;

        let client = D1Client::new(server.url(), "sekrit".to_string(), Duration::from_secs(5));
        client.execute("SELECT 1;").await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn d1_client_maps_status_errors() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/query")
            .with_status(500)
            .create_async()
            .await;

        let client = D1Client::new(server.url(), "sekrit".to_string(), Duration::from_secs(5));
        let err = client.execute("SELECT 1;").await.unwrap_err();
        assert!(err.is_transient());
    }
}
