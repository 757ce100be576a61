//! Rate-limited HTTP fetching.
//!
//! All page and sitemap fetches in a run go through one [`Fetcher`], which
//! bounds the number of simultaneous in-flight requests with a shared
//! semaphore. The permit is held only for the duration of the request and
//! body read, never across extraction or persistence.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use tokio::sync::Semaphore;
use tracing::debug;

/// Default cap on simultaneous in-flight requests.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 50;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

const USER_AGENT: &str = "Mozilla/5.0 (compatible; modelpulse/0.3)";

/// Error returned by [`Fetcher::fetch`].
///
/// Callers decide whether to retry; the fetcher itself never does. Retry
/// policy differs by use (best-effort page scrape vs durable write), so it
/// lives with the caller.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned {status}")]
    Status { url: String, status: StatusCode },
}

impl FetchError {
    /// Whether this failure is expected to be retry-recoverable.
    ///
    /// Connection errors, timeouts, 5xx, and 429 are transient; other
    /// non-2xx statuses are permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Request { source, .. } => {
                source.is_timeout() || source.is_connect() || source.is_request()
            }
            FetchError::Status { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
        }
    }
}

/// HTTP GET client bounded by a global concurrency ceiling.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    permits: Arc<Semaphore>,
}

impl Fetcher {
    /// Create a fetcher with the default concurrency cap and timeout.
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_IN_FLIGHT, DEFAULT_TIMEOUT)
    }

    /// Create a fetcher with an explicit concurrency cap and timeout.
    pub fn with_limits(max_in_flight: usize, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            permits: Arc::new(Semaphore::new(max_in_flight)),
        }
    }

    /// Number of permits currently free. Exposed for instrumentation.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Fetch a URL and return the response body as text.
    ///
    /// Waits for a concurrency permit before issuing the request. Non-2xx
    /// statuses are reported as [`FetchError::Status`]; the body is only
    /// read on success.
    pub async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .expect("fetch semaphore closed");

        debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| FetchError::Request {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }

        response.text().await.map_err(|source| FetchError::Request {
            url: url.to_string(),
            source,
        })
    }
}

impl Default for Fetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn status_transience() {
        let err = FetchError::Status {
            url: "https://example.com".to_string(),
            status: StatusCode::SERVICE_UNAVAILABLE,
        };
        assert!(err.is_transient());

        let err = FetchError::Status {
            url: "https://example.com".to_string(),
            status: StatusCode::TOO_MANY_REQUESTS,
        };
        assert!(err.is_transient());

        let err = FetchError::Status {
            url: "https://example.com".to_string(),
            status: StatusCode::NOT_FOUND,
        };
        assert!(!err.is_transient());
    }

    /// Minimal HTTP server that counts concurrent connections and answers
    /// slowly enough for overlap to be observable.
    async fn slow_server(listener: TcpListener, active: Arc<AtomicUsize>, peak: Arc<AtomicUsize>) {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            tokio::spawn(async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);

                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                tokio::time::sleep(Duration::from_millis(50)).await;

                let body = b"ok";
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.write_all(body).await;

                active.fetch_sub(1, Ordering::SeqCst);
            });
        }
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_cap() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        tokio::spawn(slow_server(
            listener,
            Arc::clone(&active),
            Arc::clone(&peak),
        ));

        let cap = 4;
        let fetcher = Fetcher::with_limits(cap, Duration::from_secs(5));
        let url = format!("http://{}/", addr);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let fetcher = fetcher.clone();
            let url = url.clone();
            handles.push(tokio::spawn(async move { fetcher.fetch(&url).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert!(
            peak.load(Ordering::SeqCst) <= cap,
            "observed {} concurrent requests with cap {}",
            peak.load(Ordering::SeqCst),
            cap
        );
        assert_eq!(fetcher.available_permits(), cap);
    }
}
