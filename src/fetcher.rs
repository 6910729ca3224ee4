use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{Config, ACQUIRE_RETRY_MS, RETRY_BACKOFF_MS};
use crate::error::Result;
use crate::proxy::ProxyProvider;
use crate::types::{FetchOutcome, FetchTask, Proxy, ProxyOutcome};

/// Re-acquires allowed when the pool hands back the proxy that just failed.
const SAME_PROXY_RETRIES: usize = 5;

/// Upstream URL of one symbol-day. The month in the path is zero-based.
pub fn tick_url(base: &str, symbol: &str, day: NaiveDate) -> String {
    format!(
        "{}/datafeed/{}/{}/{:02}/{:02}_ticks.bi5",
        base.trim_end_matches('/'),
        symbol.to_uppercase(),
        day.year(),
        day.month0(),
        day.day()
    )
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    /// Only read for 200 responses.
    pub body: Vec<u8>,
}

/// A single GET routed through one proxy.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str, proxy: &Proxy, timeout: Duration) -> Result<HttpResponse>;
}

/// `reqwest` transport. A client's proxy is fixed when it is built, so one
/// client is kept per proxy and dropped again after a transport error.
#[derive(Debug, Default)]
pub struct ReqwestTransport {
    clients: DashMap<Proxy, reqwest::Client>,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn client_for(&self, proxy: &Proxy) -> Result<reqwest::Client> {
        if let Some(client) = self.clients.get(proxy) {
            return Ok(client.clone());
        }
        let client = reqwest::Client::builder()
            .proxy(reqwest::Proxy::all(format!("http://{}", proxy.addr()))?)
            .build()?;
        self.clients.insert(proxy.clone(), client.clone());
        Ok(client)
    }

    async fn send(client: &reqwest::Client, url: &str, timeout: Duration) -> Result<HttpResponse> {
        let resp = client.get(url).timeout(timeout).send().await?;
        let status = resp.status().as_u16();
        if status != 200 {
            return Ok(HttpResponse { status, body: Vec::new() });
        }
        let body = resp.bytes().await?.to_vec();
        Ok(HttpResponse { status, body })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, url: &str, proxy: &Proxy, timeout: Duration) -> Result<HttpResponse> {
        let client = self.client_for(proxy)?;
        let result = Self::send(&client, url, timeout).await;
        if result.is_err() {
            self.clients.remove(proxy);
        }
        result
    }
}

// ---------------------------------------------------------------------------
// FetchUnit
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub base_url: String,
    pub attempts: usize,
    pub request_timeout: Duration,
    /// Milliseconds to wait before attempt `n + 1`; the last value repeats.
    pub backoff_ms: Vec<u64>,
    /// Wait before asking the pool again after it returned the proxy that just failed.
    pub reacquire_delay: Duration,
}

impl FetchSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            base_url: cfg.datafeed_url.clone(),
            attempts: cfg.fetch_attempts.max(1),
            request_timeout: cfg.request_timeout,
            backoff_ms: RETRY_BACKOFF_MS.to_vec(),
            reacquire_delay: Duration::from_millis(ACQUIRE_RETRY_MS),
        }
    }

    fn backoff(&self, attempt: usize) -> Duration {
        let idx = attempt.min(self.backoff_ms.len().saturating_sub(1));
        Duration::from_millis(self.backoff_ms.get(idx).copied().unwrap_or(0))
    }
}

/// Resolves one symbol-day to a payload, rotating proxies on every attempt.
pub struct FetchUnit {
    transport: Arc<dyn Transport>,
    pool: Arc<dyn ProxyProvider>,
    settings: FetchSettings,
    shutdown: CancellationToken,
}

impl FetchUnit {
    pub fn new(
        transport: Arc<dyn Transport>,
        pool: Arc<dyn ProxyProvider>,
        settings: FetchSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self { transport, pool, settings, shutdown }
    }

    /// Attempts are strictly sequential. Every issued request is reported to
    /// the pool exactly once, including the one in flight when shutdown
    /// is requested.
    pub async fn run(&self, task: &FetchTask) -> FetchOutcome {
        let url = tick_url(&self.settings.base_url, &task.symbol, task.day);
        let mut last: Option<Proxy> = None;

        for attempt in 1..=self.settings.attempts {
            if attempt > 1 {
                let delay = self.settings.backoff(attempt - 2);
                if !delay.is_zero() {
                    tokio::select! {
                        _ = self.shutdown.cancelled() => return FetchOutcome::Cancelled,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
            if self.shutdown.is_cancelled() {
                return FetchOutcome::Cancelled;
            }

            let Some(proxy) = self.acquire_fresh(last.as_ref()).await else {
                return FetchOutcome::Cancelled;
            };

            match self.transport.get(&url, &proxy, self.settings.request_timeout).await {
                Ok(resp) if resp.status == 200 => {
                    self.pool.report(&proxy, ProxyOutcome::Success);
                    debug!(task = %task, proxy = %proxy, attempt, bytes = resp.body.len(), "Fetched");
                    return if resp.body.is_empty() {
                        FetchOutcome::Empty
                    } else {
                        FetchOutcome::Delivered(resp.body)
                    };
                }
                Ok(resp) => {
                    self.pool.report(&proxy, ProxyOutcome::Failure);
                    debug!(task = %task, proxy = %proxy, attempt, status = resp.status, "Upstream refused");
                }
                Err(e) => {
                    self.pool.report(&proxy, ProxyOutcome::Failure);
                    debug!(task = %task, proxy = %proxy, attempt, "Request failed: {e}");
                }
            }
            last = Some(proxy);
        }

        warn!(task = %task, attempts = self.settings.attempts, "Giving up on {task} after {} attempts", self.settings.attempts);
        FetchOutcome::Exhausted { attempts: self.settings.attempts }
    }

    /// Acquire a proxy other than `last`. While the pool keeps offering
    /// `last`, it is held back and the pool is asked again after
    /// `reacquire_delay`, so proxies still in flight elsewhere can return.
    /// After `SAME_PROXY_RETRIES` tries `last` is used anyway.
    async fn acquire_fresh(&self, last: Option<&Proxy>) -> Option<Proxy> {
        let mut held: Option<Proxy> = None;
        for _ in 0..SAME_PROXY_RETRIES {
            let Some(proxy) = self.pool.acquire().await else { break };
            if Some(&proxy) != last {
                if let Some(prev) = held.take() {
                    self.pool.release(prev);
                }
                return Some(proxy);
            }
            if let Some(prev) = held.replace(proxy) {
                self.pool.release(prev);
            }
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.settings.reacquire_delay) => {}
            }
        }

        if self.shutdown.is_cancelled() {
            if let Some(prev) = held.take() {
                self.pool.release(prev);
            }
            return None;
        }
        held
    }
}
