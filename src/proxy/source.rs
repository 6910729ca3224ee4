use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::PROXY_LIST_TIMEOUT_SECS;
use crate::error::{AppError, Result};
use crate::types::Proxy;

/// How a source's entries are combined into the candidate set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceRole {
    /// Entries are added to the candidate set.
    Union,
    /// Candidates not listed here are dropped (HTTP-capable allow-list).
    Filter,
}

/// A remote list of `host:port` proxies.
#[async_trait]
pub trait ProxySource: Send + Sync {
    fn name(&self) -> &str;
    fn role(&self) -> SourceRole;
    async fn fetch(&self) -> Result<HashSet<Proxy>>;
}

/// Plaintext proxy list served over HTTP.
pub struct HttpProxySource {
    url: String,
    role: SourceRole,
    client: reqwest::Client,
}

impl HttpProxySource {
    pub fn new(url: impl Into<String>, role: SourceRole) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(PROXY_LIST_TIMEOUT_SECS))
            .build()?;
        Ok(Self { url: url.into(), role, client })
    }
}

#[async_trait]
impl ProxySource for HttpProxySource {
    fn name(&self) -> &str {
        &self.url
    }

    fn role(&self) -> SourceRole {
        self.role
    }

    async fn fetch(&self) -> Result<HashSet<Proxy>> {
        let resp = self.client.get(&self.url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AppError::ProxySource(format!("{} returned {status}", self.url)));
        }
        let body = resp.text().await?;
        let proxies = parse_proxy_list(&body);
        debug!(source = %self.url, count = proxies.len(), "Proxy list fetched");
        Ok(proxies)
    }
}

/// Parse newline-separated `host:port` entries. Blank lines, `#` comments and
/// entries without a numeric port are skipped.
pub fn parse_proxy_list(body: &str) -> HashSet<Proxy> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let entry = line.split_whitespace().next()?;
            let (host, port) = entry.rsplit_once(':')?;
            if host.is_empty() || port.parse::<u16>().is_err() {
                return None;
            }
            Some(Proxy::new(entry))
        })
        .collect()
}

/// Fetch every source concurrently and combine: union sources are merged,
/// then the candidates are intersected with each reachable filter source.
///
/// Unreachable sources are skipped. Errors only when no union source answered.
pub async fn collect_candidates(sources: &[Box<dyn ProxySource>]) -> Result<HashSet<Proxy>> {
    let results = futures_util::future::join_all(sources.iter().map(|s| s.fetch())).await;

    let mut candidates: HashSet<Proxy> = HashSet::new();
    let mut filters: Vec<HashSet<Proxy>> = Vec::new();
    let mut union_ok = 0usize;

    for (source, result) in sources.iter().zip(results) {
        match (source.role(), result) {
            (SourceRole::Union, Ok(list)) => {
                union_ok += 1;
                candidates.extend(list);
            }
            (SourceRole::Filter, Ok(list)) => filters.push(list),
            (role, Err(e)) => {
                warn!(source = source.name(), ?role, "Proxy source unavailable: {e}");
            }
        }
    }

    if union_ok == 0 {
        return Err(AppError::ProxySource("no proxy-list source answered".to_string()));
    }

    for allow in &filters {
        candidates.retain(|p| allow.contains(p));
    }
    Ok(candidates)
}
