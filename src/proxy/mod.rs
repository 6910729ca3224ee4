pub mod pool;
pub mod source;

pub use pool::{PoolSettings, ProxyPool, ProxyProvider};
pub use source::{HttpProxySource, ProxySource, SourceRole};

use crate::config::Config;
use crate::error::Result;

/// Build the configured proxy-list sources: every `PROXY_SOURCES` entry is
/// unioned, the optional `PROXY_FILTER_SOURCE` is intersected.
pub fn sources_from_config(cfg: &Config) -> Result<Vec<Box<dyn ProxySource>>> {
    let mut sources: Vec<Box<dyn ProxySource>> = Vec::new();
    for url in &cfg.proxy_sources {
        sources.push(Box::new(HttpProxySource::new(url.clone(), SourceRole::Union)?));
    }
    if let Some(url) = &cfg.proxy_filter_source {
        sources.push(Box::new(HttpProxySource::new(url.clone(), SourceRole::Filter)?));
    }
    Ok(sources)
}
