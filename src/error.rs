use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Proxy source error: {0}")]
    ProxySource(String),

    #[error("No proxies available from any proxy-list source")]
    NoProxies,

    #[error("Output error: {0}")]
    Sink(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

/// A payload that was delivered but cannot be turned into tick rows.
/// Kept apart from `AppError` so the scheduler can count it per symbol-day.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("LZMA decompression failed: {0}")]
    Decompress(String),

    #[error("decompressed payload of {len} bytes leaves {remainder} trailing bytes")]
    TrailingBytes { len: usize, remainder: usize },
}
