use std::path::PathBuf;
use std::time::Duration;

use chrono::{Local, NaiveDate};
use clap::{Parser, ValueEnum};

use crate::error::{AppError, Result};

pub const DATAFEED_URL: &str = "http://datafeed.dukascopy.com";

/// Union sources: every `host:port` they list becomes a candidate.
pub const PROXY_SOURCES: &[&str] = &[
    "https://raw.githubusercontent.com/TheSpeedX/PROXY-List/master/http.txt",
    "https://raw.githubusercontent.com/clarketm/proxy-list/master/proxy-list-raw.txt",
    "https://api.proxyscrape.com/v2/?request=getproxies&protocol=http&timeout=10000&country=all",
];

/// Allow-list of HTTP-capable proxies. Candidates are intersected with it.
pub const PROXY_FILTER_SOURCE: &str =
    "https://raw.githubusercontent.com/monosans/proxy-list/main/proxies/http.txt";

/// Attempts per symbol-day before the unit is reported as exhausted.
pub const FETCH_ATTEMPTS: usize = 60;

/// Per-request timeout through a proxy (seconds).
pub const REQUEST_TIMEOUT_SECS: u64 = 5;

/// Timeout when downloading a proxy list (seconds).
pub const PROXY_LIST_TIMEOUT_SECS: u64 = 15;

/// Delay before the next attempt, indexed by attempt number. The last value repeats.
pub const RETRY_BACKOFF_MS: &[u64] = &[0, 50, 100, 200, 400];

/// Extra downloads of a symbol-day whose payload failed to decode.
pub const DECODE_REFETCHES: usize = 1;

/// Proxy health tuning.
pub mod health {
    /// Proxies below this score are never loaned again.
    pub const EVICTION_FLOOR: i64 = -6;
    /// Proxies above this score are not re-queued by a warm refill.
    pub const REUSE_CEILING: i64 = 8;
    /// Upper bound on any score.
    pub const HEALTH_CAP: i64 = 10;
    /// Penalty applied per failed request.
    pub const FAILURE_PENALTY: i64 = 2;
}

/// Active proxies needed for a warm (network-free) refill.
pub const MIN_POOL: usize = 64;

/// Ready-queue capacity.
pub const READY_QUEUE_CAPACITY: usize = 10_000;

/// Pause before contacting the proxy-list sources (milliseconds).
pub const COLD_REFILL_PAUSE_MS: u64 = 500;

/// Cooldown after a cold refill that produced nothing (seconds).
pub const COLD_REFILL_COOLDOWN_SECS: u64 = 10;

/// How long `acquire` waits before retrying when the pool is dry or another
/// caller is refilling (milliseconds).
pub const ACQUIRE_RETRY_MS: u64 = 100;

/// Upper bound on `--concurrency`; the scheduler's semaphore cannot hold more permits.
pub const MAX_CONCURRENCY: usize = tokio::sync::Semaphore::MAX_PERMITS;

/// Channel capacity for completed task reports.
pub const CHANNEL_CAPACITY: usize = 1024;

/// Log a progress line every this many completed symbol-days.
pub const PROGRESS_LOG_EVERY: u64 = 50;

// ---------------------------------------------------------------------------
// Environment config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub datafeed_url: String,
    /// Attempt bound per symbol-day (FETCH_ATTEMPTS)
    pub fetch_attempts: usize,
    /// Per-request timeout in seconds (REQUEST_TIMEOUT_SECS)
    pub request_timeout: Duration,
    /// Active-proxy threshold separating warm and cold refills (PROXY_MIN_POOL)
    pub min_pool: usize,
    /// Union proxy-list URLs (PROXY_SOURCES, comma-separated)
    pub proxy_sources: Vec<String>,
    /// Intersection allow-list URL (PROXY_FILTER_SOURCE). Empty disables the filter.
    pub proxy_filter_source: Option<String>,
    /// Extra downloads after a decode failure (DECODE_REFETCHES)
    pub decode_refetches: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let proxy_sources = match std::env::var("PROXY_SOURCES") {
            Ok(list) => split_list(&list),
            Err(_) => PROXY_SOURCES.iter().map(|s| s.to_string()).collect(),
        };
        let proxy_filter_source = match std::env::var("PROXY_FILTER_SOURCE") {
            Ok(url) if url.trim().is_empty() => None,
            Ok(url) => Some(url.trim().to_string()),
            Err(_) => Some(PROXY_FILTER_SOURCE.to_string()),
        };

        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            datafeed_url: std::env::var("DATAFEED_URL")
                .unwrap_or_else(|_| DATAFEED_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            fetch_attempts: env_number("FETCH_ATTEMPTS", FETCH_ATTEMPTS)?,
            request_timeout: Duration::from_secs(env_number(
                "REQUEST_TIMEOUT_SECS",
                REQUEST_TIMEOUT_SECS,
            )?),
            min_pool: env_number("PROXY_MIN_POOL", MIN_POOL)?,
            proxy_sources,
            proxy_filter_source,
            decode_refetches: env_number("DECODE_REFETCHES", DECODE_REFETCHES)?,
        })
    }
}

fn env_number<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::Config(format!("{key} must be a number, got '{raw}'"))),
        Err(_) => Ok(default),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

// ---------------------------------------------------------------------------
// Command line
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Parquet,
    Csv,
}

/// Download historical tick data through rotating HTTP proxies.
#[derive(Debug, Parser)]
#[command(name = "tick-downloader", version)]
pub struct Args {
    /// Symbols to download, e.g. EURUSD EURGBP
    #[arg(required = true, value_name = "SYMBOLS")]
    pub symbols: Vec<String>,

    /// Single day to download, YYYY-MM-DD (default yesterday)
    #[arg(short, long)]
    pub day: Option<NaiveDate>,

    /// First day of the range, YYYY-MM-DD (default --day)
    #[arg(short, long)]
    pub start_date: Option<NaiveDate>,

    /// Last day of the range, YYYY-MM-DD (default --day)
    #[arg(short, long)]
    pub end_date: Option<NaiveDate>,

    /// Maximum symbol-days in flight
    #[arg(short, long, default_value_t = 200)]
    pub concurrency: usize,

    /// Destination folder
    #[arg(short, long, default_value = ".")]
    pub folder: PathBuf,

    /// Output file format
    #[arg(long, value_enum, default_value_t = OutputFormat::Parquet)]
    pub format: OutputFormat,

    /// Omit the CSV header row
    #[arg(long, default_value_t = false)]
    pub no_header: bool,
}

/// A validated download request.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub symbols: Vec<String>,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub concurrency: usize,
    pub folder: PathBuf,
    pub format: OutputFormat,
    pub header: bool,
}

impl RunRequest {
    pub fn from_args(args: Args) -> Result<Self> {
        let day = args
            .day
            .or_else(|| Local::now().date_naive().pred_opt())
            .ok_or_else(|| AppError::Config("cannot compute default day".to_string()))?;
        let request = Self {
            symbols: args.symbols.iter().map(|s| s.trim().to_uppercase()).collect(),
            start: args.start_date.unwrap_or(day),
            end: args.end_date.unwrap_or(day),
            concurrency: args.concurrency,
            folder: args.folder,
            format: args.format,
            header: !args.no_header,
        };
        request.validate()?;
        Ok(request)
    }

    pub fn validate(&self) -> Result<()> {
        if self.symbols.is_empty() || self.symbols.iter().any(|s| s.is_empty()) {
            return Err(AppError::Config("at least one non-empty symbol is required".to_string()));
        }
        if self.start > self.end {
            return Err(AppError::Config(format!(
                "start date {} is after end date {}",
                self.start, self.end
            )));
        }
        if self.concurrency == 0 {
            return Err(AppError::Config("concurrency must be at least 1".to_string()));
        }
        if self.concurrency > MAX_CONCURRENCY {
            return Err(AppError::Config(format!(
                "concurrency {} exceeds the maximum of {MAX_CONCURRENCY}",
                self.concurrency
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["tick-downloader"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn range_defaults_to_single_day() {
        let req = RunRequest::from_args(args(&["eurusd", "--day", "2024-03-05"])).unwrap();
        assert_eq!(req.symbols, vec!["EURUSD".to_string()]);
        assert_eq!(req.start, NaiveDate::from_ymd_opt(2024, 3, 5).unwrap());
        assert_eq!(req.end, req.start);
        assert!(req.header);
        assert_eq!(req.format, OutputFormat::Parquet);
    }

    #[test]
    fn start_after_end_is_rejected() {
        let err = RunRequest::from_args(args(&[
            "EURUSD",
            "--start-date",
            "2024-03-10",
            "--end-date",
            "2024-03-01",
        ]))
        .unwrap_err();
        assert!(matches!(err, AppError::Config(_)), "got {err}");
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let err = RunRequest::from_args(args(&["EURUSD", "--day", "2024-03-05", "-c", "0"]))
            .unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn oversized_concurrency_is_rejected() {
        let limit = MAX_CONCURRENCY.to_string();
        let ok = RunRequest::from_args(args(&["EURUSD", "--day", "2024-03-05", "-c", &limit]));
        assert!(ok.is_ok());

        let over = usize::MAX.to_string();
        let err = RunRequest::from_args(args(&["EURUSD", "--day", "2024-03-05", "-c", &over]))
            .unwrap_err();
        assert!(matches!(err, AppError::Config(_)), "got {err}");
    }

    #[test]
    fn split_list_drops_blanks() {
        assert_eq!(split_list(" a, ,b,"), vec!["a".to_string(), "b".to_string()]);
    }
}
