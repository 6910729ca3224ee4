mod calendar;
mod config;
mod decoder;
mod error;
mod fetcher;
mod progress;
mod proxy;
mod scheduler;
mod sink;
mod types;

use std::sync::Arc;

use chrono::Local;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::calendar::count_trading_days;
use crate::config::{Args, Config, RunRequest};
use crate::error::Result;
use crate::fetcher::{FetchSettings, FetchUnit, ReqwestTransport};
use crate::proxy::{sources_from_config, PoolSettings, ProxyPool};
use crate::scheduler::{RunOutput, Scheduler};
use crate::sink::open_sink;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };
    let request = match RunRequest::from_args(args) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Invalid arguments: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    match run(cfg, request).await {
        Ok(out) if out.summary.failures() > 0 => std::process::exit(2),
        Ok(_) => {}
        Err(e) => {
            error!("Fatal error: {e}");
            std::process::exit(1);
        }
    }
}

async fn run(cfg: Config, request: RunRequest) -> Result<RunOutput> {
    let today = Local::now().date_naive();
    let days = count_trading_days(request.start, request.end, today);
    if days == 0 {
        info!(
            start = %request.start,
            end = %request.end,
            "No trading days between {} and {}, nothing to download",
            request.start,
            request.end,
        );
        return Ok(RunOutput::default());
    }

    let shutdown = CancellationToken::new();
    spawn_interrupt_watcher(shutdown.clone());

    // --- Proxy pool ---
    let sources = sources_from_config(&cfg)?;
    let pool = ProxyPool::new(sources, PoolSettings::from_config(&cfg), shutdown.clone());
    let primed = pool.prime().await?;
    info!(ready = primed, "Proxy pool primed with {primed} proxies");

    // --- Fetch + schedule ---
    let unit = FetchUnit::new(
        Arc::new(ReqwestTransport::new()),
        pool.clone(),
        FetchSettings::from_config(&cfg),
        shutdown.clone(),
    );
    let scheduler = Scheduler::new(
        Arc::new(unit),
        request.concurrency,
        cfg.decode_refetches,
        shutdown.clone(),
    );

    info!(
        symbols = %request.symbols.join(","),
        trading_days = days,
        start = %request.start,
        end = %request.end,
        folder = %request.folder.display(),
        "Downloading {} from {} to {}",
        request.symbols.join(", "),
        request.start,
        request.end,
    );

    let out = scheduler
        .run(&request.symbols, request.start, request.end, today, |symbol| {
            open_sink(&request, symbol)
        })
        .await?;

    log_summary(&out);
    let stats = pool.stats();
    info!(
        known = stats.known,
        active = stats.active,
        ready = stats.ready,
        warm_refills = stats.warm_refills,
        cold_refills = stats.cold_refills,
        "Proxy pool at exit",
    );
    if scheduler.shutdown_requested() {
        warn!("Run interrupted; output contains only days completed before shutdown");
    }
    Ok(out)
}

/// First Ctrl-C stops new attempts; in-flight requests finish and report.
fn spawn_interrupt_watcher(shutdown: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight requests");
            shutdown.cancel();
        }
    });
}

fn log_summary(out: &RunOutput) {
    let s = &out.summary;
    info!(
        event = "RUN_SUMMARY",
        total = s.total,
        delivered = s.delivered,
        empty = s.empty,
        exhausted = s.exhausted,
        decode_failed = s.decode_failed,
        cancelled = s.cancelled,
        rows = s.rows,
        files = out.files.len(),
        "Done: {} of {} symbol-days delivered, {} empty, {} failed",
        s.delivered,
        s.total,
        s.empty,
        s.failures(),
    );
    for (task, reason) in &out.failed {
        warn!(task = %task, reason, "Missing day {task} ({reason})");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputFormat;
    use chrono::NaiveDate;
    use std::time::Duration;

    #[tokio::test]
    async fn saturday_only_range_skips_proxy_sources() {
        let dir = tempfile::tempdir().unwrap();
        // Nothing listens here; contacting it would fail the run with NoProxies.
        let cfg = Config {
            log_level: "info".to_string(),
            datafeed_url: "http://127.0.0.1:9".to_string(),
            fetch_attempts: 1,
            request_timeout: Duration::from_millis(100),
            min_pool: 1,
            proxy_sources: vec!["http://127.0.0.1:9/proxies.txt".to_string()],
            proxy_filter_source: None,
            decode_refetches: 0,
        };
        let saturday = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        let request = RunRequest {
            symbols: vec!["EURUSD".to_string()],
            start: saturday,
            end: saturday,
            concurrency: 4,
            folder: dir.path().to_path_buf(),
            format: OutputFormat::Csv,
            header: true,
        };

        let out = run(cfg, request).await.unwrap();
        assert_eq!(out.summary.total, 0);
        assert!(out.files.is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
