use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::calendar::trading_days;
use crate::config::{CHANNEL_CAPACITY, MAX_CONCURRENCY};
use crate::decoder;
use crate::error::{AppError, DecodeError, Result};
use crate::fetcher::FetchUnit;
use crate::progress::{Progress, RunSummary};
use crate::sink::ResultSink;
use crate::types::{FetchOutcome, FetchTask, TaskOutcome, TaskReport};

/// Expand symbols × trading days into tasks, symbol by symbol.
/// Duplicate symbols are planned once.
pub fn plan(symbols: &[String], start: NaiveDate, end: NaiveDate, today: NaiveDate) -> Vec<FetchTask> {
    let days = trading_days(start, end, today);
    let mut seen = HashSet::new();
    symbols
        .iter()
        .filter(|s| seen.insert(s.as_str()))
        .flat_map(|s| days.iter().map(move |d| FetchTask::new(s.clone(), *d)))
        .collect()
}

#[derive(Debug, Default)]
pub struct RunOutput {
    pub summary: RunSummary,
    /// Symbol-days that ended exhausted or undecodable, with the outcome label.
    pub failed: Vec<(FetchTask, &'static str)>,
    /// One artifact per symbol, in request order.
    pub files: Vec<PathBuf>,
}

/// Drives every symbol-day through a `FetchUnit` under a global in-flight
/// bound and forwards decoded days to the symbol's sink.
pub struct Scheduler {
    unit: Arc<FetchUnit>,
    concurrency: usize,
    decode_refetches: usize,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(
        unit: Arc<FetchUnit>,
        concurrency: usize,
        decode_refetches: usize,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            unit,
            concurrency: concurrency.clamp(1, MAX_CONCURRENCY),
            decode_refetches,
            shutdown,
        }
    }

    /// Returns once every task has completed. Sinks are finalized afterwards,
    /// also when shutdown cut the run short.
    pub async fn run<F>(
        &self,
        symbols: &[String],
        start: NaiveDate,
        end: NaiveDate,
        today: NaiveDate,
        mut open_sink: F,
    ) -> Result<RunOutput>
    where
        F: FnMut(&str) -> Box<dyn ResultSink>,
    {
        let tasks = plan(symbols, start, end, today);
        if tasks.is_empty() {
            info!(%start, %end, "No trading days in range, nothing to fetch");
            return Ok(RunOutput::default());
        }

        let mut order: Vec<String> = Vec::new();
        let mut sinks: HashMap<String, Box<dyn ResultSink>> = HashMap::new();
        for task in &tasks {
            if !sinks.contains_key(&task.symbol) {
                sinks.insert(task.symbol.clone(), open_sink(&task.symbol));
                order.push(task.symbol.clone());
            }
        }

        let progress = Progress::new(tasks.len() as u64);
        info!(
            tasks = tasks.len(),
            symbols = order.len(),
            concurrency = self.concurrency,
            "Fetching {} symbol-days",
            tasks.len(),
        );

        let (report_tx, mut report_rx) = mpsc::channel::<TaskReport>(CHANNEL_CAPACITY);
        let dispatcher = self.spawn_dispatcher(tasks, report_tx);

        let mut failed = Vec::new();
        while let Some(report) = report_rx.recv().await {
            progress.record(&report.outcome);
            let label = report.outcome.label();
            match report.outcome {
                TaskOutcome::Delivered(table) => {
                    if let Some(sink) = sinks.get_mut(&report.task.symbol) {
                        sink.append(report.task.day, table);
                    }
                }
                TaskOutcome::Empty => {
                    debug!(task = %report.task, "No data");
                }
                TaskOutcome::Exhausted { .. } => failed.push((report.task, label)),
                TaskOutcome::DecodeFailed(e) => {
                    warn!(task = %report.task, "Symbol-day skipped: {e}");
                    failed.push((report.task, label));
                }
                TaskOutcome::Cancelled => {}
            }
        }

        if let Err(e) = dispatcher.await {
            error!("Dispatcher task failed: {e}");
        }

        let mut files = Vec::with_capacity(order.len());
        let mut first_err: Option<AppError> = None;
        for symbol in &order {
            let Some(sink) = sinks.get_mut(symbol) else { continue };
            match sink.finalize() {
                Ok(path) => {
                    info!(symbol = %symbol, path = %path.display(), "{symbol} completed");
                    files.push(path);
                }
                Err(e) => {
                    error!(symbol = %symbol, "Failed to write output: {e}");
                    first_err.get_or_insert(e);
                }
            }
        }
        if let Some(e) = first_err {
            return Err(e);
        }

        Ok(RunOutput { summary: progress.snapshot(), failed, files })
    }

    /// Spawns one task per symbol-day, never more than `concurrency` at once.
    /// The report channel closes when the last task has reported.
    fn spawn_dispatcher(
        &self,
        tasks: Vec<FetchTask>,
        report_tx: mpsc::Sender<TaskReport>,
    ) -> tokio::task::JoinHandle<()> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let unit = Arc::clone(&self.unit);
        let refetches = self.decode_refetches;

        tokio::spawn(async move {
            for task in tasks {
                let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                    break;
                };
                let unit = Arc::clone(&unit);
                let tx = report_tx.clone();
                tokio::spawn(async move {
                    let outcome = resolve(&unit, &task, refetches).await;
                    drop(permit);
                    if tx.send(TaskReport { task, outcome }).await.is_err() {
                        warn!("Report channel closed before all tasks finished");
                    }
                });
            }
        })
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

/// Fetch and decode one symbol-day. A payload that fails to decode is
/// downloaded again up to `refetches` times before the fault is reported.
async fn resolve(unit: &FetchUnit, task: &FetchTask, refetches: usize) -> TaskOutcome {
    let mut refetches_left = refetches;
    loop {
        let bytes = match unit.run(task).await {
            FetchOutcome::Delivered(bytes) => bytes,
            FetchOutcome::Empty => return TaskOutcome::Empty,
            FetchOutcome::Exhausted { attempts } => return TaskOutcome::Exhausted { attempts },
            FetchOutcome::Cancelled => return TaskOutcome::Cancelled,
        };

        let day = task.day;
        let decoded = tokio::task::spawn_blocking(move || decoder::decode(day, &bytes))
            .await
            .unwrap_or_else(|e| Err(DecodeError::Decompress(format!("decode task failed: {e}"))));

        match decoded {
            Ok(table) => return TaskOutcome::Delivered(table),
            Err(e) if refetches_left > 0 => {
                refetches_left -= 1;
                warn!(task = %task, "Corrupt payload, downloading again: {e}");
            }
            Err(e) => return TaskOutcome::DecodeFailed(e),
        }
    }
}
