use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::error::DecodeError;

// ---------------------------------------------------------------------------
// Work units
// ---------------------------------------------------------------------------

/// One retrievable symbol-day.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FetchTask {
    pub symbol: String,
    pub day: NaiveDate,
}

impl FetchTask {
    pub fn new(symbol: impl Into<String>, day: NaiveDate) -> Self {
        Self { symbol: symbol.into(), day }
    }
}

impl std::fmt::Display for FetchTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.symbol, self.day)
    }
}

/// Result of resolving one task against the upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// HTTP 200 with a non-empty body.
    Delivered(Vec<u8>),
    /// HTTP 200 with a zero-length body: no data that day.
    Empty,
    /// Attempt bound reached without a 200.
    Exhausted { attempts: usize },
    /// Shutdown requested before a 200 was obtained.
    Cancelled,
}

/// Terminal state of a task once the scheduler has decoded it.
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Delivered(DayTable),
    Empty,
    Exhausted { attempts: usize },
    DecodeFailed(DecodeError),
    Cancelled,
}

impl TaskOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            TaskOutcome::Delivered(_) => "delivered",
            TaskOutcome::Empty => "empty",
            TaskOutcome::Exhausted { .. } => "exhausted",
            TaskOutcome::DecodeFailed(_) => "decode_failed",
            TaskOutcome::Cancelled => "cancelled",
        }
    }
}

/// Sent from a finished fetch task back to the scheduler loop.
#[derive(Debug)]
pub struct TaskReport {
    pub task: FetchTask,
    pub outcome: TaskOutcome,
}

// ---------------------------------------------------------------------------
// Tick rows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickRecord {
    #[serde(rename = "time (UTC)")]
    pub time: DateTime<Utc>,
    pub ask: f64,
    pub bid: f64,
    pub ask_volume: f32,
    pub bid_volume: f32,
}

/// Decoded ticks for one symbol-day, in payload order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DayTable {
    pub day: NaiveDate,
    pub ticks: Vec<TickRecord>,
}

impl DayTable {
    pub fn empty(day: NaiveDate) -> Self {
        Self { day, ticks: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Proxies
// ---------------------------------------------------------------------------

/// A proxy address in `host:port` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Proxy(pub String);

impl Proxy {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    pub fn addr(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyOutcome {
    Success,
    Failure,
}
