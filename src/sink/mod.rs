//! Per-symbol output. Days arrive in any order; a sink buffers them and
//! writes a single file, sorted by day, when the symbol is finished.

pub mod csv;
pub mod parquet;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDate};

use crate::config::{OutputFormat, RunRequest};
use crate::error::Result;
use crate::types::{DayTable, TickRecord};

pub use self::csv::CsvSink;
pub use self::parquet::ParquetSink;

pub const COLUMNS: [&str; 5] = ["time (UTC)", "ask", "bid", "ask_volume", "bid_volume"];

pub trait ResultSink: Send {
    /// Accept one decoded day. A later table for the same day replaces the earlier one.
    fn append(&mut self, day: NaiveDate, table: DayTable);

    /// Persist everything appended so far. Called once per symbol.
    fn finalize(&mut self) -> Result<PathBuf>;
}

/// `EURUSD-2024_03_01-2024_03_08.parquet`
pub fn output_file_name(symbol: &str, start: NaiveDate, end: NaiveDate, ext: &str) -> String {
    format!(
        "{}-{}_{:02}_{:02}-{}_{:02}_{:02}.{}",
        symbol,
        start.year(),
        start.month(),
        start.day(),
        end.year(),
        end.month(),
        end.day(),
        ext
    )
}

pub fn open_sink(req: &RunRequest, symbol: &str) -> Box<dyn ResultSink> {
    match req.format {
        OutputFormat::Parquet => Box::new(ParquetSink::new(symbol, req.start, req.end, &req.folder)),
        OutputFormat::Csv => {
            Box::new(CsvSink::new(symbol, req.start, req.end, &req.folder, req.header))
        }
    }
}

/// Day-keyed buffer shared by the file sinks.
#[derive(Debug, Default)]
pub(crate) struct DayBuffer {
    days: BTreeMap<NaiveDate, DayTable>,
}

impl DayBuffer {
    pub(crate) fn insert(&mut self, day: NaiveDate, table: DayTable) {
        if !table.is_empty() {
            self.days.insert(day, table);
        }
    }

    /// All ticks ordered by day, payload order within a day.
    pub(crate) fn rows(&self) -> impl Iterator<Item = &TickRecord> {
        self.days.values().flat_map(|t| t.ticks.iter())
    }

    pub(crate) fn row_count(&self) -> usize {
        self.days.values().map(DayTable::len).sum()
    }
}

pub(crate) fn output_path(folder: &Path, file_name: &str) -> PathBuf {
    folder.join(file_name)
}
