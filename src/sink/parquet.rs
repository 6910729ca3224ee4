use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use polars::prelude::*;
use tracing::info;

use crate::error::{AppError, Result};
use crate::sink::{output_file_name, output_path, DayBuffer, ResultSink, COLUMNS};
use crate::types::DayTable;

/// Buffers days for one symbol and writes an LZ4-compressed Parquet file.
pub struct ParquetSink {
    path: PathBuf,
    buffer: DayBuffer,
}

impl ParquetSink {
    pub fn new(symbol: &str, start: NaiveDate, end: NaiveDate, folder: &Path) -> Self {
        let file_name = output_file_name(symbol, start, end, "parquet");
        Self { path: output_path(folder, &file_name), buffer: DayBuffer::default() }
    }

    fn to_dataframe(&self) -> Result<DataFrame> {
        let times: Vec<i64> = self.buffer.rows().map(|r| r.time.timestamp_millis()).collect();
        let asks: Vec<f64> = self.buffer.rows().map(|r| r.ask).collect();
        let bids: Vec<f64> = self.buffer.rows().map(|r| r.bid).collect();
        let ask_volumes: Vec<f64> = self.buffer.rows().map(|r| f64::from(r.ask_volume)).collect();
        let bid_volumes: Vec<f64> = self.buffer.rows().map(|r| f64::from(r.bid_volume)).collect();

        DataFrame::new(vec![
            Column::new(COLUMNS[0].into(), times)
                .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))
                .map_err(|e| AppError::Sink(format!("time cast: {e}")))?,
            Column::new(COLUMNS[1].into(), asks),
            Column::new(COLUMNS[2].into(), bids),
            Column::new(COLUMNS[3].into(), ask_volumes),
            Column::new(COLUMNS[4].into(), bid_volumes),
        ])
        .map_err(|e| AppError::Sink(format!("dataframe creation: {e}")))
    }
}

impl ResultSink for ParquetSink {
    fn append(&mut self, day: NaiveDate, table: DayTable) {
        self.buffer.insert(day, table);
    }

    fn finalize(&mut self) -> Result<PathBuf> {
        info!(path = %self.path.display(), rows = self.buffer.row_count(), "Writing {}", self.path.display());
        let mut df = self.to_dataframe()?;
        let file = fs::File::create(&self.path)?;
        ParquetWriter::new(file)
            .with_compression(ParquetCompression::Lz4Raw)
            .finish(&mut df)
            .map_err(|e| AppError::Sink(format!("write parquet: {e}")))?;
        Ok(self.path.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::tests::table;

    #[test]
    fn writes_sorted_rows_with_expected_schema() {
        let dir = tempfile::tempdir().unwrap();
        let d1 = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();

        let mut sink = ParquetSink::new("EURUSD", d1, d2, dir.path());
        sink.append(d2, table(d2, 3));
        sink.append(d1, table(d1, 2));
        let path = sink.finalize().unwrap();
        assert!(path.ends_with("EURUSD-2024_03_04-2024_03_05.parquet"));

        let df = ParquetReader::new(fs::File::open(&path).unwrap()).finish().unwrap();
        assert_eq!(df.height(), 5);
        let names: Vec<String> = df.get_column_names().iter().map(|n| n.to_string()).collect();
        assert_eq!(names, COLUMNS.iter().map(|c| c.to_string()).collect::<Vec<_>>());
        assert!(matches!(df.column("time (UTC)").unwrap().dtype(), DataType::Datetime(_, _)));
    }

    #[test]
    fn no_rows_still_writes_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let d = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let mut sink = ParquetSink::new("GBPUSD", d, d, dir.path());
        let path = sink.finalize().unwrap();
        assert!(path.exists());
    }
}
