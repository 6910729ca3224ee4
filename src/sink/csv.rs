use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tracing::info;

use crate::error::{AppError, Result};
use crate::sink::{output_file_name, output_path, DayBuffer, ResultSink, COLUMNS};
use crate::types::DayTable;

pub struct CsvSink {
    path: PathBuf,
    header: bool,
    buffer: DayBuffer,
}

impl CsvSink {
    pub fn new(symbol: &str, start: NaiveDate, end: NaiveDate, folder: &Path, header: bool) -> Self {
        let file_name = output_file_name(symbol, start, end, "csv");
        Self { path: output_path(folder, &file_name), header, buffer: DayBuffer::default() }
    }
}

impl ResultSink for CsvSink {
    fn append(&mut self, day: NaiveDate, table: DayTable) {
        self.buffer.insert(day, table);
    }

    fn finalize(&mut self) -> Result<PathBuf> {
        info!(path = %self.path.display(), rows = self.buffer.row_count(), "Writing {}", self.path.display());
        let sink_err = |e: ::csv::Error| AppError::Sink(format!("write csv: {e}"));

        let mut writer = ::csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(&self.path)
            .map_err(sink_err)?;
        if self.header {
            writer.write_record(COLUMNS).map_err(sink_err)?;
        }
        for row in self.buffer.rows() {
            writer.serialize(row).map_err(sink_err)?;
        }
        writer.flush()?;
        Ok(self.path.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::tests::table;

    #[test]
    fn header_then_rows_in_day_order() {
        let dir = tempfile::tempdir().unwrap();
        let d1 = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();

        let mut sink = CsvSink::new("EURUSD", d1, d2, dir.path(), true);
        sink.append(d2, table(d2, 1));
        sink.append(d1, table(d1, 1));
        let path = sink.finalize().unwrap();

        let text = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "time (UTC),ask,bid,ask_volume,bid_volume");
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("2024-03-04T00:00:00"), "{}", lines[1]);
        assert!(lines[2].starts_with("2024-03-05T00:00:00"), "{}", lines[2]);
    }

    #[test]
    fn header_can_be_omitted() {
        let dir = tempfile::tempdir().unwrap();
        let d = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let mut sink = CsvSink::new("EURUSD", d, d, dir.path(), false);
        sink.append(d, table(d, 2));
        let text = std::fs::read_to_string(sink.finalize().unwrap()).unwrap();
        assert_eq!(text.lines().count(), 2);
    }
}
