use crate::config::IndexKind;
use crate::error::FieldResult;
use chrono::NaiveDateTime;
use csv::{Writer, WriterBuilder};
use std::fs::File;
use std::path::Path;

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Row key of an extracted time series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesKey {
    Istep(usize),
    Date(NaiveDateTime),
    Combined(usize, NaiveDateTime),
}

// Timestep × point table returned by series extraction
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries {
    pub kind: IndexKind,
    pub index: Vec<SeriesKey>,
    pub columns: Vec<String>,
    /// One row per timestep, one value per column; NaN marks masked values.
    pub values: Vec<Vec<f64>>,
}

impl TimeSeries {
    pub fn new(kind: IndexKind, columns: Vec<String>) -> Self {
        TimeSeries {
            kind,
            index: Vec::new(),
            columns,
            values: Vec::new(),
        }
    }

    pub fn push(&mut self, key: SeriesKey, row: Vec<f64>) {
        self.index.push(key);
        self.values.push(row);
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        let col = self.columns.iter().position(|c| c == name)?;
        Some(self.values.iter().map(|row| row[col]).collect())
    }

    fn header(&self) -> Vec<String> {
        let mut header = match self.kind {
            IndexKind::Istep => vec!["istep".to_string()],
            IndexKind::Date => vec!["date".to_string()],
            IndexKind::Combined => vec!["istep".to_string(), "date".to_string()],
        };
        header.extend(self.columns.iter().cloned());
        header
    }

    pub fn write_csv(&self, path: &Path) -> FieldResult<()> {
        let mut wtr = create_csv_writer(path, &self.header())?;
        for (key, row) in self.index.iter().zip(&self.values) {
            let mut record = match key {
                SeriesKey::Istep(i) => vec![i.to_string()],
                SeriesKey::Date(d) => vec![d.format(DATE_FORMAT).to_string()],
                SeriesKey::Combined(i, d) => {
                    vec![i.to_string(), d.format(DATE_FORMAT).to_string()]
                }
            };
            record.extend(row.iter().map(|v| {
                if v.is_nan() {
                    String::new()
                } else {
                    v.to_string()
                }
            }));
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
        Ok(())
    }
}

// Create CSV writer with headers
pub fn create_csv_writer(path: &Path, header: &[String]) -> FieldResult<Writer<File>> {
    let mut wtr = WriterBuilder::new().has_headers(true).from_path(path)?;
    wtr.write_record(header)?;
    Ok(wtr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn masked_cells_are_written_empty() {
        let date = NaiveDate::from_ymd_opt(2000, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let mut ts = TimeSeries::new(IndexKind::Combined, vec!["p1".into(), "p2".into()]);
        ts.push(SeriesKey::Combined(3, date), vec![1.5, f64::NAN]);

        let dir = std::env::temp_dir().join("field_rs_results");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("series.csv");
        ts.write_csv(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "istep,date,p1,p2");
        assert_eq!(lines[1], "3,2000-01-01 00:00:00,1.5,");
        assert_eq!(ts.column("p1"), Some(vec![1.5]));
    }
}
