use crate::analysis::recency::format_timestamp;
use crate::commands::scoring::round2;
use crate::error::Result;
use crate::models::visit::VisitRecord;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

const HEADER: [&str; 11] = [
    "timestamp",
    "box_id",
    "address",
    "commune",
    "postal_code",
    "container_type",
    "expected_fill",
    "observed_fill",
    "fill_difference",
    "days_since_last_visit",
    "average_fill",
];

/// Write-only sink for visit records.
pub trait VisitLog {
    fn append(&self, record: &VisitRecord) -> Result<()>;
}

/// Append-only CSV journal, one row per visit.
pub struct CsvVisitLog {
    path: PathBuf,
}

impl CsvVisitLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl VisitLog for CsvVisitLog {
    fn append(&self, record: &VisitRecord) -> Result<()> {
        let is_new = !self.path.exists();
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let mut writer = csv::Writer::from_writer(file);

        if is_new {
            writer.write_record(HEADER)?;
        }

        writer.write_record([
            format_timestamp(&record.timestamp),
            record.box_id.to_string(),
            record.address.clone(),
            record.municipality.clone(),
            record.postal_code.clone(),
            record.container_type.clone(),
            round2(record.expected_fill).to_string(),
            optional(record.observed_fill),
            optional(record.fill_difference.map(round2)),
            record.days_since_previous_visit.map(|d| d.to_string()).unwrap_or_default(),
            optional(record.average_fill.map(round2)),
        ])?;
        writer.flush()?;
        Ok(())
    }
}

fn optional(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone};

    fn record(box_id: u32, observed: Option<f64>) -> VisitRecord {
        VisitRecord {
            timestamp: FixedOffset::east_opt(7200)
                .expect("offset")
                .with_ymd_and_hms(2024, 6, 3, 8, 15, 0)
                .single()
                .expect("date"),
            box_id,
            address: "Chemin des Ouches 1, bis".to_string(),
            municipality: "Vernier".to_string(),
            postal_code: "1214".to_string(),
            container_type: "Textile".to_string(),
            expected_fill: 4.256,
            observed_fill: observed,
            fill_difference: observed.map(|o| o - 4.256),
            days_since_previous_visit: None,
            average_fill: Some(5.0),
        }
    }

    #[test]
    fn writes_header_once_and_appends_rows() {
        let dir = tempfile::tempdir().expect("temp dir");
        let log = CsvVisitLog::new(dir.path().join("visits_log.csv"));

        log.append(&record(1, Some(6.0))).expect("first append");
        log.append(&record(2, None)).expect("second append");

        let mut reader = csv::Reader::from_path(log.path()).expect("reader");
        assert_eq!(reader.headers().expect("headers").len(), HEADER.len());

        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.expect("row")).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][1], "1");
        assert_eq!(&rows[0][2], "Chemin des Ouches 1, bis");
        assert_eq!(&rows[0][6], "4.26");
        assert_eq!(&rows[0][8], "1.74");
        assert_eq!(&rows[1][7], "");
        assert_eq!(&rows[1][9], "");
    }
}
