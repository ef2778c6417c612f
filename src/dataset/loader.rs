//! CSV dataset loading.
//!
//! Rows whose stage is not a closed outcome are skipped. Malformed cells do
//! not fail the load: dates become [`DateCell::Malformed`], values become
//! `None`, and every such case is counted in the [`LoadSummary`].

use crate::config::{ColumnsConfig, DataConfig};
use crate::error::DatasetError;
use crate::models::{Dataset, DatasetId, DateCell, Outcome, Record};
use chrono::{NaiveDate, NaiveDateTime};
use csv::StringRecord;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Counters collected while loading a dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadSummary {
    /// Data rows in the file.
    pub rows_read: usize,
    /// Rows turned into records.
    pub rows_loaded: usize,
    /// Rows the CSV reader could not decode.
    pub unreadable_rows: usize,
    /// Rows whose stage is neither won nor lost.
    pub skipped_unknown_stage: usize,
    /// Date cells that could not be parsed.
    pub malformed_dates: usize,
    /// Value cells that are empty or not a non-negative number.
    pub missing_values: usize,
    /// Empty categorical cells replaced by the missing label.
    pub missing_labels: usize,
    /// Optional columns absent from the header.
    pub absent_columns: Vec<String>,
}

/// A dataset together with the summary of how it was loaded.
#[derive(Debug, Clone)]
pub struct LoadedDataset {
    pub dataset: Dataset,
    pub summary: LoadSummary,
}

/// Load a dataset from a CSV file.
pub fn load_csv(path: &Path, config: &DataConfig) -> Result<LoadedDataset, DatasetError> {
    let bytes = std::fs::read(path).map_err(|source| DatasetError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_csv(&bytes, Some(path.to_path_buf()), config)
}

/// Load a dataset from a CSV file without blocking the runtime on I/O.
pub async fn load_csv_async(path: &Path, config: &DataConfig) -> Result<LoadedDataset, DatasetError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| DatasetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    parse_csv(&bytes, Some(path.to_path_buf()), config)
}

/// Load a dataset from any reader.
pub fn load_from_reader<R: Read>(mut reader: R, config: &DataConfig) -> Result<LoadedDataset, DatasetError> {
    let mut bytes = Vec::new();
    reader
        .read_to_end(&mut bytes)
        .map_err(|source| DatasetError::Io {
            path: PathBuf::from("<reader>"),
            source,
        })?;
    parse_csv(&bytes, None, config)
}

/// Header positions of every field.
struct ColumnIndex {
    account_type: usize,
    country: usize,
    segment: usize,
    business_type: Option<usize>,
    lead_source: Option<usize>,
    close_reason: Option<usize>,
    stage: usize,
    value: usize,
    created_date: usize,
    close_date: usize,
}

impl ColumnIndex {
    fn from_headers(headers: &StringRecord, columns: &ColumnsConfig) -> Result<(Self, Vec<String>), DatasetError> {
        let find = |header: &str| {
            headers
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(header.trim()))
        };
        let require = |column: &str, header: &str| {
            find(header).ok_or_else(|| DatasetError::MissingColumn {
                column: column.to_string(),
                header: header.to_string(),
            })
        };

        let mut absent = Vec::new();
        let mut optional = |column: &str, header: &str| {
            let position = find(header);
            if position.is_none() {
                absent.push(column.to_string());
            }
            position
        };

        let index = Self {
            business_type: optional("business_type", &columns.business_type),
            lead_source: optional("lead_source", &columns.lead_source),
            close_reason: optional("close_reason", &columns.close_reason),
            account_type: require("account_type", &columns.account_type)?,
            country: require("country", &columns.country)?,
            segment: require("segment", &columns.segment)?,
            stage: require("stage", &columns.stage)?,
            value: require("value", &columns.value)?,
            created_date: require("created_date", &columns.created_date)?,
            close_date: require("close_date", &columns.close_date)?,
        };

        Ok((index, absent))
    }
}

fn parse_csv(bytes: &[u8], source: Option<PathBuf>, config: &DataConfig) -> Result<LoadedDataset, DatasetError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let headers = reader.headers()?.clone();
    if headers.is_empty() {
        return Err(DatasetError::Empty);
    }

    let (index, absent_columns) = ColumnIndex::from_headers(&headers, &config.columns)?;
    for column in &absent_columns {
        warn!(
            "Column '{}' not found; using '{}' for every record",
            column, config.missing_label
        );
    }

    let mut summary = LoadSummary {
        absent_columns,
        ..LoadSummary::default()
    };
    let mut records = Vec::new();

    for (row, result) in reader.records().enumerate() {
        summary.rows_read += 1;
        let line = row + 2;

        let row = match result {
            Ok(row) => row,
            Err(e) => {
                debug!("Line {}: unreadable row: {}", line, e);
                summary.unreadable_rows += 1;
                continue;
            }
        };

        let stage = row.get(index.stage).unwrap_or("");
        let Some(outcome) = Outcome::from_stage(stage) else {
            debug!("Line {}: skipping stage '{}'", line, stage);
            summary.skipped_unknown_stage += 1;
            continue;
        };

        let mut label = |position: Option<usize>| -> String {
            match position.and_then(|i| row.get(i)).filter(|v| !v.is_empty()) {
                Some(value) => value.to_string(),
                None => {
                    summary.missing_labels += 1;
                    config.missing_label.clone()
                }
            }
        };

        let account_type = label(Some(index.account_type));
        let country = label(Some(index.country));
        let segment = label(Some(index.segment));
        let business_type = label(index.business_type);
        let lead_source = label(index.lead_source);
        let close_reason = label(index.close_reason);

        let value = parse_value(row.get(index.value).unwrap_or(""));
        if value.is_none() {
            summary.missing_values += 1;
        }

        let created = parse_date(row.get(index.created_date).unwrap_or(""), &config.date_formats);
        let closed = parse_date(row.get(index.close_date).unwrap_or(""), &config.date_formats);
        for cell in [&created, &closed] {
            if let DateCell::Malformed(raw) = cell {
                debug!("Line {}: unparseable date '{}'", line, raw);
                summary.malformed_dates += 1;
            }
        }

        records.push(Record {
            account_type,
            country,
            segment,
            business_type,
            lead_source,
            close_reason,
            outcome,
            value,
            created,
            closed,
        });
    }

    summary.rows_loaded = records.len();

    let source_name = source
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "<reader>".to_string());
    info!(
        "Loaded {} of {} rows from {}",
        summary.rows_loaded, summary.rows_read, source_name
    );
    if summary.skipped_unknown_stage > 0 {
        warn!(
            "Skipped {} row(s) whose stage is not Closed Won/Closed Lost",
            summary.skipped_unknown_stage
        );
    }
    if summary.malformed_dates > 0 {
        warn!("{} date cell(s) could not be parsed", summary.malformed_dates);
    }

    let id = DatasetId::from_bytes(bytes);
    Ok(LoadedDataset {
        dataset: Dataset::with_id(id, records, source),
        summary,
    })
}

/// Parses a monetary value. Negative and non-finite numbers are rejected.
fn parse_value(raw: &str) -> Option<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
}

/// Parses a date cell using the configured formats, date-time formats first.
fn parse_date(raw: &str, formats: &[String]) -> DateCell {
    let raw = raw.trim();
    if raw.is_empty() {
        return DateCell::Missing;
    }

    for format in formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return DateCell::Valid(dt);
        }
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            if let Some(dt) = date.and_hms_opt(0, 0, 0) {
                return DateCell::Valid(dt);
            }
        }
    }

    DateCell::Malformed(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Dimension;
    use std::io::Write;

    const SAMPLE: &str = "\
 Account Type,Country,Segment,Type,Lead Source,Close Reason,Stage, Opp Value (EUR),Created Date,Close Date
Small,Germany,Segment 1,New Business,Referral,Price,Closed Won,1200.50,2024-01-10,2024-03-05
Top 2,France,,Existing Business,Web,,Closed Lost,abc,2024-02-01,2024-02-20
Small,Germany,Segment 2,Existing Business,Referral,Budget,Negotiation,500,2024-02-01,
Medium,Spain,Segment 3,New Business,Event,Price,Closed Lost,300,2024-03-01,not-a-date
Medium,Spain,Segment 3,New Business,Event,Price,Closed Won,-5,2024-03-01,
";

    fn load(content: &str) -> LoadedDataset {
        load_from_reader(content.as_bytes(), &DataConfig::default()).unwrap()
    }

    #[test]
    fn test_load_sample() {
        let loaded = load(SAMPLE);
        let summary = &loaded.summary;

        assert_eq!(summary.rows_read, 5);
        assert_eq!(summary.rows_loaded, 4);
        assert_eq!(summary.skipped_unknown_stage, 1);
        assert_eq!(summary.malformed_dates, 1);
        assert_eq!(summary.missing_values, 2);
        assert_eq!(summary.missing_labels, 2);
        assert!(summary.absent_columns.is_empty());

        let records = loaded.dataset.records();
        assert_eq!(records[0].outcome, Outcome::Won);
        assert_eq!(records[0].value, Some(1200.5));
        assert_eq!(records[0].dimension(Dimension::AccountType), "Small");
        assert_eq!(records[1].segment, "Unknown");
        assert_eq!(records[1].value, None);
        assert!(matches!(records[2].closed, DateCell::Malformed(_)));
        assert_eq!(records[3].closed, DateCell::Missing);
        assert_eq!(records[3].value, None);
    }

    #[test]
    fn test_duration_is_derived_from_dates() {
        let loaded = load(SAMPLE);
        assert_eq!(loaded.dataset.records()[0].duration_days(), Some(55.0));
    }

    #[test]
    fn test_missing_required_column() {
        let err = load_from_reader("Country,Stage\nA,Closed Won\n".as_bytes(), &DataConfig::default())
            .unwrap_err();
        assert!(matches!(err, DatasetError::MissingColumn { .. }));
    }

    #[test]
    fn test_optional_columns_filled_with_label() {
        let content = "\
Account Type,Country,Segment,Stage,Opp Value (EUR),Created Date,Close Date
Small,A,Segment 1,won,10,2024-01-01,2024-01-02
";
        let loaded = load(content);
        assert_eq!(
            loaded.summary.absent_columns,
            vec!["business_type", "lead_source", "close_reason"]
        );
        assert_eq!(loaded.dataset.records()[0].lead_source, "Unknown");
    }

    #[test]
    fn test_custom_column_names() {
        let mut config = DataConfig::default();
        config.columns.value = "Amount".to_string();
        config.date_formats = vec!["%d/%m/%Y".to_string()];

        let content = "\
Account Type,Country,Segment,Stage,Amount,Created Date,Close Date
Small,A,Segment 1,lost,10,01/02/2024,15/03/2024
";
        let loaded = load_from_reader(content.as_bytes(), &config).unwrap();
        let record = &loaded.dataset.records()[0];
        assert_eq!(record.value, Some(10.0));
        assert_eq!(
            record.closed.valid().map(|dt| dt.date()),
            NaiveDate::from_ymd_opt(2024, 3, 15)
        );
    }

    #[test]
    fn test_parse_date_formats() {
        let formats = DataConfig::default().date_formats;
        assert!(matches!(parse_date("2024-06-17", &formats), DateCell::Valid(_)));
        assert!(matches!(parse_date("2024-06-17 13:45:00", &formats), DateCell::Valid(_)));
        assert_eq!(parse_date("  ", &formats), DateCell::Missing);
        assert_eq!(
            parse_date("yesterday", &formats),
            DateCell::Malformed("yesterday".to_string())
        );
    }

    #[test]
    fn test_identity_follows_file_content() {
        let a = load(SAMPLE);
        let b = load(SAMPLE);
        let c = load(&SAMPLE.replace("1200.50", "1300.00"));
        assert_eq!(a.dataset.id(), b.dataset.id());
        assert_ne!(a.dataset.id(), c.dataset.id());
    }

    #[test]
    fn test_load_csv_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let loaded = load_csv(file.path(), &DataConfig::default()).unwrap();
        assert_eq!(loaded.dataset.len(), 4);
        assert_eq!(loaded.dataset.source(), Some(&file.path().to_path_buf()));
    }

    #[test]
    fn test_load_csv_async() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let loaded = tokio_test::block_on(load_csv_async(file.path(), &DataConfig::default())).unwrap();
        assert_eq!(loaded.summary.rows_loaded, 4);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = load_csv(Path::new("/no/such/deals.csv"), &DataConfig::default()).unwrap_err();
        assert!(matches!(err, DatasetError::Io { .. }));
    }
}
