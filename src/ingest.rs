//! Flow export ingestion.
//!
//! Reads a CSV export of flow records (one logged session per row) into
//! fixed-schema [`FlowRecord`] values. Only the header is validated: a
//! missing required column is a hard failure, while unparseable cell values
//! degrade to `None` and are dealt with by the feature deriver.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use csv::{ReaderBuilder, StringRecord, Trim};
use tracing::{debug, info};

use crate::error::IngestError;

/// Naive layouts tried after RFC 3339. Values are taken as UTC.
const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Offset-carrying layouts that RFC 3339 parsing rejects.
const OFFSET_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%z"];

/// One row of the uploaded flow export.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowRecord {
    /// Zero-based position of the row in the file (header excluded).
    pub row: usize,
    pub creation_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub time: Option<DateTime<Utc>>,
    pub src_ip: String,
    pub dst_ip: String,
    /// Source country as written in the file; `None` when blank.
    pub src_ip_country_code: Option<String>,
    pub bytes_in: Option<f64>,
    pub bytes_out: Option<f64>,
}

/// Header positions of the required columns.
#[derive(Debug, Clone, Copy)]
struct ColumnMap {
    creation_time: usize,
    end_time: usize,
    time: usize,
    src_ip_country_code: usize,
    src_ip: usize,
    dst_ip: usize,
    bytes_in: usize,
    bytes_out: usize,
}

impl ColumnMap {
    fn from_headers(headers: &StringRecord) -> Result<Self, IngestError> {
        let find = |name: &'static str| {
            headers
                .iter()
                .position(|h| h.trim() == name)
                .ok_or(IngestError::MissingColumn(name))
        };

        Ok(Self {
            creation_time: find("creation_time")?,
            end_time: find("end_time")?,
            time: find("time")?,
            src_ip_country_code: find("src_ip_country_code")?,
            src_ip: find("src_ip")?,
            dst_ip: find("dst_ip")?,
            bytes_in: find("bytes_in")?,
            bytes_out: find("bytes_out")?,
        })
    }

    fn parse(&self, row: usize, record: &StringRecord) -> FlowRecord {
        let field = |idx: usize| record.get(idx).unwrap_or_default();

        let country = field(self.src_ip_country_code);

        FlowRecord {
            row,
            creation_time: parse_timestamp(field(self.creation_time)),
            end_time: parse_timestamp(field(self.end_time)),
            time: parse_timestamp(field(self.time)),
            src_ip: field(self.src_ip).to_string(),
            dst_ip: field(self.dst_ip).to_string(),
            src_ip_country_code: (!country.is_empty()).then(|| country.to_string()),
            bytes_in: parse_number(field(self.bytes_in)),
            bytes_out: parse_number(field(self.bytes_out)),
        }
    }
}

/// Parses a timestamp cell, returning `None` instead of failing.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }

    for fmt in OFFSET_FORMATS {
        if let Ok(ts) = DateTime::parse_from_str(raw, fmt) {
            return Some(ts.with_timezone(&Utc));
        }
    }

    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Parses a numeric counter cell. Blank and non-numeric cells become `None`.
fn parse_number(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Reads flow records from any CSV source.
pub fn read_records<R: Read>(reader: R) -> Result<Vec<FlowRecord>, IngestError> {
    let mut rdr = ReaderBuilder::new().trim(Trim::All).from_reader(reader);

    let columns = ColumnMap::from_headers(rdr.headers()?)?;
    debug!("Resolved flow export columns: {:?}", columns);

    let mut records = Vec::new();
    for (row, result) in rdr.records().enumerate() {
        let record = result?;
        records.push(columns.parse(row, &record));
    }

    Ok(records)
}

/// Opens and reads a flow export from disk.
pub fn load_csv(path: &Path) -> Result<Vec<FlowRecord>, IngestError> {
    let file = File::open(path).map_err(|source| IngestError::Open {
        path: path.display().to_string(),
        source,
    })?;

    let records = read_records(BufReader::new(file))?;
    info!("Loaded {} flow records from {}", records.len(), path.display());

    Ok(records)
}
