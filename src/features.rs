//! Feature derivation for flow records.
//!
//! Turns raw timestamps and byte counters into the fixed feature vector the
//! outlier scorer consumes.
//!
//! # Derived Features
//!
//! For a record with creation time t₀, end time t₁ and byte counters bᵢₙ, bₒᵤₜ:
//!
//! - `duration_seconds` = t₁ − t₀ (fractional seconds, may be negative)
//! - `avg_packet_size` = (bᵢₙ + bₒᵤₜ) / duration_seconds
//!
//! A zero duration makes `avg_packet_size` non-finite. Records with a missing
//! or non-finite derived value are dropped from the table without any error.

use statrs::statistics::{Data, Distribution, Max, Min, OrderStatistics};
use tracing::debug;

use crate::ingest::FlowRecord;

/// Number of features per flow fed to the scorer.
pub const FEATURE_COUNT: usize = 4;

/// Column names of [`FeatureVector`], in order.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] =
    ["bytes_in", "bytes_out", "duration_seconds", "avg_packet_size"];

/// `{bytes_in, bytes_out, duration_seconds, avg_packet_size}`
pub type FeatureVector = [f64; FEATURE_COUNT];

/// Derived values attached to a record; either may be absent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DerivedFeatures {
    pub duration_seconds: Option<f64>,
    pub avg_packet_size: Option<f64>,
}

impl DerivedFeatures {
    /// Computes the derived values for a single record.
    pub fn compute(record: &FlowRecord) -> Self {
        let duration_seconds = match (record.creation_time, record.end_time) {
            (Some(start), Some(end)) => {
                let delta = end.signed_duration_since(start);
                Some(delta.num_seconds() as f64 + delta.subsec_nanos() as f64 / 1e9)
            }
            _ => None,
        };

        let avg_packet_size = match (record.bytes_in, record.bytes_out, duration_seconds) {
            (Some(bytes_in), Some(bytes_out), Some(duration)) => {
                Some(avg_packet_size(bytes_in, bytes_out, duration))
            }
            _ => None,
        };

        Self {
            duration_seconds,
            avg_packet_size,
        }
    }

    /// True when both values are present and finite.
    pub fn is_complete(&self) -> bool {
        matches!(
            (self.duration_seconds, self.avg_packet_size),
            (Some(d), Some(a)) if d.is_finite() && a.is_finite()
        )
    }
}

/// Average bytes per second of session time. Non-finite for zero duration.
pub fn avg_packet_size(bytes_in: f64, bytes_out: f64, duration_seconds: f64) -> f64 {
    (bytes_in + bytes_out) / duration_seconds
}

/// A record that survived derivation, with every feature present.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowRow {
    pub record: FlowRecord,
    pub bytes_in: f64,
    pub bytes_out: f64,
    pub duration_seconds: f64,
    pub avg_packet_size: f64,
}

impl FlowRow {
    fn from_record(record: FlowRecord) -> Option<Self> {
        let derived = DerivedFeatures::compute(&record);
        if !derived.is_complete() {
            return None;
        }

        Some(Self {
            bytes_in: record.bytes_in?,
            bytes_out: record.bytes_out?,
            duration_seconds: derived.duration_seconds?,
            avg_packet_size: derived.avg_packet_size?,
            record,
        })
    }

    pub fn feature_vector(&self) -> FeatureVector {
        [
            self.bytes_in,
            self.bytes_out,
            self.duration_seconds,
            self.avg_packet_size,
        ]
    }
}

/// Output of the feature deriver.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureTable {
    /// Surviving rows, in input order.
    pub rows: Vec<FlowRow>,
    /// Records excluded for lacking a derived feature.
    pub dropped: usize,
}

impl FeatureTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Feature matrix in row order.
    pub fn feature_matrix(&self) -> Vec<FeatureVector> {
        self.rows.iter().map(FlowRow::feature_vector).collect()
    }

    /// Per-feature summary statistics, in [`FEATURE_NAMES`] order.
    pub fn summary(&self) -> Vec<FeatureStatistics> {
        (0..FEATURE_COUNT)
            .map(|i| {
                let column: Vec<f64> = self.rows.iter().map(|r| r.feature_vector()[i]).collect();
                calculate_statistics(FEATURE_NAMES[i], &column)
            })
            .collect()
    }
}

/// Normalizes records and derives features, dropping incomplete rows.
pub fn derive_features(records: Vec<FlowRecord>) -> FeatureTable {
    let total = records.len();

    let rows: Vec<FlowRow> = records
        .into_iter()
        .map(|mut record| {
            record.src_ip_country_code = record
                .src_ip_country_code
                .map(|code| code.to_uppercase());
            record
        })
        .filter_map(FlowRow::from_record)
        .collect();

    let dropped = total - rows.len();
    debug!(
        "Derived features for {} of {} records ({} dropped)",
        rows.len(),
        total,
        dropped
    );

    FeatureTable { rows, dropped }
}

/// Statistical summary of one feature column.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureStatistics {
    pub name: &'static str,
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,
}

/// Calculates summary statistics for a feature column.
pub fn calculate_statistics(name: &'static str, values: &[f64]) -> FeatureStatistics {
    if values.is_empty() {
        return FeatureStatistics {
            name,
            mean: 0.0,
            std_dev: 0.0,
            min: 0.0,
            max: 0.0,
            median: 0.0,
        };
    }

    let mut data = Data::new(values.to_vec());

    FeatureStatistics {
        name,
        mean: data.mean().unwrap_or(0.0),
        std_dev: data.std_dev().unwrap_or(0.0),
        min: data.min(),
        max: data.max(),
        median: data.median(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn record(row: usize, bytes_in: Option<f64>, bytes_out: Option<f64>, secs: Option<i64>) -> FlowRecord {
        let start = Utc.with_ymd_and_hms(2024, 4, 25, 23, 0, 0).unwrap();
        FlowRecord {
            row,
            creation_time: Some(start),
            end_time: secs.map(|s| start + Duration::seconds(s)),
            time: Some(start),
            src_ip: format!("10.0.0.{}", row),
            dst_ip: "10.1.0.1".to_string(),
            src_ip_country_code: Some("us".to_string()),
            bytes_in,
            bytes_out,
        }
    }

    #[test]
    fn test_avg_packet_size_matches_definition() {
        let table = derive_features(vec![record(0, Some(1500.0), Some(500.0), Some(600))]);

        assert_eq!(table.len(), 1);
        let row = &table.rows[0];
        assert_eq!(row.duration_seconds, 600.0);
        assert!((row.avg_packet_size - 2000.0 / 600.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_duration_is_dropped() {
        let table = derive_features(vec![
            record(0, Some(10.0), Some(10.0), Some(0)),
            record(1, Some(10.0), Some(10.0), Some(5)),
        ]);

        assert_eq!(table.len(), 1);
        assert_eq!(table.dropped, 1);
        assert_eq!(table.rows[0].record.row, 1);
    }

    #[test]
    fn test_zero_duration_zero_bytes_is_dropped() {
        // 0 / 0 is NaN rather than infinite
        let table = derive_features(vec![record(0, Some(0.0), Some(0.0), Some(0))]);
        assert!(table.is_empty());
        assert_eq!(table.dropped, 1);
    }

    #[test]
    fn test_missing_timestamp_is_dropped() {
        let mut no_start = record(0, Some(1.0), Some(1.0), Some(10));
        no_start.creation_time = None;
        let no_end = record(1, Some(1.0), Some(1.0), None);

        let table = derive_features(vec![no_start, no_end]);

        assert!(table.is_empty());
        assert_eq!(table.dropped, 2);
    }

    #[test]
    fn test_missing_bytes_is_dropped() {
        let table = derive_features(vec![record(0, None, Some(1.0), Some(10))]);
        assert!(table.is_empty());
    }

    #[test]
    fn test_negative_duration_is_kept() {
        let table = derive_features(vec![record(0, Some(100.0), Some(100.0), Some(-20))]);

        assert_eq!(table.len(), 1);
        assert_eq!(table.rows[0].duration_seconds, -20.0);
        assert_eq!(table.rows[0].avg_packet_size, -10.0);
    }

    #[test]
    fn test_fractional_duration() {
        let mut r = record(0, Some(1.0), Some(1.0), Some(1));
        r.end_time = r.creation_time.map(|t| t + Duration::milliseconds(1500));
        let derived = DerivedFeatures::compute(&r);
        assert_eq!(derived.duration_seconds, Some(1.5));

        r.end_time = r.creation_time.map(|t| t - Duration::milliseconds(1500));
        let derived = DerivedFeatures::compute(&r);
        assert_eq!(derived.duration_seconds, Some(-1.5));
    }

    #[test]
    fn test_country_code_uppercased_and_order_preserved() {
        let mut a = record(0, Some(1.0), Some(1.0), Some(10));
        a.src_ip_country_code = Some("ca".to_string());
        let b = record(1, Some(2.0), Some(2.0), Some(10));

        let table = derive_features(vec![a, b]);

        assert_eq!(table.rows[0].record.src_ip_country_code.as_deref(), Some("CA"));
        assert_eq!(table.rows[1].record.src_ip_country_code.as_deref(), Some("US"));
        assert_eq!(table.rows[0].record.row, 0);
        assert_eq!(table.rows[1].record.row, 1);
    }

    #[test]
    fn test_feature_vector_order() {
        let table = derive_features(vec![record(0, Some(100.0), Some(300.0), Some(4))]);
        assert_eq!(table.feature_matrix(), vec![[100.0, 300.0, 4.0, 100.0]]);
    }

    #[test]
    fn test_statistics_calculation() {
        let stats = calculate_statistics("bytes_in", &[100.0, 200.0, 300.0, 400.0, 500.0]);

        assert!((stats.mean - 300.0).abs() < 0.01);
        assert!((stats.min - 100.0).abs() < 0.01);
        assert!((stats.max - 500.0).abs() < 0.01);
        assert!((stats.median - 300.0).abs() < 0.01);
    }

    #[test]
    fn test_summary_covers_every_feature() {
        let table = derive_features(vec![
            record(0, Some(100.0), Some(300.0), Some(4)),
            record(1, Some(300.0), Some(100.0), Some(8)),
        ]);

        let summary = table.summary();

        assert_eq!(summary.len(), FEATURE_COUNT);
        assert_eq!(summary[0].name, "bytes_in");
        assert!((summary[0].mean - 200.0).abs() < 1e-9);
        assert!((summary[2].max - 8.0).abs() < 1e-9);
    }
}
