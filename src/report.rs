//! Presentation-layer views over a triage session.
//!
//! Everything the console exporter and the dashboard display is assembled
//! here, so both surfaces show the same numbers.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::features::{FeatureStatistics, FlowRow};
use crate::scorer::{AnomalyLabel, LabeledFlow};
use crate::session::Session;

/// Count of flows for one source country.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountryCount {
    pub country_code: String,
    pub count: usize,
}

/// A row of the labeled preview table.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledSample {
    pub src_ip: String,
    pub dst_ip: String,
    pub bytes_in: f64,
    pub bytes_out: f64,
    pub label: AnomalyLabel,
}

impl From<&LabeledFlow> for LabeledSample {
    fn from(flow: &LabeledFlow) -> Self {
        Self {
            src_ip: flow.row.record.src_ip.clone(),
            dst_ip: flow.row.record.dst_ip.clone(),
            bytes_in: flow.row.bytes_in,
            bytes_out: flow.row.bytes_out,
            label: flow.label,
        }
    }
}

/// bytes_in vs bytes_out points, split by label.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScatterSeries {
    pub normal: Vec<(f64, f64)>,
    pub suspicious: Vec<(f64, f64)>,
}

impl ScatterSeries {
    pub fn from_flows(flows: &[LabeledFlow]) -> Self {
        let mut series = Self::default();
        for flow in flows {
            let point = (flow.row.bytes_in, flow.row.bytes_out);
            match flow.label {
                AnomalyLabel::Normal => series.normal.push(point),
                AnomalyLabel::Suspicious => series.suspicious.push(point),
            }
        }
        series
    }

    /// Upper bounds of both axes over all points.
    pub fn bounds(&self) -> (f64, f64) {
        self.normal
            .iter()
            .chain(&self.suspicious)
            .fold((0.0_f64, 0.0_f64), |(x, y), &(px, py)| (x.max(px), y.max(py)))
    }
}

/// Everything shown for one session.
#[derive(Debug, Clone)]
pub struct TriageReport {
    pub generated_at: DateTime<Utc>,
    pub source: Option<String>,
    pub records_read: usize,
    pub dropped: usize,
    pub scored: usize,
    pub suspicious: usize,
    pub contamination: f64,
    pub seed: u64,
    pub threshold: f64,
    /// Head of the raw+derived table.
    pub sample: Vec<FlowRow>,
    pub feature_summary: Vec<FeatureStatistics>,
    pub countries: Vec<CountryCount>,
    pub labeled_sample: Vec<LabeledSample>,
    pub scatter: ScatterSeries,
    pub suspicious_countries: Vec<CountryCount>,
}

impl TriageReport {
    pub fn build(session: &Session, head_rows: usize) -> Self {
        let table = session.table();
        let labeled = session.labeled();
        let config = session.scorer().config();

        Self {
            generated_at: Utc::now(),
            source: session.source().map(|p| p.display().to_string()),
            records_read: session.records_read(),
            dropped: table.dropped,
            scored: labeled.len(),
            suspicious: session.suspicious_count(),
            contamination: config.contamination,
            seed: config.seed,
            threshold: session.scorer().threshold(),
            sample: table.rows.iter().take(head_rows).cloned().collect(),
            feature_summary: table.summary(),
            countries: country_distribution(table.rows.iter()),
            labeled_sample: labeled.iter().take(head_rows).map(LabeledSample::from).collect(),
            scatter: ScatterSeries::from_flows(labeled),
            suspicious_countries: country_distribution(
                labeled
                    .iter()
                    .filter(|f| f.label == AnomalyLabel::Suspicious)
                    .map(|f| &f.row),
            ),
        }
    }
}

/// Counts rows per country code, most frequent first.
///
/// Ties keep first-appearance order. Rows without a country are not counted.
pub fn country_distribution<'a, I>(rows: I) -> Vec<CountryCount>
where
    I: IntoIterator<Item = &'a FlowRow>,
{
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut counts: Vec<CountryCount> = Vec::new();

    for row in rows {
        let Some(code) = row.record.src_ip_country_code.as_deref() else {
            continue;
        };

        match index.get(code) {
            Some(&i) => counts[i].count += 1,
            None => {
                index.insert(code, counts.len());
                counts.push(CountryCount {
                    country_code: code.to_string(),
                    count: 1,
                });
            }
        }
    }

    // Stable sort keeps first-appearance order among equal counts
    counts.sort_by(|a, b| b.count.cmp(&a.count));
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::FlowRecord;
    use crate::session::tests::sample_session;

    fn row_from(country: Option<&str>) -> FlowRow {
        FlowRow {
            record: FlowRecord {
                row: 0,
                creation_time: None,
                end_time: None,
                time: None,
                src_ip: "1.1.1.1".to_string(),
                dst_ip: "2.2.2.2".to_string(),
                src_ip_country_code: country.map(str::to_string),
                bytes_in: Some(1.0),
                bytes_out: Some(1.0),
            },
            bytes_in: 1.0,
            bytes_out: 1.0,
            duration_seconds: 1.0,
            avg_packet_size: 2.0,
        }
    }

    #[test]
    fn test_country_distribution_order() {
        let rows = vec![
            row_from(Some("DE")),
            row_from(Some("US")),
            row_from(None),
            row_from(Some("US")),
            row_from(Some("CA")),
            row_from(Some("DE")),
            row_from(Some("US")),
        ];

        let counts = country_distribution(&rows);

        let flat: Vec<(&str, usize)> = counts
            .iter()
            .map(|c| (c.country_code.as_str(), c.count))
            .collect();
        assert_eq!(flat, vec![("US", 3), ("DE", 2), ("CA", 1)]);
    }

    #[test]
    fn test_country_distribution_empty() {
        assert!(country_distribution(&Vec::<FlowRow>::new()).is_empty());
    }

    #[test]
    fn test_report_matches_session() {
        let session = sample_session(200);

        let report = TriageReport::build(&session, 5);

        assert_eq!(report.records_read, 204);
        assert_eq!(report.dropped, 3);
        assert_eq!(report.scored, 201);
        assert_eq!(report.sample.len(), 5);
        assert_eq!(report.labeled_sample.len(), 5);
        assert_eq!(report.suspicious, session.suspicious_count());
        assert_eq!(
            report.scatter.normal.len() + report.scatter.suspicious.len(),
            report.scored
        );
        assert_eq!(report.scatter.suspicious.len(), report.suspicious);

        let total: usize = report.countries.iter().map(|c| c.count).sum();
        assert_eq!(total, report.scored);
        let suspicious_total: usize = report.suspicious_countries.iter().map(|c| c.count).sum();
        assert_eq!(suspicious_total, report.suspicious);
        assert!(report
            .suspicious_countries
            .iter()
            .any(|c| c.country_code == "KP"));
    }

    #[test]
    fn test_report_head_is_table_prefix() {
        let session = sample_session(50);

        let report = TriageReport::build(&session, 3);

        assert_eq!(report.sample, session.table().rows[..3].to_vec());
        for (sample, flow) in report.labeled_sample.iter().zip(session.labeled()) {
            assert_eq!(sample.src_ip, flow.row.record.src_ip);
            assert_eq!(sample.label, flow.label);
        }
    }

    #[test]
    fn test_scatter_bounds() {
        let series = ScatterSeries {
            normal: vec![(1.0, 5.0), (3.0, 2.0)],
            suspicious: vec![(10.0, 1.0)],
        };
        assert_eq!(series.bounds(), (10.0, 5.0));
        assert_eq!(ScatterSeries::default().bounds(), (0.0, 0.0));
    }
}
