//! One pass of the triage pipeline.
//!
//! A [`Session`] owns everything derived from a single load of a flow export:
//! the feature table, the in-sample labels and the fitted scorer used for
//! ad-hoc queries. Loading again builds a new session from scratch.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::error::QueryError;
use crate::features::{derive_features, FeatureTable};
use crate::ingest::{self, FlowRecord};
use crate::scorer::{
    fit_and_label, predict_one, AnomalyLabel, FittedScorer, LabeledFlow, Prediction,
    ScorerConfig, SessionQuery,
};

pub struct Session {
    source: Option<PathBuf>,
    records_read: usize,
    table: FeatureTable,
    labeled: Vec<LabeledFlow>,
    scorer: FittedScorer,
}

impl Session {
    /// Reads, derives, fits and labels the export at `path`.
    pub fn load(path: &Path, config: &ScorerConfig) -> Result<Self> {
        let records = ingest::load_csv(path)?;
        let mut session = Self::from_records(records, config)
            .with_context(|| format!("Failed to analyze {}", path.display()))?;
        session.source = Some(path.to_path_buf());
        Ok(session)
    }

    /// Runs the pipeline over records already in memory.
    pub fn from_records(records: Vec<FlowRecord>, config: &ScorerConfig) -> Result<Self> {
        let records_read = records.len();
        let table = derive_features(records);
        let (scorer, labeled) = fit_and_label(&table, config)?;
        debug!(
            "Isolation forest: {} trees, {} rows per tree",
            scorer.forest().tree_count(),
            scorer.forest().sub_sample_size()
        );

        info!(
            "Session ready: {} records read, {} scored, {} dropped",
            records_read,
            table.len(),
            table.dropped
        );

        Ok(Self {
            source: None,
            records_read,
            table,
            labeled,
            scorer,
        })
    }

    /// Rebuilds the session from its source file with the same configuration.
    pub fn reload(&self) -> Result<Self> {
        let path = self
            .source
            .as_deref()
            .context("Session was not loaded from a file")?;
        Self::load(path, self.scorer.config())
    }

    /// Classifies an ad-hoc session with this session's fitted scorer.
    pub fn predict(&self, query: &SessionQuery) -> std::result::Result<Prediction, QueryError> {
        predict_one(&self.scorer, query)
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn records_read(&self) -> usize {
        self.records_read
    }

    pub fn table(&self) -> &FeatureTable {
        &self.table
    }

    pub fn labeled(&self) -> &[LabeledFlow] {
        &self.labeled
    }

    pub fn scorer(&self) -> &FittedScorer {
        &self.scorer
    }

    pub fn suspicious_count(&self) -> usize {
        self.labeled
            .iter()
            .filter(|f| f.label == AnomalyLabel::Suspicious)
            .count()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    use crate::error::IngestError;
    use crate::scorer::PredictionSource;

    pub(crate) const HEADER: &str =
        "bytes_in,bytes_out,creation_time,end_time,src_ip,src_ip_country_code,protocol,dst_ip,dst_port,time";

    /// Deterministic export with a few broken rows and one loud outlier.
    pub(crate) fn sample_csv(rows: usize) -> String {
        let countries = ["us", "CA", "de", "NL", "us", "AT"];
        let mut csv = String::from(HEADER);
        csv.push('\n');

        for i in 0..rows {
            let bytes_in = 1_000 + (i * 7_919) % 40_000;
            let bytes_out = 2_000 + (i * 104_729) % 30_000;
            let secs = 60 + (i * 37) % 540;
            csv.push_str(&format!(
                "{},{},2024-04-25T23:00:00Z,2024-04-25T23:{:02}:{:02}Z,147.161.{}.{},{},HTTPS,10.138.69.97,443,2024-04-25T23:00:00Z\n",
                bytes_in,
                bytes_out,
                secs / 60,
                secs % 60,
                i / 256,
                i % 256,
                countries[i % countries.len()],
            ));
        }

        // Zero duration, unparseable end time, missing bytes
        csv.push_str("10,10,2024-04-25T23:00:00Z,2024-04-25T23:00:00Z,1.1.1.1,us,HTTPS,2.2.2.2,443,2024-04-25T23:00:00Z\n");
        csv.push_str("10,10,2024-04-25T23:00:00Z,garbage,1.1.1.2,us,HTTPS,2.2.2.2,443,2024-04-25T23:00:00Z\n");
        csv.push_str(",10,2024-04-25T23:00:00Z,2024-04-25T23:05:00Z,1.1.1.3,us,HTTPS,2.2.2.2,443,2024-04-25T23:00:00Z\n");
        // Exfiltration-sized burst
        csv.push_str("90000000,80000000,2024-04-25T23:00:00Z,2024-04-25T23:00:01Z,6.6.6.6,kp,HTTPS,10.138.69.97,443,2024-04-25T23:00:00Z\n");

        csv
    }

    pub(crate) fn sample_session(rows: usize) -> Session {
        let records = ingest::read_records(sample_csv(rows).as_bytes()).unwrap();
        Session::from_records(records, &ScorerConfig::default()).unwrap()
    }

    fn write_csv(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_broken_rows_never_reach_the_labels() {
        let session = sample_session(200);

        assert_eq!(session.records_read(), 204);
        assert_eq!(session.table().dropped, 3);
        assert_eq!(session.labeled().len(), 201);
        assert!(session
            .labeled()
            .iter()
            .all(|f| f.row.duration_seconds != 0.0 && f.row.avg_packet_size.is_finite()));
        assert!(!session
            .labeled()
            .iter()
            .any(|f| f.row.record.src_ip.starts_with("1.1.1.")));
    }

    #[test]
    fn test_burst_is_flagged() {
        let session = sample_session(200);

        let burst = session
            .labeled()
            .iter()
            .find(|f| f.row.record.src_ip == "6.6.6.6")
            .unwrap();

        assert_eq!(burst.label, AnomalyLabel::Suspicious);
        assert_eq!(burst.row.record.src_ip_country_code.as_deref(), Some("KP"));
    }

    #[test]
    fn test_schema_error_propagates() {
        let file = write_csv("bytes_in,bytes_out\n1,2\n");

        let err = Session::load(file.path(), &ScorerConfig::default()).err().unwrap();

        assert!(matches!(
            err.downcast_ref::<IngestError>(),
            Some(IngestError::MissingColumn("creation_time"))
        ));
    }

    #[test]
    fn test_all_rows_dropped_is_an_error() {
        let csv = format!(
            "{}\n1,1,2024-04-25T23:00:00Z,2024-04-25T23:00:00Z,1.1.1.1,us,TCP,2.2.2.2,80,2024-04-25T23:00:00Z\n",
            HEADER
        );
        let file = write_csv(&csv);

        assert!(Session::load(file.path(), &ScorerConfig::default()).is_err());
    }

    #[test]
    fn test_reload_reproduces_tables_and_labels() {
        let file = write_csv(&sample_csv(150));

        let first = Session::load(file.path(), &ScorerConfig::default()).unwrap();
        let second = first.reload().unwrap();

        assert_eq!(first.table(), second.table());
        assert_eq!(first.labeled(), second.labeled());
        assert_eq!(second.source(), Some(file.path()));
    }

    #[test]
    fn test_reload_without_source_fails() {
        let session = sample_session(20);
        assert!(session.reload().is_err());
    }

    #[test]
    fn test_predict_uses_session_scorer() {
        let session = sample_session(200);

        let forced = session
            .predict(&SessionQuery {
                bytes_in: 0,
                bytes_out: 0,
                duration_seconds: 600.0,
            })
            .unwrap();
        assert_eq!(forced.source, PredictionSource::ZeroTraffic);

        let rejected = session.predict(&SessionQuery {
            bytes_in: 1000,
            bytes_out: 1000,
            duration_seconds: 0.0,
        });
        assert_eq!(rejected, Err(QueryError::ZeroDuration));

        let modeled = session
            .predict(&SessionQuery {
                bytes_in: 500_000,
                bytes_out: 500_000,
                duration_seconds: 1.0,
            })
            .unwrap();
        assert!(modeled.score().is_some());
    }
}
