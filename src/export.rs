//! Export Module
//!
//! Renders triage reports and single-session predictions as console text,
//! JSON, or JSON Lines for integration with other security tools.

use serde::Serialize;

use crate::error::QueryError;
use crate::features::{FeatureStatistics, FlowRow};
use crate::report::{CountryCount, LabeledSample, TriageReport};
use crate::scorer::{Prediction, PredictionSource, SessionQuery};

/// Width of the longest bar in text charts.
const BAR_WIDTH: usize = 40;

/// Output format for exports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    JsonLines, // One JSON object per line (JSONL)
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "jsonl" | "jsonlines" => Ok(Self::JsonLines),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
            Self::JsonLines => write!(f, "jsonl"),
        }
    }
}

/// JSON-serializable triage report
#[derive(Serialize)]
pub struct JsonReport {
    pub version: &'static str,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub records_read: usize,
    pub dropped: usize,
    pub scored: usize,
    pub suspicious_count: usize,
    pub contamination: f64,
    pub seed: u64,
    pub threshold: f64,
    pub sample: Vec<JsonFlowRow>,
    pub feature_summary: Vec<JsonFeatureStats>,
    pub countries: Vec<JsonCountry>,
    pub labeled_sample: Vec<JsonLabeled>,
    pub scatter: JsonScatter,
    pub suspicious_countries: Vec<JsonCountry>,
}

impl From<&TriageReport> for JsonReport {
    fn from(report: &TriageReport) -> Self {
        Self {
            version: "1.0",
            timestamp: report.generated_at.to_rfc3339(),
            source: report.source.clone(),
            records_read: report.records_read,
            dropped: report.dropped,
            scored: report.scored,
            suspicious_count: report.suspicious,
            contamination: report.contamination,
            seed: report.seed,
            threshold: report.threshold,
            sample: report.sample.iter().map(JsonFlowRow::from).collect(),
            feature_summary: report
                .feature_summary
                .iter()
                .map(JsonFeatureStats::from)
                .collect(),
            countries: report.countries.iter().map(JsonCountry::from).collect(),
            labeled_sample: report.labeled_sample.iter().map(JsonLabeled::from).collect(),
            scatter: JsonScatter {
                normal: report.scatter.normal.clone(),
                suspicious: report.scatter.suspicious.clone(),
            },
            suspicious_countries: report
                .suspicious_countries
                .iter()
                .map(JsonCountry::from)
                .collect(),
        }
    }
}

/// JSON-serializable raw+derived row
#[derive(Serialize)]
pub struct JsonFlowRow {
    pub row: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    pub src_ip: String,
    pub dst_ip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src_ip_country_code: Option<String>,
    pub bytes_in: f64,
    pub bytes_out: f64,
    pub duration_seconds: f64,
    pub avg_packet_size: f64,
}

impl From<&FlowRow> for JsonFlowRow {
    fn from(row: &FlowRow) -> Self {
        let record = &row.record;
        Self {
            row: record.row,
            creation_time: record.creation_time.map(|t| t.to_rfc3339()),
            end_time: record.end_time.map(|t| t.to_rfc3339()),
            time: record.time.map(|t| t.to_rfc3339()),
            src_ip: record.src_ip.clone(),
            dst_ip: record.dst_ip.clone(),
            src_ip_country_code: record.src_ip_country_code.clone(),
            bytes_in: row.bytes_in,
            bytes_out: row.bytes_out,
            duration_seconds: row.duration_seconds,
            avg_packet_size: row.avg_packet_size,
        }
    }
}

#[derive(Serialize)]
pub struct JsonFeatureStats {
    pub feature: &'static str,
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,
}

impl From<&FeatureStatistics> for JsonFeatureStats {
    fn from(stats: &FeatureStatistics) -> Self {
        Self {
            feature: stats.name,
            mean: stats.mean,
            std_dev: stats.std_dev,
            min: stats.min,
            max: stats.max,
            median: stats.median,
        }
    }
}

#[derive(Serialize)]
pub struct JsonCountry {
    pub country_code: String,
    pub count: usize,
}

impl From<&CountryCount> for JsonCountry {
    fn from(c: &CountryCount) -> Self {
        Self {
            country_code: c.country_code.clone(),
            count: c.count,
        }
    }
}

/// JSON-serializable labeled flow
#[derive(Serialize)]
pub struct JsonLabeled {
    pub src_ip: String,
    pub dst_ip: String,
    pub bytes_in: f64,
    pub bytes_out: f64,
    pub anomaly: String,
}

impl From<&LabeledSample> for JsonLabeled {
    fn from(sample: &LabeledSample) -> Self {
        Self {
            src_ip: sample.src_ip.clone(),
            dst_ip: sample.dst_ip.clone(),
            bytes_in: sample.bytes_in,
            bytes_out: sample.bytes_out,
            anomaly: sample.label.to_string(),
        }
    }
}

#[derive(Serialize)]
pub struct JsonScatter {
    pub normal: Vec<(f64, f64)>,
    pub suspicious: Vec<(f64, f64)>,
}

/// JSON-serializable outcome of a single-session query
#[derive(Serialize)]
pub struct JsonPrediction {
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub duration_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prediction: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JsonPrediction {
    pub fn new(query: &SessionQuery, outcome: &Result<Prediction, QueryError>) -> Self {
        let (prediction, source, score, error) = match outcome {
            Ok(p) => (
                Some(p.label.to_string()),
                Some(prediction_source_name(&p.source)),
                p.score(),
                None,
            ),
            Err(e) => (None, None, None, Some(e.to_string())),
        };

        Self {
            bytes_in: query.bytes_in,
            bytes_out: query.bytes_out,
            duration_seconds: query.duration_seconds,
            prediction,
            source,
            score,
            error,
        }
    }
}

fn prediction_source_name(source: &PredictionSource) -> &'static str {
    match source {
        PredictionSource::ZeroTraffic => "zero_traffic",
        PredictionSource::Model { .. } => "model",
    }
}

/// Exports a report in the specified format
pub fn export_report(report: &TriageReport, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => export_text(report),
        OutputFormat::Json => export_json(report),
        OutputFormat::JsonLines => export_jsonl(report),
    }
}

/// Exports report as pretty-printed JSON
pub fn export_json(report: &TriageReport) -> String {
    let json_report = JsonReport::from(report);
    serde_json::to_string_pretty(&json_report)
        .unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e))
}

/// Exports report as JSON Lines (summary, then one labeled preview row per line)
pub fn export_jsonl(report: &TriageReport) -> String {
    let mut lines = Vec::new();

    // First line is the summary
    let summary = serde_json::json!({
        "type": "summary",
        "timestamp": report.generated_at.to_rfc3339(),
        "records_read": report.records_read,
        "dropped": report.dropped,
        "scored": report.scored,
        "suspicious_count": report.suspicious,
        "contamination": report.contamination,
        "seed": report.seed,
    });
    lines.push(serde_json::to_string(&summary).unwrap_or_default());

    for sample in &report.labeled_sample {
        if let Ok(line) = serde_json::to_string(&JsonLabeled::from(sample)) {
            lines.push(line);
        }
    }

    lines.join("\n")
}

/// Exports report as formatted text
pub fn export_text(report: &TriageReport) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "--- Triage Report ---\nTime: {}\nSource: {}\nRecords Read: {}\nDropped (incomplete): {}\nScored: {}\nSuspicious: {} (contamination {}, seed {})\n",
        report.generated_at.format("%Y-%m-%d %H:%M:%S"),
        report.source.as_deref().unwrap_or("-"),
        report.records_read,
        report.dropped,
        report.scored,
        report.suspicious,
        report.contamination,
        report.seed,
    ));

    output.push_str("\nSample of Uploaded Data:\n");
    output.push_str(&format!(
        "{:<5} {:<20} {:<18} {:<18} {:>7} {:>12} {:>12} {:>10} {:>12}\n",
        "Row", "Created", "Source IP", "Dest IP", "Country", "Bytes In", "Bytes Out", "Duration", "Avg Size"
    ));
    output.push_str(&"-".repeat(120));
    output.push('\n');
    for row in &report.sample {
        output.push_str(&format!(
            "{:<5} {:<20} {:<18} {:<18} {:>7} {:>12} {:>12} {:>10} {:>12.2}\n",
            row.record.row,
            row.record
                .creation_time
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "N/A".to_string()),
            row.record.src_ip,
            row.record.dst_ip,
            row.record.src_ip_country_code.as_deref().unwrap_or("??"),
            format_bytes(row.bytes_in),
            format_bytes(row.bytes_out),
            format_duration(row.duration_seconds),
            row.avg_packet_size,
        ));
    }

    output.push_str("\nFeature Summary:\n");
    for stats in &report.feature_summary {
        output.push_str(&format!(
            "  {:<18} mean {:>14.2}  std {:>14.2}  min {:>14.2}  median {:>14.2}  max {:>14.2}\n",
            stats.name, stats.mean, stats.std_dev, stats.min, stats.median, stats.max
        ));
    }

    output.push_str("\nCountry-wise Traffic Distribution:\n");
    output.push_str(&render_bars(&report.countries));

    output.push_str("\nAnomaly Detection (Isolation Forest):\n");
    output.push_str(&format!(
        "{:<18} {:<18} {:>12} {:>12} {:>11}\n",
        "Source IP", "Dest IP", "Bytes In", "Bytes Out", "Anomaly"
    ));
    output.push_str(&"-".repeat(75));
    output.push('\n');
    for sample in &report.labeled_sample {
        output.push_str(&format!(
            "{:<18} {:<18} {:>12} {:>12} {:>11}\n",
            sample.src_ip,
            sample.dst_ip,
            format_bytes(sample.bytes_in),
            format_bytes(sample.bytes_out),
            sample.label,
        ));
    }

    output.push_str("\nSuspicious Sessions by Country:\n");
    if report.suspicious_countries.is_empty() {
        output.push_str("  None detected\n");
    } else {
        output.push_str(&render_bars(&report.suspicious_countries));
    }

    output
}

/// Renders a prediction outcome for the console
pub fn export_prediction(
    query: &SessionQuery,
    outcome: &Result<Prediction, QueryError>,
    format: OutputFormat,
) -> String {
    match format {
        OutputFormat::Json | OutputFormat::JsonLines => {
            let json = JsonPrediction::new(query, outcome);
            let rendered = if format == OutputFormat::Json {
                serde_json::to_string_pretty(&json)
            } else {
                serde_json::to_string(&json)
            };
            rendered.unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e))
        }
        OutputFormat::Text => match outcome {
            Err(e) => format!("Error: {}", e),
            Ok(p) => match p.source {
                PredictionSource::ZeroTraffic => format!(
                    "No data transferred. This session is suspicious.\nPrediction: {}",
                    p.label
                ),
                PredictionSource::Model { score } => {
                    format!("Prediction: {} (score {:.4})", p.label, score)
                }
            },
        },
    }
}

/// Horizontal bar chart, one line per country.
fn render_bars(counts: &[CountryCount]) -> String {
    let max = counts.iter().map(|c| c.count).max().unwrap_or(0);
    if max == 0 {
        return "  (no data)\n".to_string();
    }

    counts
        .iter()
        .map(|c| {
            let len = (c.count * BAR_WIDTH).div_ceil(max);
            format!(
                "  {:<4} {:<width$} {}\n",
                c.country_code,
                "#".repeat(len),
                c.count,
                width = BAR_WIDTH
            )
        })
        .collect()
}

/// Format bytes in human-readable form.
pub fn format_bytes(bytes: f64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    if bytes >= GB {
        format!("{:.2} GB", bytes / GB)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes / MB)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes / KB)
    } else {
        format!("{} B", bytes)
    }
}

/// Format a signed duration in seconds.
pub fn format_duration(secs: f64) -> String {
    let sign = if secs < 0.0 { "-" } else { "" };
    let abs = secs.abs();
    let whole = abs.trunc() as u64;

    if whole >= 3600 {
        format!("{}{}h {}m", sign, whole / 3600, (whole % 3600) / 60)
    } else if whole >= 60 {
        format!("{}{}m {}s", sign, whole / 60, whole % 60)
    } else {
        format!("{}{:.1}s", sign, abs)
    }
}
