//! Configuration Module
//!
//! Provides TOML-based configuration for flow-triage.
//! Configuration is optional - CLI arguments can override file settings.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::export::OutputFormat;
use crate::scorer::ScorerConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub scorer: ScorerConfig,
    pub report: ReportConfig,
    pub output: OutputConfig,
}

impl Config {
    /// Loads configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Loads the given configuration file, or returns defaults when none is given.
    ///
    /// A file that was asked for but cannot be read or parsed is an error.
    pub fn load_optional(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    /// Generates a default configuration file content
    pub fn generate_default() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config)
            .unwrap_or_else(|_| "# Failed to generate config".to_string())
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        self.scorer.validate()?;
        if self.report.head_rows == 0 {
            anyhow::bail!("head_rows must be greater than 0");
        }
        Ok(())
    }
}

/// Report-related configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Rows shown in the table previews
    pub head_rows: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self { head_rows: 5 }
    }
}

/// Output-related configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Output format (text, json, jsonl)
    #[serde(with = "output_format_serde")]
    pub format: OutputFormat,
    /// Enable verbose logging
    pub verbose: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::Text,
            verbose: false,
        }
    }
}

/// Custom serde implementation for OutputFormat
mod output_format_serde {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S>(format: &OutputFormat, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<OutputFormat, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.scorer.contamination, 0.05);
        assert_eq!(config.scorer.seed, 42);
        assert_eq!(config.report.head_rows, 5);
        assert_eq!(config.output.format, OutputFormat::Text);
    }

    #[test]
    fn test_config_validate() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.report.head_rows = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.scorer.contamination = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_generate_default_config() {
        let config_str = Config::generate_default();
        assert!(config_str.contains("[scorer]"));
        assert!(config_str.contains("[report]"));
        assert!(config_str.contains("[output]"));
        assert!(config_str.contains("contamination = 0.05"));
    }

    #[test]
    fn test_parse_config() {
        let toml_str = r#"
[scorer]
contamination = 0.1
seed = 7

[report]
head_rows = 10

[output]
format = "json"
"#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.scorer.contamination, 0.1);
        assert_eq!(config.scorer.seed, 7);
        assert_eq!(config.scorer.n_estimators, 100);
        assert_eq!(config.report.head_rows, 10);
        assert_eq!(config.output.format, OutputFormat::Json);
    }

    #[test]
    fn test_generated_config_round_trips() {
        let config: Config = toml::from_str(&Config::generate_default()).unwrap();
        assert_eq!(config.scorer, ScorerConfig::default());
    }

    #[test]
    fn test_load_optional_rejects_broken_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[scorer\ncontamination = 0.2").unwrap();

        let err = Config::load_optional(Some(file.path())).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse config file"));
    }

    #[test]
    fn test_load_optional_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");

        let err = Config::load_optional(Some(&path)).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to read config file"));
    }

    #[test]
    fn test_load_optional_without_path_uses_defaults() {
        let config = Config::load_optional(None).unwrap();
        assert_eq!(config.scorer, ScorerConfig::default());
        assert_eq!(config.report.head_rows, 5);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[scorer]\nn_estimators = 10\n").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.scorer.n_estimators, 10);
        assert_eq!(config.scorer.max_samples, 256);
    }
}
