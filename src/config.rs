//! Run configuration, loaded from an optional YAML file and overridden by CLI
//! flags.

use std::{fs::File, io::BufReader, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_CORRELATION_THRESHOLD: f64 = 0.85;
pub const DEFAULT_TARGET_CORRELATION: f64 = 0.9;
pub const DEFAULT_BATCH_SIZE: usize = 3;
pub const DEFAULT_SNAPSHOT_INTERVAL: usize = 2;
pub const DEFAULT_FALLBACK_ENCODING: &str = "windows-1255";

/// Column names behind the fixed reconciliation rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldRules {
    /// Identity candidate on raw rows.
    pub raw_identity: String,
    /// Canonical identity column, also read off reference records.
    pub identity: String,
    /// Alternately-named identity columns tried on the matched reference
    /// record when the raw identity is unusable.
    pub identity_fallbacks: Vec<String>,
    pub raw_longitude: String,
    pub raw_latitude: String,
    pub longitude: String,
    pub latitude: String,
    pub rx_level: String,
    pub tx_level: String,
}

impl Default for FieldRules {
    fn default() -> Self {
        Self {
            raw_identity: "LINKNUMBER".to_string(),
            identity: "Link".to_string(),
            identity_fallbacks: vec![
                "Link".to_string(),
                "link_number".to_string(),
                "LinkNumber".to_string(),
                "מספר עורק".to_string(),
            ],
            raw_longitude: "ITMX".to_string(),
            raw_latitude: "ITMY".to_string(),
            longitude: "NearLongitude_DecDeg".to_string(),
            latitude: "NearLatitude_DecDeg".to_string(),
            rx_level: "RxLevel".to_string(),
            tx_level: "TxLevel".to_string(),
        }
    }
}

impl FieldRules {
    /// Canonical columns populated by fixed rules rather than the mapper.
    pub fn fixed_targets(&self) -> [&str; 5] {
        [
            self.identity.as_str(),
            self.longitude.as_str(),
            self.latitude.as_str(),
            self.rx_level.as_str(),
            self.tx_level.as_str(),
        ]
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let named = [
            ("raw_identity", &self.raw_identity),
            ("identity", &self.identity),
            ("raw_longitude", &self.raw_longitude),
            ("raw_latitude", &self.raw_latitude),
            ("longitude", &self.longitude),
            ("latitude", &self.latitude),
            ("rx_level", &self.rx_level),
            ("tx_level", &self.tx_level),
        ];
        for (rule, column) in named {
            if column.trim().is_empty() {
                return Err(ConfigError::EmptyFieldRule(rule));
            }
        }
        Ok(())
    }
}

/// How the second pass picks the current revision of a matched entity.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolutionPolicy {
    /// Re-score every record sharing the identity; any record scoring at or
    /// above the first-pass best replaces it, later scans winning ties.
    #[default]
    RescoreLastWins,
    /// Among records scoring at or above the first-pass best, prefer the
    /// highest value of `column`.
    VersionColumn { column: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub correlation_threshold: f64,
    pub target_correlation: f64,
    pub batch_size: usize,
    pub resolution: ResolutionPolicy,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            correlation_threshold: DEFAULT_CORRELATION_THRESHOLD,
            target_correlation: DEFAULT_TARGET_CORRELATION,
            batch_size: DEFAULT_BATCH_SIZE,
            resolution: ResolutionPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Prefix output files with a UTF-8 byte order mark (spreadsheet friendly).
    pub write_bom: bool,
    /// Successful units between partial snapshots.
    pub snapshot_interval: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            write_bom: true,
            snapshot_interval: DEFAULT_SNAPSHOT_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Encoding label used when a file is neither BOM-marked nor valid UTF-8.
    pub fallback_encoding: String,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            fallback_encoding: DEFAULT_FALLBACK_ENCODING.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub search: SearchConfig,
    pub fields: FieldRules,
    pub output: OutputConfig,
    pub input: InputConfig,
    /// Worker threads; 0 selects one less than the CPU count.
    pub workers: usize,
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening config file {path:?}"))?;
        let config: PipelineConfig = serde_yaml::from_reader(BufReader::new(file))
            .with_context(|| format!("Parsing config YAML {path:?}"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let search = &self.search;
        for (name, value) in [
            ("correlation_threshold", search.correlation_threshold),
            ("target_correlation", search.target_correlation),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::OutOfRange { name, value });
            }
        }
        if search.target_correlation < search.correlation_threshold {
            return Err(ConfigError::TargetBelowThreshold {
                threshold: search.correlation_threshold,
                target: search.target_correlation,
            });
        }
        if search.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.output.snapshot_interval == 0 {
            return Err(ConfigError::ZeroSnapshotInterval);
        }
        self.fields.validate()
    }

    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            num_cpus::get().saturating_sub(1).max(1)
        }
    }
}
