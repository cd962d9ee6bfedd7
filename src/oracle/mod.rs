//! Scorer and Mapper oracles.
//!
//! Both are external, opaque and fallible. Their outputs are modelled as
//! tagged outcomes so that a degraded answer (a zero-score stub, a missing
//! mapping) is an explicit branch the engine can log and continue past.

pub mod chat;
pub mod llm;
pub mod parse;
pub mod prompt;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{error::OracleError, source::Record};

pub use llm::{LlmMapper, LlmScorer};

/// One oracle verdict for a (raw record, candidate) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationResult {
    pub correlation: f64,
    #[serde(default)]
    pub explanation: String,
    /// Position of the candidate inside the submitted batch.
    pub metadata_index: usize,
    #[serde(default)]
    pub matching_points: Vec<String>,
}

impl CorrelationResult {
    pub fn zero(metadata_index: usize) -> Self {
        Self {
            correlation: 0.0,
            explanation: String::new(),
            metadata_index,
            matching_points: Vec::new(),
        }
    }

    /// Correlation clamped into [0, 1]; NaN reads as 0.
    pub fn clamped_correlation(&self) -> f64 {
        if self.correlation.is_nan() {
            0.0
        } else {
            self.correlation.clamp(0.0, 1.0)
        }
    }
}

/// All-zero stand-in sized to the batch.
pub fn zero_stub(batch_len: usize) -> Vec<CorrelationResult> {
    (0..batch_len).map(CorrelationResult::zero).collect()
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScoreOutcome {
    Scored(Vec<CorrelationResult>),
    /// The oracle answer was unusable; `results` is a zero stub.
    Degraded {
        reason: String,
        results: Vec<CorrelationResult>,
    },
}

impl ScoreOutcome {
    pub fn degraded(reason: impl Into<String>, batch_len: usize) -> Self {
        ScoreOutcome::Degraded {
            reason: reason.into(),
            results: zero_stub(batch_len),
        }
    }

    pub fn results(&self) -> &[CorrelationResult] {
        match self {
            ScoreOutcome::Scored(results) => results,
            ScoreOutcome::Degraded { results, .. } => results,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, ScoreOutcome::Degraded { .. })
    }
}

/// Mapper answer: source column → target column, with free-text reasons.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MappingSuggestion {
    #[serde(default)]
    pub mappings: BTreeMap<String, String>,
    #[serde(default)]
    pub explanations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MappingOutcome {
    Suggested(MappingSuggestion),
    Unavailable { reason: String },
}

/// Scores one raw record against a batch of candidate reference records.
pub trait Scorer: Send + Sync {
    fn score(&self, raw: &Record, batch: &[Record]) -> Result<ScoreOutcome, OracleError>;
}

/// Suggests how source columns map onto target columns.
pub trait Mapper: Send + Sync {
    fn suggest(
        &self,
        source_columns: &[String],
        target_columns: &[String],
    ) -> Result<MappingOutcome, OracleError>;
}
