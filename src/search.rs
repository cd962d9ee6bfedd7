//! Candidate search: batched scoring of reference records with early stopping.

use log::{debug, warn};
use thiserror::Error;

use crate::{
    config::SearchConfig,
    data::Value,
    error::OracleError,
    oracle::{CorrelationResult, ScoreOutcome, Scorer},
    source::{Record, ReferenceSource},
};

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("scorer failed on '{source_file}' (records {start}..{end}): {error}")]
    Scorer {
        source_file: String,
        start: usize,
        end: usize,
        #[source]
        error: OracleError,
    },
}

/// Search tuning, derived from [`SearchConfig`] plus the identity column
/// read off matched reference records.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchParams {
    pub correlation_threshold: f64,
    pub target_correlation: f64,
    pub batch_size: usize,
    pub identity_column: String,
}

impl SearchParams {
    pub fn from_config(config: &SearchConfig, identity_column: impl Into<String>) -> Self {
        Self {
            correlation_threshold: config.correlation_threshold,
            target_correlation: config.target_correlation,
            batch_size: config.batch_size.max(1),
            identity_column: identity_column.into(),
        }
    }
}

/// Best match found so far for one raw record.
///
/// Each phase consumes the state and returns a new one; the state is never
/// shared between raw records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchState {
    pub best_score: f64,
    pub best_record: Option<Record>,
    pub best_source_file: Option<String>,
    pub best_explanation: String,
    pub best_matching_points: Vec<String>,
    pub best_identity: Option<Value>,
}

impl MatchState {
    pub fn is_match(&self) -> bool {
        self.best_record.is_some()
    }

    /// Replaces the current best with `candidate`, taking the identity from
    /// the candidate record itself.
    pub(crate) fn adopt(
        self,
        score: f64,
        candidate: &Record,
        source_file: &str,
        result: &CorrelationResult,
        identity_column: &str,
    ) -> Self {
        MatchState {
            best_score: score,
            best_identity: candidate.get(identity_column).cloned(),
            best_record: Some(candidate.clone()),
            best_source_file: Some(source_file.to_string()),
            best_explanation: result.explanation.clone(),
            best_matching_points: result.matching_points.clone(),
        }
    }

    fn reached(&self, target: f64) -> bool {
        self.best_score > target
    }
}

/// Scans `sources` in order, scoring records in batches, and returns the best
/// candidate scoring above the threshold. Stops scanning once the best score
/// exceeds the target.
pub fn search(
    raw: &Record,
    sources: &[ReferenceSource],
    scorer: &dyn Scorer,
    params: &SearchParams,
) -> Result<MatchState, SearchError> {
    let mut state = MatchState::default();
    let batch_size = params.batch_size.max(1);

    for source in sources {
        let rows = source.records.rows();
        if rows.is_empty() {
            debug!("Skipping empty reference source '{}'", source.file_name);
            continue;
        }
        for (batch_no, batch) in rows.chunks(batch_size).enumerate() {
            let start = batch_no * batch_size;
            let outcome = scorer.score(raw, batch).map_err(|error| SearchError::Scorer {
                source_file: source.file_name.clone(),
                start,
                end: start + batch.len(),
                error,
            })?;
            if let ScoreOutcome::Degraded { reason, .. } = &outcome {
                warn!(
                    "Degraded scores for '{}' records {}..{}: {reason}",
                    source.file_name,
                    start,
                    start + batch.len()
                );
            }
            for result in outcome.results() {
                let Some(candidate) = batch.get(result.metadata_index) else {
                    warn!(
                        "Scorer returned index {} for a batch of {}; ignoring it",
                        result.metadata_index,
                        batch.len()
                    );
                    continue;
                };
                let score = result.clamped_correlation();
                if score > params.correlation_threshold && score > state.best_score {
                    debug!(
                        "New best {:.3} from '{}' record {}",
                        score,
                        source.file_name,
                        start + result.metadata_index
                    );
                    state = state.adopt(
                        score,
                        candidate,
                        &source.file_name,
                        result,
                        &params.identity_column,
                    );
                }
            }
            if state.reached(params.target_correlation) {
                break;
            }
        }
        if state.reached(params.target_correlation) {
            debug!(
                "Target correlation reached in '{}'; skipping remaining sources",
                source.file_name
            );
            break;
        }
    }
    Ok(state)
}
