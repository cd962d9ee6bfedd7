//! Version resolution: prefer the current revision of a matched entity.
//!
//! There is no reliable timestamp on reference records, so "current" is
//! approximated by re-scoring every record sharing the matched identity and
//! letting later scans win ([`ResolutionPolicy::RescoreLastWins`]). When the
//! files do carry a version column, [`ResolutionPolicy::VersionColumn`] ranks
//! the qualifying records by it instead.

use std::cmp::Ordering;

use log::debug;

use crate::{
    config::ResolutionPolicy,
    data::{Value, coerce_numeric},
    oracle::Scorer,
    search::{MatchState, SearchError},
    source::{Record, ReferenceSource},
};

struct Revision<'a> {
    score: f64,
    record: &'a Record,
    source_file: &'a str,
    explanation: String,
    matching_points: Vec<String>,
}

/// Re-scores every record sharing `state.best_identity` and returns the
/// state for the preferred revision. Records scoring below the incoming best
/// never qualify, so the returned score is never lower than the incoming one.
pub fn resolve(
    raw: &Record,
    sources: &[ReferenceSource],
    scorer: &dyn Scorer,
    state: MatchState,
    identity_column: &str,
    policy: &ResolutionPolicy,
) -> Result<MatchState, SearchError> {
    let Some(identity) = state.best_identity.clone() else {
        return Ok(state);
    };
    let floor = state.best_score;
    let mut chosen: Option<Revision<'_>> = None;

    for source in sources {
        for (idx, record) in source.records.rows().iter().enumerate() {
            let same_identity = record
                .get(identity_column)
                .is_some_and(|value| value.loosely_equals(&identity));
            if !same_identity {
                continue;
            }
            let outcome = scorer
                .score(raw, std::slice::from_ref(record))
                .map_err(|error| SearchError::Scorer {
                    source_file: source.file_name.clone(),
                    start: idx,
                    end: idx + 1,
                    error,
                })?;
            for result in outcome.results().iter().filter(|r| r.metadata_index == 0) {
                let score = result.clamped_correlation();
                if score < floor {
                    continue;
                }
                let candidate = Revision {
                    score,
                    record,
                    source_file: &source.file_name,
                    explanation: result.explanation.clone(),
                    matching_points: result.matching_points.clone(),
                };
                if replaces(chosen.as_ref(), &candidate, policy) {
                    debug!(
                        "Revision of identity {} in '{}' record {} qualifies ({:.3} >= {:.3})",
                        identity, source.file_name, idx, score, floor
                    );
                    chosen = Some(candidate);
                }
            }
        }
    }

    Ok(match chosen {
        Some(revision) => MatchState {
            best_score: revision.score,
            best_identity: revision.record.get(identity_column).cloned().or(Some(identity)),
            best_record: Some(revision.record.clone()),
            best_source_file: Some(revision.source_file.to_string()),
            best_explanation: revision.explanation,
            best_matching_points: revision.matching_points,
        },
        None => state,
    })
}

fn replaces(current: Option<&Revision<'_>>, candidate: &Revision<'_>, policy: &ResolutionPolicy) -> bool {
    let Some(current) = current else {
        return true;
    };
    match policy {
        ResolutionPolicy::RescoreLastWins => true,
        ResolutionPolicy::VersionColumn { column } => {
            match compare_versions(candidate.record.get(column), current.record.get(column)) {
                Ordering::Less => false,
                Ordering::Equal | Ordering::Greater => true,
            }
        }
    }
}

/// Orders version cells: nulls lowest, numbers numerically, dates
/// chronologically, everything else by text. Mixed kinds compare equal so
/// scan order decides.
fn compare_versions(left: Option<&Value>, right: Option<&Value>) -> Ordering {
    match (left, right) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(Value::Date(a)), Some(Value::Date(b))) => a.cmp(b),
        (Some(Value::DateTime(a)), Some(Value::DateTime(b))) => a.cmp(b),
        (Some(Value::Date(a)), Some(Value::DateTime(b))) => a.cmp(&b.date()),
        (Some(Value::DateTime(a)), Some(Value::Date(b))) => a.date().cmp(b),
        (Some(a), Some(b)) => match (coerce_numeric(a), coerce_numeric(b)) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            (None, None) => a.as_display().cmp(&b.as_display()),
            _ => Ordering::Equal,
        },
    }
}
