use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use cml_reconcile::config::ResolutionPolicy;
use cml_reconcile::data::{Value, coerce_numeric};
use cml_reconcile::error::OracleError;
use cml_reconcile::oracle::{CorrelationResult, ScoreOutcome, Scorer};
use cml_reconcile::resolve::resolve;
use cml_reconcile::search::{SearchParams, search};
use cml_reconcile::source::{Record, RecordSet, ReferenceSource};

/// Scores candidates by their `score` column without any I/O.
struct LocalScorer;

impl Scorer for LocalScorer {
    fn score(&self, _raw: &Record, batch: &[Record]) -> Result<ScoreOutcome, OracleError> {
        Ok(ScoreOutcome::Scored(
            batch
                .iter()
                .enumerate()
                .map(|(idx, candidate)| CorrelationResult {
                    correlation: candidate.get("score").and_then(coerce_numeric).unwrap_or(0.0),
                    explanation: String::new(),
                    metadata_index: idx,
                    matching_points: Vec::new(),
                })
                .collect(),
        ))
    }
}

/// `files` sources of `rows` records each; only the last record of the last
/// file clears the target, so every search scans everything.
fn generate_sources(files: usize, rows: usize) -> Vec<ReferenceSource> {
    (0..files)
        .map(|file| {
            let raw_rows = (0..rows)
                .map(|row| {
                    let last = file + 1 == files && row + 1 == rows;
                    let score = if last { 0.95 } else { (row % 80) as f64 / 100.0 };
                    vec![
                        (file * rows + row).to_string(),
                        format!("site-{}", row % 17),
                        format!("{score:.2}"),
                    ]
                })
                .collect();
            let set = RecordSet::from_raw(
                vec!["Link".to_string(), "site".to_string(), "score".to_string()],
                raw_rows,
            );
            ReferenceSource::new(format!("metadata_{file:02}.csv"), set)
        })
        .collect()
}

fn bench_search(c: &mut Criterion) {
    let raw = Record::from_pairs([
        ("LINKNUMBER", Some(Value::Integer(7))),
        ("RxLevel", Some(Value::Float(-48.5))),
    ]);
    let mut group = c.benchmark_group("search_then_resolve");
    for &(files, rows) in &[(4usize, 250usize), (16, 250)] {
        let sources = generate_sources(files, rows);
        for batch_size in [1usize, 3, 10] {
            let params = SearchParams {
                correlation_threshold: 0.85,
                target_correlation: 0.9,
                batch_size,
                identity_column: "Link".to_string(),
            };
            group.bench_with_input(
                BenchmarkId::new(format!("{files}x{rows}"), batch_size),
                &params,
                |b, params| {
                    b.iter(|| {
                        let state = search(&raw, &sources, &LocalScorer, params).expect("search");
                        let state = resolve(
                            &raw,
                            &sources,
                            &LocalScorer,
                            state,
                            &params.identity_column,
                            &ResolutionPolicy::RescoreLastWins,
                        )
                        .expect("resolve");
                        black_box(state.best_score)
                    });
                },
            );
        }
    }
    group.finish();
}

criterion_group!(benches, bench_search);
criterion_main!(benches);
