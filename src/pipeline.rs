//! Parallel merge pipeline.
//!
//! Every raw row is one unit of work (search, resolve, reconcile) executed on
//! a rayon pool. Units report `(submission index, outcome)` over a channel;
//! the coordinator on the calling thread reorders them back into submission
//! order, accumulates the table, and snapshots it to `<output>.partial` every
//! `snapshot_interval` successful units.

use std::{
    any::Any,
    collections::BTreeMap,
    panic::{self, AssertUnwindSafe},
    path::{Path, PathBuf},
    thread,
};

use anyhow::{Context, Result};
use crossbeam_channel::unbounded;
use log::{debug, error, info, warn};
use thiserror::Error;

use crate::{
    config::{FieldRules, PipelineConfig, ResolutionPolicy},
    io_utils,
    oracle::{Mapper, Scorer},
    output::{MergedTable, partial_path},
    reconcile::{ReconciledRow, reconcile},
    resolve::resolve,
    schema::CanonicalSchema,
    search::{SearchError, SearchParams, search},
    source::{Record, ReferenceSource},
};

#[derive(Debug, Error)]
pub enum UnitError {
    #[error(transparent)]
    Search(#[from] SearchError),
    #[error("unit panicked: {0}")]
    Panic(String),
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub search: SearchParams,
    pub resolution: ResolutionPolicy,
    pub rules: FieldRules,
    pub worker_count: usize,
    pub snapshot_interval: usize,
    /// Final output path; `None` keeps the table in memory only.
    pub output: Option<PathBuf>,
    pub write_bom: bool,
}

impl PipelineOptions {
    pub fn from_config(config: &PipelineConfig, output: Option<PathBuf>) -> Self {
        Self {
            search: SearchParams::from_config(&config.search, config.fields.identity.clone()),
            resolution: config.search.resolution.clone(),
            rules: config.fields.clone(),
            worker_count: config.worker_count(),
            snapshot_interval: config.output.snapshot_interval.max(1),
            output,
            write_bom: config.output.write_bom,
        }
    }
}

#[derive(Debug)]
pub struct FailedUnit {
    pub row: usize,
    pub error: UnitError,
}

#[derive(Debug)]
pub struct PipelineReport {
    pub table: MergedTable,
    /// Units consumed, failed ones included.
    pub processed: usize,
    /// Zero-based raw row indices that matched nothing.
    pub unmatched: Vec<usize>,
    pub failed_units: Vec<FailedUnit>,
    pub snapshots_written: usize,
    pub persistence_errors: Vec<String>,
}

enum UnitOutcome {
    Matched(Box<ReconciledRow>),
    Unmatched,
}

struct UnitContext<'a> {
    sources: &'a [ReferenceSource],
    schema: &'a CanonicalSchema,
    scorer: &'a dyn Scorer,
    mapper: &'a dyn Mapper,
    options: &'a PipelineOptions,
}

/// Runs every raw row through the engine and returns the merged table in
/// raw-row order. Units that fail are logged and left out; persistence
/// failures are reported without discarding the in-memory table.
pub fn run(
    raw_rows: &[Record],
    sources: &[ReferenceSource],
    schema: &CanonicalSchema,
    scorer: &dyn Scorer,
    mapper: &dyn Mapper,
    options: &PipelineOptions,
) -> Result<PipelineReport> {
    let schema = schema.clone().with_fixed_fields(&options.rules);
    if let Some(output) = &options.output {
        io_utils::prepare_output_path(output, &[partial_path(output)])?;
    }
    let worker_count = options.worker_count.max(1);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(worker_count)
        .thread_name(|idx| format!("reconcile-worker-{idx}"))
        .build()
        .context("Building worker pool")?;
    info!(
        "Processing {} raw row(s) against {} reference source(s) with {} worker(s)",
        raw_rows.len(),
        sources.len(),
        worker_count
    );

    let ctx = UnitContext {
        sources,
        schema: &schema,
        scorer,
        mapper,
        options,
    };
    let mut coordinator = Coordinator::new(&schema, raw_rows.len(), options);
    let (tx, rx) = unbounded::<(usize, Result<UnitOutcome, UnitError>)>();

    thread::scope(|scope| {
        let ctx = &ctx;
        let pool = &pool;
        scope.spawn(move || {
            pool.scope(|units| {
                for (idx, raw) in raw_rows.iter().enumerate() {
                    let tx = tx.clone();
                    units.spawn(move |_| {
                        let outcome = panic::catch_unwind(AssertUnwindSafe(|| run_unit(raw, ctx)))
                            .unwrap_or_else(|payload| Err(UnitError::Panic(panic_message(payload))));
                        // The receiver only disappears if the coordinator itself died.
                        let _ = tx.send((idx, outcome));
                    });
                }
            });
            drop(tx);
        });

        let mut pending = BTreeMap::new();
        let mut next = 0usize;
        for (idx, outcome) in rx.iter() {
            pending.insert(idx, outcome);
            while let Some(outcome) = pending.remove(&next) {
                coordinator.consume(next, outcome);
                next += 1;
            }
        }
    });

    Ok(coordinator.finish())
}

fn run_unit(raw: &Record, ctx: &UnitContext<'_>) -> Result<UnitOutcome, UnitError> {
    let options = ctx.options;
    let state = search(raw, ctx.sources, ctx.scorer, &options.search)?;
    if !state.is_match() {
        return Ok(UnitOutcome::Unmatched);
    }
    let state = resolve(
        raw,
        ctx.sources,
        ctx.scorer,
        state,
        &options.search.identity_column,
        &options.resolution,
    )?;
    Ok(
        match reconcile(raw, &state, ctx.schema, ctx.mapper, &options.rules) {
            Some((row, _)) => UnitOutcome::Matched(Box::new(row)),
            None => UnitOutcome::Unmatched,
        },
    )
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Single writer of the accumulated table.
struct Coordinator<'a> {
    table: MergedTable,
    total: usize,
    processed: usize,
    completed: usize,
    options: &'a PipelineOptions,
    unmatched: Vec<usize>,
    failed_units: Vec<FailedUnit>,
    snapshots_written: usize,
    persistence_errors: Vec<String>,
}

impl<'a> Coordinator<'a> {
    fn new(schema: &CanonicalSchema, total: usize, options: &'a PipelineOptions) -> Self {
        Self {
            table: MergedTable::new(schema),
            total,
            processed: 0,
            completed: 0,
            options,
            unmatched: Vec::new(),
            failed_units: Vec::new(),
            snapshots_written: 0,
            persistence_errors: Vec::new(),
        }
    }

    fn consume(&mut self, row: usize, outcome: Result<UnitOutcome, UnitError>) {
        self.processed += 1;
        let succeeded = match outcome {
            Ok(UnitOutcome::Matched(reconciled)) => {
                debug!(
                    "Row {} matched '{}' at {:.3}",
                    row + 1,
                    reconciled.tracking.metadata_source,
                    reconciled.tracking.correlation
                );
                self.table.push(*reconciled);
                true
            }
            Ok(UnitOutcome::Unmatched) => {
                debug!("Row {} matched no reference record", row + 1);
                self.unmatched.push(row);
                true
            }
            Err(err) => {
                error!("Error processing row {}: {err}", row + 1);
                self.failed_units.push(FailedUnit { row, error: err });
                false
            }
        };
        info!("Processed {}/{} rows", self.processed, self.total);
        if succeeded {
            self.completed += 1;
            if self.completed % self.options.snapshot_interval == 0 {
                self.snapshot();
            }
        }
    }

    fn snapshot(&mut self) {
        let Some(output) = self.options.output.as_deref() else {
            return;
        };
        match self.table.write_snapshot(output, self.options.write_bom) {
            Ok(_) => self.snapshots_written += 1,
            Err(err) => self.persistence_failed(output, err),
        }
    }

    fn persistence_failed(&mut self, path: &Path, err: anyhow::Error) {
        warn!("Could not persist {:?}: {err:#}", path);
        self.persistence_errors.push(format!("{err:#}"));
    }

    fn finish(mut self) -> PipelineReport {
        if let Some(output) = self.options.output.as_deref()
            && let Err(err) = self.table.write_final(output, self.options.write_bom)
        {
            self.persistence_failed(output, err);
        }
        info!(
            "Merged {} row(s) from {} processed; {} unmatched, {} failed",
            self.table.len(),
            self.processed,
            self.unmatched.len(),
            self.failed_units.len()
        );
        PipelineReport {
            table: self.table,
            processed: self.processed,
            unmatched: self.unmatched,
            failed_units: self.failed_units,
            snapshots_written: self.snapshots_written,
            persistence_errors: self.persistence_errors,
        }
    }
}
