#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use cml_reconcile::data::Value;
use cml_reconcile::error::OracleError;
use cml_reconcile::oracle::{
    CorrelationResult, Mapper, MappingOutcome, MappingSuggestion, ScoreOutcome, Scorer,
};
use cml_reconcile::source::Record;
use rust_xlsxwriter::Workbook;
use tempfile::{TempDir, tempdir};

/// Returns the absolute path to a fixture under `tests/data`.
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(name)
}

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    /// Missing parent directories are created.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        self.write_bytes(name, contents.as_bytes())
    }

    pub fn write_bytes(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dir");
        }
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents).expect("write temp file contents");
        path
    }

    /// Writes a one-sheet workbook. Cells that parse as numbers are stored
    /// as numbers, everything else as text.
    pub fn write_xlsx(&self, name: &str, rows: &[&[&str]]) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        for (r, row) in rows.iter().enumerate() {
            for (c, cell) in row.iter().enumerate() {
                let (r, c) = (r as u32, c as u16);
                match cell.parse::<f64>() {
                    Ok(number) => sheet.write_number(r, c, number).expect("write number"),
                    Err(_) if cell.is_empty() => continue,
                    Err(_) => sheet.write_string(r, c, *cell).expect("write string"),
                };
            }
        }
        workbook.save(&path).expect("save workbook");
        path
    }

    pub fn mkdir(&self, name: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        fs::create_dir_all(&path).expect("create dir");
        path
    }
}

/// Deterministic scorer: a candidate scores the value of its `score_for`
/// column when its `site` equals the raw row's `SITE`, otherwise 0.
pub struct SiteScorer;

impl Scorer for SiteScorer {
    fn score(&self, raw: &Record, batch: &[Record]) -> Result<ScoreOutcome, OracleError> {
        let site = raw.get("SITE").map(Value::as_display).unwrap_or_default();
        let results = batch
            .iter()
            .enumerate()
            .map(|(idx, candidate)| {
                let same_site = candidate
                    .get("site")
                    .is_some_and(|value| value.as_display() == site);
                let correlation = if same_site {
                    candidate
                        .get("score_for")
                        .and_then(cml_reconcile::data::coerce_numeric)
                        .unwrap_or(0.0)
                } else {
                    0.0
                };
                CorrelationResult {
                    correlation,
                    explanation: format!("site {site}"),
                    metadata_index: idx,
                    matching_points: if same_site {
                        vec!["site".to_string(), "band".to_string()]
                    } else {
                        Vec::new()
                    },
                }
            })
            .collect();
        Ok(ScoreOutcome::Scored(results))
    }
}

/// Mapper returning the same suggestion for every request.
pub struct FixedMapper {
    mappings: BTreeMap<String, String>,
}

impl FixedMapper {
    pub fn new(pairs: &[(&str, &str)]) -> Self {
        Self {
            mappings: pairs
                .iter()
                .map(|(source, target)| (source.to_string(), target.to_string()))
                .collect(),
        }
    }
}

impl Mapper for FixedMapper {
    fn suggest(&self, _: &[String], _: &[String]) -> Result<MappingOutcome, OracleError> {
        Ok(MappingOutcome::Suggested(MappingSuggestion {
            mappings: self.mappings.clone(),
            explanations: BTreeMap::new(),
        }))
    }
}
