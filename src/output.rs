//! The merged output table and its CSV persistence.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, info};

use crate::{
    data::Value,
    io_utils,
    reconcile::{ReconciledRow, TRACKING_COLUMNS},
    schema::CanonicalSchema,
};

pub const PARTIAL_SUFFIX: &str = ".partial";

/// Accumulated output rows laid out against the effective canonical schema
/// followed by the tracking columns.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedTable {
    headers: Vec<String>,
    rows: Vec<ReconciledRow>,
}

impl MergedTable {
    /// Schema columns that share a tracking column's name are dropped so each
    /// header appears once.
    pub fn new(schema: &CanonicalSchema) -> Self {
        let mut headers: Vec<String> = schema
            .column_names()
            .into_iter()
            .filter(|name| !TRACKING_COLUMNS.contains(&name.as_str()))
            .collect();
        headers.extend(TRACKING_COLUMNS.iter().map(|c| c.to_string()));
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[ReconciledRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn push(&mut self, row: ReconciledRow) {
        self.rows.push(row);
    }

    /// Row values in header order; absent columns are `None`.
    pub fn row_values<'a>(&'a self, row: &'a ReconciledRow) -> impl Iterator<Item = Option<Value>> + 'a {
        self.headers.iter().map(move |column| row.value_of(column))
    }

    /// Writes the table as CSV. Nulls are written as empty cells.
    pub fn write_csv(&self, path: &Path, write_bom: bool) -> Result<()> {
        let mut writer = io_utils::open_csv_writer(path, write_bom)?;
        writer
            .write_record(self.headers.iter())
            .with_context(|| format!("Writing headers to {path:?}"))?;
        for (idx, row) in self.rows.iter().enumerate() {
            let cells: Vec<String> = self
                .row_values(row)
                .map(|value| value.map(|v| v.as_display()).unwrap_or_default())
                .collect();
            writer
                .write_record(&cells)
                .with_context(|| format!("Writing row {} to {path:?}", idx + 1))?;
        }
        writer
            .flush()
            .with_context(|| format!("Flushing output {path:?}"))?;
        Ok(())
    }

    /// Rewrites the crash-recovery snapshot next to `output`.
    pub fn write_snapshot(&self, output: &Path, write_bom: bool) -> Result<PathBuf> {
        let path = partial_path(output);
        self.write_csv(&path, write_bom)
            .with_context(|| format!("Writing partial snapshot {path:?}"))?;
        debug!("Snapshot of {} row(s) written to {:?}", self.len(), path);
        Ok(path)
    }

    pub fn write_final(&self, output: &Path, write_bom: bool) -> Result<()> {
        self.write_csv(output, write_bom)?;
        info!("Wrote {} row(s) to {:?}", self.len(), output);
        Ok(())
    }
}

/// `<output>.partial`, kept in the output's directory.
pub fn partial_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_os_string();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, fs};

    use super::*;
    use crate::{
        reconcile::MatchTracking,
        schema::{ColumnMeta, ColumnType},
    };

    fn table() -> MergedTable {
        let schema = CanonicalSchema::new(vec![
            ColumnMeta::new("Link", ColumnType::Integer),
            ColumnMeta::new("Polarization", ColumnType::String),
        ]);
        let mut table = MergedTable::new(&schema);
        let mut fields = BTreeMap::new();
        fields.insert("Link".to_string(), Value::Integer(12));
        table.push(ReconciledRow {
            fields,
            tracking: MatchTracking {
                correlation: 0.95,
                metadata_source: "links.csv".to_string(),
                match_explanation: "band, site".to_string(),
                matching_points: String::new(),
            },
        });
        table
    }

    #[test]
    fn partial_path_appends_suffix() {
        assert_eq!(
            partial_path(Path::new("out/merged.csv")),
            PathBuf::from("out/merged.csv.partial")
        );
    }

    #[test]
    fn writes_nulls_as_empty_cells_after_bom() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("merged.csv");
        table().write_final(&path, true).unwrap();

        let bytes = fs::read(&path).unwrap();
        assert!(bytes.starts_with(io_utils::UTF8_BOM));
        let text = String::from_utf8(bytes[3..].to_vec()).unwrap();
        assert_eq!(
            text,
            "Link,Polarization,correlation,metadata_source,match_explanation,matching_points\n\
             12,,0.95,links.csv,\"band, site\",\n"
        );
    }

    #[test]
    fn snapshot_lands_next_to_output() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("merged.csv");
        let written = table().write_snapshot(&output, false).unwrap();
        assert_eq!(written, dir.path().join("merged.csv.partial"));
        assert!(!output.exists());
        let text = fs::read_to_string(written).unwrap();
        assert!(text.starts_with("Link,Polarization,"));
    }
}
