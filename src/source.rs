//! Record source adapter: loads delimited text, JSON and spreadsheet files
//! into uniform record sets.
//!
//! Text files are decoded once (see [`io_utils::decode_text`]); spreadsheets
//! contribute their first worksheet. Either way the content is split into
//! raw string cells, typed per column by sampling, and exposed as immutable
//! [`Record`]s that share their column list.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use calamine::{Data, DataType, Reader, open_workbook_auto};
use encoding_rs::Encoding;
use log::{debug, info};

use crate::{
    data::{Value, parse_typed_value},
    error::SourceError,
    io_utils,
    schema::{ColumnType, DEFAULT_SAMPLE_ROWS, infer_column_types},
};

/// One row from a raw or reference file.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    columns: Arc<[String]>,
    values: Vec<Option<Value>>,
}

impl Record {
    pub fn new(columns: Arc<[String]>, mut values: Vec<Option<Value>>) -> Self {
        values.resize(columns.len(), None);
        Self { columns, values }
    }

    /// Builds a standalone record from `(column, value)` pairs.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, Option<Value>)>,
        S: Into<String>,
    {
        let (columns, values): (Vec<String>, Vec<Option<Value>>) = pairs
            .into_iter()
            .map(|(name, value)| (name.into(), value))
            .unzip();
        Self::new(columns.into(), values)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Non-null value of `name`; `None` when the column is absent or null.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.position(name)
            .and_then(|idx| self.values.get(idx))
            .and_then(|value| value.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&Value>)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().map(Option::as_ref))
    }

    pub fn to_json(&self) -> serde_json::Value {
        let object = self
            .iter()
            .map(|(name, value)| {
                (
                    name.to_string(),
                    value.map(Value::to_json).unwrap_or(serde_json::Value::Null),
                )
            })
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(object)
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

/// The columns, inferred column types and rows of one file.
#[derive(Debug, Clone)]
pub struct RecordSet {
    columns: Arc<[String]>,
    column_types: Vec<ColumnType>,
    rows: Vec<Record>,
}

impl RecordSet {
    pub fn from_raw(headers: Vec<String>, raw_rows: Vec<Vec<String>>) -> Self {
        let columns: Arc<[String]> = dedupe_headers(headers).into();
        let column_types = infer_column_types(columns.len(), &raw_rows, DEFAULT_SAMPLE_ROWS);
        let rows = raw_rows
            .into_iter()
            .map(|raw| {
                let values = column_types
                    .iter()
                    .enumerate()
                    .map(|(idx, ty)| {
                        let cell = raw.get(idx).map(String::as_str).unwrap_or("");
                        parse_typed_value(cell, ty)
                            .unwrap_or_else(|_| Some(Value::String(cell.trim().to_string())))
                    })
                    .collect();
                Record::new(Arc::clone(&columns), values)
            })
            .collect();
        Self {
            columns,
            column_types,
            rows,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn column_types(&self) -> &[ColumnType] {
        &self.column_types
    }

    pub fn rows(&self) -> &[Record] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A reference metadata file, read-only for the whole run.
#[derive(Debug, Clone)]
pub struct ReferenceSource {
    pub file_name: String,
    pub records: RecordSet,
}

impl ReferenceSource {
    pub fn new(file_name: impl Into<String>, records: RecordSet) -> Self {
        Self {
            file_name: file_name.into(),
            records,
        }
    }
}

/// Loads one file, detecting its format from the extension.
pub fn load_file(path: &Path, fallback: &'static Encoding) -> Result<RecordSet, SourceError> {
    let metadata = fs::metadata(path).map_err(|err| SourceError::from_io(path, err))?;
    if !metadata.is_file() {
        return Err(SourceError::corrupt(path, "not a regular file"));
    }
    let extension = io_utils::extension_of(path).unwrap_or_default();
    let records = match extension.as_str() {
        "csv" | "tsv" => load_delimited(path, fallback)?,
        "json" | "txt" => load_json(path, fallback)?,
        "xlsx" | "xlsm" | "xls" | "ods" => load_spreadsheet(path)?,
        _ => {
            return Err(SourceError::UnsupportedFormat {
                path: path.to_path_buf(),
                extension,
            });
        }
    };
    debug!(
        "Loaded {} row(s) x {} column(s) from {:?}",
        records.len(),
        records.columns().len(),
        path
    );
    Ok(records)
}

/// Loads every regular file in `dir` as a reference source, ordered by file
/// name. Dot-files are ignored.
pub fn load_reference_folder(
    dir: &Path,
    fallback: &'static Encoding,
) -> Result<Vec<ReferenceSource>, SourceError> {
    let entries = fs::read_dir(dir).map_err(|err| SourceError::from_io(dir, err))?;
    let mut paths: Vec<(String, PathBuf)> = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| SourceError::from_io(dir, err))?;
        let path = entry.path();
        let file_name = entry.file_name().to_string_lossy().into_owned();
        if file_name.starts_with('.') || !path.is_file() {
            debug!("Skipping {:?} in reference folder", path);
            continue;
        }
        paths.push((file_name, path));
    }
    paths.sort_by(|a, b| a.0.cmp(&b.0));

    let mut sources = Vec::with_capacity(paths.len());
    for (file_name, path) in paths {
        let records = load_file(&path, fallback)?;
        info!("Reference source '{}': {} record(s)", file_name, records.len());
        sources.push(ReferenceSource::new(file_name, records));
    }
    Ok(sources)
}

fn decode_file(path: &Path, fallback: &'static Encoding) -> Result<String, SourceError> {
    let bytes = io_utils::read_bytes(path)?;
    let (text, encoding) =
        io_utils::decode_text(&bytes, fallback).map_err(|reason| SourceError::corrupt(path, reason))?;
    debug!("Decoded {:?} as {}", path, encoding.name());
    if text.trim().is_empty() {
        return Err(SourceError::Empty(path.to_path_buf()));
    }
    Ok(text)
}

fn load_delimited(path: &Path, fallback: &'static Encoding) -> Result<RecordSet, SourceError> {
    let text = decode_file(path, fallback)?;
    for delimiter in io_utils::delimiter_candidates(path) {
        match split_delimited(&text, delimiter) {
            Ok((headers, rows)) if headers.len() > 1 => {
                return Ok(RecordSet::from_raw(headers, rows));
            }
            Ok(_) => continue,
            Err(err) => {
                debug!(
                    "Delimiter {:?} failed for {:?}: {err}",
                    delimiter as char, path
                );
            }
        }
    }
    Err(SourceError::UndeterminedDelimiter(path.to_path_buf()))
}

fn split_delimited(text: &str, delimiter: u8) -> csv::Result<(Vec<String>, Vec<Vec<String>>)> {
    let mut reader = io_utils::open_csv_reader(text.as_bytes(), delimiter, true);
    let headers = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_string())
        .collect::<Vec<_>>();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.iter().all(|field| field.trim().is_empty()) {
            continue;
        }
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok((headers, rows))
}

fn load_json(path: &Path, fallback: &'static Encoding) -> Result<RecordSet, SourceError> {
    let text = decode_file(path, fallback)?;
    let document: serde_json::Value =
        serde_json::from_str(&text).map_err(|err| SourceError::corrupt(path, err))?;
    let objects = match document {
        serde_json::Value::Array(items) => items,
        object @ serde_json::Value::Object(_) => vec![object],
        _ => return Err(SourceError::corrupt(path, "unsupported JSON structure")),
    };
    if objects.is_empty() {
        return Err(SourceError::Empty(path.to_path_buf()));
    }

    let mut headers: Vec<String> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut cells: Vec<Vec<(usize, String)>> = Vec::with_capacity(objects.len());
    for (idx, item) in objects.iter().enumerate() {
        let object = item.as_object().ok_or_else(|| {
            SourceError::corrupt(path, format!("element {idx} is not a JSON object"))
        })?;
        let row = object
            .iter()
            .map(|(key, value)| {
                let position = *positions.entry(key.clone()).or_insert_with(|| {
                    headers.push(key.clone());
                    headers.len() - 1
                });
                (position, json_cell_text(value))
            })
            .collect();
        cells.push(row);
    }

    let width = headers.len();
    let rows = cells
        .into_iter()
        .map(|row| {
            let mut raw = vec![String::new(); width];
            for (position, text) in row {
                raw[position] = text;
            }
            raw
        })
        .collect();
    Ok(RecordSet::from_raw(headers, rows))
}

/// Reads the first worksheet; its first row is the header.
fn load_spreadsheet(path: &Path) -> Result<RecordSet, SourceError> {
    let mut workbook = open_workbook_auto(path).map_err(|err| SourceError::corrupt(path, err))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| SourceError::Empty(path.to_path_buf()))?
        .map_err(|err| SourceError::corrupt(path, err))?;

    let mut rows = range
        .rows()
        .map(|row| row.iter().map(spreadsheet_cell_text).collect::<Vec<String>>());
    let headers: Vec<String> = rows
        .next()
        .ok_or_else(|| SourceError::Empty(path.to_path_buf()))?
        .into_iter()
        .map(|h| h.trim().to_string())
        .collect();
    if headers.iter().all(String::is_empty) {
        return Err(SourceError::Empty(path.to_path_buf()));
    }
    let rows = rows
        .filter(|row| !row.iter().all(|cell| cell.trim().is_empty()))
        .collect();
    Ok(RecordSet::from_raw(headers, rows))
}

fn spreadsheet_cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty | Data::Error(_) => String::new(),
        Data::DateTime(_) => match cell.as_datetime() {
            Some(dt) if dt.time() == chrono::NaiveTime::MIN => dt.format("%Y-%m-%d").to_string(),
            Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
            None => cell.to_string(),
        },
        other => other.to_string(),
    }
}

fn json_cell_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Repeated header names get a `.N` suffix so every column stays addressable.
fn dedupe_headers(headers: Vec<String>) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    headers
        .into_iter()
        .map(|header| {
            let count = seen.entry(header.clone()).or_insert(0);
            let name = if *count == 0 {
                header
            } else {
                format!("{header}.{count}")
            };
            *count += 1;
            name
        })
        .collect()
}
