//! Canonical schema model, type inference and YAML persistence.
//!
//! The [`CanonicalSchema`] is the target column set every reconciled output
//! row conforms to. It is either loaded from a YAML schema file or inferred
//! from an example metadata file by sampling its rows.

use std::{fmt, fs::File, io::BufReader, path::Path, str::FromStr};

use anyhow::{Context, Result, anyhow};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    config::FieldRules,
    data::{parse_naive_date, parse_naive_datetime},
    source::RecordSet,
};

pub const CURRENT_SCHEMA_VERSION: &str = "1";
pub const DEFAULT_SAMPLE_ROWS: usize = 2000;

/// Accepts dtype-style aliases (`float64`, `object`, ...) when read from
/// schema files; always written in its lowercase canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum ColumnType {
    String,
    Integer,
    Float,
    Boolean,
    Date,
    DateTime,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::String => "string",
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Boolean => "boolean",
            ColumnType::Date => "date",
            ColumnType::DateTime => "datetime",
        }
    }

    pub fn variants() -> &'static [&'static str] {
        &["string", "integer", "float", "boolean", "date", "datetime"]
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<String> for ColumnType {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl FromStr for ColumnType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "string" | "object" => Ok(ColumnType::String),
            "integer" | "int" | "int64" => Ok(ColumnType::Integer),
            "float" | "double" | "float64" => Ok(ColumnType::Float),
            "boolean" | "bool" => Ok(ColumnType::Boolean),
            "date" => Ok(ColumnType::Date),
            "datetime" | "date-time" | "timestamp" => Ok(ColumnType::DateTime),
            _ => Err(anyhow!(
                "Unknown column type '{value}'. Supported types: {}",
                ColumnType::variants().join(", ")
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    pub datatype: ColumnType,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, datatype: ColumnType) -> Self {
        Self {
            name: name.into(),
            datatype,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalSchema {
    pub columns: Vec<ColumnMeta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<String>,
}

impl CanonicalSchema {
    pub fn new(columns: Vec<ColumnMeta>) -> Self {
        Self {
            columns,
            schema_version: None,
        }
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnMeta> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Derives the schema from an example metadata file that was already
    /// loaded as a record set.
    pub fn from_record_set(records: &RecordSet) -> Self {
        let columns = records
            .columns()
            .iter()
            .zip(records.column_types())
            .map(|(name, ty)| ColumnMeta::new(name.clone(), ty.clone()))
            .collect();
        Self::new(columns)
    }

    /// Adds the fixed-rule columns (identity, geolocation, signal levels)
    /// the schema does not already declare. Identity is an integer column,
    /// the others are floats.
    pub fn with_fixed_fields(mut self, rules: &FieldRules) -> Self {
        let required = [
            (&rules.identity, ColumnType::Integer),
            (&rules.longitude, ColumnType::Float),
            (&rules.latitude, ColumnType::Float),
            (&rules.rx_level, ColumnType::Float),
            (&rules.tx_level, ColumnType::Float),
        ];
        for (name, datatype) in required {
            if !self.contains(name) {
                debug!("Canonical schema lacks fixed column '{name}', adding it as {datatype}");
                self.columns.push(ColumnMeta::new(name.clone(), datatype));
            }
        }
        self
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening schema file {path:?}"))?;
        let reader = BufReader::new(file);
        let schema: CanonicalSchema =
            serde_yaml::from_reader(reader).context("Parsing schema YAML")?;
        if schema.columns.is_empty() {
            return Err(anyhow!("Schema file {path:?} declares no columns"));
        }
        Ok(schema)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut schema = self.clone();
        if schema.schema_version.is_none() {
            schema.schema_version = Some(CURRENT_SCHEMA_VERSION.to_string());
        }
        let file = File::create(path).with_context(|| format!("Creating schema file {path:?}"))?;
        serde_yaml::to_writer(file, &schema).context("Writing schema YAML")
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Serializing schema to YAML string")
    }
}

pub fn is_yaml_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
}

#[derive(Debug, Clone)]
struct TypeCandidate {
    possible_integer: bool,
    possible_float: bool,
    possible_boolean: bool,
    possible_date: bool,
    possible_datetime: bool,
    seen_values: bool,
}

impl TypeCandidate {
    fn new() -> Self {
        Self {
            possible_integer: true,
            possible_float: true,
            possible_boolean: true,
            possible_date: true,
            possible_datetime: true,
            seen_values: false,
        }
    }

    fn observe(&mut self, value: &str) {
        self.seen_values = true;
        if self.possible_boolean
            && !matches!(
                value.to_ascii_lowercase().as_str(),
                "true" | "false" | "t" | "f" | "yes" | "no" | "y" | "n"
            )
        {
            self.possible_boolean = false;
        }
        if self.possible_integer && value.parse::<i64>().is_err() {
            self.possible_integer = false;
        }
        if self.possible_float && value.parse::<f64>().is_err() {
            self.possible_float = false;
        }
        if self.possible_date && parse_naive_date(value).is_err() {
            self.possible_date = false;
        }
        if self.possible_datetime && parse_naive_datetime(value).is_err() {
            self.possible_datetime = false;
        }
    }

    fn decide(&self) -> ColumnType {
        if !self.seen_values {
            // All-empty columns are numeric missing data.
            ColumnType::Float
        } else if self.possible_boolean {
            ColumnType::Boolean
        } else if self.possible_integer {
            ColumnType::Integer
        } else if self.possible_float {
            ColumnType::Float
        } else if self.possible_date {
            ColumnType::Date
        } else if self.possible_datetime {
            ColumnType::DateTime
        } else {
            ColumnType::String
        }
    }
}

/// Infers one type per column from the first `sample_rows` rows
/// (0 means every row). Empty cells are ignored.
pub fn infer_column_types(column_count: usize, rows: &[Vec<String>], sample_rows: usize) -> Vec<ColumnType> {
    let mut candidates = vec![TypeCandidate::new(); column_count];
    let limit = if sample_rows == 0 { rows.len() } else { sample_rows.min(rows.len()) };
    for row in &rows[..limit] {
        for (idx, field) in row.iter().enumerate().take(column_count) {
            let trimmed = field.trim();
            if trimmed.is_empty() {
                continue;
            }
            candidates[idx].observe(trimmed);
        }
    }
    candidates.iter().map(TypeCandidate::decide).collect()
}
