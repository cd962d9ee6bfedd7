//! Field reconciliation: fold a matched reference record into the canonical
//! schema.
//!
//! Identity, geolocation and signal levels follow fixed rules and come from
//! the raw row when it has them. Every other canonical column is filled from
//! the reference record through the mapper's column suggestion, coerced to
//! the column's declared type. Anything that cannot be placed stays null.

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, warn};

use crate::{
    config::FieldRules,
    data::{Value, coerce_numeric, coerce_numeric_value, coerce_to_type},
    oracle::{Mapper, MappingOutcome, MappingSuggestion},
    schema::CanonicalSchema,
    search::MatchState,
    source::Record,
};

pub const CORRELATION_COLUMN: &str = "correlation";
pub const SOURCE_COLUMN: &str = "metadata_source";
pub const EXPLANATION_COLUMN: &str = "match_explanation";
pub const MATCHING_POINTS_COLUMN: &str = "matching_points";

pub const TRACKING_COLUMNS: [&str; 4] = [
    CORRELATION_COLUMN,
    SOURCE_COLUMN,
    EXPLANATION_COLUMN,
    MATCHING_POINTS_COLUMN,
];

/// Validated source column → canonical column mapping.
///
/// Keys always exist on the record the mapping was built for and values
/// always exist in the canonical schema and are never tracking columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnMapping {
    pairs: BTreeMap<String, String>,
}

impl ColumnMapping {
    pub fn from_suggestion(
        suggestion: &MappingSuggestion,
        source_columns: &[String],
        schema: &CanonicalSchema,
    ) -> Self {
        let pairs = suggestion
            .mappings
            .iter()
            .filter(|&(source, target)| {
                if TRACKING_COLUMNS.contains(&target.as_str()) {
                    debug!("Discarding mapping '{source}' -> '{target}' (tracking column)");
                    return false;
                }
                let known = source_columns.contains(source) && schema.contains(target);
                if !known {
                    debug!("Discarding mapping '{source}' -> '{target}' (unknown column)");
                }
                known
            })
            .map(|(source, target)| (source.clone(), target.clone()))
            .collect();
        Self { pairs }
    }

    pub fn get(&self, source: &str) -> Option<&str> {
        self.pairs.get(source).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(s, t)| (s.as_str(), t.as_str()))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Tracking fields carried by every output row.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchTracking {
    pub correlation: f64,
    pub metadata_source: String,
    pub match_explanation: String,
    pub matching_points: String,
}

impl MatchTracking {
    pub fn from_state(state: &MatchState) -> Self {
        Self {
            correlation: state.best_score,
            metadata_source: state.best_source_file.clone().unwrap_or_default(),
            match_explanation: state.best_explanation.clone(),
            matching_points: state.best_matching_points.join("; "),
        }
    }

    pub fn value_of(&self, column: &str) -> Option<Value> {
        match column {
            CORRELATION_COLUMN => Some(Value::Float(self.correlation)),
            SOURCE_COLUMN => Some(Value::String(self.metadata_source.clone())),
            EXPLANATION_COLUMN => Some(Value::String(self.match_explanation.clone())),
            MATCHING_POINTS_COLUMN => Some(Value::String(self.matching_points.clone())),
            _ => None,
        }
    }
}

/// One canonical output row before it is laid out against the table columns.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciledRow {
    pub fields: BTreeMap<String, Value>,
    pub tracking: MatchTracking,
}

impl ReconciledRow {
    pub fn value_of(&self, column: &str) -> Option<Value> {
        self.tracking
            .value_of(column)
            .or_else(|| self.fields.get(column).cloned())
    }
}

/// Builds the canonical row for a matched raw record. Returns the mapping
/// that was applied alongside the row.
pub fn reconcile(
    raw: &Record,
    state: &MatchState,
    schema: &CanonicalSchema,
    mapper: &dyn Mapper,
    rules: &FieldRules,
) -> Option<(ReconciledRow, ColumnMapping)> {
    let matched = state.best_record.as_ref()?;
    let mut fields = apply_fixed_rules(raw, matched, rules);

    let mapping = request_mapping(matched, schema, mapper, rules);
    for (source, target) in mapping.iter() {
        if fields.contains_key(target) {
            continue;
        }
        let Some(value) = matched.get(source) else {
            continue;
        };
        let Some(column) = schema.column(target) else {
            continue;
        };
        match coerce_to_type(value, &column.datatype) {
            Some(coerced) => {
                fields.insert(target.to_string(), coerced);
            }
            None => debug!(
                "Skipping '{source}' -> '{target}': '{value}' is not a valid {}",
                column.datatype
            ),
        }
    }

    let row = ReconciledRow {
        fields,
        tracking: MatchTracking::from_state(state),
    };
    Some((row, mapping))
}

fn apply_fixed_rules(raw: &Record, matched: &Record, rules: &FieldRules) -> BTreeMap<String, Value> {
    let mut fields = BTreeMap::new();

    let identity = raw
        .get(&rules.raw_identity)
        .and_then(coerce_numeric_value)
        .or_else(|| {
            debug!(
                "Raw identity '{}' unusable, trying reference identity columns",
                rules.raw_identity
            );
            rules
                .identity_fallbacks
                .iter()
                .filter_map(|column| matched.get(column))
                .find_map(coerce_numeric_value)
        });
    if let Some(identity) = identity {
        fields.insert(rules.identity.clone(), identity);
    }

    if raw.has_column(&rules.raw_longitude) && raw.has_column(&rules.raw_latitude) {
        insert_numeric(&mut fields, &rules.longitude, raw.get(&rules.raw_longitude));
        insert_numeric(&mut fields, &rules.latitude, raw.get(&rules.raw_latitude));
    }
    insert_numeric(&mut fields, &rules.rx_level, raw.get(&rules.rx_level));
    insert_numeric(&mut fields, &rules.tx_level, raw.get(&rules.tx_level));
    fields
}

fn insert_numeric(fields: &mut BTreeMap<String, Value>, target: &str, value: Option<&Value>) {
    if let Some(number) = value.and_then(coerce_numeric) {
        fields.insert(target.to_string(), Value::Float(number));
    }
}

fn request_mapping(
    matched: &Record,
    schema: &CanonicalSchema,
    mapper: &dyn Mapper,
    rules: &FieldRules,
) -> ColumnMapping {
    let source_columns = matched.columns();
    let target_columns: Vec<String> = schema
        .column_names()
        .into_iter()
        .filter(|name| !TRACKING_COLUMNS.contains(&name.as_str()))
        .collect();
    match mapper.suggest(source_columns, &target_columns) {
        Ok(MappingOutcome::Suggested(suggestion)) => {
            let uncovered = uncovered_targets(&suggestion, &target_columns, rules);
            if !uncovered.is_empty() {
                warn!("Missing mappings for columns: {}", uncovered.join(", "));
            }
            ColumnMapping::from_suggestion(&suggestion, source_columns, schema)
        }
        Ok(MappingOutcome::Unavailable { reason }) => {
            warn!("No column mapping available ({reason}); mapped columns stay empty");
            ColumnMapping::default()
        }
        Err(err) => {
            warn!("Column mapping failed ({err}); mapped columns stay empty");
            ColumnMapping::default()
        }
    }
}

fn excluded_targets(rules: &FieldRules) -> BTreeSet<&str> {
    rules
        .fixed_targets()
        .into_iter()
        .chain(TRACKING_COLUMNS)
        .collect()
}

/// Target columns the suggestion leaves unmapped, ignoring fixed-rule and
/// tracking columns.
pub fn uncovered_targets(
    suggestion: &MappingSuggestion,
    target_columns: &[String],
    rules: &FieldRules,
) -> Vec<String> {
    let mapped: BTreeSet<&str> = suggestion.mappings.values().map(String::as_str).collect();
    let excluded = excluded_targets(rules);
    target_columns
        .iter()
        .filter(|target| !mapped.contains(target.as_str()) && !excluded.contains(target.as_str()))
        .cloned()
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappingReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl MappingReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Checks a raw mapper suggestion against both column sets.
pub fn verify_mapping(
    suggestion: &MappingSuggestion,
    source_columns: &[String],
    target_columns: &[String],
    rules: &FieldRules,
) -> MappingReport {
    let mut report = MappingReport::default();
    for (source, target) in &suggestion.mappings {
        if !source_columns.contains(source) {
            report
                .errors
                .push(format!("Source column '{source}' not found in source metadata"));
        }
        if TRACKING_COLUMNS.contains(&target.as_str()) {
            report
                .errors
                .push(format!("Target column '{target}' is reserved for match tracking"));
        } else if !target_columns.contains(target) {
            report
                .errors
                .push(format!("Target column '{target}' not found in canonical schema"));
        }
    }
    for target in uncovered_targets(suggestion, target_columns, rules) {
        report
            .warnings
            .push(format!("Target column '{target}' has no mapping"));
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::OracleError,
        schema::{ColumnMeta, ColumnType},
    };

    struct FixedMapper(BTreeMap<String, String>);

    impl FixedMapper {
        fn new(pairs: &[(&str, &str)]) -> Self {
            Self(
                pairs
                    .iter()
                    .map(|(s, t)| (s.to_string(), t.to_string()))
                    .collect(),
            )
        }
    }

    impl Mapper for FixedMapper {
        fn suggest(&self, _: &[String], _: &[String]) -> Result<MappingOutcome, OracleError> {
            Ok(MappingOutcome::Suggested(MappingSuggestion {
                mappings: self.0.clone(),
                explanations: BTreeMap::new(),
            }))
        }
    }

    struct FailingMapper;

    impl Mapper for FailingMapper {
        fn suggest(&self, _: &[String], _: &[String]) -> Result<MappingOutcome, OracleError> {
            Err(OracleError::Network("unreachable".to_string()))
        }
    }

    fn schema() -> CanonicalSchema {
        CanonicalSchema::new(vec![
            ColumnMeta::new("Link", ColumnType::Integer),
            ColumnMeta::new("Frequency_GHz", ColumnType::Float),
            ColumnMeta::new("Polarization", ColumnType::String),
            ColumnMeta::new("Length_km", ColumnType::Float),
        ])
        .with_fixed_fields(&FieldRules::default())
    }

    fn raw() -> Record {
        Record::from_pairs([
            ("LINKNUMBER", Some(Value::String("12".into()))),
            ("ITMX", Some(Value::Float(34.1))),
            ("ITMY", Some(Value::Float(31.9))),
            ("RxLevel", Some(Value::Float(-45.2))),
            ("TxLevel", Some(Value::Float(3.0))),
        ])
    }

    fn matched_state() -> MatchState {
        let record = Record::from_pairs([
            ("Link", Some(Value::Integer(99))),
            ("תדר", Some(Value::String("18".into()))),
            ("קיטוב", Some(Value::String("V".into()))),
            ("מרחק", Some(Value::String("unknown".into()))),
            ("Link number", Some(Value::Integer(12))),
        ]);
        MatchState {
            best_score: 0.95,
            best_identity: Some(Value::Integer(99)),
            best_record: Some(record),
            best_source_file: Some("links_2023.csv".to_string()),
            best_explanation: "same band and polarization".to_string(),
            best_matching_points: vec!["18 GHz".to_string(), "V".to_string()],
        }
    }

    #[test]
    fn empty_mapping_keeps_fixed_fields_and_tracking() {
        let (row, mapping) = reconcile(
            &raw(),
            &matched_state(),
            &schema(),
            &FixedMapper::new(&[]),
            &FieldRules::default(),
        )
        .unwrap();
        assert!(mapping.is_empty());
        assert_eq!(row.fields.get("Link"), Some(&Value::Integer(12)));
        assert_eq!(row.fields.get("NearLongitude_DecDeg"), Some(&Value::Float(34.1)));
        assert_eq!(row.fields.get("NearLatitude_DecDeg"), Some(&Value::Float(31.9)));
        assert_eq!(row.fields.get("RxLevel"), Some(&Value::Float(-45.2)));
        assert_eq!(row.fields.get("TxLevel"), Some(&Value::Float(3.0)));
        assert_eq!(row.fields.len(), 5);
        assert_eq!(row.value_of("correlation"), Some(Value::Float(0.95)));
        assert_eq!(
            row.value_of("metadata_source"),
            Some(Value::String("links_2023.csv".into()))
        );
        assert_eq!(
            row.value_of("matching_points"),
            Some(Value::String("18 GHz; V".into()))
        );
        assert_eq!(row.value_of("Polarization"), None);
    }

    #[test]
    fn mapped_columns_are_coerced_and_bad_values_skipped() {
        let mapper = FixedMapper::new(&[
            ("תדר", "Frequency_GHz"),
            ("קיטוב", "Polarization"),
            ("מרחק", "Length_km"),
            ("Link number", "Link"),
            ("ghost", "Frequency_GHz"),
        ]);
        let (row, mapping) = reconcile(
            &raw(),
            &matched_state(),
            &schema(),
            &mapper,
            &FieldRules::default(),
        )
        .unwrap();
        assert_eq!(mapping.len(), 4);
        assert_eq!(mapping.get("ghost"), None);
        assert_eq!(row.fields.get("Frequency_GHz"), Some(&Value::Float(18.0)));
        assert_eq!(row.fields.get("Polarization"), Some(&Value::String("V".into())));
        assert_eq!(row.fields.get("Length_km"), None);
        assert_eq!(row.fields.get("Link"), Some(&Value::Integer(12)));
    }

    #[test]
    fn tracking_columns_are_never_mapping_targets() {
        let schema = CanonicalSchema::new(vec![
            ColumnMeta::new("Polarization", ColumnType::String),
            ColumnMeta::new("correlation", ColumnType::Float),
            ColumnMeta::new("metadata_source", ColumnType::String),
        ])
        .with_fixed_fields(&FieldRules::default());
        let mapper = FixedMapper::new(&[
            ("קיטוב", "Polarization"),
            ("תדר", "correlation"),
            ("Link number", "metadata_source"),
        ]);
        let (row, mapping) = reconcile(
            &raw(),
            &matched_state(),
            &schema,
            &mapper,
            &FieldRules::default(),
        )
        .unwrap();
        assert_eq!(mapping.len(), 1);
        assert_eq!(mapping.get("קיטוב"), Some("Polarization"));
        assert!(!row.fields.contains_key("correlation"));
        assert_eq!(row.value_of("correlation"), Some(Value::Float(0.95)));
        assert_eq!(
            row.value_of("metadata_source"),
            Some(Value::String("links_2023.csv".into()))
        );

        let suggestion = MappingSuggestion {
            mappings: [("תדר".to_string(), "correlation".to_string())]
                .into_iter()
                .collect(),
            explanations: BTreeMap::new(),
        };
        let report = verify_mapping(
            &suggestion,
            &["תדר".to_string()],
            &schema.column_names(),
            &FieldRules::default(),
        );
        assert_eq!(
            report.errors,
            vec!["Target column 'correlation' is reserved for match tracking".to_string()]
        );
    }

    #[test]
    fn identity_falls_back_to_reference_columns() {
        let raw = Record::from_pairs([("LINKNUMBER", Some(Value::String("n/a".into())))]);
        let (row, _) = reconcile(
            &raw,
            &matched_state(),
            &schema(),
            &FailingMapper,
            &FieldRules::default(),
        )
        .unwrap();
        assert_eq!(row.fields.get("Link"), Some(&Value::Integer(99)));
        assert_eq!(row.fields.get("NearLongitude_DecDeg"), None);
    }

    #[test]
    fn geolocation_requires_both_raw_fields() {
        let raw = Record::from_pairs([("ITMX", Some(Value::Float(34.1)))]);
        let (row, _) = reconcile(
            &raw,
            &matched_state(),
            &schema(),
            &FixedMapper::new(&[]),
            &FieldRules::default(),
        )
        .unwrap();
        assert_eq!(row.fields.get("NearLongitude_DecDeg"), None);
    }

    #[test]
    fn reconcile_is_deterministic() {
        let mapper = FixedMapper::new(&[("תדר", "Frequency_GHz"), ("קיטוב", "Polarization")]);
        let run = || {
            reconcile(
                &raw(),
                &matched_state(),
                &schema(),
                &mapper,
                &FieldRules::default(),
            )
            .unwrap()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn unmatched_state_yields_no_row() {
        let outcome = reconcile(
            &raw(),
            &MatchState::default(),
            &schema(),
            &FixedMapper::new(&[]),
            &FieldRules::default(),
        );
        assert!(outcome.is_none());
    }

    #[test]
    fn verify_mapping_reports_unknown_sources_and_uncovered_targets() {
        let suggestion = MappingSuggestion {
            mappings: [("Freq".to_string(), "Frequency_GHz".to_string())]
                .into_iter()
                .collect(),
            explanations: BTreeMap::new(),
        };
        let targets = schema().column_names();
        let report = verify_mapping(
            &suggestion,
            &["Band".to_string()],
            &targets,
            &FieldRules::default(),
        );
        assert!(!report.is_valid());
        assert_eq!(report.errors.len(), 1);
        assert_eq!(
            report.warnings,
            vec![
                "Target column 'Polarization' has no mapping".to_string(),
                "Target column 'Length_km' has no mapping".to_string(),
            ]
        );
    }
}
