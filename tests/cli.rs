mod common;

use std::fs;

use assert_cmd::Command;
use cml_reconcile::schema::{CanonicalSchema, ColumnType};
use common::{TestWorkspace, fixture_path};
use predicates::str::contains;

// Nothing listens on the discard port, so every oracle call fails fast.
const DEAD_API: &str = "http://127.0.0.1:9/v1";

fn cml() -> Command {
    let mut cmd = Command::cargo_bin("cml-reconcile").expect("binary exists");
    cmd.env_remove("OPENAI_API_KEY")
        .env_remove("OPENAI_BASE_URL")
        .env_remove("OPENAI_MODEL_NAME")
        .env("RUST_LOG", "warn");
    cmd
}

fn correlate_workspace() -> TestWorkspace {
    let ws = TestWorkspace::new();
    ws.write("raw.csv", "LINKNUMBER,ITMX,ITMY,RxLevel,TxLevel\n101,34.9,32.8,-45,3\n");
    ws.write("metadata/links.csv", "Link,Band\n101,18\n102,23\n");
    ws
}

#[test]
fn probe_writes_yaml_schema_from_example_metadata() {
    let ws = TestWorkspace::new();
    let schema_path = ws.path().join("canonical.yaml");
    cml()
        .args([
            "probe",
            "-i",
            fixture_path("cml_metadata_example.csv").to_str().unwrap(),
            "-m",
            schema_path.to_str().unwrap(),
        ])
        .assert()
        .success();

    let schema = CanonicalSchema::load(&schema_path).expect("load schema");
    let types: Vec<(&str, &ColumnType)> = schema
        .columns
        .iter()
        .map(|c| (c.name.as_str(), &c.datatype))
        .collect();
    assert_eq!(
        types,
        vec![
            ("Link", &ColumnType::Integer),
            ("Frequency_GHz", &ColumnType::Float),
            ("Polarization", &ColumnType::String),
            ("Length_km", &ColumnType::Float),
            ("Installed", &ColumnType::Date),
            ("מפעיל", &ColumnType::String),
        ]
    );
    assert_eq!(schema.schema_version.as_deref(), Some("1"));
}

#[test]
fn probe_reads_spreadsheet_metadata() {
    let ws = TestWorkspace::new();
    let input = ws.write_xlsx(
        "links.xlsx",
        &[&["Link", "Band", "Site"], &["101", "18.5", "Haifa"], &["102", "23", "Eilat"]],
    );
    let schema_path = ws.path().join("out.yaml");
    cml()
        .args([
            "probe",
            "-i",
            input.to_str().unwrap(),
            "-m",
            schema_path.to_str().unwrap(),
        ])
        .assert()
        .success();

    let schema = CanonicalSchema::load(&schema_path).expect("load schema");
    let types: Vec<(&str, &ColumnType)> = schema
        .columns
        .iter()
        .map(|c| (c.name.as_str(), &c.datatype))
        .collect();
    assert_eq!(
        types,
        vec![
            ("Link", &ColumnType::Integer),
            ("Band", &ColumnType::Float),
            ("Site", &ColumnType::String),
        ]
    );
}

#[test]
fn correlate_requires_an_api_key() {
    let ws = correlate_workspace();
    cml()
        .args([
            "correlate",
            "-r",
            ws.path().join("raw.csv").to_str().unwrap(),
            "-d",
            ws.path().join("metadata").to_str().unwrap(),
            "-s",
            fixture_path("cml_metadata_example.csv").to_str().unwrap(),
            "-o",
            ws.path().join("merged.csv").to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stderr(contains("No API key configured"));
}

#[test]
fn correlate_rejects_target_below_threshold() {
    let ws = correlate_workspace();
    cml()
        .args([
            "correlate",
            "-r",
            ws.path().join("raw.csv").to_str().unwrap(),
            "-d",
            ws.path().join("metadata").to_str().unwrap(),
            "-s",
            fixture_path("cml_metadata_example.csv").to_str().unwrap(),
            "-o",
            ws.path().join("merged.csv").to_str().unwrap(),
            "--threshold",
            "0.9",
            "--target",
            "0.5",
            "--api-key",
            "test-key",
        ])
        .assert()
        .failure()
        .stderr(contains("must not be below the correlation threshold"));
}

#[test]
fn correlate_with_unreachable_oracle_writes_header_only_output() {
    let ws = correlate_workspace();
    let output = ws.path().join("out").join("merged.csv");
    fs::create_dir_all(output.parent().unwrap()).unwrap();
    fs::write(&output, "previous run").unwrap();

    cml()
        .args([
            "correlate",
            "-r",
            ws.path().join("raw.csv").to_str().unwrap(),
            "-d",
            ws.path().join("metadata").to_str().unwrap(),
            "-s",
            fixture_path("cml_metadata_example.csv").to_str().unwrap(),
            "-o",
            output.to_str().unwrap(),
            "--api-key",
            "test-key",
            "--api-base",
            DEAD_API,
            "--no-bom",
            "-j",
            "1",
        ])
        .assert()
        .success()
        .stdout(contains("Rows merged: 0"))
        .stdout(contains("Rows unmatched: 1"));

    let merged = fs::read_to_string(&output).expect("read output");
    assert_eq!(
        merged,
        "Link,Frequency_GHz,Polarization,Length_km,Installed,מפעיל,\
         NearLongitude_DecDeg,NearLatitude_DecDeg,RxLevel,TxLevel,\
         correlation,metadata_source,match_explanation,matching_points\n"
    );
}

#[test]
fn correlate_loads_yaml_config() {
    let ws = correlate_workspace();
    let config = ws.write(
        "run.yaml",
        "search:\n  correlation_threshold: 1.5\n",
    );
    cml()
        .args([
            "correlate",
            "-r",
            ws.path().join("raw.csv").to_str().unwrap(),
            "-d",
            ws.path().join("metadata").to_str().unwrap(),
            "-s",
            fixture_path("cml_metadata_example.csv").to_str().unwrap(),
            "-o",
            ws.path().join("merged.csv").to_str().unwrap(),
            "-c",
            config.to_str().unwrap(),
            "--api-key",
            "test-key",
        ])
        .assert()
        .failure()
        .stderr(contains("correlation_threshold must be within [0, 1]"));
}

#[test]
fn map_columns_fails_when_mapper_is_unreachable() {
    let ws = TestWorkspace::new();
    let input = ws.write("links.csv", "Link,תדר\n1,18\n");
    cml()
        .args([
            "map-columns",
            "-i",
            input.to_str().unwrap(),
            "-s",
            fixture_path("cml_metadata_example.csv").to_str().unwrap(),
            "--api-key",
            "test-key",
            "--api-base",
            DEAD_API,
        ])
        .assert()
        .failure()
        .stderr(contains("Column mapping unavailable"));
}
