pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod io_utils;
pub mod oracle;
pub mod output;
pub mod pipeline;
pub mod reconcile;
pub mod resolve;
pub mod schema;
pub mod search;
pub mod source;
pub mod table;

use std::{env, path::Path, sync::OnceLock};

use anyhow::{Context, Result, bail};
use clap::Parser;
use encoding_rs::Encoding;
use log::{LevelFilter, debug, info, warn};

use crate::{
    cli::{Cli, Commands, CorrelateArgs, MapColumnsArgs, OracleArgs, ProbeArgs},
    config::{PipelineConfig, ResolutionPolicy},
    oracle::{
        LlmMapper, LlmScorer, Mapper, MappingOutcome,
        chat::{ChatSettings, OpenAiChat},
    },
    pipeline::PipelineOptions,
    reconcile::verify_mapping,
    schema::CanonicalSchema,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("cml_reconcile", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Correlate(args) => handle_correlate(&args),
        Commands::Probe(args) => handle_probe(&args),
        Commands::MapColumns(args) => handle_map_columns(&args),
    }
}

fn handle_correlate(args: &CorrelateArgs) -> Result<()> {
    let config = correlate_config(args)?;
    let fallback = io_utils::resolve_encoding(&config.input.fallback_encoding)?;

    info!("Loading raw data from {:?}", args.raw);
    let raw = source::load_file(&args.raw, fallback)
        .with_context(|| format!("Loading raw data from {:?}", args.raw))?;
    let sources = source::load_reference_folder(&args.metadata_dir, fallback)
        .with_context(|| format!("Loading metadata folder {:?}", args.metadata_dir))?;
    if sources.is_empty() {
        warn!(
            "No metadata files in {:?}; every raw row will be unmatched",
            args.metadata_dir
        );
    }
    let schema = load_schema(&args.schema, fallback)?;
    debug!("Canonical schema: {:?}", schema.column_names());

    let settings = chat_settings(&args.oracle)?;
    let scorer = LlmScorer::new(OpenAiChat::new(settings.clone())?);
    let mapper = LlmMapper::new(OpenAiChat::new(settings)?);
    let options = PipelineOptions::from_config(&config, Some(args.output.clone()));

    let report = pipeline::run(raw.rows(), &sources, &schema, &scorer, &mapper, &options)?;
    println!("Total rows processed: {}", report.processed);
    println!("Rows merged: {}", report.table.len());
    println!("Rows unmatched: {}", report.unmatched.len());
    println!("Rows failed: {}", report.failed_units.len());
    println!("Output file: {}", args.output.display());
    if !report.persistence_errors.is_empty() {
        bail!(
            "{} write(s) failed; the output may be incomplete",
            report.persistence_errors.len()
        );
    }
    Ok(())
}

fn correlate_config(args: &CorrelateArgs) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(threshold) = args.threshold {
        config.search.correlation_threshold = threshold;
    }
    if let Some(target) = args.target {
        config.search.target_correlation = target;
    }
    if let Some(batch_size) = args.batch_size {
        config.search.batch_size = batch_size;
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if let Some(interval) = args.snapshot_interval {
        config.output.snapshot_interval = interval;
    }
    if let Some(column) = &args.version_column {
        config.search.resolution = ResolutionPolicy::VersionColumn {
            column: column.clone(),
        };
    }
    if args.no_bom {
        config.output.write_bom = false;
    }
    if let Some(encoding) = &args.fallback_encoding {
        config.input.fallback_encoding = encoding.clone();
    }
    config.validate()?;
    Ok(config)
}

fn handle_probe(args: &ProbeArgs) -> Result<()> {
    let fallback = fallback_encoding(args.fallback_encoding.as_deref(), None)?;
    info!("Probing '{}'", args.input.display());
    let records = source::load_file(&args.input, fallback)
        .with_context(|| format!("Inferring schema from {:?}", args.input))?;
    let schema = CanonicalSchema::from_record_set(&records);
    schema
        .save(&args.schema)
        .with_context(|| format!("Writing schema to {:?}", args.schema))?;
    info!(
        "Inferred schema for {} column(s) written to {:?}",
        schema.columns.len(),
        args.schema
    );
    Ok(())
}

fn handle_map_columns(args: &MapColumnsArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    let fallback = fallback_encoding(args.fallback_encoding.as_deref(), Some(&config))?;
    let records = source::load_file(&args.input, fallback)
        .with_context(|| format!("Loading metadata from {:?}", args.input))?;
    let schema = load_schema(&args.schema, fallback)?.with_fixed_fields(&config.fields);
    let source_columns = records.columns();
    let target_columns = schema.column_names();

    let mapper = LlmMapper::new(OpenAiChat::new(chat_settings(&args.oracle)?)?);
    let suggestion = match mapper.suggest(source_columns, &target_columns)? {
        MappingOutcome::Suggested(suggestion) => suggestion,
        MappingOutcome::Unavailable { reason } => bail!("Column mapping unavailable: {reason}"),
    };

    let rows: Vec<Vec<String>> = suggestion
        .mappings
        .iter()
        .map(|(source, target)| {
            vec![
                source.clone(),
                target.clone(),
                suggestion.explanations.get(source).cloned().unwrap_or_default(),
            ]
        })
        .collect();
    table::print_table(&["source", "target", "explanation"], &rows);

    let report = verify_mapping(&suggestion, source_columns, &target_columns, &config.fields);
    for warning in &report.warnings {
        warn!("{warning}");
    }
    if !report.is_valid() {
        bail!("Mapping is invalid:\n  {}", report.errors.join("\n  "));
    }
    info!("Mapping covers {} column(s)", suggestion.mappings.len());
    Ok(())
}

/// Loads a `.yaml` schema file, or infers the schema from an example
/// metadata file of any supported format.
fn load_schema(path: &Path, fallback: &'static Encoding) -> Result<CanonicalSchema> {
    if schema::is_yaml_path(path) {
        return CanonicalSchema::load(path).with_context(|| format!("Loading schema {path:?}"));
    }
    let example = source::load_file(path, fallback)
        .with_context(|| format!("Loading example metadata {path:?}"))?;
    Ok(CanonicalSchema::from_record_set(&example))
}

fn fallback_encoding(
    flag: Option<&str>,
    config: Option<&PipelineConfig>,
) -> Result<&'static Encoding> {
    let label = flag
        .or(config.map(|c| c.input.fallback_encoding.as_str()))
        .unwrap_or(config::DEFAULT_FALLBACK_ENCODING);
    io_utils::resolve_encoding(label)
}

fn chat_settings(args: &OracleArgs) -> Result<ChatSettings> {
    let api_key = args
        .api_key
        .clone()
        .filter(|key| !key.trim().is_empty())
        .context("No API key configured; pass --api-key or set OPENAI_API_KEY")?;
    Ok(ChatSettings {
        api_base: args.api_base.clone(),
        api_key,
        model: args.model.clone(),
    })
}
