use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::oracle::chat::DEFAULT_API_BASE;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Correlate raw link telemetry with scattered metadata files",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Match every raw row against the metadata folder and write the merged table
    Correlate(CorrelateArgs),
    /// Infer a canonical schema (.yaml) from an example metadata file
    Probe(ProbeArgs),
    /// Ask the mapper how one metadata file's columns map onto the canonical schema
    MapColumns(MapColumnsArgs),
}

#[derive(Debug, Args)]
pub struct CorrelateArgs {
    /// Raw telemetry file (csv, tsv or json)
    #[arg(short = 'r', long = "raw")]
    pub raw: PathBuf,
    /// Folder holding the reference metadata files
    #[arg(short = 'd', long = "metadata-dir")]
    pub metadata_dir: PathBuf,
    /// Canonical schema: a .yaml schema file or an example metadata file to infer it from
    #[arg(short = 's', long = "schema")]
    pub schema: PathBuf,
    /// Destination CSV for the merged table; a `.partial` sibling is written during the run
    #[arg(short = 'o', long = "output")]
    pub output: PathBuf,
    /// Optional YAML run configuration
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,
    /// Minimum correlation a candidate must exceed to count as a match
    #[arg(long)]
    pub threshold: Option<f64>,
    /// Correlation above which scanning stops early
    #[arg(long)]
    pub target: Option<f64>,
    /// Number of reference records sent to the scorer per call
    #[arg(long = "batch-size")]
    pub batch_size: Option<usize>,
    /// Worker threads (defaults to CPU count minus one)
    #[arg(short = 'j', long)]
    pub workers: Option<usize>,
    /// Successful rows between partial snapshots
    #[arg(long = "snapshot-interval")]
    pub snapshot_interval: Option<usize>,
    /// Rank revisions of a matched entity by this column instead of re-scoring
    #[arg(long = "version-column")]
    pub version_column: Option<String>,
    /// Write the output without a UTF-8 byte order mark
    #[arg(long = "no-bom")]
    pub no_bom: bool,
    /// Encoding assumed for input files that are not valid UTF-8
    #[arg(long = "fallback-encoding")]
    pub fallback_encoding: Option<String>,
    #[command(flatten)]
    pub oracle: OracleArgs,
}

#[derive(Debug, Args)]
pub struct ProbeArgs {
    /// Example metadata file to inspect
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Destination schema .yaml file
    #[arg(short = 'm', long = "schema")]
    pub schema: PathBuf,
    /// Encoding assumed for input files that are not valid UTF-8
    #[arg(long = "fallback-encoding")]
    pub fallback_encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct MapColumnsArgs {
    /// Metadata file whose columns should be mapped
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Canonical schema: a .yaml schema file or an example metadata file
    #[arg(short = 's', long = "schema")]
    pub schema: PathBuf,
    /// Optional YAML run configuration (field rules, fallback encoding)
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,
    /// Encoding assumed for input files that are not valid UTF-8
    #[arg(long = "fallback-encoding")]
    pub fallback_encoding: Option<String>,
    #[command(flatten)]
    pub oracle: OracleArgs,
}

#[derive(Debug, Args)]
pub struct OracleArgs {
    /// API key for the chat-completion service
    #[arg(long = "api-key", env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,
    /// Chat model used for scoring and column mapping
    #[arg(long, env = "OPENAI_MODEL_NAME", default_value = "gpt-4o-mini")]
    pub model: String,
    /// Base URL of the OpenAI-compatible API
    #[arg(long = "api-base", env = "OPENAI_BASE_URL", default_value = DEFAULT_API_BASE)]
    pub api_base: String,
}
