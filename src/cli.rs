use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Parse statistical spreadsheets and load them with stable schemas",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List the sheets of a workbook with their classification and layout
    Sheets(SheetsArgs),
    /// Show the detected header, column schema and leading rows of a sheet
    Probe(ProbeArgs),
    /// Classify the entity level of each tabular sheet
    Grain(GrainArgs),
    /// Load tabular sheets into a SQLite database, learning column mappings
    Load(LoadArgs),
}

#[derive(Debug, Args)]
pub struct InputArgs {
    /// Workbook (.xlsx, .xls, .xlsb, .ods) or delimited file (.csv, .tsv)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Character encoding of delimited input (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct SheetsArgs {
    #[command(flatten)]
    pub input: InputArgs,
}

#[derive(Debug, Args)]
pub struct ProbeArgs {
    #[command(flatten)]
    pub input: InputArgs,
    /// Sheet to inspect (every tabular sheet when omitted)
    #[arg(short, long)]
    pub sheet: Option<String>,
    /// Number of data rows to preview
    #[arg(long, default_value_t = 5)]
    pub preview: usize,
}

#[derive(Debug, Args)]
pub struct GrainArgs {
    #[command(flatten)]
    pub input: InputArgs,
    /// Sheet to classify (every tabular sheet when omitted)
    #[arg(short, long)]
    pub sheet: Option<String>,
    /// Emit the classification as JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct LoadArgs {
    #[command(flatten)]
    pub input: InputArgs,
    /// Pipeline configuration YAML; created when it does not exist
    #[arg(short, long)]
    pub config: PathBuf,
    /// SQLite database file receiving the tables
    #[arg(short, long)]
    pub database: PathBuf,
    /// Period label (YYYY-MM); parsed from the file name when omitted
    #[arg(short, long)]
    pub period: Option<String>,
    /// Restrict the load to these sheets
    #[arg(short, long = "sheet", action = clap::ArgAction::Append)]
    pub sheets: Vec<String>,
    /// Pipeline identifier used when creating a new configuration
    #[arg(long = "pipeline-id")]
    pub pipeline_id: Option<String>,
    /// YAML glossary of known column names and descriptions
    #[arg(long)]
    pub glossary: Option<PathBuf>,
}
