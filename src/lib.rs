pub mod cli;
pub mod enrich;
pub mod extract;
pub mod grain;
pub mod grid;
pub mod inference;
pub mod io_utils;
pub mod loader;
pub mod mapping;
pub mod patterns;
pub mod period;
pub mod pipeline;
pub mod sanitize;
pub mod store;
pub mod table;
pub mod types;
pub mod workbook;

use std::{env, path::Path, sync::OnceLock};

use anyhow::{Context, Result, ensure};
use clap::Parser;
use log::{LevelFilter, debug, info, warn};
use serde::Serialize;

use crate::{
    cli::{Cli, Commands, InputArgs},
    enrich::GlossaryEnricher,
    extract::{extract, extract_table},
    grain::GrainResult,
    grid::Grid,
    loader::Loader,
    mapping::PipelineConfig,
    pipeline::{LoadOptions, SheetOutcome},
    sanitize::{remove_date_patterns, sanitize_name},
    store::SqliteStore,
    table::render_table,
    workbook::{Workbook, WorkbookCache},
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("sheetwarp", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Sheets(args) => handle_sheets(&args.input),
        Commands::Probe(args) => handle_probe(&args),
        Commands::Grain(args) => handle_grain(&args),
        Commands::Load(args) => handle_load(&args),
    }
}

fn open_input(args: &InputArgs) -> Result<Workbook> {
    let encoding = io_utils::resolve_encoding(args.input_encoding.as_deref())?;
    Workbook::open_with_encoding(&args.input, encoding)
        .with_context(|| format!("Opening {:?}", args.input))
}

fn owned(headers: &[&str]) -> Vec<String> {
    headers.iter().map(|header| header.to_string()).collect()
}

fn display_rows(rows: &[usize]) -> String {
    rows.iter()
        .map(|row| (row + 1).to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn handle_sheets(args: &InputArgs) -> Result<()> {
    let book = open_input(args)?;
    let rows = book
        .sheets()
        .iter()
        .map(|sheet| {
            let grid = Grid::new(sheet.as_ref());
            let structure = extract(&grid);
            vec![
                structure.sheet_name.clone(),
                structure.kind.to_string(),
                display_rows(&structure.header_rows),
                structure
                    .data_range
                    .map(|range| format!("{}-{}", range.first + 1, range.last + 1))
                    .unwrap_or_default(),
                structure.columns.len().to_string(),
                structure.diagnostic.unwrap_or_default(),
            ]
        })
        .collect::<Vec<_>>();
    print!(
        "{}",
        render_table(
            &owned(&["sheet", "kind", "header_rows", "data_rows", "columns", "diagnostic"]),
            &rows
        )
    );
    Ok(())
}

fn handle_probe(args: &cli::ProbeArgs) -> Result<()> {
    let book = open_input(&args.input)?;
    let sheets = selected_sheets(&book, args.sheet.as_deref())?;
    for sheet in sheets {
        let grid = Grid::new(sheet.as_ref());
        let structure = extract(&grid);
        println!("Sheet: {} ({})", structure.sheet_name, structure.kind);
        if !structure.is_tabular() {
            if let Some(diagnostic) = &structure.diagnostic {
                println!("  {diagnostic}");
            }
            println!();
            continue;
        }
        println!("Header rows: {}", display_rows(&structure.header_rows));
        let rows = structure
            .columns
            .iter()
            .enumerate()
            .map(|(idx, column)| {
                vec![
                    (idx + 1).to_string(),
                    column.letter.clone(),
                    column.name.clone(),
                    column.label.clone(),
                    column.inferred_type.to_string(),
                    column
                        .sample_values
                        .iter()
                        .filter(|value| !value.is_empty())
                        .take(3)
                        .map(|value| value.as_text())
                        .collect::<Vec<_>>()
                        .join(" | "),
                ]
            })
            .collect::<Vec<_>>();
        print!(
            "{}",
            render_table(&owned(&["#", "col", "name", "label", "type", "samples"]), &rows)
        );
        if args.preview > 0 {
            println!();
            print!(
                "{}",
                extract_table(&grid, &structure).render_preview(args.preview)
            );
        }
        println!();
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct SheetGrain {
    sheet: String,
    #[serde(flatten)]
    result: GrainResult,
}

fn handle_grain(args: &cli::GrainArgs) -> Result<()> {
    let book = open_input(&args.input)?;
    let sheets = selected_sheets(&book, args.sheet.as_deref())?;
    let mut classified = Vec::new();
    for sheet in sheets {
        let grid = Grid::new(sheet.as_ref());
        let table = match pipeline::prepare_sheet(&grid) {
            Ok(table) => table,
            Err(reason) => {
                debug!("Skipping sheet '{}': {reason}", grid.name());
                continue;
            }
        };
        classified.push(SheetGrain {
            sheet: grid.name().to_string(),
            result: grain::classify(&table),
        });
    }
    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&classified).context("Serializing grain results")?
        );
        return Ok(());
    }
    let rows = classified
        .into_iter()
        .map(|entry| {
            vec![
                entry.sheet,
                entry.result.grain.to_string(),
                entry.result.grain_column.unwrap_or_default(),
                format!("{:.2}", entry.result.confidence),
                entry.result.description,
            ]
        })
        .collect::<Vec<_>>();
    print!(
        "{}",
        render_table(
            &owned(&["sheet", "grain", "column", "confidence", "description"]),
            &rows
        )
    );
    Ok(())
}

fn selected_sheets(
    book: &Workbook,
    sheet: Option<&str>,
) -> Result<Vec<std::sync::Arc<grid::SheetData>>> {
    match sheet {
        Some(name) => {
            let found = book
                .sheet(name)
                .with_context(|| format!("Sheet '{name}' not found in {:?}", book.path()))?;
            Ok(vec![found])
        }
        None => Ok(book.sheets().to_vec()),
    }
}

/// Identifier for a pipeline created from its first file: the file stem with
/// period fragments removed.
fn default_pipeline_id(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let id = remove_date_patterns(&sanitize_name(&stem));
    if id.is_empty() {
        sanitize_name(&stem)
    } else {
        id
    }
}

fn handle_load(args: &cli::LoadArgs) -> Result<()> {
    let input = &args.input.input;
    let file_name = input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut config = if args.config.exists() {
        PipelineConfig::load(&args.config)
            .with_context(|| format!("Loading pipeline config {:?}", args.config))?
    } else {
        let id = args
            .pipeline_id
            .clone()
            .unwrap_or_else(|| default_pipeline_id(input));
        info!("Creating pipeline '{id}' at {:?}", args.config);
        PipelineConfig::new(id.clone(), id)
    };

    let period = args
        .period
        .clone()
        .or_else(|| period::parse_period(&file_name));
    match &period {
        Some(label) => ensure!(
            period::is_period(label),
            "Period '{label}' is not in YYYY-MM form"
        ),
        None => warn!("No period given or found in '{file_name}'; rows are appended without one"),
    }

    let digest = io_utils::file_digest(input)?;
    info!("Loading {file_name} (sha256 {digest})");
    let mut cache = WorkbookCache::with_encoding(io_utils::resolve_encoding(
        args.input.input_encoding.as_deref(),
    )?);
    let store = SqliteStore::open(&args.database)
        .with_context(|| format!("Opening database {:?}", args.database))?;
    let mut loader = Loader::new(store);
    if let Some(path) = &args.glossary {
        loader = loader.with_enricher(Box::new(GlossaryEnricher::load(path)?));
    }

    let options = LoadOptions {
        period,
        sheets: args.sheets.clone(),
    };
    let reports = pipeline::load_file(&mut config, &mut loader, &mut cache, input, &options)?;
    config
        .save(&args.config)
        .with_context(|| format!("Writing pipeline config {:?}", args.config))?;

    let rows = reports
        .iter()
        .map(|report| {
            vec![
                report.sheet.clone(),
                report.table.clone().unwrap_or_default(),
                report.rows.to_string(),
                report
                    .grain
                    .as_ref()
                    .map(|grain| grain.grain.to_string())
                    .unwrap_or_default(),
                report.outcome.to_string(),
            ]
        })
        .collect::<Vec<_>>();
    print!(
        "{}",
        render_table(&owned(&["sheet", "table", "rows", "grain", "outcome"]), &rows)
    );

    let failed = reports
        .iter()
        .filter(|report| matches!(report.outcome, SheetOutcome::Failed(_)))
        .count();
    ensure!(failed == 0, "{failed} sheet(s) failed to load");
    Ok(())
}
