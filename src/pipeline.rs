//! Per-sheet orchestration: extract, classify grain, load.
//!
//! Sheets of a workbook are processed one after another. A sheet that cannot be
//! parsed is skipped and a sheet whose load fails is reported as failed; neither
//! stops the remaining sheets.

use std::{fmt, path::Path};

use anyhow::{Context, Result, anyhow};
use log::{info, warn};

use crate::{
    extract::{extract, extract_table},
    grain::{Grain, GrainResult, classify},
    grid::Grid,
    loader::{LoadRequest, Loader},
    mapping::{PipelineConfig, SheetMapping, generalise_digits},
    sanitize::{is_unnamed, make_table_name, sanitize_name},
    store::DestinationStore,
    table::ExtractedTable,
    workbook::{Workbook, WorkbookCache},
};

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub period: Option<String>,
    /// Restrict to these sheet names; empty means every sheet.
    pub sheets: Vec<String>,
}

impl LoadOptions {
    fn wants(&self, sheet: &str) -> bool {
        self.sheets.is_empty() || self.sheets.iter().any(|name| name == sheet)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SheetOutcome {
    Loaded {
        new_columns: Vec<String>,
        missing_columns: Vec<String>,
    },
    Skipped(String),
    Failed(String),
}

impl SheetOutcome {
    pub fn is_loaded(&self) -> bool {
        matches!(self, SheetOutcome::Loaded { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, SheetOutcome::Failed(_))
    }
}

impl fmt::Display for SheetOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SheetOutcome::Loaded {
                new_columns,
                missing_columns,
            } => write!(
                f,
                "loaded ({} new, {} missing)",
                new_columns.len(),
                missing_columns.len()
            ),
            SheetOutcome::Skipped(reason) => write!(f, "skipped: {reason}"),
            SheetOutcome::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SheetReport {
    pub sheet: String,
    pub table: Option<String>,
    pub rows: usize,
    pub grain: Option<GrainResult>,
    pub outcome: SheetOutcome,
}

impl SheetReport {
    fn skipped(sheet: &str, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        warn!("Skipping sheet '{sheet}': {reason}");
        Self {
            sheet: sheet.to_string(),
            table: None,
            rows: 0,
            grain: None,
            outcome: SheetOutcome::Skipped(reason),
        }
    }
}

/// Parses one sheet into a table ready to load, or the reason it was skipped.
pub fn prepare_sheet(grid: &Grid<'_>) -> Result<ExtractedTable, String> {
    let structure = extract(grid);
    if !structure.is_tabular() {
        return Err(match structure.diagnostic {
            Some(diagnostic) => format!("{}: {diagnostic}", structure.kind),
            None => format!("classified as {}", structure.kind),
        });
    }
    let table = extract_table(grid, &structure);
    if table.is_empty() {
        return Err("no data rows".to_string());
    }
    Ok(table)
}

/// New mapping for a sheet seen for the first time: identity names for every
/// loadable column, empty descriptions, the detected grain.
pub fn bootstrap_mapping(
    pipeline_id: &str,
    sheet_name: &str,
    table: &ExtractedTable,
    grain: &GrainResult,
) -> SheetMapping {
    let mut mapping = SheetMapping::new(sheet_name, make_table_name(pipeline_id, sheet_name));
    for column in table.columns() {
        if is_unnamed(&column.name) || column.is_empty() {
            continue;
        }
        let name = sanitize_name(&column.name);
        mapping.column_mappings.insert(name.clone(), name.clone());
        mapping.column_descriptions.insert(name, String::new());
    }
    mapping.record_grain(grain);
    mapping
}

/// Sheets of delimited files carry the file stem as their name, which changes
/// with every period; their pattern generalises digits like the file pattern.
fn sheet_pattern_for(file_name: &str, sheet_name: &str) -> String {
    let stem = Path::new(file_name)
        .file_stem()
        .map(|stem| stem.to_string_lossy());
    match stem {
        Some(stem) if stem == sheet_name => generalise_digits(sheet_name),
        _ => sheet_name.to_string(),
    }
}

pub fn load_workbook<S: DestinationStore>(
    config: &mut PipelineConfig,
    loader: &mut Loader<S>,
    workbook: &Workbook,
    options: &LoadOptions,
) -> Vec<SheetReport> {
    let file_name = workbook.file_name();
    let mut reports = Vec::new();
    for sheet in workbook.sheets() {
        let grid = Grid::new(sheet.as_ref());
        let sheet_name = grid.name().to_string();
        if !options.wants(&sheet_name) {
            continue;
        }
        let report = match prepare_sheet(&grid) {
            Ok(table) => load_sheet(config, loader, &file_name, &sheet_name, &table, options),
            Err(reason) => SheetReport::skipped(&sheet_name, reason),
        };
        reports.push(report);
    }
    if let Some(period) = &options.period
        && reports.iter().any(|report| report.outcome.is_loaded())
    {
        config.add_period(period);
    }
    reports
}

/// Loads one file through the cache, then releases it once every sheet is done.
pub fn load_file<S: DestinationStore>(
    config: &mut PipelineConfig,
    loader: &mut Loader<S>,
    cache: &mut WorkbookCache,
    path: &Path,
    options: &LoadOptions,
) -> Result<Vec<SheetReport>> {
    let workbook = cache
        .open(path)
        .with_context(|| format!("Opening {path:?}"))?;
    let reports = load_workbook(config, loader, &workbook, options);
    cache.close(path);
    Ok(reports)
}

fn load_sheet<S: DestinationStore>(
    config: &mut PipelineConfig,
    loader: &mut Loader<S>,
    file_name: &str,
    sheet_name: &str,
    table: &ExtractedTable,
    options: &LoadOptions,
) -> SheetReport {
    let grain = classify(table);
    info!(
        "Sheet '{sheet_name}' grain: {} ({:.2}){}",
        grain.grain,
        grain.confidence,
        grain
            .grain_column
            .as_deref()
            .map(|column| format!(" via {column}"))
            .unwrap_or_default()
    );
    let mut report = SheetReport {
        sheet: sheet_name.to_string(),
        table: None,
        rows: 0,
        grain: Some(grain.clone()),
        outcome: SheetOutcome::Failed(String::new()),
    };
    match load_into_mapping(config, loader, file_name, sheet_name, table, &grain, options) {
        Ok((table_name, rows, outcome)) => {
            report.table = Some(table_name);
            report.rows = rows;
            report.outcome = outcome;
        }
        Err(err) => {
            warn!("Sheet '{sheet_name}' failed: {err:#}");
            report.outcome = SheetOutcome::Failed(format!("{err:#}"));
        }
    }
    report
}

fn load_into_mapping<S: DestinationStore>(
    config: &mut PipelineConfig,
    loader: &mut Loader<S>,
    file_name: &str,
    sheet_name: &str,
    table: &ExtractedTable,
    grain: &GrainResult,
    options: &LoadOptions,
) -> Result<(String, usize, SheetOutcome)> {
    if config.sheet_mapping_for(file_name, sheet_name).is_none() {
        let mut mapping = bootstrap_mapping(&config.pipeline_id, sheet_name, table, grain);
        mapping.sheet_pattern = sheet_pattern_for(file_name, sheet_name);
        info!(
            "New sheet '{sheet_name}' mapped to {} with {} column(s)",
            mapping.table_name,
            mapping.column_mappings.len()
        );
        config.insert_sheet_mapping(file_name, mapping);
    }
    let mapping = config
        .mapping_for_sheet_mut(file_name, sheet_name)
        .ok_or_else(|| anyhow!("No mapping for sheet '{sheet_name}' of {file_name}"))?;
    if grain.grain != Grain::Unknown || mapping.grain.is_none() {
        mapping.record_grain(grain);
    }
    let table_name = mapping.table_name.clone();
    let source_label = format!("{file_name}/{sheet_name}");
    let mut request = LoadRequest::new(table, &table_name).with_source(&source_label);
    if let Some(period) = options.period.as_deref() {
        request = request.with_period(period);
    }
    let outcome = loader.load(&request, Some(mapping))?;
    Ok((
        table_name,
        outcome.rows_written,
        SheetOutcome::Loaded {
            new_columns: outcome.new_columns,
            missing_columns: outcome.missing_columns,
        },
    ))
}
