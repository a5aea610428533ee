//! Sheet structure extraction.
//!
//! [`extract`] turns one [`Grid`] into a [`TableStructure`]: a classification, the
//! header block, the data range and an ordered column schema with inferred types.
//! It never fails. Structural problems downgrade the classification to
//! [`SheetKind::Unrecognised`] with the [`ExtractFailure`] text attached, and the
//! caller skips the sheet.
//!
//! The column list built here, in grid position order, is the one every later step
//! works from. [`extract_table`] reads the data range into that same column order.

use std::fmt;

use itertools::Itertools;
use log::debug;
use thiserror::Error;

use crate::{
    grid::{CellValue, Grid},
    inference::infer_column_type,
    patterns::{self, METADATA_INDICATORS},
    sanitize::{NameDeduper, sanitize_name},
    table::{ExtractedTable, TableColumn},
    types::ColumnType,
};

const CLASSIFY_ROWS: usize = 30;
const CLASSIFY_COLS: usize = 20;
const DENSITY_ROW_WIDTH: f64 = 10.0;
const METADATA_DENSITY: f64 = 0.15;
const METADATA_SINGLE_RATIO: f64 = 0.5;
const METADATA_MAX_MULTI_ROWS: usize = 5;
const INDICATOR_MAX_MULTI_ROWS: usize = 3;
const TABULAR_MIN_MULTI_ROWS: usize = 3;

const HEADER_SCAN_ROWS: usize = 30;
const ROW_COUNT_COLS: usize = 50;
const ROW_PROFILE_COLS: usize = 20;
const DATA_GAP: usize = 5;
const TITLE_PREFIXES: &[&str] = &["table", "this", "note"];

const MAX_COLUMNS: usize = 500;
const DATA_PROBE_ROWS: usize = 5;
const SAMPLE_VALUES: usize = 10;

const FOOTER_COLS: usize = 5;
const SEPARATOR_COLS: usize = 3;
const EMPTY_STREAK_LIMIT: usize = 5;
const FOOTNOTE_MIN_LEN: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetKind {
    Tabular,
    Metadata,
    Empty,
    Unrecognised,
}

impl fmt::Display for SheetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SheetKind::Tabular => "tabular",
            SheetKind::Metadata => "metadata",
            SheetKind::Empty => "empty",
            SheetKind::Unrecognised => "unrecognised",
        };
        f.write_str(label)
    }
}

/// Why a sheet that looked tabular could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractFailure {
    #[error("could not detect header rows")]
    NoHeaderRows,
    #[error("no data rows within {DATA_GAP} rows of the header block ending at row {last_header_row}")]
    NoDataRows { last_header_row: usize },
    #[error("no data columns detected")]
    NoColumns,
}

/// Inclusive row range holding the data, separator rows included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataRange {
    pub first: usize,
    pub last: usize,
}

impl DataRange {
    pub fn rows(&self) -> std::ops::RangeInclusive<usize> {
        self.first..=self.last
    }

    pub fn len(&self) -> usize {
        self.last + 1 - self.first
    }

    pub fn is_empty(&self) -> bool {
        self.last < self.first
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSchema {
    /// Zero-based grid column.
    pub position: usize,
    pub letter: String,
    /// Non-empty header texts top to bottom, consecutive repeats collapsed.
    pub header_parts: Vec<String>,
    pub label: String,
    pub name: String,
    pub sample_values: Vec<CellValue>,
    pub inferred_type: ColumnType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableStructure {
    pub sheet_name: String,
    pub kind: SheetKind,
    pub header_rows: Vec<usize>,
    pub data_range: Option<DataRange>,
    pub separator_rows: Vec<usize>,
    pub columns: Vec<ColumnSchema>,
    pub diagnostic: Option<String>,
}

impl TableStructure {
    fn without_table(sheet_name: &str, kind: SheetKind, diagnostic: Option<String>) -> Self {
        Self {
            sheet_name: sheet_name.to_string(),
            kind,
            header_rows: Vec::new(),
            data_range: None,
            separator_rows: Vec::new(),
            columns: Vec::new(),
            diagnostic,
        }
    }

    pub fn is_tabular(&self) -> bool {
        self.kind == SheetKind::Tabular
    }

    pub fn column_at(&self, position: usize) -> Option<&ColumnSchema> {
        self.columns.iter().find(|column| column.position == position)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|column| column.name.clone()).collect()
    }

    /// Data rows in order, separator rows excluded.
    pub fn data_rows(&self) -> Vec<usize> {
        self.data_range
            .map(|range| {
                range
                    .rows()
                    .filter(|row| !self.separator_rows.contains(row))
                    .collect()
            })
            .unwrap_or_default()
    }
}

pub fn extract(grid: &Grid<'_>) -> TableStructure {
    let kind = classify_sheet(grid);
    debug!("Sheet '{}' classified as {kind}", grid.name());
    if kind != SheetKind::Tabular {
        return TableStructure::without_table(grid.name(), kind, None);
    }
    match build_structure(grid) {
        Ok(structure) => {
            debug!(
                "Sheet '{}': header rows {:?}, data rows {:?}, {} column(s)",
                grid.name(),
                structure.header_rows,
                structure.data_range,
                structure.columns.len()
            );
            structure
        }
        Err(failure) => {
            debug!("Sheet '{}' not parsed: {failure}", grid.name());
            TableStructure::without_table(
                grid.name(),
                SheetKind::Unrecognised,
                Some(failure.to_string()),
            )
        }
    }
}

/// Reads the data range into the structure's column order. Suppression tokens
/// become empty cells and rows empty across every column are left out.
pub fn extract_table(grid: &Grid<'_>, structure: &TableStructure) -> ExtractedTable {
    let mut columns: Vec<TableColumn> = structure
        .columns
        .iter()
        .map(|schema| {
            TableColumn::new(schema.name.clone(), schema.label.clone())
                .with_type(schema.inferred_type)
        })
        .collect();
    if structure.is_tabular() {
        for row in structure.data_rows() {
            let values: Vec<CellValue> = structure
                .columns
                .iter()
                .map(|schema| clean_cell(grid.value(row, schema.position)))
                .collect();
            if values.iter().all(CellValue::is_empty) {
                continue;
            }
            for (column, value) in columns.iter_mut().zip(values) {
                column.values.push(value);
            }
        }
    }
    let row_count = columns.first().map(|c| c.values.len()).unwrap_or_default();
    ExtractedTable::from_parts(structure.sheet_name.clone(), columns, row_count)
}

pub fn clean_cell(value: CellValue) -> CellValue {
    match value {
        CellValue::Text(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() || patterns::is_suppressed(trimmed) {
                CellValue::Empty
            } else if trimmed.len() == text.len() {
                CellValue::Text(text)
            } else {
                CellValue::Text(trimmed.to_string())
            }
        }
        other => other,
    }
}

pub fn classify_sheet(grid: &Grid<'_>) -> SheetKind {
    if grid.height() < 2 || grid.width() < 2 {
        return SheetKind::Empty;
    }
    let sample_rows = grid.height().min(CLASSIFY_ROWS);
    let (mut single, mut multi, mut filled) = (0usize, 0usize, 0usize);
    for row in 0..sample_rows {
        let cells = grid.filled_count(row, CLASSIFY_COLS);
        filled += cells;
        match cells {
            0 => {}
            1 | 2 => single += 1,
            _ => multi += 1,
        }
    }
    let density = filled as f64 / (sample_rows as f64 * DENSITY_ROW_WIDTH);
    let single_ratio = single as f64 / (single + multi).max(1) as f64;
    if density < METADATA_DENSITY
        || (single_ratio > METADATA_SINGLE_RATIO && multi < METADATA_MAX_MULTI_ROWS)
    {
        return SheetKind::Metadata;
    }

    let first = grid.raw(0, 0).as_text().to_lowercase();
    if METADATA_INDICATORS.iter().any(|word| first.contains(word))
        && multi < INDICATOR_MAX_MULTI_ROWS
    {
        return SheetKind::Metadata;
    }
    if multi >= TABULAR_MIN_MULTI_ROWS {
        SheetKind::Tabular
    } else {
        SheetKind::Metadata
    }
}

fn build_structure(grid: &Grid<'_>) -> Result<TableStructure, ExtractFailure> {
    let (header_rows, data_start) = detect_header_block(grid)?;
    let drafts = build_columns(grid, &header_rows, data_start);
    if drafts.is_empty() {
        return Err(ExtractFailure::NoColumns);
    }
    let positions: Vec<usize> = drafts.iter().map(|draft| draft.position).collect();
    let (data_range, separator_rows) =
        find_data_range(grid, &positions, &header_rows, data_start)?;

    let data_rows: Vec<usize> = data_range
        .rows()
        .filter(|row| !separator_rows.contains(row))
        .collect();
    let columns = drafts
        .into_iter()
        .map(|draft| {
            let values: Vec<CellValue> = data_rows
                .iter()
                .map(|&row| clean_cell(grid.value(row, draft.position)))
                .collect();
            let inferred_type = infer_column_type(&draft.name, &values);
            ColumnSchema {
                position: draft.position,
                letter: column_letter(draft.position),
                label: draft.header_parts.join(" > "),
                header_parts: draft.header_parts,
                name: draft.name,
                sample_values: values.into_iter().take(SAMPLE_VALUES).collect(),
                inferred_type,
            }
        })
        .collect();

    Ok(TableStructure {
        sheet_name: grid.name().to_string(),
        kind: SheetKind::Tabular,
        header_rows,
        data_range: Some(data_range),
        separator_rows,
        columns,
        diagnostic: None,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowRole {
    Skipped,
    Header,
    Data,
    Other,
}

#[derive(Debug, Default)]
struct RowProfile {
    numeric: usize,
    text: usize,
    period_tokens: usize,
}

impl RowProfile {
    fn observe(&mut self, value: &str) {
        let trimmed = value.trim();
        if trimmed.is_empty() || patterns::is_suppressed(trimmed) {
            return;
        }
        if patterns::is_unit_label(trimmed)
            || patterns::is_year_like(trimmed)
            || patterns::is_period_token(trimmed)
        {
            self.period_tokens += 1;
        } else if patterns::is_real_numeric(trimmed) {
            self.numeric += 1;
        } else {
            self.text += 1;
        }
    }
}

fn row_role(grid: &Grid<'_>, row: usize) -> RowRole {
    let opens_merge = grid.opens_horizontal_merge(row);
    let opens_inner_merge = grid
        .merges()
        .iter()
        .any(|m| m.first_row == row && m.is_horizontal() && m.first_col > 0);
    if grid.filled_count(row, ROW_COUNT_COLS) < 2 && !opens_inner_merge {
        return RowRole::Skipped;
    }

    let first = grid.text(row, 0);
    let first_lower = first.to_lowercase();
    if TITLE_PREFIXES
        .iter()
        .any(|prefix| first_lower.starts_with(prefix))
    {
        return RowRole::Skipped;
    }
    let second = grid.text(row, 1);
    if first.is_empty() && second.ends_with(':') && second.chars().count() < 25 {
        return RowRole::Skipped;
    }

    let mut profile = RowProfile::default();
    for value in grid.row(row).iter().take(ROW_PROFILE_COLS) {
        profile.observe(&value.as_text());
    }
    let is_header = opens_merge
        || (profile.numeric == 0 && (profile.period_tokens >= 2 || profile.text >= 2));
    if is_header {
        RowRole::Header
    } else if profile.numeric >= 2 {
        RowRole::Data
    } else {
        RowRole::Other
    }
}

/// The last contiguous run of header rows before the first data row, and that
/// data row. The data row must start within [`DATA_GAP`] rows of the run.
fn detect_header_block(grid: &Grid<'_>) -> Result<(Vec<usize>, usize), ExtractFailure> {
    let mut run: Vec<usize> = Vec::new();
    let limit = grid.height().min(HEADER_SCAN_ROWS + DATA_GAP);
    for row in 0..limit {
        match row_role(grid, row) {
            RowRole::Header if row < HEADER_SCAN_ROWS => {
                if run.last().is_some_and(|last| last + 1 != row) {
                    run.clear();
                }
                run.push(row);
            }
            RowRole::Data => {
                if let Some(&last_header_row) = run.last() {
                    if row - last_header_row <= DATA_GAP {
                        return Ok((run, row));
                    }
                    return Err(ExtractFailure::NoDataRows { last_header_row });
                }
            }
            _ => {}
        }
    }
    match run.last() {
        Some(&last_header_row) => Err(ExtractFailure::NoDataRows { last_header_row }),
        None => Err(ExtractFailure::NoHeaderRows),
    }
}

struct ColumnDraft {
    position: usize,
    header_parts: Vec<String>,
    name: String,
}

fn build_columns(grid: &Grid<'_>, header_rows: &[usize], data_start: usize) -> Vec<ColumnDraft> {
    let scan_end = grid.height().min(data_start + DATA_PROBE_ROWS);
    let width = grid.width().min(MAX_COLUMNS);
    let last_header_col = header_rows
        .iter()
        .filter_map(|&row| grid.row(row).iter().take(width).rposition(|v| !v.is_empty()))
        .max();
    let last_data_col = (data_start..scan_end)
        .filter_map(|row| (0..width).rposition(|col| !grid.raw(row, col).is_empty()))
        .max();
    let Some(max_col) = last_header_col.max(last_data_col) else {
        return Vec::new();
    };

    let mut deduper = NameDeduper::new();
    let mut drafts = Vec::new();
    for position in 0..=max_col {
        let headers: Vec<String> = header_rows
            .iter()
            .map(|&row| grid.text(row, position))
            .collect();
        let has_data = (data_start..scan_end).any(|row| !grid.raw(row, position).is_empty());
        if !has_data && headers.iter().all(String::is_empty) {
            continue;
        }
        let header_parts: Vec<String> = headers
            .into_iter()
            .filter(|header| !header.is_empty())
            .dedup()
            .collect();
        let raw_name = if header_parts.is_empty() {
            format!("column_{}", column_letter(position))
        } else {
            header_parts.join(" ")
        };
        let name = deduper.unique(&sanitize_name(&raw_name));
        drafts.push(ColumnDraft {
            position,
            header_parts,
            name,
        });
    }
    drafts
}

/// Scans from the first data row found by header detection, so note rows between
/// the header block and the data are not part of the range. Separator rows inside
/// it are returned separately.
fn find_data_range(
    grid: &Grid<'_>,
    positions: &[usize],
    header_rows: &[usize],
    data_start: usize,
) -> Result<(DataRange, Vec<usize>), ExtractFailure> {
    let last_header_row = header_rows.last().copied().unwrap_or_default();
    let scan_cols: Vec<usize> = positions.iter().copied().take(FOOTER_COLS).collect();
    let separator_cols: Vec<usize> = positions.iter().copied().take(SEPARATOR_COLS).collect();
    let header_keys: Vec<Vec<String>> = separator_cols
        .iter()
        .map(|&col| {
            header_rows
                .iter()
                .map(|&row| patterns::header_comparison_key(&grid.text(row, col)))
                .filter(|key| !key.is_empty())
                .collect()
        })
        .collect();

    let mut first = None;
    let mut last = None;
    let mut separators = Vec::new();
    let mut empty_streak = 0;
    for row in data_start.max(last_header_row + 1)..grid.height() {
        let cells: Vec<String> = scan_cols.iter().map(|&col| grid.text(row, col)).collect();
        if cells.iter().all(String::is_empty) {
            empty_streak += 1;
            if empty_streak >= EMPTY_STREAK_LIMIT {
                break;
            }
            continue;
        }
        empty_streak = 0;
        if cells.iter().any(|cell| is_footer_cell(cell)) {
            break;
        }
        let repeats = separator_cols
            .iter()
            .zip(&header_keys)
            .filter(|(col, keys)| {
                let key = patterns::header_comparison_key(&grid.text(row, **col));
                !key.is_empty() && keys.contains(&key)
            })
            .count();
        if repeats >= 2 {
            separators.push(row);
            continue;
        }
        first.get_or_insert(row);
        last = Some(row);
    }

    let (Some(first), Some(last)) = (first, last) else {
        return Err(ExtractFailure::NoDataRows { last_header_row });
    };
    separators.retain(|row| (first..last).contains(row));
    Ok((DataRange { first, last }, separators))
}

fn is_footer_cell(cell: &str) -> bool {
    patterns::starts_with_stop_word(cell)
        || (cell.starts_with('*') && cell.chars().count() > FOOTNOTE_MIN_LEN)
}

/// Spreadsheet column letter for a zero-based index: 0 is `A`, 26 is `AA`.
pub fn column_letter(index: usize) -> String {
    let mut letters = Vec::new();
    let mut n = index + 1;
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    letters.iter().rev().map(|b| *b as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{MergeRange, SheetData};

    fn sheet(rows: Vec<Vec<&str>>) -> SheetData {
        SheetData::from_rows(
            "Table 1",
            rows.into_iter()
                .map(|row| row.into_iter().map(CellValue::from).collect())
                .collect(),
        )
    }

    #[test]
    fn column_letters_roll_over() {
        assert_eq!(column_letter(0), "A");
        assert_eq!(column_letter(25), "Z");
        assert_eq!(column_letter(26), "AA");
        assert_eq!(column_letter(701), "ZZ");
    }

    #[test]
    fn title_rows_are_skipped_before_the_header() {
        let data = sheet(vec![
            vec!["Table 3: Referrals by provider"],
            vec![],
            vec!["Org code", "Referrals", "Waiting"],
            vec!["RJ1", "10", "4"],
            vec!["RXH", "12", "5"],
            vec!["RYJ", "9", "6"],
        ]);
        let grid = Grid::new(&data);
        let structure = extract(&grid);
        assert_eq!(structure.kind, SheetKind::Tabular);
        assert_eq!(structure.header_rows, vec![2]);
        assert_eq!(structure.data_range, Some(DataRange { first: 3, last: 5 }));
        assert_eq!(structure.column_names(), ["org_code", "referrals", "waiting"]);
    }

    #[test]
    fn hierarchical_headers_join_both_rows() {
        let data = sheet(vec![
            vec!["Org", "Region", ""],
            vec!["", "North", "South"],
            vec!["RJ1", "10", "12.5"],
            vec!["RXH", "11", "13"],
            vec!["RYJ", "9", "8"],
        ])
        .with_merge(MergeRange::new(0, 1, 0, 2));
        let grid = Grid::new(&data);
        let structure = extract(&grid);
        assert_eq!(structure.header_rows, vec![0, 1]);
        let labels: Vec<&str> = structure.columns.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(labels, ["Org", "Region > North", "Region > South"]);
        assert_eq!(structure.column_names(), ["org", "region_north", "region_south"]);
        assert_eq!(structure.columns[2].inferred_type, ColumnType::Real);
    }

    #[test]
    fn footer_rows_end_the_data_range() {
        let data = sheet(vec![
            vec!["Org code", "Referrals", "Waiting"],
            vec!["RJ1", "10", "4"],
            vec!["RXH", "12", "5"],
            vec!["RYJ", "9", "6"],
            vec!["Source: NHS England", "", ""],
            vec!["RAL", "1", "2"],
        ]);
        let grid = Grid::new(&data);
        let structure = extract(&grid);
        assert_eq!(structure.data_range, Some(DataRange { first: 1, last: 3 }));
        let table = extract_table(&grid, &structure);
        assert_eq!(table.row_count(), 3);
    }

    #[test]
    fn note_rows_between_header_and_data_are_not_loaded() {
        let data = sheet(vec![
            vec!["Org code", "Referrals", "Waiting"],
            vec!["Figures are provisional"],
            vec!["RJ1", "10", "4"],
            vec!["RXH", "12", "5"],
            vec!["RYJ", "9", "6"],
        ]);
        let grid = Grid::new(&data);
        let structure = extract(&grid);
        assert_eq!(structure.header_rows, vec![0]);
        assert_eq!(structure.data_range, Some(DataRange { first: 2, last: 4 }));
        let table = extract_table(&grid, &structure);
        assert_eq!(table.row_count(), 3);
    }

    #[test]
    fn repeated_headers_are_skipped_as_separators() {
        let data = sheet(vec![
            vec!["Org code", "Referrals", "Waiting"],
            vec!["RJ1", "10", "4"],
            vec!["RXH", "12", "5"],
            vec!["Org code\u{b9}", "Referrals", "Waiting"],
            vec!["RYJ", "9", "6"],
        ]);
        let grid = Grid::new(&data);
        let structure = extract(&grid);
        assert_eq!(structure.separator_rows, vec![3]);
        assert_eq!(structure.data_range, Some(DataRange { first: 1, last: 4 }));
        let table = extract_table(&grid, &structure);
        assert_eq!(table.row_count(), 3);
        assert_eq!(
            structure.columns[1].inferred_type,
            ColumnType::Integer
        );
    }

    #[test]
    fn suppressed_values_become_empty_cells() {
        let data = sheet(vec![
            vec!["Org code", "Referrals", "Waiting"],
            vec!["RJ1", "10", "*"],
            vec!["RXH", "12", "5"],
            vec!["RYJ", "9", "6"],
        ]);
        let grid = Grid::new(&data);
        let table = extract_table(&grid, &extract(&grid));
        assert_eq!(table.column("waiting").map(|c| c.values[0].clone()), Some(CellValue::Empty));
    }

    #[test]
    fn title_only_sheet_is_not_tabular() {
        let data = sheet(vec![vec!["Monthly A&E attendances"]]);
        let grid = Grid::new(&data);
        let structure = extract(&grid);
        assert_eq!(structure.kind, SheetKind::Empty);
        assert!(structure.columns.is_empty());
    }

    #[test]
    fn documentation_sheets_are_metadata() {
        let data = sheet(vec![
            vec!["Contents"],
            vec!["Table 1", "Referrals"],
            vec!["Table 2", "Waiting list"],
            vec!["Notes", "Definitions"],
        ]);
        let grid = Grid::new(&data);
        assert_eq!(classify_sheet(&grid), SheetKind::Metadata);
    }

    #[test]
    fn text_only_tables_are_unrecognised_with_a_diagnostic() {
        let data = sheet(vec![
            vec!["Org code", "Org name", "Region"],
            vec!["RJ1", "Guy's", "London"],
            vec!["RXH", "Brighton", "South East"],
            vec!["RYJ", "Imperial", "London"],
        ]);
        let grid = Grid::new(&data);
        let structure = extract(&grid);
        assert_eq!(structure.kind, SheetKind::Unrecognised);
        assert!(structure.diagnostic.is_some());
        assert!(structure.columns.is_empty());
    }

    #[test]
    fn spacer_columns_are_dropped_and_unnamed_columns_get_letters() {
        let data = sheet(vec![
            vec!["Org code", "", "Referrals", "", "Waiting"],
            vec!["RJ1", "", "10", "x1", "4"],
            vec!["RXH", "", "12", "x2", "5"],
            vec!["RYJ", "", "9", "x3", "6"],
        ]);
        let grid = Grid::new(&data);
        let structure = extract(&grid);
        assert_eq!(
            structure.column_names(),
            ["org_code", "referrals", "column_d", "waiting"]
        );
        assert_eq!(structure.columns[2].letter, "D");
    }
}
