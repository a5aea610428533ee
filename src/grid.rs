//! Read-only cell access over a single worksheet.
//!
//! A [`SheetSource`] is whatever the workbook reader produced for one sheet: typed
//! cells plus merge ranges whose value lives only in the top-left anchor cell. The
//! [`Grid`] wraps a source for the duration of one parse and
//!
//! - resolves merged cells to their anchor value,
//! - caches resolved rows lazily, keyed by row index, so sequential scans do not
//!   re-resolve merges and nothing is materialised for rows that are never read.
//!
//! Coordinates are zero-based `(row, column)` throughout.

use std::{
    cell::RefCell,
    collections::HashMap,
    fmt,
    rc::Rc,
};

use chrono::{NaiveDateTime, Timelike};

static EMPTY_CELL: CellValue = CellValue::Empty;

#[derive(Debug, Clone, PartialEq, Default)]
pub enum CellValue {
    #[default]
    Empty,
    Number(f64),
    Text(String),
    Bool(bool),
    DateTime(NaiveDateTime),
}

impl CellValue {
    pub fn text(value: impl Into<String>) -> Self {
        CellValue::Text(value.into())
    }

    /// Whitespace-only text counts as empty.
    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(text) => text.trim().is_empty(),
            _ => false,
        }
    }

    pub fn is_native_numeric(&self) -> bool {
        matches!(self, CellValue::Number(_))
    }

    pub fn is_native_text(&self) -> bool {
        matches!(self, CellValue::Text(text) if !text.trim().is_empty())
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Number(value) => Some(*value),
            _ => None,
        }
    }

    /// Display form used for header text, pattern matching and CSV-like sampling.
    /// Line breaks inside cells collapse to a single space.
    pub fn as_text(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Number(value) => format_number(*value),
            CellValue::Text(text) => text
                .split(['\n', '\r'])
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .collect::<Vec<_>>()
                .join(" "),
            CellValue::Bool(flag) => flag.to_string(),
            CellValue::DateTime(dt) => {
                if dt.hour() == 0 && dt.minute() == 0 && dt.second() == 0 {
                    dt.format("%Y-%m-%d").to_string()
                } else {
                    dt.format("%Y-%m-%d %H:%M:%S").to_string()
                }
            }
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_text())
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        if value.is_empty() {
            CellValue::Empty
        } else {
            CellValue::Text(value.to_string())
        }
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        if value.is_empty() {
            CellValue::Empty
        } else {
            CellValue::Text(value)
        }
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        CellValue::Number(value as f64)
    }
}

impl From<bool> for CellValue {
    fn from(value: bool) -> Self {
        CellValue::Bool(value)
    }
}

pub(crate) fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

/// Rectangular merged region, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeRange {
    pub first_row: usize,
    pub first_col: usize,
    pub last_row: usize,
    pub last_col: usize,
}

impl MergeRange {
    pub fn new(first_row: usize, first_col: usize, last_row: usize, last_col: usize) -> Self {
        Self {
            first_row: first_row.min(last_row),
            first_col: first_col.min(last_col),
            last_row: first_row.max(last_row),
            last_col: first_col.max(last_col),
        }
    }

    pub fn contains(&self, row: usize, col: usize) -> bool {
        (self.first_row..=self.last_row).contains(&row)
            && (self.first_col..=self.last_col).contains(&col)
    }

    pub fn is_horizontal(&self) -> bool {
        self.last_col > self.first_col
    }

    pub fn anchor(&self) -> (usize, usize) {
        (self.first_row, self.first_col)
    }
}

/// What a workbook reader hands over for one sheet.
pub trait SheetSource {
    fn name(&self) -> &str;
    fn height(&self) -> usize;
    fn width(&self) -> usize;
    /// Raw cell; out-of-range coordinates read as [`CellValue::Empty`].
    fn cell(&self, row: usize, col: usize) -> &CellValue;
    fn merges(&self) -> &[MergeRange];
}

/// In-memory sheet, used by the workbook readers and by tests.
#[derive(Debug, Clone, Default)]
pub struct SheetData {
    name: String,
    rows: Vec<Vec<CellValue>>,
    width: usize,
    merges: Vec<MergeRange>,
}

impl SheetData {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn from_rows(name: impl Into<String>, rows: Vec<Vec<CellValue>>) -> Self {
        let mut sheet = Self::new(name);
        for (row_idx, row) in rows.into_iter().enumerate() {
            for (col_idx, value) in row.into_iter().enumerate() {
                sheet.set(row_idx, col_idx, value);
            }
        }
        sheet
    }

    pub fn set(&mut self, row: usize, col: usize, value: CellValue) {
        if value == CellValue::Empty && row >= self.rows.len() {
            return;
        }
        if self.rows.len() <= row {
            self.rows.resize_with(row + 1, Vec::new);
        }
        let cells = &mut self.rows[row];
        if cells.len() <= col {
            if value == CellValue::Empty {
                return;
            }
            cells.resize(col + 1, CellValue::Empty);
        }
        cells[col] = value;
        self.width = self.width.max(cells.len());
    }

    pub fn add_merge(&mut self, range: MergeRange) {
        self.merges.push(range);
    }

    pub fn with_merge(mut self, range: MergeRange) -> Self {
        self.add_merge(range);
        self
    }
}

impl SheetSource for SheetData {
    fn name(&self) -> &str {
        &self.name
    }

    fn height(&self) -> usize {
        self.rows.len()
    }

    fn width(&self) -> usize {
        self.width
    }

    fn cell(&self, row: usize, col: usize) -> &CellValue {
        self.rows
            .get(row)
            .and_then(|cells| cells.get(col))
            .unwrap_or(&EMPTY_CELL)
    }

    fn merges(&self) -> &[MergeRange] {
        &self.merges
    }
}

/// Merge-resolving, row-caching view over one sheet.
pub struct Grid<'a> {
    source: &'a dyn SheetSource,
    rows: RefCell<HashMap<usize, Rc<[CellValue]>>>,
}

impl<'a> Grid<'a> {
    pub fn new(source: &'a dyn SheetSource) -> Self {
        Self {
            source,
            rows: RefCell::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        self.source.name()
    }

    pub fn height(&self) -> usize {
        self.source.height()
    }

    pub fn width(&self) -> usize {
        self.source.width()
    }

    pub fn merges(&self) -> &[MergeRange] {
        self.source.merges()
    }

    /// Raw cell, without merge resolution.
    pub fn raw(&self, row: usize, col: usize) -> &CellValue {
        self.source.cell(row, col)
    }

    /// Resolved row: every cell inside a merge carries the anchor's value.
    /// Rows past the end of the sheet are all empty and never cached.
    pub fn row(&self, row: usize) -> Rc<[CellValue]> {
        let width = self.width();
        if row >= self.height() {
            return (0..width).map(|_| CellValue::Empty).collect();
        }
        if let Some(cached) = self.rows.borrow().get(&row) {
            return Rc::clone(cached);
        }
        let merges = self.merges();
        let resolved: Rc<[CellValue]> = (0..width)
            .map(|col| match merges.iter().find(|m| m.contains(row, col)) {
                Some(merge) => {
                    let (anchor_row, anchor_col) = merge.anchor();
                    self.source.cell(anchor_row, anchor_col).clone()
                }
                None => self.source.cell(row, col).clone(),
            })
            .collect();
        self.rows.borrow_mut().insert(row, Rc::clone(&resolved));
        resolved
    }

    pub fn value(&self, row: usize, col: usize) -> CellValue {
        self.row(row).get(col).cloned().unwrap_or_default()
    }

    pub fn text(&self, row: usize, col: usize) -> String {
        self.row(row)
            .get(col)
            .map(CellValue::as_text)
            .unwrap_or_default()
    }

    /// Count of raw, non-empty cells among the first `limit` columns.
    pub fn filled_count(&self, row: usize, limit: usize) -> usize {
        (0..self.width().min(limit))
            .filter(|&col| !self.raw(row, col).is_empty())
            .count()
    }

    /// Like [`Grid::filled_count`] but merged cells count at every position they cover.
    pub fn resolved_filled_count(&self, row: usize, limit: usize) -> usize {
        self.row(row)
            .iter()
            .take(limit)
            .filter(|value| !value.is_empty())
            .count()
    }

    pub fn is_blank_row(&self, row: usize, limit: usize) -> bool {
        self.filled_count(row, limit) == 0
    }

    /// True when a merge spanning two or more columns starts on this row.
    pub fn opens_horizontal_merge(&self, row: usize) -> bool {
        self.merges()
            .iter()
            .any(|m| m.first_row == row && m.is_horizontal())
    }

    pub fn cached_rows(&self) -> usize {
        self.rows.borrow().len()
    }
}
