//! Workbook readers and the per-batch workbook cache.
//!
//! Spreadsheet formats go through `calamine`; `.csv`/`.tsv` files are exposed as
//! a one-sheet workbook named after the file stem. Every sheet is handed to the
//! rest of the crate as [`SheetData`], with merge ranges in absolute grid
//! coordinates.

use std::{
    collections::HashMap,
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result, anyhow};
use calamine::{Data, Dimensions, Range, Reader, Sheets, open_workbook_auto};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use encoding_rs::Encoding;
use log::{debug, warn};

use crate::{
    grid::{CellValue, MergeRange, SheetData, SheetSource},
    inference::parse_temporal,
    io_utils,
};

#[derive(Debug)]
pub struct Workbook {
    path: PathBuf,
    sheets: Vec<Arc<SheetData>>,
}

impl Workbook {
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_encoding(path, encoding_rs::UTF_8)
    }

    /// `encoding` applies to delimited files only.
    pub fn open_with_encoding(path: &Path, encoding: &'static Encoding) -> Result<Self> {
        let sheets = if io_utils::is_delimited_path(path) {
            vec![read_delimited(path, encoding)?]
        } else {
            read_spreadsheet(path)?
        };
        debug!("Opened {path:?} with {} sheet(s)", sheets.len());
        Ok(Self {
            path: path.to_path_buf(),
            sheets: sheets.into_iter().map(Arc::new).collect(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn sheet_names(&self) -> Vec<String> {
        self.sheets
            .iter()
            .map(|sheet| sheet.name().to_string())
            .collect()
    }

    pub fn sheets(&self) -> &[Arc<SheetData>] {
        &self.sheets
    }

    pub fn sheet(&self, name: &str) -> Option<Arc<SheetData>> {
        self.sheets
            .iter()
            .find(|sheet| sheet.name() == name)
            .cloned()
    }
}

fn read_delimited(path: &Path, encoding: &'static Encoding) -> Result<SheetData> {
    let delimiter = io_utils::resolve_input_delimiter(path, None);
    let rows = io_utils::read_delimited_rows(path, delimiter, encoding)?;
    let name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "Sheet1".to_string());
    Ok(SheetData::from_rows(
        name,
        rows.into_iter()
            .map(|row| row.into_iter().map(CellValue::from).collect())
            .collect(),
    ))
}

fn read_spreadsheet(path: &Path) -> Result<Vec<SheetData>> {
    let mut workbook: Sheets<BufReader<File>> =
        open_workbook_auto(path).with_context(|| format!("Opening workbook {path:?}"))?;
    let merges = load_merges(&mut workbook, path);
    let mut sheets = Vec::new();
    for name in workbook.sheet_names() {
        let range = workbook
            .worksheet_range(&name)
            .with_context(|| format!("Reading sheet '{name}' of {path:?}"))?;
        let mut sheet = sheet_from_range(&name, &range);
        for dims in merges.get(&name).into_iter().flatten() {
            sheet.add_merge(merge_range(dims));
        }
        sheets.push(sheet);
    }
    Ok(sheets)
}

/// Merge ranges by sheet name. Formats without merge metadata yield none; a
/// failure to read them is logged and the sheets load without merges.
fn load_merges(workbook: &mut Sheets<BufReader<File>>, path: &Path) -> HashMap<String, Vec<Dimensions>> {
    let mut merges: HashMap<String, Vec<Dimensions>> = HashMap::new();
    match workbook {
        Sheets::Xlsx(xlsx) => {
            if let Err(err) = xlsx.load_merged_regions() {
                warn!("Merged cells of {path:?} not readable: {err}");
                return merges;
            }
            for (sheet, _, dims) in xlsx.merged_regions() {
                merges.entry(sheet.clone()).or_default().push(*dims);
            }
        }
        Sheets::Xls(xls) => {
            for name in xls.sheet_names() {
                if let Some(dims) = xls.worksheet_merge_cells(&name) {
                    merges.insert(name, dims);
                }
            }
        }
        _ => {}
    }
    merges
}

fn merge_range(dims: &Dimensions) -> MergeRange {
    MergeRange::new(
        dims.start.0 as usize,
        dims.start.1 as usize,
        dims.end.0 as usize,
        dims.end.1 as usize,
    )
}

fn sheet_from_range(name: &str, range: &Range<Data>) -> SheetData {
    let mut sheet = SheetData::new(name);
    let (row_offset, col_offset) = range.start().unwrap_or((0, 0));
    for (row, col, data) in range.used_cells() {
        let value = convert_cell(data);
        if value != CellValue::Empty {
            sheet.set(
                row + row_offset as usize,
                col + col_offset as usize,
                value,
            );
        }
    }
    sheet
}

fn convert_cell(data: &Data) -> CellValue {
    match data {
        Data::Empty => CellValue::Empty,
        Data::Int(value) => CellValue::Number(*value as f64),
        Data::Float(value) => CellValue::Number(*value),
        Data::String(value) => CellValue::from(value.as_str()),
        Data::Bool(value) => CellValue::Bool(*value),
        Data::DateTime(value) => excel_serial_to_datetime(value.as_f64())
            .map(CellValue::DateTime)
            .unwrap_or(CellValue::Number(value.as_f64())),
        Data::DateTimeIso(value) => parse_temporal(value)
            .map(CellValue::DateTime)
            .unwrap_or_else(|| CellValue::from(value.as_str())),
        Data::DurationIso(value) => CellValue::from(value.as_str()),
        Data::Error(err) => CellValue::Text(format!("#{err:?}")),
    }
}

/// Excel's 1900 date system, counted from 1899-12-30 so serial 60 lands where
/// Excel puts it.
pub fn excel_serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    if !serial.is_finite() || serial < 0.0 {
        return None;
    }
    let base = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let millis = (serial * 86_400_000.0).round() as i64;
    base.checked_add_signed(Duration::milliseconds(millis))
}

/// Open workbooks for one batch, keyed by path. The owner decides when files
/// are released; nothing is shared across caches.
#[derive(Debug)]
pub struct WorkbookCache {
    encoding: &'static Encoding,
    books: HashMap<PathBuf, Arc<Workbook>>,
}

impl Default for WorkbookCache {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkbookCache {
    pub fn new() -> Self {
        Self::with_encoding(encoding_rs::UTF_8)
    }

    pub fn with_encoding(encoding: &'static Encoding) -> Self {
        Self {
            encoding,
            books: HashMap::new(),
        }
    }

    pub fn open(&mut self, path: &Path) -> Result<Arc<Workbook>> {
        if let Some(book) = self.books.get(path) {
            return Ok(Arc::clone(book));
        }
        let book = Arc::new(Workbook::open_with_encoding(path, self.encoding)?);
        self.books.insert(path.to_path_buf(), Arc::clone(&book));
        Ok(book)
    }

    pub fn sheet(&mut self, path: &Path, name: &str) -> Result<Arc<SheetData>> {
        let book = self.open(path)?;
        book.sheet(name)
            .ok_or_else(|| anyhow!("Sheet '{name}' not found in {path:?}"))
    }

    /// Releases one file. Returns whether it was cached.
    pub fn close(&mut self, path: &Path) -> bool {
        self.books.remove(path).is_some()
    }

    pub fn clear(&mut self) {
        self.books.clear();
    }

    pub fn len(&self) -> usize {
        self.books.len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }
}
