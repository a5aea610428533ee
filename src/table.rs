use std::borrow::Cow;
use std::fmt::Write as _;

use anyhow::{Result, ensure};

use crate::{grid::CellValue, patterns, types::ColumnType};

/// One column of an extracted table, values sized to the data range.
#[derive(Debug, Clone, PartialEq)]
pub struct TableColumn {
    pub name: String,
    pub label: String,
    pub column_type: Option<ColumnType>,
    pub values: Vec<CellValue>,
}

impl TableColumn {
    pub fn new(name: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            column_type: None,
            values: Vec::new(),
        }
    }

    pub fn with_type(mut self, column_type: ColumnType) -> Self {
        self.column_type = Some(column_type);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.values.iter().all(CellValue::is_empty)
    }

    pub fn non_empty_values(&self) -> impl Iterator<Item = &CellValue> {
        self.values.iter().filter(|value| !value.is_empty())
    }
}

/// Ordered `(name, type, values)` columns handed from the extractor to the grain
/// classifier and the loader. Every column holds exactly `row_count` values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedTable {
    sheet_name: String,
    columns: Vec<TableColumn>,
    row_count: usize,
}

impl ExtractedTable {
    pub fn new(sheet_name: impl Into<String>) -> Self {
        Self {
            sheet_name: sheet_name.into(),
            ..Self::default()
        }
    }

    /// Builds a table with untyped columns whose labels equal their names.
    pub fn from_rows(
        sheet_name: impl Into<String>,
        headers: &[&str],
        rows: Vec<Vec<CellValue>>,
    ) -> Result<Self> {
        let mut table = Self::new(sheet_name);
        table.columns = headers
            .iter()
            .map(|header| TableColumn::new(*header, *header))
            .collect();
        for row in rows {
            table.push_row(row)?;
        }
        Ok(table)
    }

    pub fn with_columns(sheet_name: impl Into<String>, columns: Vec<TableColumn>) -> Result<Self> {
        let row_count = columns.first().map(|c| c.values.len()).unwrap_or_default();
        for column in &columns {
            ensure!(
                column.values.len() == row_count,
                "Column '{}' holds {} value(s) but the table has {} row(s)",
                column.name,
                column.values.len(),
                row_count
            );
        }
        Ok(Self {
            sheet_name: sheet_name.into(),
            columns,
            row_count,
        })
    }

    /// Columns already hold `row_count` values each.
    pub(crate) fn from_parts(
        sheet_name: String,
        columns: Vec<TableColumn>,
        row_count: usize,
    ) -> Self {
        debug_assert!(columns.iter().all(|c| c.values.len() == row_count));
        Self {
            sheet_name,
            columns,
            row_count,
        }
    }

    pub fn push_row(&mut self, values: Vec<CellValue>) -> Result<()> {
        ensure!(
            values.len() == self.columns.len(),
            "Row {} has {} value(s) but the table has {} column(s)",
            self.row_count,
            values.len(),
            self.columns.len()
        );
        for (column, value) in self.columns.iter_mut().zip(values) {
            column.values.push(value);
        }
        self.row_count += 1;
        Ok(())
    }

    pub fn sheet_name(&self) -> &str {
        &self.sheet_name
    }

    pub fn columns(&self) -> &[TableColumn] {
        &self.columns
    }

    pub fn into_columns(self) -> Vec<TableColumn> {
        self.columns
    }

    pub fn column(&self, name: &str) -> Option<&TableColumn> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|column| column.name.clone()).collect()
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.row_count == 0 || self.columns.is_empty()
    }

    pub fn row(&self, index: usize) -> Vec<&CellValue> {
        self.columns
            .iter()
            .map(|column| &column.values[index])
            .collect()
    }

    fn row_is_empty(&self, index: usize) -> bool {
        self.columns
            .iter()
            .all(|column| column.values[index].is_empty())
    }

    /// Removes rows where every column is empty. Returns how many were dropped.
    pub fn drop_empty_rows(&mut self) -> usize {
        let keep: Vec<bool> = (0..self.row_count)
            .map(|index| !self.row_is_empty(index))
            .collect();
        let kept = keep.iter().filter(|flag| **flag).count();
        if kept == self.row_count {
            return 0;
        }
        for column in &mut self.columns {
            let mut flags = keep.iter();
            column.values.retain(|_| flags.next().copied().unwrap_or(false));
        }
        let dropped = self.row_count - kept;
        self.row_count = kept;
        dropped
    }

    /// Keeps columns for which `keep` returns true. Returns the dropped names.
    pub fn retain_columns<F>(&mut self, mut keep: F) -> Vec<String>
    where
        F: FnMut(&TableColumn) -> bool,
    {
        let mut dropped = Vec::new();
        self.columns.retain(|column| {
            let retained = keep(column);
            if !retained {
                dropped.push(column.name.clone());
            }
            retained
        });
        dropped
    }

    /// Fixed-width text rendering of the first `limit` rows.
    pub fn render_preview(&self, limit: usize) -> String {
        let headers = self.column_names();
        let rows = (0..self.row_count.min(limit))
            .map(|index| {
                self.row(index)
                    .into_iter()
                    .map(CellValue::as_text)
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();
        render_table(&headers, &rows)
    }
}

/// Column-aligned plain text: a header line, a dashed rule, then the rows.
/// Columns whose cells are all numeric are right-aligned.
pub fn render_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let layout: Vec<(usize, bool)> = (0..headers.len())
        .map(|idx| {
            let cells = rows.iter().filter_map(|row| row.get(idx));
            let width = cells
                .clone()
                .map(|cell| display_width(cell))
                .chain(std::iter::once(display_width(&headers[idx])))
                .max()
                .unwrap_or_default()
                .max(3);
            let numeric = rows.iter().any(|row| row.get(idx).is_some_and(|c| !c.is_empty()))
                && cells.filter(|cell| !cell.is_empty()).all(|cell| patterns::parses_as_number(cell));
            (width, numeric)
        })
        .collect();

    let mut output = String::new();
    let _ = writeln!(output, "{}", format_line(headers, &layout, false));
    let rule: Vec<String> = layout.iter().map(|(width, _)| "-".repeat(*width)).collect();
    let _ = writeln!(output, "{}", format_line(&rule, &layout, false));
    for row in rows {
        let _ = writeln!(output, "{}", format_line(row, &layout, true));
    }
    output
}

fn format_line(values: &[String], layout: &[(usize, bool)], align_numbers: bool) -> String {
    let line = layout
        .iter()
        .enumerate()
        .map(|(idx, &(width, numeric))| {
            let cell = flatten_cell(values.get(idx).map(String::as_str).unwrap_or_default());
            if align_numbers && numeric {
                format!("{cell:>width$}")
            } else {
                format!("{cell:<width$}")
            }
        })
        .collect::<Vec<_>>()
        .join("  ");
    line.trim_end().to_string()
}

fn display_width(value: &str) -> usize {
    value.chars().count()
}

fn flatten_cell(value: &str) -> Cow<'_, str> {
    if value.contains(['\n', '\r', '\t']) {
        Cow::Owned(value.replace(['\n', '\r', '\t'], " "))
    } else {
        Cow::Borrowed(value)
    }
}
