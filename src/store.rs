//! Destination store: the four operations the loader needs and two backends.
//!
//! [`DestinationStore::write`] is all-or-nothing. The period delete and every
//! insert of one [`BulkWrite`] commit together or not at all.

use std::{
    collections::{BTreeMap, HashMap},
    path::Path,
    sync::{Arc, Mutex},
};

use chrono::NaiveDateTime;
use log::debug;
use rusqlite::{
    Connection, params_from_iter,
    types::{ToSql, ToSqlOutput, Value, ValueRef},
};
use thiserror::Error;

use crate::{
    grid::CellValue,
    inference::parse_temporal,
    patterns::strip_numeric_decoration,
    types::ColumnType,
};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("table not found: {0}")]
    UnknownTable(String),
    #[error("unknown column '{column}' in table '{table}'")]
    UnknownColumn { table: String, column: String },
    #[error("row {row} has {found} value(s) but {expected} column(s) were declared")]
    ColumnCountMismatch {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("store lock poisoned")]
    Poisoned,
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }

    fn to_sql(&self) -> String {
        format!(
            "{} {}",
            quote_identifier(&self.name),
            self.column_type.sql_type()
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Ddl {
    CreateTable { table: String, columns: Vec<ColumnDef> },
    AddColumn { table: String, column: ColumnDef },
}

impl Ddl {
    pub fn table(&self) -> &str {
        match self {
            Ddl::CreateTable { table, .. } | Ddl::AddColumn { table, .. } => table,
        }
    }

    pub fn to_sql(&self) -> String {
        match self {
            Ddl::CreateTable { table, columns } => format!(
                "CREATE TABLE IF NOT EXISTS {} ({})",
                quote_identifier(table),
                columns
                    .iter()
                    .map(ColumnDef::to_sql)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            Ddl::AddColumn { table, column } => format!(
                "ALTER TABLE {} ADD COLUMN {}",
                quote_identifier(table),
                column.to_sql()
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Boolean(bool),
    Timestamp(NaiveDateTime),
}

impl SqlValue {
    /// Converts one extracted cell for a column of the given type. Empty cells and
    /// empty strings in numeric columns become [`SqlValue::Null`]; text that does
    /// not fit the column type is kept as text.
    pub fn from_cell(value: &CellValue, column_type: ColumnType) -> SqlValue {
        if value.is_empty() {
            return SqlValue::Null;
        }
        match (value, column_type) {
            (CellValue::Number(number), ColumnType::Integer | ColumnType::BigInt)
                if number.fract() == 0.0 =>
            {
                SqlValue::Integer(*number as i64)
            }
            (CellValue::Number(number), _) if column_type.is_numeric() => SqlValue::Real(*number),
            (CellValue::Text(text), _) if column_type.is_numeric() => {
                parse_numeric(text, column_type).unwrap_or_else(|| SqlValue::Text(text.clone()))
            }
            (CellValue::Bool(flag), ColumnType::Boolean) => SqlValue::Boolean(*flag),
            (CellValue::Text(text), ColumnType::Boolean) => {
                match text.trim().to_ascii_lowercase().as_str() {
                    "true" | "yes" => SqlValue::Boolean(true),
                    "false" | "no" => SqlValue::Boolean(false),
                    _ => SqlValue::Text(text.clone()),
                }
            }
            (CellValue::DateTime(stamp), ColumnType::Timestamp) => SqlValue::Timestamp(*stamp),
            (CellValue::Text(text), ColumnType::Timestamp) => parse_temporal(text)
                .map(SqlValue::Timestamp)
                .unwrap_or_else(|| SqlValue::Text(text.clone())),
            (other, _) => SqlValue::Text(other.as_text()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    pub fn as_text(&self) -> String {
        match self {
            SqlValue::Null => String::new(),
            SqlValue::Integer(value) => value.to_string(),
            SqlValue::Real(value) => crate::grid::format_number(*value),
            SqlValue::Text(value) => value.clone(),
            SqlValue::Boolean(value) => value.to_string(),
            SqlValue::Timestamp(value) => value.format(TIMESTAMP_FORMAT).to_string(),
        }
    }
}

fn parse_numeric(text: &str, column_type: ColumnType) -> Option<SqlValue> {
    let cleaned = strip_numeric_decoration(text);
    if cleaned.is_empty() {
        return Some(SqlValue::Null);
    }
    if column_type != ColumnType::Real
        && let Ok(integer) = cleaned.parse::<i64>()
    {
        return Some(SqlValue::Integer(integer));
    }
    cleaned
        .parse::<f64>()
        .ok()
        .filter(|number| number.is_finite())
        .map(SqlValue::Real)
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Integer(value) => ToSqlOutput::Owned(Value::Integer(*value)),
            SqlValue::Real(value) => ToSqlOutput::Owned(Value::Real(*value)),
            SqlValue::Text(value) => ToSqlOutput::Borrowed(ValueRef::Text(value.as_bytes())),
            SqlValue::Boolean(value) => ToSqlOutput::Owned(Value::Integer(i64::from(*value))),
            SqlValue::Timestamp(value) => {
                ToSqlOutput::Owned(Value::Text(value.format(TIMESTAMP_FORMAT).to_string()))
            }
        })
    }
}

/// Rows of one period to replace.
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodFilter {
    pub column: String,
    pub value: String,
}

/// One load call's rows, in the column order used for the schema.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkWrite {
    pub table: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
    pub replace_period: Option<PeriodFilter>,
}

impl BulkWrite {
    fn check_row_widths(&self) -> StoreResult<()> {
        match self
            .rows
            .iter()
            .position(|row| row.len() != self.columns.len())
        {
            Some(row) => Err(StoreError::ColumnCountMismatch {
                row,
                expected: self.columns.len(),
                found: self.rows[row].len(),
            }),
            None => Ok(()),
        }
    }
}

pub trait DestinationStore {
    /// Column names in table order, `None` when the table does not exist.
    fn existing_columns(&self, table: &str) -> StoreResult<Option<Vec<String>>>;
    fn execute_ddl(&mut self, ddl: &Ddl) -> StoreResult<()>;
    /// Deletes rows of `replace_period` (when the table has that column) and
    /// inserts every row, atomically. Returns the number of rows inserted.
    fn write(&mut self, batch: &BulkWrite) -> StoreResult<usize>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryTable {
    pub columns: Vec<ColumnDef>,
    pub rows: Vec<BTreeMap<String, SqlValue>>,
}

impl MemoryTable {
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn values(&self, column: &str) -> Vec<SqlValue> {
        self.rows
            .iter()
            .map(|row| row.get(column).cloned().unwrap_or(SqlValue::Null))
            .collect()
    }
}

/// In-process store, used by tests and dry runs. A write builds the new table
/// state on a copy and swaps it in only when every row was accepted.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: BTreeMap<String, MemoryTable>,
    ddl_log: Vec<Ddl>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self, name: &str) -> Option<&MemoryTable> {
        self.tables.get(name)
    }

    pub fn ddl_log(&self) -> &[Ddl] {
        &self.ddl_log
    }
}

impl DestinationStore for MemoryStore {
    fn existing_columns(&self, table: &str) -> StoreResult<Option<Vec<String>>> {
        Ok(self.tables.get(table).map(MemoryTable::column_names))
    }

    fn execute_ddl(&mut self, ddl: &Ddl) -> StoreResult<()> {
        match ddl {
            Ddl::CreateTable { table, columns } => {
                self.tables
                    .entry(table.clone())
                    .or_insert_with(|| MemoryTable {
                        columns: columns.clone(),
                        rows: Vec::new(),
                    });
            }
            Ddl::AddColumn { table, column } => {
                let target = self
                    .tables
                    .get_mut(table)
                    .ok_or_else(|| StoreError::UnknownTable(table.clone()))?;
                if !target.columns.iter().any(|c| c.name == column.name) {
                    target.columns.push(column.clone());
                }
            }
        }
        self.ddl_log.push(ddl.clone());
        Ok(())
    }

    fn write(&mut self, batch: &BulkWrite) -> StoreResult<usize> {
        batch.check_row_widths()?;
        let current = self
            .tables
            .get(&batch.table)
            .ok_or_else(|| StoreError::UnknownTable(batch.table.clone()))?;
        if let Some(column) = batch
            .columns
            .iter()
            .find(|name| !current.columns.iter().any(|c| &c.name == *name))
        {
            return Err(StoreError::UnknownColumn {
                table: batch.table.clone(),
                column: column.clone(),
            });
        }

        let mut next = current.clone();
        if let Some(filter) = &batch.replace_period
            && next.columns.iter().any(|c| c.name == filter.column)
        {
            next.rows.retain(|row| {
                row.get(&filter.column).map(SqlValue::as_text).as_deref()
                    != Some(filter.value.as_str())
            });
        }
        for row in &batch.rows {
            next.rows.push(
                batch
                    .columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect(),
            );
        }
        self.tables.insert(batch.table.clone(), next);
        Ok(batch.rows.len())
    }
}

/// SQLite destination through `rusqlite`.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> StoreResult<Self> {
        Ok(Self {
            conn: Connection::open(path)?,
        })
    }

    pub fn in_memory() -> StoreResult<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    pub fn count_rows(&self, table: &str, period: Option<&PeriodFilter>) -> StoreResult<usize> {
        let count: i64 = match period {
            Some(filter) => self.conn.query_row(
                &format!(
                    "SELECT COUNT(*) FROM {} WHERE {} = ?1",
                    quote_identifier(table),
                    quote_identifier(&filter.column)
                ),
                [&filter.value],
                |row| row.get(0),
            )?,
            None => self.conn.query_row(
                &format!("SELECT COUNT(*) FROM {}", quote_identifier(table)),
                [],
                |row| row.get(0),
            )?,
        };
        Ok(count.max(0) as usize)
    }

    /// Text rendering of one column, in rowid order.
    pub fn column_text(&self, table: &str, column: &str) -> StoreResult<Vec<Option<String>>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT CAST({} AS TEXT) FROM {} ORDER BY rowid",
            quote_identifier(column),
            quote_identifier(table)
        ))?;
        let values = stmt
            .query_map([], |row| row.get::<_, Option<String>>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(values)
    }
}

impl DestinationStore for SqliteStore {
    fn existing_columns(&self, table: &str) -> StoreResult<Option<Vec<String>>> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({})", quote_identifier(table)))?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(if columns.is_empty() {
            None
        } else {
            Some(columns)
        })
    }

    fn execute_ddl(&mut self, ddl: &Ddl) -> StoreResult<()> {
        let sql = ddl.to_sql();
        debug!("DDL: {sql}");
        self.conn.execute_batch(&sql)?;
        Ok(())
    }

    fn write(&mut self, batch: &BulkWrite) -> StoreResult<usize> {
        batch.check_row_widths()?;
        let existing = self
            .existing_columns(&batch.table)?
            .ok_or_else(|| StoreError::UnknownTable(batch.table.clone()))?;

        let tx = self.conn.transaction()?;
        if let Some(filter) = &batch.replace_period
            && existing.contains(&filter.column)
        {
            let deleted = tx.execute(
                &format!(
                    "DELETE FROM {} WHERE {} = ?1",
                    quote_identifier(&batch.table),
                    quote_identifier(&filter.column)
                ),
                [&filter.value],
            )?;
            debug!(
                "Replaced {deleted} row(s) of {} = {} in {}",
                filter.column, filter.value, batch.table
            );
        }
        {
            let columns = batch
                .columns
                .iter()
                .map(|c| quote_identifier(c))
                .collect::<Vec<_>>()
                .join(", ");
            let placeholders = (1..=batch.columns.len())
                .map(|idx| format!("?{idx}"))
                .collect::<Vec<_>>()
                .join(", ");
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {} ({columns}) VALUES ({placeholders})",
                quote_identifier(&batch.table)
            ))?;
            for row in &batch.rows {
                stmt.execute(params_from_iter(row.iter()))?;
            }
        }
        tx.commit()?;
        Ok(batch.rows.len())
    }
}

/// One mutex per destination table. Ensure-schema and write for a table run
/// under its lock; different tables proceed independently.
#[derive(Debug, Default)]
pub struct TableLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TableLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table<T, F>(&self, table: &str, f: F) -> StoreResult<T>
    where
        F: FnOnce() -> T,
    {
        let lock = {
            let mut locks = self.locks.lock().map_err(|_| StoreError::Poisoned)?;
            Arc::clone(locks.entry(table.to_string()).or_default())
        };
        let _guard = lock.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(f())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;
    use crate::types::TextWidth;

    fn create(table: &str) -> Ddl {
        Ddl::CreateTable {
            table: table.to_string(),
            columns: vec![
                ColumnDef::new("org_code", ColumnType::Text(TextWidth::Code)),
                ColumnDef::new("total", ColumnType::Integer),
                ColumnDef::new("period", ColumnType::Text(TextWidth::Short)),
            ],
        }
    }

    fn batch(table: &str, period: &str, rows: Vec<Vec<SqlValue>>) -> BulkWrite {
        BulkWrite {
            table: table.to_string(),
            columns: vec!["org_code".into(), "total".into(), "period".into()],
            rows,
            replace_period: Some(PeriodFilter {
                column: "period".into(),
                value: period.into(),
            }),
        }
    }

    fn row(code: &str, total: i64, period: &str) -> Vec<SqlValue> {
        vec![
            SqlValue::Text(code.into()),
            SqlValue::Integer(total),
            SqlValue::Text(period.into()),
        ]
    }

    #[test]
    fn ddl_quotes_identifiers() {
        assert_eq!(
            create("tbl_ae").to_sql(),
            "CREATE TABLE IF NOT EXISTS \"tbl_ae\" (\"org_code\" VARCHAR(20), \"total\" INTEGER, \"period\" VARCHAR(50))"
        );
        let add = Ddl::AddColumn {
            table: "t".into(),
            column: ColumnDef::new("we\"ird", ColumnType::Real),
        };
        assert_eq!(add.to_sql(), "ALTER TABLE \"t\" ADD COLUMN \"we\"\"ird\" REAL");
    }

    #[test]
    fn cells_convert_by_column_type() {
        let int = ColumnType::Integer;
        assert_eq!(SqlValue::from_cell(&CellValue::text(""), int), SqlValue::Null);
        assert_eq!(SqlValue::from_cell(&CellValue::text("1,204"), int), SqlValue::Integer(1204));
        assert_eq!(SqlValue::from_cell(&CellValue::Number(3.0), int), SqlValue::Integer(3));
        assert_eq!(
            SqlValue::from_cell(&CellValue::text("45%"), ColumnType::Real),
            SqlValue::Real(45.0)
        );
        assert_eq!(
            SqlValue::from_cell(&CellValue::Number(7.0), ColumnType::TEXT),
            SqlValue::Text("7".into())
        );
        assert_eq!(
            SqlValue::from_cell(&CellValue::text("yes"), ColumnType::Boolean),
            SqlValue::Boolean(true)
        );
    }

    #[test]
    fn memory_write_replaces_the_period() {
        let mut store = MemoryStore::new();
        store.execute_ddl(&create("t")).expect("create");
        store
            .write(&batch("t", "2024-11", vec![row("RJ1", 1, "2024-11"), row("RXH", 2, "2024-11")]))
            .expect("first write");
        store
            .write(&batch("t", "2024-12", vec![row("RJ1", 5, "2024-12")]))
            .expect("second period");
        store
            .write(&batch("t", "2024-11", vec![row("RJ1", 3, "2024-11")]))
            .expect("rewrite");
        let table = store.table("t").expect("table");
        assert_eq!(table.rows.len(), 2);
        assert!(table.values("total").contains(&SqlValue::Integer(3)));
    }

    #[test]
    fn memory_write_is_all_or_nothing() {
        let mut store = MemoryStore::new();
        store.execute_ddl(&create("t")).expect("create");
        store
            .write(&batch("t", "2024-11", vec![row("RJ1", 1, "2024-11")]))
            .expect("write");
        let bad = batch(
            "t",
            "2024-11",
            vec![row("RXH", 2, "2024-11"), vec![SqlValue::Null]],
        );
        assert!(matches!(
            store.write(&bad),
            Err(StoreError::ColumnCountMismatch { row: 1, .. })
        ));
        assert_eq!(store.table("t").map(|t| t.rows.len()), Some(1));
    }

    #[test]
    fn sqlite_write_rolls_back_the_period_delete_on_failure() {
        let mut store = SqliteStore::in_memory().expect("open");
        store.execute_ddl(&create("t")).expect("create");
        store
            .write(&batch("t", "2024-11", vec![row("RJ1", 1, "2024-11")]))
            .expect("write");
        let mut bad = batch("t", "2024-11", vec![vec![
            SqlValue::Text("RXH".into()),
            SqlValue::Integer(2),
            SqlValue::Text("2024-11".into()),
            SqlValue::Null,
        ]]);
        bad.columns.push("missing".into());
        assert!(store.write(&bad).is_err());
        assert_eq!(store.count_rows("t", None).expect("count"), 1);
    }

    #[test]
    fn sqlite_reports_columns_and_adds_new_ones() {
        let mut store = SqliteStore::in_memory().expect("open");
        assert_eq!(store.existing_columns("t").expect("columns"), None);
        store.execute_ddl(&create("t")).expect("create");
        store
            .execute_ddl(&Ddl::AddColumn {
                table: "t".into(),
                column: ColumnDef::new("waiting", ColumnType::Integer),
            })
            .expect("alter");
        assert_eq!(
            store.existing_columns("t").expect("columns"),
            Some(vec![
                "org_code".to_string(),
                "total".to_string(),
                "period".to_string(),
                "waiting".to_string()
            ])
        );
    }

    #[test]
    fn table_locks_serialise_work_per_table() {
        let locks = TableLocks::new();
        let busy = AtomicBool::new(false);
        let overlaps = AtomicUsize::new(0);
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..25 {
                        locks
                            .with_table("tbl", || {
                                if busy.swap(true, Ordering::SeqCst) {
                                    overlaps.fetch_add(1, Ordering::SeqCst);
                                }
                                std::thread::yield_now();
                                busy.store(false, Ordering::SeqCst);
                            })
                            .expect("lock");
                    }
                });
            }
        });
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }
}
