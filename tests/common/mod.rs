#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use sheetwarp::grid::{CellValue, SheetData};
use tempfile::{TempDir, tempdir};

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }
}

/// Cells as a spreadsheet reader would type them: numbers stay numbers.
pub fn typed(row: &[&str]) -> Vec<CellValue> {
    row.iter()
        .map(|value| match value.parse::<f64>() {
            Ok(number) => CellValue::Number(number),
            Err(_) => CellValue::from(*value),
        })
        .collect()
}

/// Cells as a CSV reader hands them over: everything is text.
pub fn untyped(row: &[&str]) -> Vec<CellValue> {
    row.iter().map(|value| CellValue::from(*value)).collect()
}

pub fn typed_sheet(name: &str, rows: &[&[&str]]) -> SheetData {
    SheetData::from_rows(name, rows.iter().map(|row| typed(row)).collect())
}

pub fn untyped_sheet(name: &str, rows: &[&[&str]]) -> SheetData {
    SheetData::from_rows(name, rows.iter().map(|row| untyped(row)).collect())
}

/// A small provider-level publication: title, header, four trusts, source note.
pub fn provider_csv(extra_column: bool) -> String {
    let mut csv = String::from("A&E attendances by provider,,,\n,,,\n");
    if extra_column {
        csv.push_str("Org Code,Org Name,Total Attendances,Admitted,Over 4 Hours\n");
    } else {
        csv.push_str("Org Code,Org Name,Total Attendances,Admitted\n");
    }
    for (idx, code) in ["RJ1", "RXH", "R0A", "RYJ"].iter().enumerate() {
        let total = (idx + 1) * 100;
        let admitted = (idx + 1) * 10;
        if extra_column {
            csv.push_str(&format!("{code},Trust {idx},{total},{admitted},{}\n", idx + 2));
        } else {
            csv.push_str(&format!("{code},Trust {idx},{total},{admitted}\n"));
        }
    }
    csv.push_str(",,,\nSource: NHS England,,,\n");
    csv
}
