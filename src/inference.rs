//! Column type inference.
//!
//! Two paths share one entry point, [`infer_column_type`]:
//!
//! - **Native**: the workbook reader already typed the cells. Numbers mixed with
//!   text widen to text; numbers alone are real when any value is fractional,
//!   otherwise integer or bigint by magnitude.
//! - **Sampled**: every cell is text (CSV input, or numbers stored as text). The
//!   first [`SAMPLE_LIMIT`] clean values are parsed and the column is numeric when
//!   at least [`NUMERIC_RATIO`] of them parse as numbers.
//!
//! Column-name hints run before either path. Publisher suppression tokens are
//! ignored everywhere: they become empty cells in the extracted rows.

use chrono::{NaiveDate, NaiveDateTime};

use crate::{
    grid::CellValue,
    patterns::{
        self, BOUNDED_TEXT_HINTS, CODE_HINTS, LONG_TEXT_HINTS, RATE_HINTS, is_measure_name,
        name_has_any,
    },
    types::{ColumnType, TextWidth},
};

pub const SAMPLE_LIMIT: usize = 25;
pub const NUMERIC_RATIO: f64 = 0.7;

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y", "%Y/%m/%d"];
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%d/%m/%Y %H:%M"];

pub fn infer_column_type(name: &str, values: &[CellValue]) -> ColumnType {
    let clean: Vec<&CellValue> = values.iter().filter(|value| is_meaningful(value)).collect();
    if clean.is_empty() {
        return ColumnType::TEXT;
    }
    let max_len = clean
        .iter()
        .map(|value| value.as_text().chars().count())
        .max()
        .unwrap_or_default();
    if let Some(hinted) = type_from_name(name, max_len) {
        return hinted;
    }

    let mut native = NativeKinds::default();
    for value in &clean {
        native.observe(value);
    }
    match native.decide(max_len) {
        Some(decided) => decided,
        None => {
            let mut candidate = TypeCandidate::new();
            for value in clean.iter().take(SAMPLE_LIMIT) {
                candidate.update(&value.as_text());
            }
            candidate.decide(name)
        }
    }
}

fn is_meaningful(value: &CellValue) -> bool {
    match value {
        CellValue::Empty => false,
        CellValue::Text(text) => !text.trim().is_empty() && !patterns::is_suppressed(text),
        _ => true,
    }
}

/// Name hints never apply to measure-like names: `referrals_per_month` stays numeric.
fn type_from_name(name: &str, max_len: usize) -> Option<ColumnType> {
    if name_has_any(name, LONG_TEXT_HINTS) {
        return Some(ColumnType::Text(TextWidth::Long));
    }
    if is_measure_name(name) {
        return None;
    }
    if name_has_any(name, BOUNDED_TEXT_HINTS) {
        return Some(ColumnType::Text(bounded_width(max_len)));
    }
    if name_has_any(name, CODE_HINTS) {
        let width = if max_len <= 20 {
            TextWidth::Code
        } else {
            bounded_width(max_len)
        };
        return Some(ColumnType::Text(width));
    }
    None
}

fn bounded_width(max_len: usize) -> TextWidth {
    TextWidth::for_length(max_len).min(TextWidth::Medium)
}

#[derive(Debug, Default)]
struct NativeKinds {
    numbers: usize,
    fractional: bool,
    outside_i32: bool,
    text: usize,
    bools: usize,
    dates: usize,
}

impl NativeKinds {
    fn observe(&mut self, value: &CellValue) {
        match value {
            CellValue::Number(number) => {
                self.numbers += 1;
                if number.fract() != 0.0 {
                    self.fractional = true;
                }
                if *number > i32::MAX as f64 || *number < i32::MIN as f64 {
                    self.outside_i32 = true;
                }
            }
            CellValue::Text(_) => self.text += 1,
            CellValue::Bool(_) => self.bools += 1,
            CellValue::DateTime(_) => self.dates += 1,
            CellValue::Empty => {}
        }
    }

    /// `None` means every value was text and the sampled path must decide.
    fn decide(&self, max_len: usize) -> Option<ColumnType> {
        let kinds = [self.numbers, self.text, self.bools, self.dates]
            .iter()
            .filter(|count| **count > 0)
            .count();
        if kinds > 1 {
            return Some(ColumnType::Text(TextWidth::for_length(max_len)));
        }
        if self.numbers > 0 {
            return Some(if self.fractional {
                ColumnType::Real
            } else if self.outside_i32 {
                ColumnType::BigInt
            } else {
                ColumnType::Integer
            });
        }
        if self.bools > 0 {
            return Some(ColumnType::Boolean);
        }
        if self.dates > 0 {
            return Some(ColumnType::Timestamp);
        }
        None
    }
}

struct TypeCandidate {
    total: usize,
    numeric: usize,
    fractional: usize,
    percent_signs: usize,
    outside_i32: bool,
    boolean: usize,
    temporal: usize,
    max_len: usize,
}

impl TypeCandidate {
    fn new() -> Self {
        Self {
            total: 0,
            numeric: 0,
            fractional: 0,
            percent_signs: 0,
            outside_i32: false,
            boolean: 0,
            temporal: 0,
            max_len: 0,
        }
    }

    fn update(&mut self, value: &str) {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return;
        }
        self.total += 1;
        self.max_len = self.max_len.max(trimmed.chars().count());

        let lowered = trimmed.to_ascii_lowercase();
        if matches!(lowered.as_str(), "true" | "false" | "yes" | "no") {
            self.boolean += 1;
            return;
        }
        if parse_temporal(trimmed).is_some() {
            self.temporal += 1;
            return;
        }
        // Ranges such as "18 - 24" or "1 to 5" are labels, not numbers.
        if trimmed.contains(" - ") || lowered.contains(" to ") {
            return;
        }
        let cleaned = patterns::strip_numeric_decoration(trimmed);
        if let Ok(number) = cleaned.parse::<f64>() {
            if !number.is_finite() {
                return;
            }
            self.numeric += 1;
            if cleaned.contains('.') || number.fract() != 0.0 {
                self.fractional += 1;
            }
            if trimmed.contains('%') {
                self.percent_signs += 1;
            }
            if number > i32::MAX as f64 || number < i32::MIN as f64 {
                self.outside_i32 = true;
            }
        }
    }

    fn decide(&self, name: &str) -> ColumnType {
        if self.total == 0 {
            return ColumnType::TEXT;
        }
        let total = self.total as f64;
        if self.numeric as f64 / total >= NUMERIC_RATIO {
            if self.fractional > 0 || self.percent_signs > 0 || name_has_any(name, RATE_HINTS) {
                return ColumnType::Real;
            }
            return if self.outside_i32 {
                ColumnType::BigInt
            } else {
                ColumnType::Integer
            };
        }
        if self.boolean == self.total {
            return ColumnType::Boolean;
        }
        if self.temporal as f64 / total >= NUMERIC_RATIO {
            return ColumnType::Timestamp;
        }
        ColumnType::Text(TextWidth::for_length(self.max_len))
    }
}

/// Dates and date-times in the layouts publishers use.
pub fn parse_temporal(value: &str) -> Option<NaiveDateTime> {
    let trimmed = value.trim();
    DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|format| NaiveDate::parse_from_str(trimmed, format).ok())
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}
