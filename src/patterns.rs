//! Heuristic vocabularies shared by the extractor, type inference and the grain
//! classifier. These are data, not control flow: extending a list changes
//! behaviour without touching the algorithms that consult it.

use std::sync::LazyLock;

use regex::Regex;

/// Leading-cell prefixes that end a data region (footnotes, sources, licences).
pub const STOP_WORDS: &[&str] = &[
    "note",
    "source",
    "copyright",
    "\u{a9}",
    "please",
    "this worksheet",
    "this table",
];

/// Publisher suppression and not-applicable markers. Compared lowercased.
pub const SUPPRESSED_VALUES: &[&str] = &[
    ":", "..", ".", "-", "*", "c", "z", "x", "[c]", "[z]", "[x]", "n/a", "na",
];

/// First-cell words that mark documentation sheets.
pub const METADATA_INDICATORS: &[&str] = &[
    "contents",
    "title",
    "notes",
    "definition",
    "about",
    "introduction",
];

/// Column-name fragments that mark a measure rather than an entity identifier.
pub const MEASURE_KEYWORDS: &[&str] = &[
    "count", "total", "number", "percent", "rate", "ratio", "average", "mean", "median", "sum",
    "referrals", "waiting",
];

/// Values that never count towards an entity-code match.
pub const PLACEHOLDER_VALUES: &[&str] = &[
    "", "UNKNOWN", "N/A", "NA", "NULL", "NONE", "-", "*", ".", "..", ":", "SUPPRESSED", "[C]",
    "[X]", "[Z]",
];

/// Name hints that force a bounded text column regardless of the samples.
pub const BOUNDED_TEXT_HINTS: &[&str] = &[
    "date", "month", "year", "quarter", "period", "name", "category", "group",
];

/// Name hints that force an unbounded text column.
pub const LONG_TEXT_HINTS: &[&str] = &["description", "definition", "notes", "comment", "detail"];

/// Name hints for short identifier columns.
pub const CODE_HINTS: &[&str] = &["code", "org", "ics", "nhse"];

/// Name hints for rate-like measures, stored as real numbers.
pub const RATE_HINTS: &[&str] = &["percent", "rate", "%"];

pub static CALENDAR_YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(19|20)\d{2}$").expect("valid calendar year regex"));

pub static FISCAL_YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}[-/]\d{2,4}$").expect("valid fiscal year regex"));

pub static QUARTER_OR_HALF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^[QH][1-4]$").expect("valid quarter regex"));

pub static MONTH_YEAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*[\s\-_]*\d{2,4}$")
        .expect("valid month-year regex")
});

static CURRENCY_UNIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\u{a3}$\u{20ac}]\d+$").expect("valid currency unit regex"));

static UNIT_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(%|percent(age)?|rate|number|count|total|fte|wte|000s?)$")
        .expect("valid unit label regex")
});

static FOOTNOTE_MARKERS: &[char] = &[
    '\u{b9}', '\u{b2}', '\u{b3}', '\u{2074}', '\u{2075}', '\u{2076}', '\u{2077}', '\u{2078}',
    '\u{2079}', '\u{2070}',
];

pub fn is_suppressed(value: &str) -> bool {
    let lowered = value.trim().to_ascii_lowercase();
    SUPPRESSED_VALUES.contains(&lowered.as_str())
}

pub fn is_placeholder(upper: &str) -> bool {
    PLACEHOLDER_VALUES.contains(&upper.trim())
}

pub fn is_unit_label(value: &str) -> bool {
    let trimmed = value.trim();
    CURRENCY_UNIT.is_match(trimmed) || UNIT_LABEL.is_match(&trimmed.to_lowercase())
}

/// Calendar years, fiscal years (with trailing footnote markers), month-year labels.
pub fn is_year_like(value: &str) -> bool {
    let trimmed = strip_footnote_markers(value.trim());
    CALENDAR_YEAR.is_match(trimmed) || FISCAL_YEAR.is_match(trimmed) || MONTH_YEAR.is_match(trimmed)
}

pub fn is_period_token(value: &str) -> bool {
    QUARTER_OR_HALF.is_match(value.trim())
}

pub fn starts_with_stop_word(value: &str) -> bool {
    let lowered = value.trim().to_lowercase();
    STOP_WORDS.iter().any(|word| lowered.starts_with(word))
}

pub fn strip_footnote_markers(value: &str) -> &str {
    value.trim_end_matches(FOOTNOTE_MARKERS)
}

/// Lowercased text with superscript footnote markers and thousands commas removed,
/// used to compare repeated header rows with the header block.
pub fn header_comparison_key(value: &str) -> String {
    value
        .trim()
        .to_lowercase()
        .chars()
        .filter(|ch| *ch != ',' && !FOOTNOTE_MARKERS.contains(ch))
        .collect()
}

/// Strip currency, percent and thousands separators before numeric parsing.
pub fn strip_numeric_decoration(value: &str) -> String {
    value
        .trim()
        .chars()
        .filter(|ch| !matches!(ch, ',' | '\u{a3}' | '$' | '\u{20ac}' | '%'))
        .collect()
}

pub fn parses_as_number(value: &str) -> bool {
    let cleaned = strip_numeric_decoration(value);
    !cleaned.is_empty() && cleaned.parse::<f64>().is_ok()
}

/// Numeric data as opposed to a year heading or a unit label.
pub fn is_real_numeric(value: &str) -> bool {
    let trimmed = value.trim();
    if trimmed.is_empty() || is_year_like(trimmed) || is_unit_label(trimmed) {
        return false;
    }
    parses_as_number(trimmed)
}

pub fn name_has_any(name: &str, hints: &[&str]) -> bool {
    let lowered = name.to_lowercase();
    hints.iter().any(|hint| lowered.contains(hint))
}

pub fn is_measure_name(name: &str) -> bool {
    name_has_any(name, MEASURE_KEYWORDS)
}
