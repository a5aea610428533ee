//! `YYYY-MM` period labels parsed from file names.

use std::sync::LazyLock;

use regex::{Captures, Regex};

const MONTHS: &[(&str, u32)] = &[
    ("january", 1),
    ("jan", 1),
    ("february", 2),
    ("feb", 2),
    ("march", 3),
    ("mar", 3),
    ("april", 4),
    ("apr", 4),
    ("may", 5),
    ("june", 6),
    ("jun", 6),
    ("july", 7),
    ("jul", 7),
    ("august", 8),
    ("aug", 8),
    ("september", 9),
    ("sept", 9),
    ("sep", 9),
    ("october", 10),
    ("oct", 10),
    ("november", 11),
    ("nov", 11),
    ("december", 12),
    ("dec", 12),
];

type Extractor = fn(&Captures<'_>) -> Option<(i32, u32)>;

/// Tried in order; the first pattern yielding a valid month wins.
static PERIOD_PATTERNS: LazyLock<Vec<(Regex, Extractor)>> = LazyLock::new(|| {
    let patterns: [(&str, Extractor); 5] = [
        (r"(?:^|\D)(\d{4})[-_](\d{2})(?:\D|$)", |c| {
            Some((number(c, 1)?, number(c, 2)?))
        }),
        (r"([a-z]+)[-_](\d{4})", |c| Some((number(c, 2)?, month(c, 1)?))),
        (r"(\d{4})[-_]([a-z]+)", |c| Some((number(c, 1)?, month(c, 2)?))),
        (r"(?:^|\D)(\d{4})(\d{2})(?:\D|$)", |c| {
            Some((number(c, 1)?, number(c, 2)?))
        }),
        (r"([a-z]{3,9})(\d{2})(?:\D|$)", |c| {
            Some((2000 + number::<i32>(c, 2)?, month(c, 1)?))
        }),
    ];
    patterns
        .into_iter()
        .map(|(pattern, extractor)| (Regex::new(pattern).expect("valid period regex"), extractor))
        .collect()
});

fn number<T: std::str::FromStr>(captures: &Captures<'_>, group: usize) -> Option<T> {
    captures.get(group)?.as_str().parse().ok()
}

fn month(captures: &Captures<'_>, group: usize) -> Option<u32> {
    let name = captures.get(group)?.as_str();
    MONTHS
        .iter()
        .find(|(label, _)| *label == name)
        .map(|(_, number)| *number)
}

/// Finds a `YYYY-MM` period in free text such as a file name.
pub fn parse_period(text: &str) -> Option<String> {
    let lowered = text.to_lowercase();
    PERIOD_PATTERNS.iter().find_map(|(regex, extractor)| {
        regex
            .captures_iter(&lowered)
            .filter_map(|captures| extractor(&captures))
            .find(|(_, month)| (1..=12).contains(month))
            .map(|(year, month)| format!("{year:04}-{month:02}"))
    })
}

pub fn is_period(label: &str) -> bool {
    label.len() == 7 && parse_period(label).as_deref() == Some(label)
}

/// Chronological order; `YYYY-MM` sorts correctly as text.
pub fn sort_periods(periods: &mut Vec<String>, descending: bool) {
    periods.retain(|period| is_period(period));
    periods.sort();
    periods.dedup();
    if descending {
        periods.reverse();
    }
}

pub fn latest_period<'a>(periods: impl IntoIterator<Item = &'a str>) -> Option<&'a str> {
    periods.into_iter().filter(|period| is_period(period)).max()
}
