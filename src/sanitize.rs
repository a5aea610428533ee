//! Storage-safe identifiers and the naming rules that keep them stable across
//! repeated publications.

use std::{
    collections::{BTreeSet, HashMap},
    sync::LazyLock,
};

use regex::Regex;

pub const MAX_IDENTIFIER_LEN: usize = 63;
pub const UNNAMED: &str = "unnamed";

/// Words dropped when comparing column names for meaning rather than spelling.
const DATE_TOKENS: &[&str] = &[
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec", "january",
    "february", "march", "april", "june", "july", "august", "september", "october", "november",
    "december", "from", "to", "since", "until", "as", "at", "of", "the", "by", "q1", "q2", "q3",
    "q4", "quarter", "fy", "ytd", "mtd", "yoy", "mom",
];

static DATE_PATTERN_RULES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (
            r"(?i)_(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)\d{2,4}(_|$)",
            "${2}",
        ),
        (r"_?\d{4}[-_]\d{2}(_|$)", "${1}"),
        (r"_?20\d{2}(_|$)", "${1}"),
        (
            r"(?i)_(january|february|march|april|may|june|july|august|september|october|november|december)(_|$)",
            "${2}",
        ),
        (
            r"(?i)_(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)(_|$)",
            "${2}",
        ),
        (r"(?i)(^|_)q[1-4](_|$)", "${2}"),
    ]
    .into_iter()
    .map(|(rule, replacement)| (Regex::new(rule).expect("valid date pattern rule"), replacement))
    .collect()
});

static WORD_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-z]+").expect("valid token regex"));

/// Lowercase; currency and percent symbols dropped; every other run of
/// non-alphanumerics becomes one underscore; must start with a letter; bounded to
/// [`MAX_IDENTIFIER_LEN`]. Applying it twice gives the same result as applying it once.
pub fn sanitize_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_separator = false;
    for ch in raw.chars().flat_map(char::to_lowercase) {
        match ch {
            'a'..='z' | '0'..='9' => {
                if pending_separator && !out.is_empty() {
                    out.push('_');
                }
                pending_separator = false;
                out.push(ch);
            }
            '\u{a3}' | '$' | '\u{20ac}' | '%' => {}
            _ => pending_separator = true,
        }
    }
    if out.is_empty() {
        return UNNAMED.to_string();
    }
    if !out.starts_with(|ch: char| ch.is_ascii_alphabetic()) {
        out.insert_str(0, "c_");
    }
    bound_length(&out, MAX_IDENTIFIER_LEN)
}

fn bound_length(name: &str, limit: usize) -> String {
    if name.len() <= limit {
        return name.to_string();
    }
    name[..limit].trim_end_matches('_').to_string()
}

/// True for the placeholder name and its deduplicated forms (`unnamed_2`), not for
/// real headers that merely start with the word.
pub fn is_unnamed(name: &str) -> bool {
    let lowered = name.to_ascii_lowercase();
    match lowered.strip_prefix(UNNAMED) {
        Some("") => true,
        Some(rest) => rest
            .strip_prefix('_')
            .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit())),
        None => false,
    }
}

/// Hands out unique names within one extraction or one load call. Collisions get
/// `_1`, `_2`, ... while staying within [`MAX_IDENTIFIER_LEN`].
#[derive(Debug, Default)]
pub struct NameDeduper {
    taken: BTreeSet<String>,
    counters: HashMap<String, usize>,
}

impl NameDeduper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reserve(&mut self, name: &str) {
        self.taken.insert(name.to_string());
    }

    pub fn unique(&mut self, name: &str) -> String {
        if self.taken.insert(name.to_string()) {
            return name.to_string();
        }
        let counter = self.counters.entry(name.to_string()).or_insert(0);
        loop {
            *counter += 1;
            let suffix = format!("_{counter}");
            let base = bound_length(name, MAX_IDENTIFIER_LEN.saturating_sub(suffix.len()));
            let candidate = format!("{base}{suffix}");
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
        }
    }
}

/// Strip month, year and quarter fragments so that `ae_may25_data` and
/// `ae_jun25_data` share a name. Plain numbers are kept: `table_1` and `table_2`
/// are different tables.
pub fn remove_date_patterns(code: &str) -> String {
    let mut canonical = code.to_string();
    loop {
        let mut next = canonical.clone();
        for (rule, replacement) in DATE_PATTERN_RULES.iter() {
            next = rule.replace_all(&next, *replacement).into_owned();
        }
        if next == canonical {
            break;
        }
        canonical = next;
    }
    collapse_underscores(&canonical)
}

fn collapse_underscores(value: &str) -> String {
    value
        .split('_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

/// `tbl_<pipeline>_<sheet>`, with period fragments removed from the sheet part.
pub fn make_table_name(pipeline_id: &str, sheet_name: &str) -> String {
    let pipeline = sanitize_name(pipeline_id);
    let sheet = remove_date_patterns(&sanitize_name(sheet_name));
    let sheet = if sheet.is_empty() {
        sanitize_name(sheet_name)
    } else {
        sheet
    };
    bound_length(&format!("tbl_{pipeline}_{sheet}"), MAX_IDENTIFIER_LEN)
}

fn semantic_tokens(name: &str) -> BTreeSet<String> {
    let lowered = name.to_lowercase();
    WORD_TOKEN
        .find_iter(&lowered)
        .map(|m| m.as_str())
        .filter(|token| token.len() > 2 && !DATE_TOKENS.contains(token))
        .map(str::to_string)
        .collect()
}

/// Jaccard similarity of word tokens, ignoring date and period words.
pub fn semantic_similarity(left: &str, right: &str) -> f64 {
    let a = semantic_tokens(left);
    let b = semantic_tokens(right);
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let union = a.union(&b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(&b).count() as f64 / union as f64
}

/// Best match among `candidates` at or above `threshold`.
pub fn closest_match<'a>(
    name: &str,
    candidates: impl IntoIterator<Item = &'a str>,
    threshold: f64,
) -> Option<(&'a str, f64)> {
    candidates
        .into_iter()
        .map(|candidate| (candidate, semantic_similarity(name, candidate)))
        .filter(|(_, score)| *score >= threshold)
        .max_by(|a, b| a.1.total_cmp(&b.1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn only_placeholder_names_count_as_unnamed() {
        assert!(is_unnamed("unnamed"));
        assert!(is_unnamed("Unnamed"));
        assert!(is_unnamed("unnamed_2"));
        assert!(!is_unnamed("unnamed_"));
        assert!(!is_unnamed("unnamed_patients"));
        assert!(!is_unnamed(&sanitize_name("Unnamed patients")));
        assert!(!is_unnamed("unnamedx"));
    }

    #[test]
    fn sanitize_lowercases_and_joins_with_underscores() {
        assert_eq!(sanitize_name("Org Code"), "org_code");
        assert_eq!(sanitize_name("  A&E attendances (Type 1) "), "a_e_attendances_type_1");
        assert_eq!(sanitize_name("Spend \u{a3}000s"), "spend_000s");
        assert_eq!(sanitize_name("% of total"), "of_total");
        assert_eq!(sanitize_name("2024-25"), "c_2024_25");
        assert_eq!(sanitize_name("***"), UNNAMED);
    }

    #[test]
    fn sanitize_bounds_length_without_trailing_underscore() {
        let long = format!("{} tail", "a".repeat(62));
        let name = sanitize_name(&long);
        assert!(name.len() <= MAX_IDENTIFIER_LEN);
        assert!(!name.ends_with('_'));
    }

    #[test]
    fn deduper_suffixes_collisions() {
        let mut deduper = NameDeduper::new();
        assert_eq!(deduper.unique("region"), "region");
        assert_eq!(deduper.unique("region"), "region_1");
        assert_eq!(deduper.unique("region"), "region_2");
        deduper.reserve("period");
        assert_eq!(deduper.unique("period"), "period_1");
    }

    #[test]
    fn deduper_skips_names_already_taken_by_suffix() {
        let mut deduper = NameDeduper::new();
        deduper.unique("total_1");
        deduper.unique("total");
        assert_eq!(deduper.unique("total"), "total_2");
    }

    #[test]
    fn date_patterns_are_removed() {
        assert_eq!(remove_date_patterns("adhd_may25_data"), "adhd_data");
        assert_eq!(remove_date_patterns("mhsds_historic_2025_05"), "mhsds_historic");
        assert_eq!(remove_date_patterns("table_1_q3"), "table_1");
        assert_eq!(remove_date_patterns("market_share_mar_2024"), "market_share");
    }

    #[test]
    fn table_names_are_stable_across_periods() {
        assert_eq!(
            make_table_name("A&E", "ICB Level Data April 2024"),
            make_table_name("A&E", "ICB Level Data May 2024"),
        );
        assert_eq!(make_table_name("adhd", "Table 3a"), "tbl_adhd_table_3a");
    }

    #[test]
    fn similarity_ignores_period_words() {
        let score = semantic_similarity("referrals_received_april", "referrals_received_may");
        assert!((score - 1.0).abs() < f64::EPSILON);
        assert_eq!(
            closest_match("waiting_list_size", ["org_code", "waiting_list_total"], 0.3)
                .map(|(name, _)| name),
            Some("waiting_list_total")
        );
    }

    proptest! {
        #[test]
        fn sanitize_is_idempotent(raw in "\\PC{0,90}") {
            let once = sanitize_name(&raw);
            prop_assert_eq!(sanitize_name(&once), once.clone());
        }

        #[test]
        fn sanitize_output_is_storage_safe(raw in "\\PC{0,90}") {
            let name = sanitize_name(&raw);
            prop_assert!(!name.is_empty());
            prop_assert!(name.len() <= MAX_IDENTIFIER_LEN);
            prop_assert!(name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'));
            prop_assert!(name.starts_with(|c: char| c.is_ascii_lowercase()));
        }
    }
}
