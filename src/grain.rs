//! Grain classification: which organisational level one row of a table describes.
//!
//! Explicit per-row identifiers beat coarse groupings, which beat organisation-name
//! heuristics, which beat aggregate keywords. The entity and name tables below are
//! data; adding an entity type means adding a row, not a branch.

use std::{fmt, sync::LazyLock};

use log::debug;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    grid::CellValue,
    patterns::{is_measure_name, is_placeholder},
    table::{ExtractedTable, TableColumn},
};

/// Columns considered, counted from the left.
pub const SCAN_COLUMNS: usize = 10;
/// Values sampled per column.
pub const SAMPLE_SIZE: usize = 50;
pub const PRIMARY_THRESHOLD: f64 = 0.3;
pub const STANDARD_THRESHOLD: f64 = 0.5;
pub const NAME_THRESHOLD: f64 = 0.3;
pub const MIN_MATCHES: usize = 3;
/// A primary-identifier match at or above this priority overrides the standard pass.
pub const HIGH_PRIORITY: u32 = 70;
pub const AGGREGATE_CONFIDENCE: f64 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grain {
    Trust,
    Icb,
    GpPractice,
    SubIcb,
    Ccg,
    LocalAuthority,
    Region,
    National,
    Unknown,
}

impl Grain {
    pub fn as_str(self) -> &'static str {
        match self {
            Grain::Trust => "trust",
            Grain::Icb => "icb",
            Grain::GpPractice => "gp_practice",
            Grain::SubIcb => "sub_icb",
            Grain::Ccg => "ccg",
            Grain::LocalAuthority => "local_authority",
            Grain::Region => "region",
            Grain::National => "national",
            Grain::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Grain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct EntityPattern {
    grain: Grain,
    pattern: &'static str,
    priority: u32,
    description: &'static str,
}

/// Priority order: the first pattern that qualifies wins a column.
const ENTITY_PATTERNS: &[EntityPattern] = &[
    EntityPattern {
        grain: Grain::Trust,
        pattern: r"^R[A-Z0-9]{1,4}$",
        priority: 100,
        description: "NHS Trust level",
    },
    EntityPattern {
        grain: Grain::Icb,
        pattern: r"^Q[A-Z0-9]{2}$",
        priority: 100,
        description: "Integrated Care Board level",
    },
    EntityPattern {
        grain: Grain::GpPractice,
        pattern: r"^[A-Z][0-9]{5}$",
        priority: 100,
        description: "GP Practice level",
    },
    EntityPattern {
        grain: Grain::SubIcb,
        pattern: r"^E54[0-9]{6}$",
        priority: 90,
        description: "Sub-ICB location level",
    },
    EntityPattern {
        grain: Grain::Ccg,
        pattern: r"^[0-9]{2}[A-Z]$",
        priority: 80,
        description: "Clinical Commissioning Group level",
    },
    EntityPattern {
        grain: Grain::LocalAuthority,
        pattern: r"^E0[6-9][0-9]{6}$",
        priority: 60,
        description: "Local authority level",
    },
    EntityPattern {
        grain: Grain::Region,
        pattern: r"^(Y[0-9]{2}|E40[0-9]{6})$",
        priority: 50,
        description: "NHS Region level",
    },
    EntityPattern {
        grain: Grain::National,
        pattern: r"^E92[0-9]{6}$",
        priority: 10,
        description: "National aggregate",
    },
];

static ENTITY_REGEXES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    ENTITY_PATTERNS
        .iter()
        .map(|entity| Regex::new(entity.pattern).expect("valid entity pattern"))
        .collect()
});

/// Column-name fragments that mark an organisation identifier column.
const PRIMARY_ID_NAMES: &[&str] = &[
    "org_code",
    "provider_code",
    "practice_code",
    "commissioner_code",
    "organisation_code",
    "ods_code",
    "trust_code",
    "icb_code",
];

/// Organisation-name fragments, compared against uppercased values.
const NAME_FRAGMENTS: &[(Grain, &[&str], &str)] = &[
    (
        Grain::Trust,
        &["NHS TRUST", "FOUNDATION TRUST"],
        "NHS Trust level (by name)",
    ),
    (
        Grain::Icb,
        &["INTEGRATED CARE BOARD"],
        "Integrated Care Board level (by name)",
    ),
    (
        Grain::Ccg,
        &["CCG", "CLINICAL COMMISSIONING GROUP"],
        "Clinical Commissioning Group level (by name)",
    ),
    (
        Grain::LocalAuthority,
        &["BOROUGH", "COUNCIL", "DISTRICT"],
        "Local authority level (by name)",
    ),
    (
        Grain::GpPractice,
        &["SURGERY", "MEDICAL CENTRE", "PRACTICE", "HEALTH CENTRE"],
        "GP Practice level (by name)",
    ),
];

const AGGREGATE_KEYWORDS: &[&str] = &["ENGLAND", "NATIONAL", "TOTAL", "ALL"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrainResult {
    pub grain: Grain,
    pub grain_column: Option<String>,
    pub confidence: f64,
    pub description: String,
}

impl GrainResult {
    pub fn unknown() -> Self {
        Self {
            grain: Grain::Unknown,
            grain_column: None,
            confidence: 0.0,
            description: String::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct PatternMatch {
    entity: usize,
    column: String,
    ratio: f64,
}

impl PatternMatch {
    fn priority(&self) -> u32 {
        ENTITY_PATTERNS[self.entity].priority
    }

    fn into_result(self) -> GrainResult {
        let entity = &ENTITY_PATTERNS[self.entity];
        GrainResult {
            grain: entity.grain,
            grain_column: Some(self.column),
            confidence: round2(self.ratio),
            description: entity.description.to_string(),
        }
    }
}

pub fn classify(table: &ExtractedTable) -> GrainResult {
    if table.is_empty() {
        return GrainResult::unknown();
    }
    let candidates: Vec<(&TableColumn, Vec<String>)> = table
        .columns()
        .iter()
        .take(SCAN_COLUMNS)
        .filter(|column| !is_measure_name(&column.name))
        .map(|column| (column, sample_values(column)))
        .filter(|(_, values)| !values.is_empty())
        .collect();

    let primary = candidates
        .iter()
        .filter(|(column, _)| is_primary_identifier(&column.name))
        .find_map(|(column, values)| match_entity(column, values, PRIMARY_THRESHOLD));
    let standard = candidates
        .iter()
        .find_map(|(column, values)| match_entity(column, values, STANDARD_THRESHOLD));

    let resolved = match (primary, standard) {
        (Some(primary), _) if primary.priority() >= HIGH_PRIORITY => Some(primary),
        (primary, Some(standard)) => {
            if let Some(primary) = &primary {
                debug!(
                    "Grain: coarse primary match on '{}' yields to '{}'",
                    primary.column, standard.column
                );
            }
            Some(standard)
        }
        (primary, None) => primary,
    };
    if let Some(found) = resolved {
        return found.into_result();
    }

    if let Some(by_name) = candidates
        .iter()
        .find_map(|(column, values)| match_names(column, values))
    {
        return by_name;
    }

    let aggregate = candidates
        .iter()
        .flat_map(|(_, values)| values.iter())
        .any(|value| has_aggregate_keyword(value));
    if aggregate {
        return GrainResult {
            grain: Grain::National,
            grain_column: None,
            confidence: AGGREGATE_CONFIDENCE,
            description: "National aggregate data".to_string(),
        };
    }
    GrainResult::unknown()
}

fn is_primary_identifier(name: &str) -> bool {
    let lowered = name.to_lowercase();
    lowered == "code" || PRIMARY_ID_NAMES.iter().any(|id| lowered.contains(id))
}

/// Up to [`SAMPLE_SIZE`] uppercased values, placeholders left out.
fn sample_values(column: &TableColumn) -> Vec<String> {
    column
        .values
        .iter()
        .filter(|value| !matches!(value, CellValue::Empty))
        .map(|value| value.as_text().trim().to_uppercase())
        .filter(|value| !is_placeholder(value))
        .take(SAMPLE_SIZE)
        .collect()
}

fn match_entity(column: &TableColumn, values: &[String], threshold: f64) -> Option<PatternMatch> {
    ENTITY_REGEXES
        .iter()
        .enumerate()
        .find_map(|(entity, regex)| {
            let matches = values.iter().filter(|value| regex.is_match(value)).count();
            let ratio = matches as f64 / values.len() as f64;
            (matches >= MIN_MATCHES && ratio >= threshold).then(|| PatternMatch {
                entity,
                column: column.name.clone(),
                ratio,
            })
        })
}

fn match_names(column: &TableColumn, values: &[String]) -> Option<GrainResult> {
    NAME_FRAGMENTS
        .iter()
        .find_map(|(grain, fragments, description)| {
            let matches = values
                .iter()
                .filter(|value| fragments.iter().any(|fragment| value.contains(fragment)))
                .count();
            let ratio = matches as f64 / values.len() as f64;
            (matches >= MIN_MATCHES && ratio >= NAME_THRESHOLD).then(|| GrainResult {
                grain: *grain,
                grain_column: Some(column.name.clone()),
                confidence: round2(ratio),
                description: description.to_string(),
            })
        })
}

fn has_aggregate_keyword(value: &str) -> bool {
    value
        .split(|ch: char| !ch.is_ascii_alphanumeric())
        .any(|word| AGGREGATE_KEYWORDS.contains(&word))
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(headers: &[&str], rows: &[&[&str]]) -> ExtractedTable {
        ExtractedTable::from_rows(
            "Table 1",
            headers,
            rows.iter()
                .map(|row| row.iter().map(|v| CellValue::from(*v)).collect())
                .collect(),
        )
        .expect("table")
    }

    #[test]
    fn trust_codes_are_detected() {
        let t = table(
            &["provider", "attendances"],
            &[&["RJ1", "1"], &["RXH", "2"], &["R0A", "3"], &["RYJ", "4"]],
        );
        let result = classify(&t);
        assert_eq!(result.grain, Grain::Trust);
        assert_eq!(result.grain_column.as_deref(), Some("provider"));
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn fine_grained_identifier_beats_region_grouping() {
        let t = table(
            &["region_code", "org_code", "total"],
            &[
                &["Y56", "RJ1", "1"],
                &["Y56", "RXH", "2"],
                &["Y58", "RYJ", "3"],
                &["Y58", "R0A", "4"],
            ],
        );
        let result = classify(&t);
        assert_eq!(result.grain, Grain::Trust);
        assert_eq!(result.grain_column.as_deref(), Some("org_code"));
    }

    #[test]
    fn coarse_primary_match_yields_to_standard_pass() {
        let t = table(
            &["practice", "org_code", "total"],
            &[
                &["A81001", "Y56", "1"],
                &["A81002", "Y56", "2"],
                &["B82001", "Y58", "3"],
                &["B82002", "Y58", "4"],
            ],
        );
        let result = classify(&t);
        assert_eq!(result.grain, Grain::GpPractice);
        assert_eq!(result.grain_column.as_deref(), Some("practice"));
    }

    #[test]
    fn measure_columns_are_never_entities() {
        let t = table(
            &["referrals_count", "name"],
            &[&["R1", "a"], &["R2", "b"], &["R3", "c"]],
        );
        assert_eq!(classify(&t).grain, Grain::Unknown);
    }

    #[test]
    fn organisation_names_are_a_fallback() {
        let t = table(
            &["organisation", "total"],
            &[
                &["Barts Health NHS Trust", "1"],
                &["Guy's and St Thomas' NHS Foundation Trust", "2"],
                &["Leeds Teaching Hospitals NHS Trust", "3"],
            ],
        );
        let result = classify(&t);
        assert_eq!(result.grain, Grain::Trust);
        assert_eq!(result.description, "NHS Trust level (by name)");
    }

    #[test]
    fn aggregate_keywords_mean_national() {
        let t = table(&["area", "total"], &[&["England", "100"]]);
        let result = classify(&t);
        assert_eq!(result.grain, Grain::National);
        assert_eq!(result.grain_column, None);
        assert_eq!(result.confidence, AGGREGATE_CONFIDENCE);
    }

    #[test]
    fn placeholders_and_too_few_matches_are_unknown() {
        let t = table(
            &["org_code", "total"],
            &[&["RJ1", "1"], &["RXH", "2"], &["UNKNOWN", "3"], &["N/A", "4"]],
        );
        assert_eq!(classify(&t).grain, Grain::Unknown);
        assert_eq!(classify(&ExtractedTable::new("empty")), GrainResult::unknown());
    }
}
