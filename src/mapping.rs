//! Pipeline configuration and the per-sheet mappings the loader learns into.
//!
//! Persisted as YAML. The extractor and the grain classifier never read these;
//! only the loader mutates a [`SheetMapping`], and the caller saves it.

use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
    sync::LazyLock,
};

use anyhow::{Context, Result};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::{
    grain::{Grain, GrainResult},
    period,
    types::ColumnType,
};

fn default_mappings_version() -> u32 {
    1
}

fn default_file_types() -> Vec<String> {
    vec!["xlsx".to_string()]
}

static DIGIT_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("valid digit regex"));

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetMapping {
    pub sheet_pattern: String,
    pub table_name: String,
    #[serde(default)]
    pub table_description: String,
    /// Sanitized source name to canonical name.
    #[serde(default)]
    pub column_mappings: BTreeMap<String, String>,
    /// Canonical name to description; empty means not yet enriched.
    #[serde(default)]
    pub column_descriptions: BTreeMap<String, String>,
    #[serde(default)]
    pub column_types: BTreeMap<String, ColumnType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grain: Option<Grain>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grain_column: Option<String>,
    #[serde(default)]
    pub grain_description: String,
    #[serde(default = "default_mappings_version")]
    pub mappings_version: u32,
}

impl SheetMapping {
    pub fn new(sheet_pattern: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self {
            sheet_pattern: sheet_pattern.into(),
            table_name: table_name.into(),
            table_description: String::new(),
            column_mappings: BTreeMap::new(),
            column_descriptions: BTreeMap::new(),
            column_types: BTreeMap::new(),
            grain: None,
            grain_column: None,
            grain_description: String::new(),
            mappings_version: default_mappings_version(),
        }
    }

    /// Exact name first, then the pattern as an anchored regex.
    pub fn matches_sheet(&self, sheet_name: &str) -> bool {
        pattern_matches(&self.sheet_pattern, sheet_name, false)
    }

    pub fn canonical_for(&self, sanitized: &str) -> Option<&str> {
        self.column_mappings.get(sanitized).map(String::as_str)
    }

    /// Canonical columns whose description is still empty.
    pub fn unenriched_columns(&self) -> Vec<&str> {
        self.column_descriptions
            .iter()
            .filter(|(_, description)| description.trim().is_empty())
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn record_grain(&mut self, result: &GrainResult) {
        self.grain = Some(result.grain);
        self.grain_column = result.grain_column.clone();
        self.grain_description = result.description.clone();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilePattern {
    pub filename_patterns: Vec<String>,
    #[serde(default = "default_file_types")]
    pub file_types: Vec<String>,
    #[serde(default)]
    pub sheet_mappings: Vec<SheetMapping>,
}

/// Anchorable pattern for `name` with every digit run generalised, so later
/// periods of the same publication match it.
pub fn generalise_digits(name: &str) -> String {
    let escaped = regex::escape(name);
    DIGIT_RUN.replace_all(&escaped, r"\d+").into_owned()
}

impl FilePattern {
    pub fn for_file(file_name: &str) -> Self {
        let pattern = generalise_digits(file_name);
        let file_types = Path::new(file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| vec![ext.to_ascii_lowercase()])
            .unwrap_or_else(default_file_types);
        Self {
            filename_patterns: vec![pattern],
            file_types,
            sheet_mappings: Vec::new(),
        }
    }

    pub fn matches_file(&self, file_name: &str) -> bool {
        self.filename_patterns
            .iter()
            .any(|pattern| pattern_matches(pattern, file_name, true))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub pipeline_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub landing_page: Option<String>,
    #[serde(default)]
    pub file_patterns: Vec<FilePattern>,
    #[serde(default)]
    pub loaded_periods: Vec<String>,
    #[serde(default)]
    pub auto_load: bool,
}

impl PipelineConfig {
    pub fn new(pipeline_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            pipeline_id: pipeline_id.into(),
            name: name.into(),
            landing_page: None,
            file_patterns: Vec::new(),
            loaded_periods: Vec::new(),
            auto_load: false,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening pipeline config {path:?}"))?;
        let reader = BufReader::new(file);
        let mut config: PipelineConfig =
            serde_yaml::from_reader(reader).context("Parsing pipeline config YAML")?;
        period::sort_periods(&mut config.loaded_periods, false);
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file =
            File::create(path).with_context(|| format!("Creating pipeline config {path:?}"))?;
        serde_yaml::to_writer(BufWriter::new(file), self).context("Writing pipeline config YAML")
    }

    /// Records a loaded period, keeping the list sorted and unique.
    pub fn add_period(&mut self, period: &str) {
        if !self.loaded_periods.iter().any(|p| p == period) {
            self.loaded_periods.push(period.to_string());
            self.loaded_periods.sort();
        }
    }

    pub fn new_periods<'a>(&self, available: impl IntoIterator<Item = &'a str>) -> Vec<&'a str> {
        available
            .into_iter()
            .filter(|period| !self.loaded_periods.iter().any(|p| p == period))
            .collect()
    }

    pub fn sheet_mapping_for(&self, file_name: &str, sheet_name: &str) -> Option<&SheetMapping> {
        self.file_patterns
            .iter()
            .filter(|pattern| pattern.matches_file(file_name))
            .flat_map(|pattern| pattern.sheet_mappings.iter())
            .find(|mapping| mapping.matches_sheet(sheet_name))
    }

    pub fn mapping_for_sheet_mut(
        &mut self,
        file_name: &str,
        sheet_name: &str,
    ) -> Option<&mut SheetMapping> {
        self.file_patterns
            .iter_mut()
            .filter(|pattern| pattern.matches_file(file_name))
            .flat_map(|pattern| pattern.sheet_mappings.iter_mut())
            .find(|mapping| mapping.matches_sheet(sheet_name))
    }

    /// Adds a mapping under the first file pattern matching `file_name`, creating
    /// that pattern when none matches.
    pub fn insert_sheet_mapping(&mut self, file_name: &str, mapping: SheetMapping) {
        let index = match self
            .file_patterns
            .iter()
            .position(|pattern| pattern.matches_file(file_name))
        {
            Some(index) => index,
            None => {
                self.file_patterns.push(FilePattern::for_file(file_name));
                self.file_patterns.len() - 1
            }
        };
        self.file_patterns[index].sheet_mappings.push(mapping);
    }
}

/// Exact comparison first; otherwise the pattern is an anchored regex. A pattern
/// that is not a valid regex only ever matches exactly.
fn pattern_matches(pattern: &str, candidate: &str, case_insensitive: bool) -> bool {
    let exact = if case_insensitive {
        pattern.eq_ignore_ascii_case(candidate)
    } else {
        pattern == candidate
    };
    if exact {
        return true;
    }
    RegexBuilder::new(&format!("^(?:{pattern})$"))
        .case_insensitive(case_insensitive)
        .build()
        .map(|regex| regex.is_match(candidate))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config() -> PipelineConfig {
        let mut config = PipelineConfig::new("adhd", "ADHD referrals");
        let mut mapping = SheetMapping::new("Table \\d+", "tbl_adhd_table");
        mapping
            .column_mappings
            .insert("org_code".to_string(), "org_code".to_string());
        config.file_patterns.push(FilePattern {
            filename_patterns: vec![r"ADHD-.*\.xlsx".to_string()],
            file_types: default_file_types(),
            sheet_mappings: vec![mapping, SheetMapping::new("Data (ICB)", "tbl_adhd_icb")],
        });
        config
    }

    #[test]
    fn sheet_lookup_uses_regex_then_exact_name() {
        let config = config();
        let found = config.sheet_mapping_for("adhd-2024-11.xlsx", "Table 3");
        assert_eq!(found.map(|m| m.table_name.as_str()), Some("tbl_adhd_table"));
        let exact = config.sheet_mapping_for("ADHD-2024-11.xlsx", "Data (ICB)");
        assert_eq!(exact.map(|m| m.table_name.as_str()), Some("tbl_adhd_icb"));
        assert!(config.sheet_mapping_for("other.xlsx", "Table 3").is_none());
        assert!(config.sheet_mapping_for("ADHD-1.xlsx", "Table 3a").is_none());
    }

    #[test]
    fn invalid_patterns_only_match_exactly() {
        let mapping = SheetMapping::new("Table (1", "t");
        assert!(mapping.matches_sheet("Table (1"));
        assert!(!mapping.matches_sheet("Table 1"));
    }

    #[test]
    fn periods_are_sorted_and_unique() {
        let mut config = config();
        config.add_period("2024-12");
        config.add_period("2024-11");
        config.add_period("2024-12");
        assert_eq!(config.loaded_periods, ["2024-11", "2024-12"]);
        assert_eq!(config.new_periods(["2024-11", "2025-01"]), ["2025-01"]);
    }

    #[test]
    fn inserting_a_mapping_creates_a_generalised_file_pattern() {
        let mut config = PipelineConfig::new("ae", "A&E");
        config.insert_sheet_mapping("ae-2024-11.csv", SheetMapping::new("ae-2024-11", "tbl_ae"));
        assert_eq!(config.file_patterns.len(), 1);
        assert_eq!(config.file_patterns[0].file_types, ["csv"]);
        assert!(config.file_patterns[0].matches_file("ae-2025-01.csv"));
        config.insert_sheet_mapping("ae-2025-01.csv", SheetMapping::new("x", "tbl_x"));
        assert_eq!(config.file_patterns.len(), 1);
        assert_eq!(config.file_patterns[0].sheet_mappings.len(), 2);
    }

    #[test]
    fn yaml_round_trip_keeps_learned_state() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("pipeline.yaml");
        let mut config = config();
        config.add_period("2024-11");
        if let Some(mapping) = config.mapping_for_sheet_mut("ADHD-2024-11.xlsx", "Table 1") {
            mapping.mappings_version = 3;
            mapping
                .column_types
                .insert("org_code".to_string(), ColumnType::Text(crate::types::TextWidth::Code));
            mapping.grain = Some(Grain::Trust);
        }
        config.save(&path).expect("save config");
        let loaded = PipelineConfig::load(&path).expect("load config");
        assert_eq!(loaded, config);
    }

    #[test]
    fn missing_optional_fields_take_defaults() {
        let yaml = "pipeline_id: ae\nname: A&E\nfile_patterns:\n  - filename_patterns: ['ae.*']\n    sheet_mappings:\n      - sheet_pattern: Sheet1\n        table_name: tbl_ae\n";
        let config: PipelineConfig = serde_yaml::from_str(yaml).expect("parse");
        let mapping = &config.file_patterns[0].sheet_mappings[0];
        assert_eq!(mapping.mappings_version, 1);
        assert!(mapping.column_mappings.is_empty());
        assert_eq!(config.file_patterns[0].file_types, ["xlsx"]);
        assert!(!config.auto_load);
    }
}
