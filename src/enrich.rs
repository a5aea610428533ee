//! Optional naming and description suggestions for newly observed columns.
//!
//! Enrichment is advisory. [`enrich_or_identity`] is the only way the loader
//! reaches an [`Enricher`], and it turns every failure into an empty suggestion
//! set so the identity mapping applies.

use std::{collections::BTreeMap, fs::File, io::BufReader, path::Path};

use anyhow::{Context, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sanitize::{is_unnamed, sanitize_name};

/// Sample values sent per column.
pub const SAMPLE_VALUES: usize = 5;

#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("enrichment service unavailable")]
    Unavailable,
    #[error("enrichment rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSample {
    /// Sanitized source name.
    pub name: String,
    /// Header text as it appeared in the sheet.
    pub label: String,
    pub samples: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnrichRequest {
    pub table_name: String,
    pub sheet_name: String,
    pub columns: Vec<ColumnSample>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnSuggestion {
    #[serde(default)]
    pub canonical_name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Enrichment {
    pub table_description: Option<String>,
    /// Keyed by sanitized source name.
    pub columns: BTreeMap<String, ColumnSuggestion>,
}

impl Enrichment {
    pub fn is_empty(&self) -> bool {
        self.table_description.is_none() && self.columns.is_empty()
    }
}

pub trait Enricher {
    fn enrich(&self, request: &EnrichRequest) -> Result<Enrichment, EnrichError>;
}

/// Calls the enricher when one is configured. Failures are logged and replaced
/// with an empty enrichment. Suggestions for columns that were not asked about
/// are discarded; suggested names are sanitized, and ones that sanitize to
/// nothing fall back to the source name.
pub fn enrich_or_identity(enricher: Option<&dyn Enricher>, request: &EnrichRequest) -> Enrichment {
    let Some(enricher) = enricher else {
        return Enrichment::default();
    };
    if request.columns.is_empty() {
        return Enrichment::default();
    }
    match enricher.enrich(request) {
        Ok(mut enrichment) => {
            enrichment.columns.retain(|name, _| {
                request.columns.iter().any(|column| &column.name == name)
            });
            for (name, suggestion) in enrichment.columns.iter_mut() {
                let canonical = sanitize_name(&suggestion.canonical_name);
                suggestion.canonical_name = if is_unnamed(&canonical) {
                    name.clone()
                } else {
                    canonical
                };
                suggestion.description = suggestion.description.trim().to_string();
            }
            debug!(
                "Enrichment for {} suggested {} column name(s)",
                request.table_name,
                enrichment.columns.len()
            );
            enrichment
        }
        Err(err) => {
            warn!(
                "Enrichment for {} failed, keeping identity names: {err}",
                request.table_name
            );
            Enrichment::default()
        }
    }
}

/// Enricher backed by a YAML glossary of known source column names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlossaryEnricher {
    #[serde(default)]
    pub columns: BTreeMap<String, ColumnSuggestion>,
}

impl GlossaryEnricher {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening glossary {path:?}"))?;
        let glossary: GlossaryEnricher = serde_yaml::from_reader(BufReader::new(file))
            .context("Parsing glossary YAML")?;
        Ok(glossary)
    }
}

impl Enricher for GlossaryEnricher {
    fn enrich(&self, request: &EnrichRequest) -> Result<Enrichment, EnrichError> {
        let columns = request
            .columns
            .iter()
            .filter_map(|column| {
                self.columns
                    .get(&column.name)
                    .map(|suggestion| (column.name.clone(), suggestion.clone()))
            })
            .collect();
        Ok(Enrichment {
            table_description: None,
            columns,
        })
    }
}
