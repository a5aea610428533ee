//! Canonical column resolution and the schema-stable write.
//!
//! A load call computes one ordered list of [`ColumnDef`]s. The DDL that ensures
//! the destination table and the [`BulkWrite`] that fills it are both derived from
//! that list, so the schema can never disagree with the columns written.
//!
//! Drift against a saved [`SheetMapping`] is not an error. New source columns get
//! an identity entry with an empty description and bump `mappings_version` once
//! per call; columns that went missing are only logged.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use anyhow::{Context, Result, ensure};
use log::{debug, info, warn};

use crate::{
    enrich::{ColumnSample, EnrichRequest, Enricher, Enrichment, SAMPLE_VALUES, enrich_or_identity},
    inference::infer_column_type,
    mapping::SheetMapping,
    sanitize::{NameDeduper, closest_match, is_unnamed, sanitize_name},
    store::{
        BulkWrite, ColumnDef, Ddl, DestinationStore, PeriodFilter, SqlValue, StoreResult,
        TableLocks,
    },
    table::ExtractedTable,
    types::{ColumnType, TextWidth},
};

pub const PERIOD_COLUMN: &str = "period";
pub const SOURCE_COLUMN: &str = "source_sheet";
/// Similarity at which a new column is reported as a likely rename of a missing one.
pub const RENAME_HINT_THRESHOLD: f64 = 0.8;

#[derive(Debug, Clone, Copy)]
pub struct LoadRequest<'a> {
    pub table: &'a ExtractedTable,
    pub table_name: &'a str,
    pub period: Option<&'a str>,
    /// Provenance label such as `file.xlsx/Table 1`, written to [`SOURCE_COLUMN`].
    pub source_label: Option<&'a str>,
}

impl<'a> LoadRequest<'a> {
    pub fn new(table: &'a ExtractedTable, table_name: &'a str) -> Self {
        Self {
            table,
            table_name,
            period: None,
            source_label: None,
        }
    }

    pub fn with_period(mut self, period: &'a str) -> Self {
        self.period = Some(period);
        self
    }

    pub fn with_source(mut self, source_label: &'a str) -> Self {
        self.source_label = Some(source_label);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadOutcome {
    pub rows_written: usize,
    /// Sanitized source name to the canonical name written this call.
    pub learned_mapping: BTreeMap<String, String>,
    /// Canonical data column to storage type.
    pub column_types: BTreeMap<String, ColumnType>,
    /// Sanitized source names absent from the saved mapping.
    pub new_columns: Vec<String>,
    /// Mapped source names this table no longer carries.
    pub missing_columns: Vec<String>,
    /// The single ordered list used for both DDL and write, system columns last.
    pub columns: Vec<ColumnDef>,
    pub ddl: Vec<Ddl>,
}

#[derive(Debug, Default)]
struct Drift {
    new_columns: Vec<String>,
    missing_columns: Vec<String>,
}

impl Drift {
    fn detect(sources: &[String], mapping: Option<&SheetMapping>) -> Self {
        let Some(mapping) = mapping else {
            return Drift {
                new_columns: sources.to_vec(),
                missing_columns: Vec::new(),
            };
        };
        Drift {
            new_columns: sources
                .iter()
                .filter(|source| !mapping.column_mappings.contains_key(*source))
                .cloned()
                .collect(),
            missing_columns: mapping
                .column_mappings
                .keys()
                .filter(|mapped| !sources.contains(mapped))
                .cloned()
                .collect(),
        }
    }

    fn log(&self, table_name: &str, has_mapping: bool) {
        if has_mapping && !self.new_columns.is_empty() {
            info!(
                "{table_name}: {} new column(s): {}",
                self.new_columns.len(),
                self.new_columns.join(", ")
            );
        }
        for missing in &self.missing_columns {
            match closest_match(
                missing,
                self.new_columns.iter().map(String::as_str),
                RENAME_HINT_THRESHOLD,
            ) {
                Some((candidate, score)) => warn!(
                    "{table_name}: column '{missing}' missing from this file; '{candidate}' looks like a rename ({score:.2})"
                ),
                None => warn!("{table_name}: column '{missing}' missing from this file"),
            }
        }
    }
}

pub struct Loader<S> {
    store: S,
    locks: Arc<TableLocks>,
    enricher: Option<Box<dyn Enricher>>,
}

impl<S: DestinationStore> Loader<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            locks: Arc::new(TableLocks::new()),
            enricher: None,
        }
    }

    /// Shares per-table locks with loaders running on other workers.
    pub fn with_locks(mut self, locks: Arc<TableLocks>) -> Self {
        self.locks = locks;
        self
    }

    pub fn with_enricher(mut self, enricher: Box<dyn Enricher>) -> Self {
        self.enricher = Some(enricher);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn load(
        &mut self,
        request: &LoadRequest<'_>,
        mut mapping: Option<&mut SheetMapping>,
    ) -> Result<LoadOutcome> {
        let mut table = request.table.clone();
        let dropped_rows = table.drop_empty_rows();
        let dropped_columns = table.retain_columns(|column| !is_unnamed(&column.name) && !column.is_empty());
        if dropped_rows > 0 || !dropped_columns.is_empty() {
            debug!(
                "{}: dropped {dropped_rows} empty row(s) and column(s) [{}]",
                request.table_name,
                dropped_columns.join(", ")
            );
        }
        ensure!(
            table.column_count() > 0,
            "Sheet '{}' has no loadable columns",
            table.sheet_name()
        );

        let sources: Vec<String> = table
            .columns()
            .iter()
            .map(|column| sanitize_name(&column.name))
            .collect();
        let drift = Drift::detect(&sources, mapping.as_deref());
        drift.log(request.table_name, mapping.is_some());

        let enrichment = self.request_enrichment(request, &table, &sources, &drift, mapping.as_deref());

        let mut deduper = NameDeduper::new();
        deduper.reserve(PERIOD_COLUMN);
        deduper.reserve(SOURCE_COLUMN);
        // Learned names are claimed before any new column is named.
        let learned: Vec<Option<String>> = sources
            .iter()
            .map(|source| {
                mapping
                    .as_deref()
                    .and_then(|m| m.canonical_for(source))
                    .map(str::to_string)
            })
            .collect();
        for canonical in learned.iter().flatten() {
            deduper.reserve(canonical);
        }
        let mut claimed = BTreeSet::new();
        let mut learned_mapping = BTreeMap::new();
        let mut columns: Vec<ColumnDef> = Vec::with_capacity(sources.len() + 2);
        for ((source, column), known) in sources.iter().zip(table.columns()).zip(&learned) {
            let canonical = match known {
                Some(canonical) if claimed.insert(canonical.clone()) => canonical.clone(),
                Some(canonical) => deduper.unique(canonical),
                None => deduper.unique(
                    &enrichment
                        .columns
                        .get(source)
                        .map(|suggestion| suggestion.canonical_name.clone())
                        .unwrap_or_else(|| source.clone()),
                ),
            };
            let inferred = column
                .column_type
                .unwrap_or_else(|| infer_column_type(&canonical, &column.values));
            let column_type = mapping
                .as_deref()
                .and_then(|m| m.column_types.get(&canonical))
                .map_or(inferred, |recorded| recorded.widen(inferred));
            learned_mapping.insert(source.clone(), canonical.clone());
            columns.push(ColumnDef::new(canonical, column_type));
        }
        let data_columns = columns.len();
        if request.period.is_some() {
            columns.push(ColumnDef::new(
                PERIOD_COLUMN,
                ColumnType::Text(TextWidth::Short),
            ));
        }
        if request.source_label.is_some() {
            columns.push(ColumnDef::new(SOURCE_COLUMN, ColumnType::TEXT));
        }

        let rows = (0..table.row_count())
            .map(|idx| {
                let mut row: Vec<SqlValue> = table
                    .columns()
                    .iter()
                    .zip(&columns)
                    .map(|(column, def)| SqlValue::from_cell(&column.values[idx], def.column_type))
                    .collect();
                if let Some(period) = request.period {
                    row.push(SqlValue::Text(period.to_string()));
                }
                if let Some(label) = request.source_label {
                    row.push(SqlValue::Text(label.to_string()));
                }
                row
            })
            .collect::<Vec<_>>();
        let batch = BulkWrite {
            table: request.table_name.to_string(),
            columns: columns.iter().map(|def| def.name.clone()).collect(),
            rows,
            replace_period: request.period.map(|period| PeriodFilter {
                column: PERIOD_COLUMN.to_string(),
                value: period.to_string(),
            }),
        };

        let store = &mut self.store;
        let (ddl, rows_written) = self
            .locks
            .with_table(request.table_name, || -> StoreResult<(Vec<Ddl>, usize)> {
                let ddl = ensure_schema(store, request.table_name, &columns)?;
                if batch.rows.is_empty() {
                    warn!(
                        "{}: no data rows, existing rows left in place",
                        request.table_name
                    );
                    return Ok((ddl, 0));
                }
                let written = store.write(&batch)?;
                Ok((ddl, written))
            })
            .and_then(|inner| inner)
            .with_context(|| {
                format!(
                    "Writing sheet '{}' to {}",
                    table.sheet_name(),
                    request.table_name
                )
            })?;

        let column_types: BTreeMap<String, ColumnType> = columns[..data_columns]
            .iter()
            .map(|def| (def.name.clone(), def.column_type))
            .collect();
        if let Some(mapping) = mapping.as_deref_mut() {
            apply_to_mapping(mapping, &drift, &learned_mapping, &column_types, enrichment);
        }

        info!(
            "{}: wrote {rows_written} row(s) across {} column(s){}",
            request.table_name,
            columns.len(),
            request
                .period
                .map(|period| format!(" for period {period}"))
                .unwrap_or_default()
        );
        Ok(LoadOutcome {
            rows_written,
            learned_mapping,
            column_types,
            new_columns: drift.new_columns,
            missing_columns: drift.missing_columns,
            columns,
            ddl,
        })
    }

    /// Asks for names of new columns and descriptions of columns still unenriched.
    fn request_enrichment(
        &self,
        request: &LoadRequest<'_>,
        table: &ExtractedTable,
        sources: &[String],
        drift: &Drift,
        mapping: Option<&SheetMapping>,
    ) -> Enrichment {
        let Some(enricher) = self.enricher.as_deref() else {
            return Enrichment::default();
        };
        let unenriched = mapping.map(SheetMapping::unenriched_columns).unwrap_or_default();
        let columns = sources
            .iter()
            .zip(table.columns())
            .filter(|(source, _)| {
                drift.new_columns.contains(source)
                    || mapping
                        .and_then(|m| m.canonical_for(source))
                        .is_some_and(|canonical| unenriched.contains(&canonical))
            })
            .map(|(source, column)| ColumnSample {
                name: source.clone(),
                label: column.label.clone(),
                samples: column
                    .non_empty_values()
                    .take(SAMPLE_VALUES)
                    .map(|value| value.as_text())
                    .collect(),
            })
            .collect();
        enrich_or_identity(
            Some(enricher),
            &EnrichRequest {
                table_name: request.table_name.to_string(),
                sheet_name: table.sheet_name().to_string(),
                columns,
            },
        )
    }
}

fn apply_to_mapping(
    mapping: &mut SheetMapping,
    drift: &Drift,
    learned_mapping: &BTreeMap<String, String>,
    column_types: &BTreeMap<String, ColumnType>,
    enrichment: Enrichment,
) {
    for source in &drift.new_columns {
        if let Some(canonical) = learned_mapping.get(source) {
            mapping
                .column_mappings
                .insert(source.clone(), canonical.clone());
            mapping
                .column_descriptions
                .entry(canonical.clone())
                .or_default();
        }
    }
    if !drift.new_columns.is_empty() {
        mapping.mappings_version += 1;
        info!(
            "Mapping for {} now at version {}",
            mapping.table_name, mapping.mappings_version
        );
    }
    for (source, suggestion) in enrichment.columns {
        let Some(canonical) = learned_mapping.get(&source) else {
            continue;
        };
        if let Some(description) = mapping.column_descriptions.get_mut(canonical)
            && description.trim().is_empty()
        {
            *description = suggestion.description;
        }
    }
    if mapping.table_description.trim().is_empty()
        && let Some(description) = enrichment.table_description
    {
        mapping.table_description = description;
    }
    mapping.column_types.extend(
        column_types
            .iter()
            .map(|(name, column_type)| (name.clone(), *column_type)),
    );
}

/// Creates the table when absent, otherwise adds the listed columns it lacks.
/// Destination columns not in `columns` are kept. Returns the statements run.
pub fn ensure_schema<S>(store: &mut S, table: &str, columns: &[ColumnDef]) -> StoreResult<Vec<Ddl>>
where
    S: DestinationStore + ?Sized,
{
    let statements = match store.existing_columns(table)? {
        None => vec![Ddl::CreateTable {
            table: table.to_string(),
            columns: columns.to_vec(),
        }],
        Some(existing) => columns
            .iter()
            .filter(|column| !existing.iter().any(|name| name.eq_ignore_ascii_case(&column.name)))
            .map(|column| Ddl::AddColumn {
                table: table.to_string(),
                column: column.clone(),
            })
            .collect(),
    };
    for ddl in &statements {
        store.execute_ddl(ddl)?;
    }
    Ok(statements)
}
