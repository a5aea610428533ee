mod common;

use common::{TestWorkspace, typed_sheet};
use sheetwarp::{
    grain::{Grain, classify},
    grid::Grid,
    pipeline::prepare_sheet,
    workbook::Workbook,
};

fn grain_of(rows: &[&[&str]]) -> sheetwarp::grain::GrainResult {
    let sheet = typed_sheet("Table 1", rows);
    let grid = Grid::new(&sheet);
    let table = prepare_sheet(&grid).expect("tabular sheet");
    classify(&table)
}

#[test]
fn org_code_beats_region_grouping_after_extraction() {
    let result = grain_of(&[
        &["Referrals by provider"],
        &[],
        &["Region Code", "Org Code", "Referrals"],
        &["Y56", "RJ1", "120"],
        &["Y56", "RXH", "80"],
        &["Y58", "RYJ", "95"],
        &["Y58", "R0A", "60"],
    ]);
    assert_eq!(result.grain, Grain::Trust);
    assert_eq!(result.grain_column.as_deref(), Some("org_code"));
    assert_eq!(result.confidence, 1.0);
}

#[test]
fn region_only_tables_are_region_grain() {
    let result = grain_of(&[
        &["Region Code", "Region Name", "Referrals"],
        &["Y56", "London", "120"],
        &["Y58", "South West", "80"],
        &["Y59", "South East", "95"],
        &["Y60", "Midlands", "60"],
    ]);
    assert_eq!(result.grain, Grain::Region);
}

#[test]
fn national_totals_fall_back_to_aggregate_keywords() {
    let result = grain_of(&[
        &["Area", "Referrals", "Waiting"],
        &["England", "1200", "300"],
        &["England", "1180", "290"],
        &["England", "1215", "310"],
    ]);
    assert_eq!(result.grain, Grain::National);
    assert!(result.grain_column.is_none());
}

#[test]
fn unrelated_values_are_unknown() {
    let result = grain_of(&[
        &["Age Band", "Referrals", "Waiting"],
        &["0-17", "10", "4"],
        &["18-64", "12", "5"],
        &["65+", "9", "6"],
    ]);
    assert_eq!(result.grain, Grain::Unknown);
    assert_eq!(result.confidence, 0.0);
}

#[test]
fn csv_provider_file_is_trust_grain() {
    let workspace = TestWorkspace::new();
    let path = workspace.write("ae-2024-11.csv", &common::provider_csv(false));
    let book = Workbook::open(&path).expect("open csv");
    let sheet = book.sheet("ae-2024-11").expect("sheet");
    let grid = Grid::new(sheet.as_ref());
    let table = prepare_sheet(&grid).expect("tabular");
    let result = classify(&table);
    assert_eq!(result.grain, Grain::Trust);
    assert_eq!(result.description, "NHS Trust level");
}
