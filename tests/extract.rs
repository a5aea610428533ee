mod common;

use common::{TestWorkspace, typed_sheet, untyped_sheet};
use sheetwarp::{
    extract::{SheetKind, extract, extract_table},
    grid::{CellValue, Grid, MergeRange},
    inference::infer_column_type,
    types::{ColumnType, TextWidth},
    workbook::Workbook,
};

#[test]
fn two_row_header_concatenates_both_levels() {
    let sheet = typed_sheet(
        "Table 2",
        &[
            &["Org", "Region", "Region"],
            &["", "North", "South"],
            &["RJ1", "10", "12"],
            &["RXH", "11", "14"],
            &["RYJ", "9", "13"],
        ],
    );
    let grid = Grid::new(&sheet);
    let structure = extract(&grid);
    assert_eq!(structure.kind, SheetKind::Tabular);
    assert_eq!(structure.header_rows, vec![0, 1]);
    assert_eq!(structure.column_names(), ["org", "region_north", "region_south"]);
    let parts: Vec<&[String]> = structure
        .columns
        .iter()
        .map(|column| column.header_parts.as_slice())
        .collect();
    assert_eq!(parts[1], ["Region", "North"]);
    assert_eq!(parts[2], ["Region", "South"]);
}

#[test]
fn merged_group_header_resolves_to_its_anchor() {
    let sheet = typed_sheet(
        "Table 2",
        &[
            &["Provider", "Attendances", ""],
            &["", "Type 1", "Type 2"],
            &["RJ1", "10", "4"],
            &["RXH", "11", "5"],
            &["RYJ", "12", "6"],
        ],
    )
    .with_merge(MergeRange::new(0, 1, 0, 2));
    let grid = Grid::new(&sheet);
    let structure = extract(&grid);
    assert_eq!(
        structure.column_names(),
        ["provider", "attendances_type_1", "attendances_type_2"]
    );
}

#[test]
fn single_header_row_gives_simple_names() {
    let sheet = typed_sheet(
        "Table 1",
        &[
            &["Org Code", "Referrals", "Waiting"],
            &["RJ1", "10", "4"],
            &["RXH", "12", "5"],
            &["RYJ", "9", "6"],
        ],
    );
    let grid = Grid::new(&sheet);
    let structure = extract(&grid);
    assert_eq!(structure.header_rows, vec![0]);
    assert_eq!(structure.column_names(), ["org_code", "referrals", "waiting"]);
    assert_eq!(
        structure.columns[0].inferred_type,
        ColumnType::Text(TextWidth::Code)
    );
    assert_eq!(structure.columns[1].inferred_type, ColumnType::Integer);
}

#[test]
fn title_only_sheet_has_no_columns() {
    let sheet = typed_sheet("Cover", &[&["NHS Referral to Treatment statistics"]]);
    let grid = Grid::new(&sheet);
    let structure = extract(&grid);
    assert!(matches!(
        structure.kind,
        SheetKind::Empty | SheetKind::Metadata
    ));
    assert!(structure.columns.is_empty());
    assert!(structure.data_range.is_none());
    assert_eq!(extract_table(&grid, &structure).row_count(), 0);
}

#[test]
fn documentation_sheet_is_metadata() {
    let sheet = typed_sheet(
        "Notes",
        &[
            &["Contents"],
            &["Table 1", "Referrals by provider"],
            &["Table 2", "Referrals by region"],
            &["Notes"],
            &["1. Figures are provisional"],
        ],
    );
    let grid = Grid::new(&sheet);
    assert_eq!(extract(&grid).kind, SheetKind::Metadata);
}

#[test]
fn header_without_nearby_data_is_unrecognised() {
    let sheet = typed_sheet(
        "Table 9",
        &[
            &["Org Code", "Org Name", "Status"],
            &["RJ1", "Trust A", "Open"],
            &["RXH", "Trust B", "Open"],
            &["RYJ", "Trust C", "Closed"],
            &["RAL", "Trust D", "Open"],
        ],
    );
    let grid = Grid::new(&sheet);
    let structure = extract(&grid);
    assert_eq!(structure.kind, SheetKind::Unrecognised);
    assert!(structure.diagnostic.is_some());
    assert!(structure.columns.is_empty());
}

#[test]
fn suppressed_values_become_empty_and_do_not_force_text() {
    let sheet = untyped_sheet(
        "Table 4",
        &[
            &["Org Code", "Referrals", "Waiting"],
            &["RJ1", "10", "4"],
            &["RXH", "[c]", "5"],
            &["RYJ", "9", ":"],
            &["RAL", "7", "3"],
        ],
    );
    let grid = Grid::new(&sheet);
    let structure = extract(&grid);
    let table = extract_table(&grid, &structure);
    let referrals = table.column("referrals").expect("referrals column");
    assert_eq!(referrals.values[1], CellValue::Empty);
    assert!(referrals.column_type.is_some_and(ColumnType::is_numeric));
    assert!(table.column("waiting").expect("waiting").values[2].is_empty());
}

#[test]
fn inference_boundaries() {
    let text = |values: &[&str]| -> Vec<CellValue> {
        values.iter().map(|value| CellValue::from(*value)).collect()
    };
    assert_eq!(
        infer_column_type("value", &text(&["1", "2", "3.5"])),
        ColumnType::Real
    );
    assert_eq!(
        infer_column_type("measure_description", &text(&["1", "2", "3"])),
        ColumnType::Text(TextWidth::Long)
    );
    let codes = infer_column_type("site", &text(&["A1B2", "C3D4", "E5F6", "G7H8"]));
    assert!(codes.is_bounded_text(), "{codes}");
    assert_eq!(
        infer_column_type("reporting_period", &text(&["202401", "202402", "202403"])),
        ColumnType::Text(TextWidth::Short)
    );
}

#[test]
fn csv_input_is_parsed_through_the_workbook_reader() {
    let workspace = TestWorkspace::new();
    let path = workspace.write("ae-2024-11.csv", &common::provider_csv(false));
    let book = Workbook::open(&path).expect("open csv");
    let sheet = book.sheet("ae-2024-11").expect("sheet");
    let grid = Grid::new(sheet.as_ref());
    let structure = extract(&grid);
    assert_eq!(structure.kind, SheetKind::Tabular);
    assert_eq!(
        structure.column_names(),
        ["org_code", "org_name", "total_attendances", "admitted"]
    );
    let table = extract_table(&grid, &structure);
    assert_eq!(table.row_count(), 4);
    assert_eq!(
        table.column("total_attendances").and_then(|c| c.column_type),
        Some(ColumnType::Integer)
    );
}
