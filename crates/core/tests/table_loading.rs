use std::io::Write;

use datachat_core::{
    DocumentConfig, HashEmbedder, KnowledgeBase, Table, UnitKind, ValidationError, Value,
};
use tempfile::Builder;

#[test]
fn csv_file_becomes_searchable_units() {
    let mut file = Builder::new().suffix(".csv").tempfile().unwrap();
    writeln!(file, "name,revenue,sector").unwrap();
    writeln!(file, "Sample Company A,100000,Retail").unwrap();
    writeln!(file, "Sample Company B,150000,Manufacturing").unwrap();

    let table = Table::from_csv_path(file.path()).unwrap();
    assert_eq!(table.rows()[1][1], Value::Int(150000));

    let embedder = HashEmbedder::default();
    let kb = KnowledgeBase::build(&table, &embedder, &DocumentConfig::default()).unwrap();
    let units = kb.store().units();
    assert_eq!(units.len(), 3);
    assert_eq!(units[0].kind, UnitKind::Summary);
    assert!(units[0].content.contains("sum 250000"));

    let query = embedder.embed_text("Manufacturing company revenue");
    let hits = kb.search(&query, 2).unwrap();
    assert!(hits[0].unit.content.contains("Sample Company B"));
    assert!(hits.len() <= 2);
}

#[test]
fn header_only_csv_fails_validation() {
    let table = Table::from_csv_reader("a,b\n".as_bytes(), b',').unwrap();
    assert_eq!(table.validate(), vec![ValidationError::EmptyTable]);
    let err = KnowledgeBase::build(&table, &HashEmbedder::default(), &DocumentConfig::default())
        .unwrap_err();
    assert_eq!(err.validation_errors(), &[ValidationError::EmptyTable]);
}

#[test]
fn excel_workbook_loads_first_sheet() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sales.xlsx");
    let mut workbook = rust_xlsxwriter::Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.write_string(0, 0, "name").unwrap();
    sheet.write_string(0, 1, "revenue").unwrap();
    sheet.write_string(0, 2, "active").unwrap();
    sheet.write_string(1, 0, "Alpha").unwrap();
    sheet.write_number(1, 1, 100.0).unwrap();
    sheet.write_boolean(1, 2, true).unwrap();
    sheet.write_string(2, 0, "Beta").unwrap();
    sheet.write_number(2, 1, 12.5).unwrap();
    workbook.save(&path).unwrap();

    let table = Table::from_path(&path).unwrap();
    assert_eq!(table.columns(), ["name", "revenue", "active"]);
    assert_eq!(table.row_count(), 2);
    assert_eq!(table.rows()[0], vec![Value::Text("Alpha".into()), Value::Int(100), Value::Bool(true)]);
    assert_eq!(table.rows()[1][1], Value::Float(12.5));
    assert_eq!(table.rows()[1][2], Value::Null);
}

#[test]
fn unknown_extension_is_rejected() {
    let file = Builder::new().suffix(".parquet").tempfile().unwrap();
    assert!(matches!(
        Table::from_path(file.path()),
        Err(datachat_core::CoreError::UnsupportedInput(_))
    ));
}
