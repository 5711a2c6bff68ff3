// ABOUTME: Tests for snapshot comparison over realistic device tables
// ABOUTME: Vehicles scenario, symmetry of swapped inputs, and per-table error isolation

use std::collections::BTreeSet;
use std::path::PathBuf;

use device_replicator::compare::{compare, IdentityColumn};
use rusqlite::Connection;
use tempfile::TempDir;

fn snapshot(dir: &TempDir, name: &str, sql: &str) -> PathBuf {
    let path = dir.path().join(name);
    Connection::open(&path).unwrap().execute_batch(sql).unwrap();
    path
}

fn vehicles(dir: &TempDir) -> (PathBuf, PathBuf) {
    let a = snapshot(
        dir,
        "a.db",
        "CREATE TABLE DWVVEH (dwvKey TEXT, dwvModDes TEXT);
         INSERT INTO DWVVEH VALUES ('V1', 'Ford');",
    );
    let b = snapshot(
        dir,
        "b.db",
        "CREATE TABLE DWVVEH (dwvKey TEXT, dwvModDes TEXT);
         INSERT INTO DWVVEH VALUES ('V1', 'Toyota'), ('V2', 'Audi');",
    );
    (a, b)
}

fn keys(values: &[&str]) -> BTreeSet<Option<String>> {
    values.iter().map(|v| Some(v.to_string())).collect()
}

#[test]
fn test_vehicles_added_row_and_changed_cell() {
    let dir = TempDir::new().unwrap();
    let (a, b) = vehicles(&dir);

    let report = compare(&a, &b, &["DWVVEH".to_string()], &IdentityColumn::First).unwrap();
    let diff = report.diff("DWVVEH").unwrap();

    assert_eq!(diff.added, keys(&["V2"]));
    assert!(diff.removed.is_empty());
    assert_eq!(diff.changes.len(), 1);
    let change = &diff.changes[0];
    assert_eq!(change.key.as_deref(), Some("V1"));
    assert_eq!(change.column_index, 1);
    assert_eq!(change.column_name, "dwvModDes");
    assert_eq!(change.old.as_deref(), Some("Ford"));
    assert_eq!(change.new.as_deref(), Some("Toyota"));

    let text = report.to_string();
    assert!(text.contains("--- Comparing table DWVVEH ---"));
    assert!(text.contains("Rows added: V2"));
    assert!(text.contains("Row V1, Column 1 (dwvModDes) changed from 'Ford' to 'Toyota'"));
}

#[test]
fn test_swapping_inputs_swaps_added_removed_and_values() {
    let dir = TempDir::new().unwrap();
    let (a, b) = vehicles(&dir);
    let tables = ["DWVVEH".to_string()];

    let forward = compare(&a, &b, &tables, &IdentityColumn::First).unwrap();
    let backward = compare(&b, &a, &tables, &IdentityColumn::First).unwrap();
    let f = forward.diff("DWVVEH").unwrap();
    let r = backward.diff("DWVVEH").unwrap();

    assert_eq!(f.added, r.removed);
    assert_eq!(f.removed, r.added);
    assert_eq!(f.changes.len(), r.changes.len());
    for (fc, rc) in f.changes.iter().zip(&r.changes) {
        assert_eq!(fc.key, rc.key);
        assert_eq!(fc.column_index, rc.column_index);
        assert_eq!(fc.old, rc.new);
        assert_eq!(fc.new, rc.old);
    }
}

#[test]
fn test_identical_snapshots_have_no_differences() {
    let dir = TempDir::new().unwrap();
    let (a, _) = vehicles(&dir);
    let report = compare(&a, &a, &["DWVVEH".to_string()], &IdentityColumn::First).unwrap();
    assert!(!report.has_differences());
    assert!(report.to_string().contains("No differences"));
}

#[test]
fn test_table_missing_on_one_side_is_skipped_not_fatal() {
    let dir = TempDir::new().unwrap();
    let (a, b) = vehicles(&dir);
    let jobs = snapshot(
        &dir,
        "jobs.db",
        "CREATE TABLE DWJJOB (dwjKey TEXT);
         CREATE TABLE DWVVEH (dwvKey TEXT, dwvModDes TEXT);
         INSERT INTO DWVVEH VALUES ('V1', 'Ford');",
    );

    let report = compare(
        &a,
        &jobs,
        &["DWJJOB".to_string(), "DWVVEH".to_string()],
        &IdentityColumn::First,
    )
    .unwrap();
    assert!(report.tables[0].outcome.is_err());
    assert!(report.tables[1].outcome.is_ok());
    assert!(report
        .to_string()
        .contains("Error during comparison: schema unavailable for table 'DWJJOB'"));

    // Unrelated pair still compares fine
    assert!(compare(&a, &b, &["DWVVEH".to_string()], &IdentityColumn::First).is_ok());
}

#[test]
fn test_removed_rows_and_null_values() {
    let dir = TempDir::new().unwrap();
    let a = snapshot(
        &dir,
        "a.db",
        "CREATE TABLE DWJJOB (dwjKey TEXT, dwjSig TEXT);
         INSERT INTO DWJJOB VALUES ('L1', NULL), ('L2', 'x'), ('L3', 'y');",
    );
    let b = snapshot(
        &dir,
        "b.db",
        "CREATE TABLE DWJJOB (dwjKey TEXT, dwjSig TEXT);
         INSERT INTO DWJJOB VALUES ('L1', 'signed'), ('L2', 'x');",
    );

    let report = compare(&a, &b, &["DWJJOB".to_string()], &IdentityColumn::First).unwrap();
    let diff = report.diff("DWJJOB").unwrap();
    assert_eq!(diff.removed, keys(&["L3"]));
    assert_eq!(diff.changes.len(), 1);
    assert_eq!(diff.changes[0].old, None);
    assert!(report
        .to_string()
        .contains("changed from 'NULL' to 'signed'"));
}

#[test]
fn test_columns_with_spaces_and_dashes_compare() {
    let dir = TempDir::new().unwrap();
    let a = snapshot(
        &dir,
        "a.db",
        "CREATE TABLE DWJJOB (dwjKey TEXT, \"Job No\" TEXT, \"veh-ref\" TEXT);
         INSERT INTO DWJJOB VALUES ('L1', '100', 'V1');",
    );
    let b = snapshot(
        &dir,
        "b.db",
        "CREATE TABLE DWJJOB (dwjKey TEXT, \"Job No\" TEXT, \"veh-ref\" TEXT);
         INSERT INTO DWJJOB VALUES ('L1', '101', 'V1');",
    );

    let report = compare(&a, &b, &["DWJJOB".to_string()], &IdentityColumn::First).unwrap();
    let diff = report.diff("DWJJOB").expect("table should compare");
    assert_eq!(diff.changes.len(), 1);
    assert_eq!(diff.changes[0].column_name, "Job No");
    assert!(report
        .to_string()
        .contains("Row L1, Column 1 (Job No) changed from '100' to '101'"));
}
