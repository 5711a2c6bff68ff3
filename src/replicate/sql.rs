// ABOUTME: DDL/DML text for mirrored tables: create, grow, and batched upsert
// ABOUTME: Only validated, quoted identifiers are interpolated; values are always parameters

use crate::utils::quote_ident;

/// PostgreSQL caps a statement at 65535 bind parameters.
pub const MAX_BIND_PARAMS: usize = 65_000;

/// Rows per upsert statement for a table with `num_columns` columns.
pub fn rows_per_statement(num_columns: usize) -> usize {
    std::cmp::max(1, MAX_BIND_PARAMS / num_columns.max(1))
}

/// ```sql
/// CREATE TABLE IF NOT EXISTS "jobs" ("dwjkey" TEXT, "dwjcust" TEXT, PRIMARY KEY ("dwjkey"))
/// ```
pub fn build_create_table(table: &str, columns: &[String], primary_key: &str) -> String {
    let column_defs: Vec<String> = columns
        .iter()
        .map(|c| format!("{} TEXT", quote_ident(c)))
        .collect();
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({}, PRIMARY KEY ({}))",
        quote_ident(table),
        column_defs.join(", "),
        quote_ident(primary_key)
    )
}

/// ```sql
/// ALTER TABLE "jobs" ADD COLUMN IF NOT EXISTS "dwjnotes" TEXT
/// ```
pub fn build_add_column(table: &str, column: &str) -> String {
    format!(
        "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {} TEXT",
        quote_ident(table),
        quote_ident(column)
    )
}

/// Multi-row upsert where every non-key column takes the incoming value.
///
/// ```sql
/// INSERT INTO "jobs" ("dwjkey", "dwjcust") VALUES ($1, $2), ($3, $4)
/// ON CONFLICT ("dwjkey") DO UPDATE SET "dwjcust" = EXCLUDED."dwjcust"
/// ```
pub fn build_upsert(table: &str, columns: &[String], primary_key: &str, num_rows: usize) -> String {
    let quoted_columns: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();

    let num_cols = columns.len();
    let value_rows: Vec<String> = (0..num_rows)
        .map(|row_idx| {
            let placeholders: Vec<String> = (0..num_cols)
                .map(|col_idx| format!("${}", row_idx * num_cols + col_idx + 1))
                .collect();
            format!("({})", placeholders.join(", "))
        })
        .collect();

    let update_columns: Vec<String> = columns
        .iter()
        .filter(|c| c.as_str() != primary_key)
        .map(|c| format!("{0} = EXCLUDED.{0}", quote_ident(c)))
        .collect();

    let conflict_action = if update_columns.is_empty() {
        "DO NOTHING".to_string()
    } else {
        format!("DO UPDATE SET {}", update_columns.join(", "))
    };

    format!(
        "INSERT INTO {} ({}) VALUES {} ON CONFLICT ({}) {}",
        quote_ident(table),
        quoted_columns.join(", "),
        value_rows.join(", "),
        quote_ident(primary_key),
        conflict_action
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_build_create_table() {
        let ddl = build_create_table("jobs", &cols(&["dwjkey", "dwjcust", "dwjvehs"]), "dwjkey");
        assert_eq!(
            ddl,
            "CREATE TABLE IF NOT EXISTS \"jobs\" (\"dwjkey\" TEXT, \"dwjcust\" TEXT, \
             \"dwjvehs\" TEXT, PRIMARY KEY (\"dwjkey\"))"
        );
    }

    #[test]
    fn test_build_add_column() {
        assert_eq!(
            build_add_column("jobs", "dwjnotes"),
            "ALTER TABLE \"jobs\" ADD COLUMN IF NOT EXISTS \"dwjnotes\" TEXT"
        );
    }

    #[test]
    fn test_build_upsert_single_row() {
        let query = build_upsert("vehicles", &cols(&["dwvkey", "dwvmoddes"]), "dwvkey", 1);
        assert!(query.starts_with("INSERT INTO \"vehicles\" (\"dwvkey\", \"dwvmoddes\")"));
        assert!(query.contains("VALUES ($1, $2)"));
        assert!(query.contains("ON CONFLICT (\"dwvkey\")"));
        assert!(query.contains("DO UPDATE SET \"dwvmoddes\" = EXCLUDED.\"dwvmoddes\""));
        assert!(!query.contains("\"dwvkey\" = EXCLUDED"));
    }

    #[test]
    fn test_build_upsert_numbers_placeholders_across_rows() {
        let query = build_upsert("jobs", &cols(&["a", "b"]), "a", 3);
        assert!(query.contains("($1, $2), ($3, $4), ($5, $6)"));
    }

    #[test]
    fn test_build_upsert_key_only_table() {
        let query = build_upsert("tags", &cols(&["id"]), "id", 1);
        assert!(query.ends_with("DO NOTHING"));
    }

    #[test]
    fn test_rows_per_statement_respects_param_limit() {
        assert_eq!(rows_per_statement(1), 65_000);
        assert_eq!(rows_per_statement(100), 650);
        assert!(rows_per_statement(40) * 40 <= MAX_BIND_PARAMS);
        assert_eq!(rows_per_statement(0), 65_000);
        assert_eq!(rows_per_statement(100_000), 1);
    }
}
