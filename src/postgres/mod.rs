// ABOUTME: Destination PostgreSQL access
// ABOUTME: Connection setup and catalog queries about existing tables

pub mod connection;

pub use connection::connect;

use anyhow::{Context, Result};
use tokio_postgres::GenericClient;

/// Column names of `public.<table>` in ordinal order; empty when the table
/// does not exist.
pub async fn existing_columns<C: GenericClient>(client: &C, table: &str) -> Result<Vec<String>> {
    let rows = client
        .query(
            "SELECT column_name::text
             FROM information_schema.columns
             WHERE table_schema = 'public' AND table_name = $1
             ORDER BY ordinal_position",
            &[&table],
        )
        .await
        .with_context(|| format!("Failed to get columns for public.{}", table))?;

    Ok(rows.iter().map(|row| row.get::<_, String>(0)).collect())
}
