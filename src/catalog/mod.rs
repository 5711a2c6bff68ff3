// ABOUTME: Backup catalog: immutable archived snapshot copies plus a SQLite index
// ABOUTME: Entries are (id, filename, timestamp, note); files live in the catalog directory

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, SubsecRound, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::device::Snapshot;
use crate::error::{ReplicatorError, Result};
use crate::sqlite::SchemaIntrospector;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS backups (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    filename  TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    note      TEXT
);
"#;

/// Older indexes stored the compact form used in file names.
const LEGACY_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub id: i64,
    pub filename: String,
    pub timestamp: DateTime<Utc>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub entry: CatalogEntry,
    /// The archived file was already gone; only the index row was removed.
    pub file_was_missing: bool,
}

pub struct BackupCatalog {
    directory: PathBuf,
    conn: Connection,
}

impl BackupCatalog {
    /// Open (creating on first use) the catalog index and its directory.
    pub fn open(directory: impl AsRef<Path>, index_path: impl AsRef<Path>) -> Result<Self> {
        let directory = directory.as_ref();
        let index_path = index_path.as_ref();

        fs::create_dir_all(directory).with_context(|| {
            format!("failed to create backup directory {}", directory.display())
        })?;
        if let Some(parent) = index_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create catalog directory {}", parent.display())
            })?;
        }

        let conn = Connection::open(index_path).with_context(|| {
            format!("failed to open backup index {}", index_path.display())
        })?;
        conn.execute_batch(SCHEMA)
            .context("failed to initialize backup index schema")?;

        Ok(Self {
            directory: directory.to_path_buf(),
            conn,
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Copy `snapshot` into the catalog and record it.
    pub fn archive(&self, snapshot: &Path, note: Option<&str>) -> Result<CatalogEntry> {
        self.archive_at(snapshot, note, Utc::now())
    }

    /// Copy an arbitrary database file into the catalog. The file must be a
    /// readable SQLite database.
    pub fn import(&self, source: &Path, note: Option<&str>) -> Result<CatalogEntry> {
        SchemaIntrospector::open(source)?;
        self.archive_at(source, note, Utc::now())
    }

    pub fn archive_at(
        &self,
        snapshot: &Path,
        note: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<CatalogEntry> {
        if !snapshot.is_file() {
            return Err(ReplicatorError::NotFound(format!(
                "snapshot {}",
                snapshot.display()
            )));
        }

        // Stored with microsecond precision; keep the returned entry identical
        let at = at.trunc_subsecs(6);
        let (filename, path) = self.copy_into_catalog(snapshot, at)?;
        let timestamp = at.to_rfc3339_opts(SecondsFormat::Micros, true);

        let inserted = self.conn.execute(
            "INSERT INTO backups (filename, timestamp, note) VALUES (?1, ?2, ?3)",
            params![filename, timestamp, note],
        );
        if let Err(e) = inserted {
            if let Err(cleanup) = fs::remove_file(&path) {
                tracing::warn!(
                    "Failed to remove unindexed backup {}: {}",
                    path.display(),
                    cleanup
                );
            }
            return Err(anyhow::Error::new(e)
                .context(format!("failed to index backup {}", filename))
                .into());
        }

        let entry = CatalogEntry {
            id: self.conn.last_insert_rowid(),
            filename,
            timestamp: at,
            note: note.map(str::to_string),
        };
        tracing::info!(
            "Archived {} as backup #{} ({})",
            snapshot.display(),
            entry.id,
            entry.filename
        );
        Ok(entry)
    }

    /// Create a new, never-before-used file for `at` and copy into it.
    fn copy_into_catalog(&self, snapshot: &Path, at: DateTime<Utc>) -> Result<(String, PathBuf)> {
        let stem = format!("backup_{}", at.format(LEGACY_TIMESTAMP_FORMAT));
        let mut attempt = 0u32;
        loop {
            let filename = if attempt == 0 {
                format!("{stem}.db")
            } else {
                format!("{stem}_{attempt}.db")
            };
            let path = self.directory.join(&filename);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut dest) => {
                    if let Err(e) = copy_contents(snapshot, &mut dest) {
                        drop(dest);
                        if let Err(cleanup) = fs::remove_file(&path) {
                            tracing::warn!(
                                "Failed to remove partial backup {}: {}",
                                path.display(),
                                cleanup
                            );
                        }
                        return Err(e.into());
                    }
                    return Ok((filename, path));
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// All entries, newest first. Rows that cannot be decoded are skipped
    /// with a warning.
    pub fn list(&self) -> Result<Vec<CatalogEntry>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, filename, timestamp, note FROM backups")
            .context("failed to query backup index")?;
        let mut rows = stmt.query([]).context("failed to query backup index")?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next().context("failed to read backup index")? {
            match entry_from_row(row) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    let id = row.get::<_, i64>(0).ok();
                    tracing::warn!("Skipping unreadable backup row {:?}: {:#}", id, e);
                }
            }
        }
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        Ok(entries)
    }

    pub fn get(&self, id: i64) -> Result<CatalogEntry> {
        let raw = self
            .conn
            .query_row(
                "SELECT id, filename, timestamp, note FROM backups WHERE id = ?1",
                [id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                },
            )
            .optional()
            .context("failed to query backup index")?;

        let (id, filename, timestamp, note) =
            raw.ok_or_else(|| ReplicatorError::NotFound(format!("backup #{id}")))?;
        Ok(CatalogEntry {
            id,
            filename,
            timestamp: parse_timestamp(&timestamp)?,
            note,
        })
    }

    pub fn path_of(&self, entry: &CatalogEntry) -> PathBuf {
        self.directory.join(&entry.filename)
    }

    /// Resolve an entry to a snapshot that can be read or replicated.
    pub fn open_entry(&self, id: i64) -> Result<Snapshot> {
        let entry = self.get(id)?;
        let path = self.path_of(&entry);
        if !path.is_file() {
            tracing::warn!(
                "Backup #{} is indexed but {} is missing",
                id,
                path.display()
            );
            return Err(ReplicatorError::CatalogInconsistency { id, path });
        }
        Ok(Snapshot::from_file(&path, entry.timestamp)?)
    }

    /// Remove the entry and its file. A file that is already gone is
    /// reported, not treated as a failure.
    pub fn delete(&self, id: i64) -> Result<DeleteOutcome> {
        let entry = self.get(id)?;
        let path = self.path_of(&entry);

        let file_was_missing = match fs::remove_file(&path) {
            Ok(()) => false,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::warn!(
                    "Backup #{} file {} was already missing; removing index row",
                    id,
                    path.display()
                );
                true
            }
            Err(e) => {
                return Err(anyhow::Error::new(e)
                    .context(format!("failed to remove {}", path.display()))
                    .into())
            }
        };

        self.conn
            .execute("DELETE FROM backups WHERE id = ?1", [id])
            .context("failed to delete backup index row")?;
        tracing::info!("Deleted backup #{} ({})", id, entry.filename);

        Ok(DeleteOutcome {
            entry,
            file_was_missing,
        })
    }
}

fn copy_contents(source: &Path, dest: &mut fs::File) -> io::Result<()> {
    let mut src = fs::File::open(source)?;
    io::copy(&mut src, dest)?;
    dest.sync_all()
}

fn entry_from_row(row: &rusqlite::Row<'_>) -> Result<CatalogEntry> {
    let timestamp: String = row.get(2).context("failed to read backup timestamp")?;
    Ok(CatalogEntry {
        id: row.get(0).context("failed to read backup id")?,
        filename: row.get(1).context("failed to read backup filename")?,
        timestamp: parse_timestamp(&timestamp)?,
        note: row.get(3).context("failed to read backup note")?,
    })
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(value, LEGACY_TIMESTAMP_FORMAT)
        .with_context(|| format!("unrecognized backup timestamp '{}'", value))?;
    Ok(Utc.from_utc_datetime(&naive))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_db(path: &Path, marker: &str) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch("CREATE TABLE t (k TEXT PRIMARY KEY, v TEXT);")
            .unwrap();
        conn.execute("INSERT INTO t VALUES ('a', ?1)", [marker]).unwrap();
    }

    fn setup() -> (tempfile::TempDir, BackupCatalog, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let catalog =
            BackupCatalog::open(dir.path().join("backups"), dir.path().join("index.db")).unwrap();
        let staging = dir.path().join("temp.db");
        make_db(&staging, "one");
        (dir, catalog, staging)
    }

    #[test]
    fn test_list_skips_row_with_bad_timestamp() {
        let (_dir, catalog, staging) = setup();
        let good = catalog.archive(&staging, Some("good")).unwrap();
        catalog
            .conn
            .execute(
                "INSERT INTO backups (filename, timestamp, note) VALUES ('odd.db', 'yesterday', NULL)",
                [],
            )
            .unwrap();

        let listed = catalog.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, good.id);
    }

    #[test]
    fn test_failed_copy_leaves_no_file_behind() {
        let (dir, catalog, _staging) = setup();
        let missing = dir.path().join("vanished.db");

        assert!(catalog.copy_into_catalog(&missing, Utc::now()).is_err());
        assert_eq!(std::fs::read_dir(catalog.directory()).unwrap().count(), 0);
    }

    #[test]
    fn test_archive_copies_bytes_and_indexes() {
        let (_dir, catalog, staging) = setup();
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap();
        let entry = catalog.archive_at(&staging, Some("before run"), at).unwrap();

        assert_eq!(entry.filename, "backup_20240301_083000.db");
        assert_eq!(entry.note.as_deref(), Some("before run"));
        assert_eq!(
            fs::read(catalog.path_of(&entry)).unwrap(),
            fs::read(&staging).unwrap()
        );
        assert_eq!(catalog.get(entry.id).unwrap(), entry);
    }

    #[test]
    fn test_same_second_archives_do_not_collide() {
        let (_dir, catalog, staging) = setup();
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap();
        let first = catalog.archive_at(&staging, None, at).unwrap();
        let second = catalog.archive_at(&staging, None, at).unwrap();
        assert_eq!(first.filename, "backup_20240301_083000.db");
        assert_eq!(second.filename, "backup_20240301_083000_1.db");
        assert!(catalog.path_of(&first).exists());
        assert!(catalog.path_of(&second).exists());
    }

    #[test]
    fn test_list_is_newest_first() {
        let (_dir, catalog, staging) = setup();
        let older = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let newer = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let a = catalog.archive_at(&staging, Some("old"), older).unwrap();
        let b = catalog.archive_at(&staging, Some("new"), newer).unwrap();
        let c = catalog.archive_at(&staging, Some("also new"), newer).unwrap();

        let ids: Vec<i64> = catalog.list().unwrap().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![c.id, b.id, a.id]);
    }

    #[test]
    fn test_archive_missing_snapshot_is_not_found() {
        let (dir, catalog, _staging) = setup();
        let err = catalog
            .archive(&dir.path().join("absent.db"), None)
            .unwrap_err();
        assert!(matches!(err, ReplicatorError::NotFound(_)));
        assert!(catalog.list().unwrap().is_empty());
    }

    #[test]
    fn test_import_rejects_non_database() {
        let (dir, catalog, _staging) = setup();
        let junk = dir.path().join("notes.txt");
        fs::write(&junk, "not a database at all, just some text").unwrap();
        assert!(catalog.import(&junk, None).is_err());
        assert!(catalog.list().unwrap().is_empty());
    }

    #[test]
    fn test_delete_with_missing_file_still_removes_row() {
        let (_dir, catalog, staging) = setup();
        let entry = catalog.archive(&staging, None).unwrap();
        fs::remove_file(catalog.path_of(&entry)).unwrap();

        let outcome = catalog.delete(entry.id).unwrap();
        assert!(outcome.file_was_missing);
        assert!(matches!(
            catalog.get(entry.id),
            Err(ReplicatorError::NotFound(_))
        ));
    }

    #[test]
    fn test_open_entry_with_missing_file_is_inconsistency() {
        let (_dir, catalog, staging) = setup();
        let entry = catalog.archive(&staging, None).unwrap();
        fs::remove_file(catalog.path_of(&entry)).unwrap();

        let err = catalog.open_entry(entry.id).unwrap_err();
        assert!(matches!(err, ReplicatorError::CatalogInconsistency { .. }));
        assert!(err.is_transient());
    }

    #[test]
    fn test_index_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("temp.db");
        make_db(&staging, "x");
        let id = {
            let catalog =
                BackupCatalog::open(dir.path().join("b"), dir.path().join("i.db")).unwrap();
            catalog.archive(&staging, Some("keep")).unwrap().id
        };
        let catalog = BackupCatalog::open(dir.path().join("b"), dir.path().join("i.db")).unwrap();
        assert_eq!(catalog.get(id).unwrap().note.as_deref(), Some("keep"));
    }

    #[test]
    fn test_parse_legacy_timestamp() {
        let ts = parse_timestamp("20231225_101500").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2023, 12, 25, 10, 15, 0).unwrap());
    }
}
