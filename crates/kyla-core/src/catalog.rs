//! The relational catalog binding paths and file-sets to content objects.
//!
//! One catalog file per repository. Bulk writers switch the journal to
//! WAL for the duration of a build or deploy and hand it back to
//! rollback mode with fresh index statistics via [`Catalog::finish_bulk`].

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::warn;
use uuid::Uuid;

use crate::digest::Digest;
use crate::error::RepositoryError;

const SCHEMA: &str = r#"
CREATE TABLE file_sets (
    Id INTEGER PRIMARY KEY,
    Uuid BLOB UNIQUE NOT NULL,
    Name TEXT NOT NULL
);
CREATE TABLE content_objects (
    Id INTEGER PRIMARY KEY,
    Hash BLOB UNIQUE NOT NULL,
    Size INTEGER NOT NULL,
    ChunkCount INTEGER
);
CREATE TABLE files (
    Id INTEGER PRIMARY KEY,
    Path TEXT NOT NULL,
    ContentObjectId INTEGER NOT NULL REFERENCES content_objects(Id),
    FileSetId INTEGER NOT NULL REFERENCES file_sets(Id)
);
CREATE TABLE source_packages (
    Id INTEGER PRIMARY KEY,
    Name TEXT NOT NULL,
    Filename TEXT NOT NULL,
    Uuid BLOB UNIQUE NOT NULL
);
CREATE TABLE storage_mapping (
    ContentObjectId INTEGER NOT NULL REFERENCES content_objects(Id),
    SourcePackageId INTEGER NOT NULL REFERENCES source_packages(Id),
    PackageOffset INTEGER NOT NULL,
    PackageSize INTEGER NOT NULL,
    SourceOffset INTEGER NOT NULL,
    Compression INTEGER
);
CREATE INDEX files_fileset_idx ON files(FileSetId);
CREATE INDEX files_content_object_idx ON files(ContentObjectId);
"#;

const EXPECTED_TABLES: [&str; 5] = [
    "file_sets",
    "content_objects",
    "files",
    "source_packages",
    "storage_mapping",
];

/// Catalog reflection: one row per file-set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilesetInfo {
    pub id: Uuid,
    pub file_count: i64,
    pub file_size: i64,
}

/// One `content_objects` row.
#[derive(Clone, Copy, Debug)]
pub struct ContentObjectRow {
    pub digest: Digest,
    pub size: u64,
}

/// One `files` row joined to its content object.
#[derive(Clone, Debug)]
pub struct FileRow {
    pub path: String,
    pub digest: Digest,
    pub size: u64,
}

/// A content object joined to its storage mapping, if any.
#[derive(Clone, Debug)]
pub struct MappedObjectRow {
    pub digest: Digest,
    pub size: u64,
    pub location: Option<StorageLocation>,
}

/// Where a content object's bytes live inside a package.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageLocation {
    pub package_filename: String,
    pub offset: u64,
    pub length: u64,
}

#[derive(Debug)]
pub struct Catalog {
    conn: Connection,
    path: PathBuf,
}

impl Catalog {
    /// Create a fresh catalog, removing any stale file first, and leave
    /// the journal in WAL mode for the bulk write that follows.
    pub fn create(path: &Path) -> Result<Self> {
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(RepositoryError::io(path, err).into()),
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to create catalog at {}", path.display()))?;
        conn.execute_batch(SCHEMA)
            .context("failed to apply catalog schema")?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("failed to enable WAL for catalog")?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .context("failed to relax synchronous mode for catalog")?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// Open an existing catalog and verify the expected tables are there.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(RepositoryError::NotARepository {
                path: path.to_path_buf(),
            }
            .into());
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open catalog at {}", path.display()))?;
        let catalog = Self {
            conn,
            path: path.to_path_buf(),
        };
        catalog.assert_expected_tables()?;
        Ok(catalog)
    }

    fn assert_expected_tables(&self) -> Result<()> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name IN \
             ('file_sets', 'content_objects', 'files', 'source_packages', 'storage_mapping')",
        )?;
        let found = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<std::collections::HashSet<_>>>()?;
        let missing: Vec<&str> = EXPECTED_TABLES
            .iter()
            .copied()
            .filter(|name| !found.contains(*name))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(
                RepositoryError::CatalogCorrupt(format!("missing tables: {}", missing.join(", ")))
                    .into(),
            )
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Run `f` inside one immediate transaction.
    pub fn with_tx<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> Result<T>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to start catalog transaction")?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    /// Hand the journal back to rollback mode and refresh the planner
    /// statistics. Closes out every bulk write.
    pub fn finish_bulk(&self) -> Result<()> {
        self.conn
            .pragma_update(None, "journal_mode", "DELETE")
            .context("failed to reset catalog journal mode")?;
        self.conn
            .execute("ANALYZE", [])
            .context("failed to analyze catalog")?;
        Ok(())
    }

    /// All content objects, smallest first.
    pub fn content_objects_by_size(&self) -> Result<Vec<ContentObjectRow>> {
        let mut stmt = self
            .conn
            .prepare("SELECT Hash, Size FROM content_objects ORDER BY Size")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows
            .into_iter()
            .filter_map(|(blob, size)| match Digest::from_blob(&blob) {
                Ok(digest) => Some(ContentObjectRow {
                    digest,
                    size: size as u64,
                }),
                Err(err) => {
                    warn!(%err, "skipping content object with malformed digest");
                    None
                }
            })
            .collect())
    }

    /// All file rows joined to their content objects, smallest first.
    pub fn files_with_objects_by_size(&self) -> Result<Vec<FileRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT files.Path, content_objects.Hash, content_objects.Size \
             FROM files \
             INNER JOIN content_objects ON content_objects.Id = files.ContentObjectId \
             ORDER BY content_objects.Size",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Vec<u8>>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows
            .into_iter()
            .filter_map(|(path, blob, size)| match Digest::from_blob(&blob) {
                Ok(digest) => Some(FileRow {
                    path,
                    digest,
                    size: size as u64,
                }),
                Err(err) => {
                    warn!(%err, path, "skipping file row with malformed digest");
                    None
                }
            })
            .collect())
    }

    /// Content objects joined to their storage mappings, smallest first.
    /// Objects without a mapping come back with `location: None`.
    pub fn mapped_objects_by_size(&self) -> Result<Vec<MappedObjectRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT content_objects.Hash, content_objects.Size, source_packages.Filename, \
                    storage_mapping.PackageOffset, storage_mapping.PackageSize \
             FROM content_objects \
             LEFT JOIN storage_mapping ON storage_mapping.ContentObjectId = content_objects.Id \
             LEFT JOIN source_packages ON source_packages.Id = storage_mapping.SourcePackageId \
             ORDER BY content_objects.Size",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, Vec<u8>>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                    row.get::<_, Option<i64>>(4)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows
            .into_iter()
            .filter_map(|(blob, size, filename, offset, length)| {
                let digest = match Digest::from_blob(&blob) {
                    Ok(digest) => digest,
                    Err(err) => {
                        warn!(%err, "skipping content object with malformed digest");
                        return None;
                    }
                };
                let location = match (filename, offset, length) {
                    (Some(package_filename), Some(offset), Some(length)) => {
                        Some(StorageLocation {
                            package_filename,
                            offset: offset as u64,
                            length: length as u64,
                        })
                    }
                    _ => None,
                };
                Some(MappedObjectRow {
                    digest,
                    size: size as u64,
                    location,
                })
            })
            .collect())
    }

    /// Resolve where a content object lives inside its package.
    pub fn storage_location(&self, digest: &Digest) -> Result<Option<StorageLocation>> {
        let row = self
            .conn
            .query_row(
                "SELECT source_packages.Filename, storage_mapping.PackageOffset, \
                        storage_mapping.PackageSize \
                 FROM storage_mapping \
                 INNER JOIN content_objects ON content_objects.Id = storage_mapping.ContentObjectId \
                 INNER JOIN source_packages ON source_packages.Id = storage_mapping.SourcePackageId \
                 WHERE content_objects.Hash = ?1 LIMIT 1",
                params![digest.as_bytes().as_slice()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()?;
        Ok(row.map(|(package_filename, offset, length)| StorageLocation {
            package_filename,
            offset: offset as u64,
            length: length as u64,
        }))
    }

    pub fn content_object_id(&self, digest: &Digest) -> Result<Option<i64>> {
        Ok(self
            .conn
            .query_row(
                "SELECT Id FROM content_objects WHERE Hash = ?1",
                params![digest.as_bytes().as_slice()],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Any one path whose content object carries `digest` (deployed
    /// repositories serve content from whichever copy is convenient).
    pub fn any_path_for_digest(&self, digest: &Digest) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT Path FROM files \
                 WHERE ContentObjectId = (SELECT Id FROM content_objects WHERE Hash = ?1) \
                 LIMIT 1",
                params![digest.as_bytes().as_slice()],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// One info row per file-set.
    pub fn fileset_infos(&self) -> Result<Vec<FilesetInfo>> {
        let mut stmt = self.conn.prepare(
            "SELECT file_sets.Uuid, COUNT(files.Id), COALESCE(SUM(content_objects.Size), 0) \
             FROM file_sets \
             LEFT JOIN files ON file_sets.Id = files.FileSetId \
             LEFT JOIN content_objects ON content_objects.Id = files.ContentObjectId \
             GROUP BY file_sets.Id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, Vec<u8>>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|(blob, file_count, file_size)| {
                let id = Uuid::from_slice(&blob)
                    .map_err(|_| RepositoryError::CatalogCorrupt("malformed file set id".into()))?;
                Ok(FilesetInfo {
                    id,
                    file_count,
                    file_size,
                })
            })
            .collect()
    }

    /// All file-sets as `(rowid, uuid, name)`.
    pub fn filesets(&self) -> Result<Vec<(i64, Uuid, String)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT Id, Uuid, Name FROM file_sets")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Vec<u8>>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|(id, blob, name)| {
                let uuid = Uuid::from_slice(&blob)
                    .map_err(|_| RepositoryError::CatalogCorrupt("malformed file set id".into()))?;
                Ok((id, uuid, name))
            })
            .collect()
    }

    pub fn fileset_id(&self, fileset: &Uuid) -> Result<Option<i64>> {
        Ok(self
            .conn
            .query_row(
                "SELECT Id FROM file_sets WHERE Uuid = ?1",
                params![fileset.as_bytes().as_slice()],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn fileset_name(&self, fileset: &Uuid) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT Name FROM file_sets WHERE Uuid = ?1",
                params![fileset.as_bytes().as_slice()],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// `(digest, path)` pairs for one file-set, ordered by content object
    /// id for read locality on the source side.
    pub fn files_for_fileset(&self, fileset_id: i64) -> Result<Vec<(Digest, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT content_objects.Hash, files.Path \
             FROM files \
             INNER JOIN content_objects ON content_objects.Id = files.ContentObjectId \
             WHERE files.FileSetId = ?1 \
             ORDER BY files.ContentObjectId",
        )?;
        let rows = stmt
            .query_map(params![fileset_id], |row| {
                Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows
            .into_iter()
            .filter_map(|(blob, path)| match Digest::from_blob(&blob) {
                Ok(digest) => Some((digest, path)),
                Err(err) => {
                    warn!(%err, path, "skipping file row with malformed digest");
                    None
                }
            })
            .collect())
    }

    pub fn fileset_paths(&self, fileset_id: i64) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT Path FROM files WHERE FileSetId = ?1")?;
        let rows = stmt
            .query_map(params![fileset_id], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn path_referenced(&self, path: &str) -> Result<bool> {
        Ok(self
            .conn
            .query_row(
                "SELECT 1 FROM files WHERE Path = ?1 LIMIT 1",
                params![path],
                |_| Ok(()),
            )
            .optional()?
            .is_some())
    }

    /// Drop a file-set together with its file rows.
    pub fn remove_fileset(&self, fileset_id: i64) -> Result<()> {
        self.conn
            .execute("DELETE FROM files WHERE FileSetId = ?1", params![fileset_id])?;
        self.conn
            .execute("DELETE FROM file_sets WHERE Id = ?1", params![fileset_id])?;
        Ok(())
    }

    /// Delete content objects no file references anymore.
    pub fn prune_unreferenced_objects(&self) -> Result<usize> {
        Ok(self.conn.execute(
            "DELETE FROM content_objects \
             WHERE Id NOT IN (SELECT ContentObjectId FROM files)",
            [],
        )?)
    }
}

pub fn insert_fileset(conn: &Connection, id: &Uuid, name: &str) -> Result<i64> {
    conn.execute(
        "INSERT INTO file_sets (Uuid, Name) VALUES (?1, ?2)",
        params![id.as_bytes().as_slice(), name],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn insert_content_object(conn: &Connection, digest: &Digest, size: u64) -> Result<i64> {
    conn.execute(
        "INSERT INTO content_objects (Hash, Size) VALUES (?1, ?2)",
        params![digest.as_bytes().as_slice(), size as i64],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn insert_file(
    conn: &Connection,
    path: &str,
    content_object_id: i64,
    fileset_id: i64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO files (Path, ContentObjectId, FileSetId) VALUES (?1, ?2, ?3)",
        params![path, content_object_id, fileset_id],
    )?;
    Ok(())
}

pub fn insert_source_package(
    conn: &Connection,
    name: &str,
    filename: &str,
    id: &Uuid,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO source_packages (Name, Filename, Uuid) VALUES (?1, ?2, ?3)",
        params![name, filename, id.as_bytes().as_slice()],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn insert_storage_mapping(
    conn: &Connection,
    content_object_id: i64,
    package_id: i64,
    offset: u64,
    size: u64,
    source_offset: u64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO storage_mapping \
         (ContentObjectId, SourcePackageId, PackageOffset, PackageSize, SourceOffset, Compression) \
         VALUES (?1, ?2, ?3, ?4, ?5, NULL)",
        params![
            content_object_id,
            package_id,
            offset as i64,
            size as i64,
            source_offset as i64
        ],
    )?;
    Ok(())
}
