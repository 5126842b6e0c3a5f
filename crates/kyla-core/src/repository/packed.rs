//! Packed layout: content objects concatenated into package files,
//! located through the catalog's storage mappings.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::catalog::{Catalog, FilesetInfo, StorageLocation};
use crate::digest::{digest_bytes, Digest};
use crate::error::RepositoryError;
use crate::package::{PackageReader, PackageWriter};
use crate::progress::LogSink;

use super::{
    fileset_name_from_catalog, ContentSink, Repository, ValidationKind, ValidationRecord,
    ValidationReport, PACKED_CATALOG,
};

#[derive(Debug)]
pub struct PackedRepository {
    catalog: Catalog,
    root: PathBuf,
    // One reader per package per handle; windows slice into its map.
    readers: HashMap<String, PackageReader>,
}

impl PackedRepository {
    pub fn open(root: &Path) -> Result<Self> {
        let catalog = Catalog::open(&root.join(PACKED_CATALOG))?;
        Ok(Self {
            catalog,
            root: root.to_path_buf(),
            readers: HashMap::new(),
        })
    }

    fn reader(&mut self, filename: &str) -> Result<&PackageReader> {
        if !self.readers.contains_key(filename) {
            let reader = PackageReader::open(&self.root.join(filename))?;
            self.readers.insert(filename.to_string(), reader);
        }
        Ok(&self.readers[filename])
    }

    /// Classify one mapped object without touching shared reader state.
    fn classify_window(
        reader: &PackageReader,
        location: &StorageLocation,
        digest: &Digest,
        size: u64,
    ) -> ValidationKind {
        let window = match reader.window(location.offset, location.length) {
            Ok(window) => window,
            Err(_) => return ValidationKind::Corrupted,
        };
        if window.len() as u64 != size {
            return ValidationKind::Corrupted;
        }
        if size == 0 {
            return ValidationKind::Ok;
        }
        if digest_bytes(window) != *digest {
            return ValidationKind::Corrupted;
        }
        ValidationKind::Ok
    }
}

impl Repository for PackedRepository {
    fn validate(&mut self, report: &mut ValidationReport<'_>) -> Result<()> {
        for row in self.catalog.mapped_objects_by_size()? {
            let (kind, path) = match &row.location {
                None => (ValidationKind::Missing, self.root.clone()),
                Some(location) => {
                    let path = self.root.join(&location.package_filename);
                    if !path.is_file() {
                        (ValidationKind::Missing, path)
                    } else {
                        let kind = match self.reader(&location.package_filename) {
                            Ok(reader) => {
                                Self::classify_window(reader, location, &row.digest, row.size)
                            }
                            Err(err) => {
                                warn!(%err, "package unreadable, reporting object corrupted");
                                ValidationKind::Corrupted
                            }
                        };
                        (kind, path)
                    }
                }
            };
            report(&ValidationRecord {
                digest: row.digest,
                path: &path,
                kind,
            });
        }
        Ok(())
    }

    fn repair(&mut self, source: &mut dyn Repository) -> Result<()> {
        let mut faulty = Vec::new();
        {
            let mut collect = |record: &ValidationRecord<'_>| {
                if record.kind != ValidationKind::Ok {
                    faulty.push(record.digest);
                }
            };
            self.validate(&mut collect)?;
        }
        if faulty.is_empty() {
            return Ok(());
        }
        // Stale maps must not serve windows of rewritten packages.
        self.readers.clear();

        debug!(count = faulty.len(), "repairing packed objects");
        let mut writers: HashMap<String, PackageWriter> = HashMap::new();
        for digest in faulty {
            let Some(location) = self.catalog.storage_location(&digest)? else {
                warn!(%digest, "no storage mapping, object cannot be repaired");
                continue;
            };
            if !writers.contains_key(&location.package_filename) {
                let writer =
                    PackageWriter::open_for_repair(&self.root.join(&location.package_filename))?;
                writers.insert(location.package_filename.clone(), writer);
            }
            let writer = writers
                .get_mut(&location.package_filename)
                .ok_or_else(|| RepositoryError::CatalogCorrupt("writer cache".into()))?;
            let mut write = |got: &Digest, bytes: &[u8]| -> Result<()> {
                if bytes.len() as u64 != location.length {
                    warn!(
                        digest = %got,
                        expected = location.length,
                        found = bytes.len(),
                        "source bytes do not fit the mapped window, skipping"
                    );
                    return Ok(());
                }
                writer.write_at(location.offset, bytes)?;
                debug!(digest = %got, "rewrote packed object window");
                Ok(())
            };
            if let Err(err) = source.get_content_objects(std::slice::from_ref(&digest), &mut write)
            {
                warn!(%digest, %err, "source could not provide object, leaving it faulty");
            }
        }
        for writer in writers.into_values() {
            writer.finish()?;
        }
        Ok(())
    }

    fn get_content_objects(
        &mut self,
        digests: &[Digest],
        sink: &mut ContentSink<'_>,
    ) -> Result<()> {
        for digest in digests {
            let location = self
                .catalog
                .storage_location(digest)?
                .ok_or(RepositoryError::UnknownObject { digest: *digest })?;
            let reader = self.reader(&location.package_filename)?;
            let window = reader.window(location.offset, location.length)?;
            sink(digest, window)?;
        }
        Ok(())
    }

    fn configure(
        &mut self,
        _source: &mut dyn Repository,
        _filesets: &[Uuid],
        _log: &mut LogSink<'_>,
    ) -> Result<()> {
        Err(RepositoryError::UnsupportedOperation {
            operation: "configure",
        }
        .into())
    }

    fn fileset_infos(&self) -> Result<Vec<FilesetInfo>> {
        self.catalog.fileset_infos()
    }

    fn fileset_name(&self, fileset: &Uuid) -> Result<String> {
        fileset_name_from_catalog(&self.catalog, fileset)
    }

    fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    fn catalog_mut(&mut self) -> &mut Catalog {
        &mut self.catalog
    }
}
