//! Loose layout: one file per content object under the hidden `.ky/`
//! directory, named by its digest.

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::catalog::{Catalog, FilesetInfo};
use crate::digest::{digest_file, Digest};
use crate::error::RepositoryError;
use crate::mapped::{materialize, MappedFile};
use crate::progress::LogSink;

use super::{
    fileset_name_from_catalog, ContentSink, FaultSet, Repository, ValidationKind, ValidationRecord,
    ValidationReport, LOOSE_CATALOG, LOOSE_DIR, LOOSE_OBJECTS_DIR,
};

#[derive(Debug)]
pub struct LooseRepository {
    catalog: Catalog,
    root: PathBuf,
}

impl LooseRepository {
    pub fn open(root: &Path) -> Result<Self> {
        let catalog = Catalog::open(&root.join(LOOSE_DIR).join(LOOSE_CATALOG))?;
        Ok(Self {
            catalog,
            root: root.to_path_buf(),
        })
    }

    fn object_path(&self, digest: &Digest) -> PathBuf {
        self.root
            .join(LOOSE_DIR)
            .join(LOOSE_OBJECTS_DIR)
            .join(digest.to_hex())
    }
}

impl Repository for LooseRepository {
    fn validate(&mut self, report: &mut ValidationReport<'_>) -> Result<()> {
        // Smallest objects first: slow progress early, throughput later.
        for row in self.catalog.content_objects_by_size()? {
            let path = self.object_path(&row.digest);
            let kind = classify_object(&path, &row.digest, row.size)?;
            report(&ValidationRecord {
                digest: row.digest,
                path: &path,
                kind,
            });
        }
        Ok(())
    }

    fn repair(&mut self, source: &mut dyn Repository) -> Result<()> {
        let mut faults = FaultSet::default();
        {
            let object_root = self.root.join(LOOSE_DIR).join(LOOSE_OBJECTS_DIR);
            let mut collect = |record: &ValidationRecord<'_>| {
                if record.kind != ValidationKind::Ok {
                    faults.record(record.digest, object_root.join(record.digest.to_hex()));
                }
            };
            self.validate(&mut collect)?;
        }
        if faults.is_empty() {
            return Ok(());
        }
        debug!(count = faults.digests.len(), "repairing loose objects");
        rewrite_faulty_objects(source, &faults)
    }

    fn get_content_objects(
        &mut self,
        digests: &[Digest],
        sink: &mut ContentSink<'_>,
    ) -> Result<()> {
        for digest in digests {
            if self.catalog.content_object_id(digest)?.is_none() {
                return Err(RepositoryError::UnknownObject { digest: *digest }.into());
            }
            let map = MappedFile::open(&self.object_path(digest))?;
            sink(digest, map.bytes())?;
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

/// Classify one stored copy of a content object: existence, then size,
/// then (for non-empty objects) the digest itself.
pub(super) fn classify_object(
    path: &Path,
    digest: &Digest,
    size: u64,
) -> Result<ValidationKind> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(ValidationKind::Missing)
        }
        Err(err) => return Err(RepositoryError::io(path, err).into()),
    };
    if metadata.len() != size {
        return Ok(ValidationKind::Corrupted);
    }
    if size == 0 {
        // The null digest needs no read to confirm.
        return Ok(ValidationKind::Ok);
    }
    if digest_file(path)? != *digest {
        return Ok(ValidationKind::Corrupted);
    }
    Ok(ValidationKind::Ok)
}

/// Fetch each faulty digest from `source` and rewrite every recorded
/// location. Source faults for individual objects are logged and
/// swallowed; those objects stay faulty for the next pass.
pub(super) fn rewrite_faulty_objects(
    source: &mut dyn Repository,
    faults: &FaultSet,
) -> Result<()> {
    for digest in &faults.digests {
        let paths = &faults.paths[digest];
        let mut write = |got: &Digest, bytes: &[u8]| -> Result<()> {
            for path in paths {
                materialize(path, bytes)?;
            }
            debug!(digest = %got, copies = paths.len(), "rewrote content object");
            Ok(())
        };
        if let Err(err) = source.get_content_objects(std::slice::from_ref(digest), &mut write) {
            warn!(%digest, %err, "source could not provide object, leaving it faulty");
        }
    }
    Ok(())
}
