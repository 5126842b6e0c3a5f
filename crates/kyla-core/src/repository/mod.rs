//! The polymorphic repository contract and its three layouts.
//!
//! Every layout answers the same operations; construction picks the
//! concrete type by probing the directory for layout signatures.

use std::path::{Path, PathBuf};

use anyhow::Result;
use uuid::Uuid;

use crate::catalog::Catalog;
pub use crate::catalog::FilesetInfo;
use crate::digest::Digest;
use crate::error::RepositoryError;
use crate::progress::LogSink;

pub mod deployed;
pub mod loose;
pub mod packed;


pub use deployed::DeployedRepository;
pub use loose::LooseRepository;
pub use packed::PackedRepository;

/// Hidden directory marking the loose layout.
pub const LOOSE_DIR: &str = ".ky";
pub const LOOSE_OBJECTS_DIR: &str = "objects";
pub const LOOSE_CATALOG: &str = "repository.db";
/// Catalog filename marking the deployed layout.
pub const DEPLOYED_CATALOG: &str = "k.db";
pub const PACKED_CATALOG: &str = "repository.db";
pub const PACKED_PACKAGE: &str = "data.kypkg";

/// Terminal classification of one validated object. Each visit produces
/// exactly one record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValidationKind {
    Ok,
    Missing,
    Corrupted,
}

/// One validation report record.
#[derive(Clone, Copy, Debug)]
pub struct ValidationRecord<'a> {
    pub digest: Digest,
    pub path: &'a Path,
    pub kind: ValidationKind,
}

/// Receives one record per validated object.
pub type ValidationReport<'a> = dyn FnMut(&ValidationRecord<'_>) + 'a;

/// Receives `(digest, bytes)` exactly once per requested object. The
/// byte slice is only valid for the duration of the call.
pub type ContentSink<'a> = dyn FnMut(&Digest, &[u8]) -> Result<()> + 'a;

/// The operations every repository supports, independent of layout.
///
/// Operations are total over valid inputs; per-object integrity faults
/// are reported through the sinks, never raised. Catalog and I/O faults
/// unwind.
pub trait Repository: std::fmt::Debug {
    /// Visit each content object in ascending size order and classify it.
    fn validate(&mut self, report: &mut ValidationReport<'_>) -> Result<()>;

    /// Fetch every faulty object from `source` and rewrite it in place.
    fn repair(&mut self, source: &mut dyn Repository) -> Result<()>;

    /// Deliver the bytes of each requested object to `sink`, zero-copy
    /// where the layout allows it.
    fn get_content_objects(
        &mut self,
        digests: &[Digest],
        sink: &mut ContentSink<'_>,
    ) -> Result<()>;

    /// Reconcile the locally present file-sets against `filesets`.
    fn configure(
        &mut self,
        source: &mut dyn Repository,
        filesets: &[Uuid],
        log: &mut LogSink<'_>,
    ) -> Result<()>;

    fn fileset_infos(&self) -> Result<Vec<FilesetInfo>>;

    fn fileset_name(&self, fileset: &Uuid) -> Result<String>;

    /// Escape hatch for callers that need raw catalog queries.
    fn catalog(&self) -> &Catalog;

    fn catalog_mut(&mut self) -> &mut Catalog;
}

/// Probe `path` for a repository layout and open it.
///
/// A hidden `.ky/` directory wins, then a deployed `k.db` catalog, then
/// the packed `repository.db` + `data.kypkg` pair.
pub fn open_repository(path: &Path) -> Result<Box<dyn Repository>> {
    if path.join(LOOSE_DIR).is_dir() {
        return Ok(Box::new(LooseRepository::open(path)?));
    }
    if path.join(DEPLOYED_CATALOG).is_file() {
        return Ok(Box::new(DeployedRepository::open(path)?));
    }
    if path.join(PACKED_CATALOG).is_file() && path.join(PACKED_PACKAGE).is_file() {
        return Ok(Box::new(PackedRepository::open(path)?));
    }
    Err(RepositoryError::NotARepository {
        path: path.to_path_buf(),
    }
    .into())
}

fn fileset_name_from_catalog(catalog: &Catalog, fileset: &Uuid) -> Result<String> {
    catalog
        .fileset_name(fileset)?
        .ok_or_else(|| anyhow::anyhow!("file set {fileset} is not in the catalog"))
}

/// Resolve the on-disk location repair should rewrite for a faulty
/// object, collected while validating.
#[derive(Debug, Default)]
struct FaultSet {
    digests: Vec<Digest>,
    paths: std::collections::HashMap<Digest, Vec<PathBuf>>,
}

impl FaultSet {
    fn record(&mut self, digest: Digest, path: PathBuf) {
        let entry = self.paths.entry(digest).or_default();
        if entry.is_empty() {
            self.digests.push(digest);
        }
        entry.push(path);
    }

    fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }
}
