//! Deployed layout: content objects materialized at their real target
//! paths, with the catalog sitting at the target root.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{anyhow, Context, Result};
use tracing::debug;
use uuid::Uuid;

use crate::catalog::{self, Catalog, FilesetInfo};
use crate::digest::Digest;
use crate::error::RepositoryError;
use crate::mapped::{materialize, MappedFile};
use crate::progress::{LogLevel, LogSink, ProgressSink, ProgressUpdate};

use super::loose::{classify_object, rewrite_faulty_objects};
use super::{
    fileset_name_from_catalog, ContentSink, FaultSet, Repository, ValidationKind, ValidationRecord,
    ValidationReport, DEPLOYED_CATALOG,
};

#[derive(Debug)]
pub struct DeployedRepository {
    catalog: Catalog,
    root: PathBuf,
}

impl DeployedRepository {
    pub fn open(root: &Path) -> Result<Self> {
        let catalog = Catalog::open(&root.join(DEPLOYED_CATALOG))?;
        Ok(Self {
            catalog,
            root: root.to_path_buf(),
        })
    }

    /// Deploy the selected file-sets from `source` into `target`,
    /// creating a fresh deployed repository there.
    pub fn create_from(
        source: &mut dyn Repository,
        filesets: &[Uuid],
        target: &Path,
        log: &mut LogSink<'_>,
        progress: &mut ProgressSink<'_>,
        cancel: &AtomicBool,
    ) -> Result<Self> {
        fs::create_dir_all(target)
            .with_context(|| format!("failed to create target {}", target.display()))?;
        let catalog = Catalog::create(&target.join(DEPLOYED_CATALOG))?;
        let mut repository = Self {
            catalog,
            root: target.to_path_buf(),
        };
        for fileset in filesets {
            repository.deploy_fileset(source, fileset, log, progress, cancel)?;
        }
        repository.catalog.finish_bulk()?;
        Ok(repository)
    }

    /// Copy one file-set out of `source`: register it locally, pre-create
    /// every parent directory, then materialize each unique content
    /// object at all of its paths.
    fn deploy_fileset(
        &mut self,
        source: &mut dyn Repository,
        fileset: &Uuid,
        log: &mut LogSink<'_>,
        progress: &mut ProgressSink<'_>,
        cancel: &AtomicBool,
    ) -> Result<()> {
        let source_id = source
            .catalog()
            .fileset_id(fileset)?
            .ok_or_else(|| anyhow!("file set {fileset} is not in the source repository"))?;
        let name = source
            .catalog()
            .fileset_name(fileset)?
            .ok_or_else(|| anyhow!("file set {fileset} has no name in the source repository"))?;
        let local_fileset_id =
            catalog::insert_fileset(self.catalog.connection(), fileset, &name)?;
        log(
            "deploy",
            LogLevel::Info,
            &format!("deploying file set {name} ({fileset})"),
        );

        let pairs = source.catalog().files_for_fileset(source_id)?;
        let mut unique = Vec::new();
        let mut targets: HashMap<Digest, Vec<String>> = HashMap::new();
        let mut parents = BTreeSet::new();
        for (digest, path) in pairs {
            let entry = targets.entry(digest).or_default();
            if entry.is_empty() {
                unique.push(digest);
            }
            if let Some(parent) = Path::new(&path).parent() {
                if !parent.as_os_str().is_empty() {
                    parents.insert(self.root.join(parent));
                }
            }
            entry.push(path);
        }

        // All parent directories exist before any file materializes.
        for dir in parents {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create directory {}", dir.display()))?;
        }

        let total = unique.len() as u64;
        let mut current = 0u64;
        let catalog = &self.catalog;
        let root = &self.root;
        let mut store = |digest: &Digest, bytes: &[u8]| -> Result<()> {
            if cancel.load(Ordering::Relaxed) {
                return Err(RepositoryError::Cancelled.into());
            }
            let content_object_id = match catalog.content_object_id(digest)? {
                Some(id) => id,
                None => catalog::insert_content_object(
                    catalog.connection(),
                    digest,
                    bytes.len() as u64,
                )?,
            };
            for path in &targets[digest] {
                materialize(&root.join(path), bytes)?;
                catalog::insert_file(catalog.connection(), path, content_object_id, local_fileset_id)?;
            }
            current += 1;
            progress(&ProgressUpdate {
                action: "deploy",
                current,
                total,
            });
            debug!(%digest, copies = targets[digest].len(), "deployed content object");
            Ok(())
        };
        source.get_content_objects(&unique, &mut store)?;
        Ok(())
    }

    /// Drop one locally present file-set: its rows, then any of its paths
    /// no surviving file-set still claims, then unreferenced objects.
    fn remove_fileset(&mut self, fileset_id: i64, name: &str, log: &mut LogSink<'_>) -> Result<()> {
        let paths = self.catalog.fileset_paths(fileset_id)?;
        self.catalog.remove_fileset(fileset_id)?;
        for path in paths {
            if self.catalog.path_referenced(&path)? {
                continue;
            }
            let full = self.root.join(&path);
            match fs::remove_file(&full) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(RepositoryError::io(&full, err).into()),
            }
        }
        let pruned = self.catalog.prune_unreferenced_objects()?;
        log(
            "configure",
            LogLevel::Info,
            &format!("removed file set {name} ({pruned} objects pruned)"),
        );
        Ok(())
    }
}

impl Repository for DeployedRepository {
    fn validate(&mut self, report: &mut ValidationReport<'_>) -> Result<()> {
        // Per-file records: identical content at two paths is checked at
        // both, since both copies must be good.
        for row in self.catalog.files_with_objects_by_size()? {
            let path = self.root.join(&row.path);
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
        // One fetch per digest, rewritten at every faulty path.
        let mut faults = FaultSet::default();
        {
            let mut collect = |record: &ValidationRecord<'_>| {
                if record.kind != ValidationKind::Ok {
                    faults.record(record.digest, record.path.to_path_buf());
                }
            };
            self.validate(&mut collect)?;
        }
        if faults.is_empty() {
            return Ok(());
        }
        debug!(count = faults.digests.len(), "repairing deployed files");
        rewrite_faulty_objects(source, &faults)
    }

    fn get_content_objects(
        &mut self,
        digests: &[Digest],
        sink: &mut ContentSink<'_>,
    ) -> Result<()> {
        for digest in digests {
            let path = self
                .catalog
                .any_path_for_digest(digest)?
                .ok_or(RepositoryError::UnknownObject { digest: *digest })?;
            let map = MappedFile::open(&self.root.join(&path))?;
            sink(digest, map.bytes())?;
        }
        Ok(())
    }

    fn configure(
        &mut self,
        source: &mut dyn Repository,
        filesets: &[Uuid],
        log: &mut LogSink<'_>,
    ) -> Result<()> {
        let desired: HashSet<&Uuid> = filesets.iter().collect();
        let present = self.catalog.filesets()?;
        let present_ids: HashSet<Uuid> = present.iter().map(|(_, uuid, _)| *uuid).collect();

        for (rowid, uuid, name) in &present {
            if !desired.contains(uuid) {
                self.remove_fileset(*rowid, name, log)?;
            }
        }

        let cancel = AtomicBool::new(false);
        let mut no_progress = crate::progress::null_progress();
        for fileset in filesets {
            if present_ids.contains(fileset) {
                continue;
            }
            self.deploy_fileset(source, fileset, log, &mut no_progress, &cancel)?;
        }
        self.catalog.finish_bulk()?;
        Ok(())
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

impl DeployedRepository {
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}
