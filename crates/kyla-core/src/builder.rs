//! Repository builder: hash the declared sources, deduplicate by digest,
//! and emit a loose or packed repository.

use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;
use uuid::Uuid;

use crate::catalog::{self, Catalog};
use crate::descriptor::{Descriptor, PackageKind};
use crate::digest::{digest_file, Digest};
use crate::package::PackageWriter;
use crate::progress::{ProgressSink, ProgressUpdate};
use crate::repository::{LOOSE_CATALOG, LOOSE_DIR, LOOSE_OBJECTS_DIR, PACKED_CATALOG, PACKED_PACKAGE};

/// A deduplicated content object: one representative source file plus
/// every target path that should reference it.
#[derive(Clone, Debug)]
pub struct UniqueContentObject {
    pub digest: Digest,
    pub source: PathBuf,
    pub size: u64,
    pub targets: Vec<String>,
}

struct BuildContext<'a> {
    source_directory: &'a Path,
    target_directory: &'a Path,
}

/// Build a repository at `target_directory` from the parsed descriptor.
pub fn build_repository(
    descriptor: &Descriptor,
    source_directory: &Path,
    target_directory: &Path,
    progress: &mut ProgressSink<'_>,
) -> Result<()> {
    let ctx = BuildContext {
        source_directory,
        target_directory,
    };
    fs::create_dir_all(target_directory)
        .with_context(|| format!("failed to create {}", target_directory.display()))?;

    stage(progress, "hash");
    let hashed = hash_sources(descriptor, &ctx, progress)?;

    stage(progress, "dedupe");
    let unique = dedupe_by_digest(hashed);
    debug!(objects = unique.len(), "deduplicated content objects");

    stage(progress, "write");
    match descriptor.kind {
        PackageKind::Loose => build_loose(descriptor, &ctx, &unique, progress)?,
        PackageKind::Packed => build_packed(descriptor, &ctx, &unique, progress)?,
    }
    stage(progress, "done");
    Ok(())
}

fn stage(progress: &mut ProgressSink<'_>, action: &str) {
    progress(&ProgressUpdate {
        action,
        current: 0,
        total: 0,
    });
}

/// `(digest, size, source path, target path)` for every declared file.
type HashedFile = (Digest, u64, PathBuf, String);

fn hash_sources(
    descriptor: &Descriptor,
    ctx: &BuildContext<'_>,
    progress: &mut ProgressSink<'_>,
) -> Result<Vec<HashedFile>> {
    let total: u64 = descriptor
        .filesets
        .iter()
        .map(|fileset| fileset.files.len() as u64)
        .sum();
    let mut hashed = Vec::with_capacity(total as usize);
    let mut current = 0u64;
    for fileset in &descriptor.filesets {
        for file in &fileset.files {
            let source = ctx.source_directory.join(&file.source);
            let digest = digest_file(&source)?;
            let size = fs::metadata(&source)
                .with_context(|| format!("failed to stat {}", source.display()))?
                .len();
            hashed.push((digest, size, source, file.target.clone()));
            current += 1;
            progress(&ProgressUpdate {
                action: "hash",
                current,
                total,
            });
        }
    }
    Ok(hashed)
}

/// Merge hashed files on their digest, keeping the first source file seen
/// as the representative copy and collecting all target paths.
fn dedupe_by_digest(hashed: Vec<HashedFile>) -> Vec<UniqueContentObject> {
    let mut unique: Vec<UniqueContentObject> = Vec::new();
    let mut by_digest: HashMap<Digest, usize> = HashMap::new();
    for (digest, size, source, target) in hashed {
        match by_digest.get(&digest) {
            Some(&index) => unique[index].targets.push(target),
            None => {
                by_digest.insert(digest, unique.len());
                unique.push(UniqueContentObject {
                    digest,
                    source,
                    size,
                    targets: vec![target],
                });
            }
        }
    }
    unique
}

/// Map every target path back to the rowid of the file-set declaring it,
/// inserting the `file_sets` rows along the way.
fn populate_filesets(
    catalog: &mut Catalog,
    descriptor: &Descriptor,
) -> Result<HashMap<String, i64>> {
    catalog.with_tx(|tx| {
        let mut target_to_fileset = HashMap::new();
        for fileset in &descriptor.filesets {
            let fileset_id = catalog::insert_fileset(tx, &fileset.id, &fileset.name)?;
            for file in &fileset.files {
                target_to_fileset.insert(file.target.clone(), fileset_id);
            }
        }
        Ok(target_to_fileset)
    })
}

fn fileset_for_target<'a>(
    target_to_fileset: &'a HashMap<String, i64>,
    target: &str,
) -> Result<&'a i64> {
    target_to_fileset
        .get(target)
        .ok_or_else(|| anyhow::anyhow!("target path '{target}' belongs to no file set"))
}

fn build_loose(
    descriptor: &Descriptor,
    ctx: &BuildContext<'_>,
    unique: &[UniqueContentObject],
    progress: &mut ProgressSink<'_>,
) -> Result<()> {
    let objects_dir = ctx
        .target_directory
        .join(LOOSE_DIR)
        .join(LOOSE_OBJECTS_DIR);
    fs::create_dir_all(&objects_dir)
        .with_context(|| format!("failed to create {}", objects_dir.display()))?;

    let mut catalog = Catalog::create(&ctx.target_directory.join(LOOSE_DIR).join(LOOSE_CATALOG))?;
    let target_to_fileset = populate_filesets(&mut catalog, descriptor)?;

    let total = unique.len() as u64;
    catalog.with_tx(|tx| {
        for (index, object) in unique.iter().enumerate() {
            let content_object_id = catalog::insert_content_object(tx, &object.digest, object.size)?;
            for target in &object.targets {
                let fileset_id = fileset_for_target(&target_to_fileset, target)?;
                catalog::insert_file(tx, target, content_object_id, *fileset_id)?;
            }
            let object_path = objects_dir.join(object.digest.to_hex());
            fs::copy(&object.source, &object_path).with_context(|| {
                format!(
                    "failed to copy {} into the object store",
                    object.source.display()
                )
            })?;
            progress(&ProgressUpdate {
                action: "write",
                current: index as u64 + 1,
                total,
            });
        }
        Ok(())
    })?;

    catalog.finish_bulk()?;
    Ok(())
}

fn build_packed(
    descriptor: &Descriptor,
    ctx: &BuildContext<'_>,
    unique: &[UniqueContentObject],
    progress: &mut ProgressSink<'_>,
) -> Result<()> {
    let mut catalog = Catalog::create(&ctx.target_directory.join(PACKED_CATALOG))?;
    let target_to_fileset = populate_filesets(&mut catalog, descriptor)?;

    let mut package = PackageWriter::create(&ctx.target_directory.join(PACKED_PACKAGE))?;
    let total = unique.len() as u64;
    catalog.with_tx(|tx| {
        let package_id =
            catalog::insert_source_package(tx, "package", PACKED_PACKAGE, &Uuid::new_v4())?;
        for (index, object) in unique.iter().enumerate() {
            let content_object_id = catalog::insert_content_object(tx, &object.digest, object.size)?;
            for target in &object.targets {
                let fileset_id = fileset_for_target(&target_to_fileset, target)?;
                catalog::insert_file(tx, target, content_object_id, *fileset_id)?;
            }
            let mut input = File::open(&object.source)
                .with_context(|| format!("failed to open {}", object.source.display()))?;
            let (offset, length) = package.append(&mut input)?;
            catalog::insert_storage_mapping(tx, content_object_id, package_id, offset, length, 0)?;
            progress(&ProgressUpdate {
                action: "write",
                current: index as u64 + 1,
                total,
            });
        }
        Ok(())
    })?;
    package.finish()?;

    catalog.finish_bulk()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::digest_bytes;

    #[test]
    fn dedupe_keeps_first_seen_order_and_merges_targets() {
        let hi = digest_bytes(b"hi");
        let other = digest_bytes(b"other");
        let unique = dedupe_by_digest(vec![
            (hi, 2, PathBuf::from("a.txt"), "a.txt".into()),
            (other, 5, PathBuf::from("c.txt"), "c.txt".into()),
            (hi, 2, PathBuf::from("b.txt"), "b.txt".into()),
        ]);
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].digest, hi);
        assert_eq!(unique[0].source, PathBuf::from("a.txt"));
        assert_eq!(unique[0].targets, vec!["a.txt".to_string(), "b.txt".to_string()]);
        assert_eq!(unique[1].targets, vec!["c.txt".to_string()]);
    }
}
