//! Scoped memory-map handles.
//!
//! Every map is owned by the handle that produced it and is unmapped
//! strictly before the owning file handle closes (field drop order).

use std::fs::{File, OpenOptions};
use std::ops::Deref;
use std::path::Path;

use anyhow::{Context, Result};
use memmap2::{Mmap, MmapMut};

/// Read-only map of an entire file. Zero-length files are represented
/// without a map since mapping an empty range is invalid.
#[derive(Debug)]
pub struct MappedFile {
    map: Option<Mmap>,
    _file: File,
}

impl MappedFile {
    pub fn open(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let len = file
            .metadata()
            .with_context(|| format!("failed to stat {}", path.display()))?
            .len();
        let map = if len == 0 {
            None
        } else {
            // Safety: the mapping is read-only and dropped before the file.
            Some(
                unsafe { Mmap::map(&file) }
                    .with_context(|| format!("failed to map {}", path.display()))?,
            )
        };
        Ok(Self { map, _file: file })
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        self.map.as_deref().unwrap_or(&[])
    }
}

impl Deref for MappedFile {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.bytes()
    }
}

/// Write `bytes` to `path` through a sized mutable map: create or
/// truncate, set the size, map, copy, unmap. Re-running after a partial
/// write resizes first, which keeps interrupted operations restartable.
pub fn materialize(path: &Path, bytes: &[u8]) -> Result<()> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    file.set_len(bytes.len() as u64)
        .with_context(|| format!("failed to size {}", path.display()))?;
    if bytes.is_empty() {
        return Ok(());
    }
    // Safety: the file was just sized to the mapping length and the map
    // does not outlive this scope.
    let mut map = unsafe { MmapMut::map_mut(&file) }
        .with_context(|| format!("failed to map {} for writing", path.display()))?;
    map.copy_from_slice(bytes);
    map.flush()
        .with_context(|| format!("failed to flush {}", path.display()))?;
    Ok(())
}
