//! Package file codec.
//!
//! A package starts with a fixed 64-byte header and continues as opaque
//! concatenated byte ranges. The catalog's `storage_mapping` table is the
//! only index into the body; the package itself carries no structure past
//! its header.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::error::RepositoryError;
use crate::mapped::MappedFile;

pub const PACKAGE_TAG: [u8; 8] = *b"KYLAPKG\0";
pub const PACKAGE_VERSION: u64 = 0x0001_0000_0000_0000;
pub const PACKAGE_HEADER_LEN: u64 = 64;

fn header_bytes() -> [u8; PACKAGE_HEADER_LEN as usize] {
    let mut header = [0u8; PACKAGE_HEADER_LEN as usize];
    header[..8].copy_from_slice(&PACKAGE_TAG);
    header[8..16].copy_from_slice(&PACKAGE_VERSION.to_le_bytes());
    header
}

fn check_header(path: &Path, header: &[u8]) -> Result<(), RepositoryError> {
    if header.len() < PACKAGE_HEADER_LEN as usize {
        return Err(RepositoryError::PackageFormat(format!(
            "{} is shorter than the package header",
            path.display()
        )));
    }
    if header[..8] != PACKAGE_TAG {
        return Err(RepositoryError::PackageFormat(format!(
            "{} does not start with the package tag",
            path.display()
        )));
    }
    let version = u64::from_le_bytes(
        header[8..16]
            .try_into()
            .map_err(|_| RepositoryError::PackageFormat("truncated version field".into()))?,
    );
    if version != PACKAGE_VERSION {
        return Err(RepositoryError::PackageFormat(format!(
            "{} has unrecognized package version {version:#018x}",
            path.display()
        )));
    }
    Ok(())
}

/// Exclusive writer appending opaque ranges to one package.
pub struct PackageWriter {
    file: File,
    path: PathBuf,
}

impl PackageWriter {
    /// Create a fresh package with its header written.
    pub fn create(path: &Path) -> Result<Self> {
        let mut file = File::create(path)
            .with_context(|| format!("failed to create package {}", path.display()))?;
        file.write_all(&header_bytes())
            .with_context(|| format!("failed to write package header to {}", path.display()))?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Open an existing package for in-place rewrites. A missing or
    /// truncated package is recreated with a fresh header so repair can
    /// refill its windows.
    pub fn open_for_repair(path: &Path) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("failed to open package {}", path.display()))?;
        let len = file
            .metadata()
            .with_context(|| format!("failed to stat package {}", path.display()))?
            .len();
        if len < PACKAGE_HEADER_LEN {
            file.seek(SeekFrom::Start(0))
                .with_context(|| format!("failed to rewind package {}", path.display()))?;
            file.write_all(&header_bytes())
                .with_context(|| format!("failed to write package header to {}", path.display()))?;
        } else {
            let mut header = [0u8; PACKAGE_HEADER_LEN as usize];
            file.seek(SeekFrom::Start(0))
                .with_context(|| format!("failed to rewind package {}", path.display()))?;
            file.read_exact(&mut header)
                .with_context(|| format!("failed to read package header of {}", path.display()))?;
            check_header(path, &header)?;
            file.seek(SeekFrom::End(0))
                .with_context(|| format!("failed to seek package {}", path.display()))?;
        }
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Stream-copy `reader` to the end of the package; returns the byte
    /// range `(offset, length)` the copy occupies.
    pub fn append<R: Read>(&mut self, reader: &mut R) -> Result<(u64, u64)> {
        let start = self
            .file
            .stream_position()
            .with_context(|| format!("failed to tell package {}", self.path.display()))?;
        let mut buf = [0u8; 32 * 1024];
        loop {
            let read = reader.read(&mut buf).context("failed to read source file")?;
            if read == 0 {
                break;
            }
            self.file
                .write_all(&buf[..read])
                .with_context(|| format!("failed to write package {}", self.path.display()))?;
        }
        let end = self
            .file
            .stream_position()
            .with_context(|| format!("failed to tell package {}", self.path.display()))?;
        Ok((start, end - start))
    }

    /// Rewrite one previously mapped range in place.
    pub fn write_at(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(offset))
            .with_context(|| format!("failed to seek package {}", self.path.display()))?;
        self.file
            .write_all(bytes)
            .with_context(|| format!("failed to rewrite package {}", self.path.display()))?;
        Ok(())
    }

    pub fn finish(self) -> Result<()> {
        self.file
            .sync_all()
            .with_context(|| format!("failed to flush package {}", self.path.display()))?;
        Ok(())
    }
}

/// Read-only view of one package, mapped once and sliced per object.
#[derive(Debug)]
pub struct PackageReader {
    map: MappedFile,
    path: PathBuf,
}

impl PackageReader {
    pub fn open(path: &Path) -> Result<Self> {
        let map = MappedFile::open(path)?;
        check_header(path, map.bytes())?;
        Ok(Self {
            map,
            path: path.to_path_buf(),
        })
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        self.map.bytes().len() as u64
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.bytes().is_empty()
    }

    /// Borrow the byte range a storage mapping points at.
    pub fn window(&self, offset: u64, length: u64) -> Result<&[u8]> {
        let end = offset
            .checked_add(length)
            .ok_or_else(|| RepositoryError::PackageFormat("storage mapping overflows".into()))?;
        if offset < PACKAGE_HEADER_LEN || end > self.len() {
            return Err(RepositoryError::PackageFormat(format!(
                "storage mapping [{offset}, {end}) is outside {}",
                self.path.display()
            ))
            .into());
        }
        Ok(&self.map.bytes()[offset as usize..end as usize])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout_matches_the_wire_format() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("data.kypkg");
        let writer = PackageWriter::create(&path)?;
        writer.finish()?;

        let bytes = std::fs::read(&path)?;
        assert_eq!(bytes.len(), 64);
        assert_eq!(&bytes[..8], b"KYLAPKG\0");
        assert_eq!(
            u64::from_le_bytes(bytes[8..16].try_into().expect("eight bytes")),
            0x0001_0000_0000_0000
        );
        assert!(bytes[16..].iter().all(|b| *b == 0));
        Ok(())
    }

    #[test]
    fn appended_ranges_read_back_through_windows() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("data.kypkg");
        let mut writer = PackageWriter::create(&path)?;
        let (first_off, first_len) = writer.append(&mut &b"abc"[..])?;
        let (second_off, second_len) = writer.append(&mut &b"defgh"[..])?;
        writer.finish()?;

        assert_eq!((first_off, first_len), (64, 3));
        assert_eq!((second_off, second_len), (67, 5));

        let reader = PackageReader::open(&path)?;
        assert_eq!(reader.window(first_off, first_len)?, b"abc");
        assert_eq!(reader.window(second_off, second_len)?, b"defgh");
        Ok(())
    }

    #[test]
    fn bad_tag_is_a_format_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("data.kypkg");
        let mut bytes = vec![0u8; 64];
        bytes[..8].copy_from_slice(b"NOTAPKG\0");
        std::fs::write(&path, &bytes)?;
        let err = PackageReader::open(&path).expect_err("tag check should fail");
        let repo_err = err
            .downcast_ref::<RepositoryError>()
            .expect("typed package error");
        assert!(matches!(repo_err, RepositoryError::PackageFormat(_)));
        Ok(())
    }

    #[test]
    fn windows_outside_the_body_are_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("data.kypkg");
        let mut writer = PackageWriter::create(&path)?;
        writer.append(&mut &b"abc"[..])?;
        writer.finish()?;
        let reader = PackageReader::open(&path)?;
        assert!(reader.window(0, 8).is_err());
        assert!(reader.window(64, 4).is_err());
        Ok(())
    }

    #[test]
    fn repair_rewrites_a_range_in_place() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("data.kypkg");
        let mut writer = PackageWriter::create(&path)?;
        let (offset, length) = writer.append(&mut &b"corrupt-me"[..])?;
        writer.finish()?;

        let mut repairer = PackageWriter::open_for_repair(&path)?;
        repairer.write_at(offset, b"repaired!!")?;
        repairer.finish()?;

        let reader = PackageReader::open(&path)?;
        assert_eq!(reader.window(offset, length)?, b"repaired!!");
        Ok(())
    }
}
