//! Fixed-width content digests and streaming hashing.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use sha2::{Digest as _, Sha256};

use crate::error::RepositoryError;

pub const DIGEST_LEN: usize = 32;

/// 256-bit content digest. Equality and ordering are bytewise; the hex
/// rendering is lowercase and doubles as the on-disk object filename.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Digest([u8; DIGEST_LEN]);

impl Digest {
    /// SHA-256 of the empty byte sequence. Size-zero content objects carry
    /// this digest.
    pub const NULL: Digest = Digest([
        0xe3, 0xb0, 0xc4, 0x42, 0x98, 0xfc, 0x1c, 0x14, 0x9a, 0xfb, 0xf4, 0xc8, 0x99, 0x6f, 0xb9,
        0x24, 0x27, 0xae, 0x41, 0xe4, 0x64, 0x9b, 0x93, 0x4c, 0xa4, 0x95, 0x99, 0x1b, 0x78, 0x52,
        0xb8, 0x55,
    ]);

    #[must_use]
    pub fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    /// Interpret a catalog blob as a digest. Blobs of the wrong width
    /// surface [`RepositoryError::DigestLengthMismatch`].
    pub fn from_blob(blob: &[u8]) -> Result<Self, RepositoryError> {
        let bytes: [u8; DIGEST_LEN] = blob
            .try_into()
            .map_err(|_| RepositoryError::DigestLengthMismatch { found: blob.len() })?;
        Ok(Self(bytes))
    }

    pub fn parse_hex(text: &str) -> Result<Self, RepositoryError> {
        let decoded = hex::decode(text)
            .map_err(|_| RepositoryError::DigestLengthMismatch { found: text.len() / 2 })?;
        Self::from_blob(&decoded)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

/// Streaming SHA-256 hasher.
pub struct Hasher(Sha256);

impl Hasher {
    #[must_use]
    pub fn new() -> Self {
        Self(Sha256::new())
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.0.update(bytes);
    }

    #[must_use]
    pub fn finish(self) -> Digest {
        Digest(self.0.finalize().into())
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

#[must_use]
pub fn digest_bytes(bytes: &[u8]) -> Digest {
    Digest(Sha256::digest(bytes).into())
}

/// Stream-hash a file in 32 KiB chunks.
pub fn digest_file(path: &Path) -> Result<Digest> {
    let mut file =
        File::open(path).with_context(|| format!("failed to open {} for hashing", path.display()))?;
    let mut hasher = Hasher::new();
    let mut buf = [0u8; 32 * 1024];
    loop {
        let read = file
            .read(&mut buf)
            .with_context(|| format!("failed to read {} for hashing", path.display()))?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_digest_matches_empty_input() {
        assert_eq!(digest_bytes(b""), Digest::NULL);
    }

    #[test]
    fn hex_roundtrip_is_lowercase_and_stable() {
        let digest = digest_bytes(b"hi");
        let hex = digest.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(hex, hex.to_lowercase());
        assert_eq!(Digest::parse_hex(&hex).expect("parse"), digest);
    }

    #[test]
    fn short_blobs_are_rejected() {
        let err = Digest::from_blob(&[0u8; 16]).expect_err("16 bytes is not a digest");
        assert!(matches!(
            err,
            RepositoryError::DigestLengthMismatch { found: 16 }
        ));
    }

    #[test]
    fn streaming_matches_one_shot() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("payload.bin");
        let payload = vec![0xabu8; 100 * 1024];
        std::fs::write(&path, &payload)?;
        assert_eq!(digest_file(&path)?, digest_bytes(&payload));
        Ok(())
    }
}
