//! Content-addressed software installer and repository engine.
//!
//! Files are stored as unique content objects keyed by their SHA-256
//! digest. A builder packs a declared file tree into a repository —
//! loose objects under a hidden directory, or ranges concatenated into
//! package files — and the engine deploys, validates, and repairs
//! installations against any repository through one polymorphic
//! contract.

#![deny(clippy::all)]

pub mod builder;
pub mod catalog;
pub mod descriptor;
pub mod digest;
pub mod error;
pub mod installer;
pub mod mapped;
pub mod package;
pub mod progress;
pub mod repository;

pub use builder::{build_repository, UniqueContentObject};
pub use catalog::{Catalog, FilesetInfo};
pub use descriptor::{Descriptor, PackageKind};
pub use digest::{digest_bytes, digest_file, Digest, Hasher};
pub use error::RepositoryError;
pub use installer::{Action, DesiredState, Installer, RepositoryHandle, ValidationSummary};
pub use progress::{LogLevel, LogSink, ProgressSink, ProgressUpdate};
pub use repository::{
    open_repository, DeployedRepository, LooseRepository, PackedRepository, Repository,
    ValidationKind, ValidationRecord,
};
