//! Installer facade: one flat operation surface over source and target
//! repositories, fanning log, progress, and validation events out to
//! caller-supplied sinks.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use uuid::Uuid;

use crate::catalog::FilesetInfo;
use crate::error::RepositoryError;
use crate::progress::{LogLevel, ProgressUpdate};
use crate::repository::{
    open_repository, DeployedRepository, Repository, ValidationKind, ValidationRecord,
};

/// What `execute` should do with the target repository.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Install,
    Configure,
    Repair,
    Verify,
}

/// The file-sets an install or configure should leave present.
#[derive(Clone, Debug, Default)]
pub struct DesiredState {
    pub fileset_ids: Vec<Uuid>,
}

/// Validation counters accumulated over one verify or repair pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ValidationSummary {
    pub ok: u64,
    pub missing: u64,
    pub corrupted: u64,
}

impl ValidationSummary {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.missing == 0 && self.corrupted == 0
    }

    fn count(&mut self, kind: ValidationKind) {
        match kind {
            ValidationKind::Ok => self.ok += 1,
            ValidationKind::Missing => self.missing += 1,
            ValidationKind::Corrupted => self.corrupted += 1,
        }
    }
}

/// An opened repository, or the directory a pending install will create
/// one in. Opening a target never implicitly creates anything.
pub struct RepositoryHandle {
    path: PathBuf,
    repository: Option<Box<dyn Repository>>,
}

impl RepositoryHandle {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.repository.is_some()
    }

    pub fn repository(&mut self) -> Result<&mut dyn Repository> {
        match self.repository.as_mut() {
            Some(repository) => Ok(repository.as_mut()),
            None => Err(RepositoryError::NotARepository {
                path: self.path.clone(),
            }
            .into()),
        }
    }
}

type LogCallback<'a> = Box<dyn FnMut(&str, LogLevel, &str) + 'a>;
type ProgressCallback<'a> = Box<dyn FnMut(&ProgressUpdate<'_>) + 'a>;
type ValidationCallback<'a> = Box<dyn FnMut(&ValidationRecord<'_>) + 'a>;

/// The public entry point callers drive. Each installer owns its own
/// sinks and cancellation flag; there is no process-wide state.
#[derive(Default)]
pub struct Installer<'a> {
    log: Option<LogCallback<'a>>,
    progress: Option<ProgressCallback<'a>>,
    validation: Option<ValidationCallback<'a>>,
    cancel: Arc<AtomicBool>,
}

impl<'a> Installer<'a> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_log_callback(&mut self, callback: impl FnMut(&str, LogLevel, &str) + 'a) {
        self.log = Some(Box::new(callback));
    }

    pub fn set_progress_callback(&mut self, callback: impl FnMut(&ProgressUpdate<'_>) + 'a) {
        self.progress = Some(Box::new(callback));
    }

    pub fn set_validation_callback(&mut self, callback: impl FnMut(&ValidationRecord<'_>) + 'a) {
        self.validation = Some(Box::new(callback));
    }

    /// Shared flag polled at object boundaries; set it from another
    /// thread to stop after the current object.
    #[must_use]
    pub fn cancellation_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Open an existing repository to read from.
    pub fn open_source_repository(&self, path: &Path) -> Result<RepositoryHandle> {
        Ok(RepositoryHandle {
            path: path.to_path_buf(),
            repository: Some(open_repository(path)?),
        })
    }

    /// Open a repository to operate on. A directory that is not (yet) a
    /// repository yields a pending handle only `Install` accepts.
    pub fn open_target_repository(&self, path: &Path) -> Result<RepositoryHandle> {
        match open_repository(path) {
            Ok(repository) => Ok(RepositoryHandle {
                path: path.to_path_buf(),
                repository: Some(repository),
            }),
            Err(err) => match err.downcast_ref::<RepositoryError>() {
                Some(RepositoryError::NotARepository { .. }) => Ok(RepositoryHandle {
                    path: path.to_path_buf(),
                    repository: None,
                }),
                _ => Err(err),
            },
        }
    }

    pub fn query_filesets(&self, repository: &RepositoryHandle) -> Result<Vec<FilesetInfo>> {
        match repository.repository.as_ref() {
            Some(repository) => repository.fileset_infos(),
            None => Err(RepositoryError::NotARepository {
                path: repository.path.clone(),
            }
            .into()),
        }
    }

    pub fn query_fileset_name(
        &self,
        repository: &RepositoryHandle,
        fileset: &Uuid,
    ) -> Result<String> {
        match repository.repository.as_ref() {
            Some(repository) => repository.fileset_name(fileset),
            None => Err(RepositoryError::NotARepository {
                path: repository.path.clone(),
            }
            .into()),
        }
    }

    /// Dispatch one action. `Verify` and `Repair` return the counters of
    /// the pass (for repair: of the follow-up validation).
    pub fn execute(
        &mut self,
        action: Action,
        target: &mut RepositoryHandle,
        source: Option<&mut RepositoryHandle>,
        desired_state: Option<&DesiredState>,
    ) -> Result<ValidationSummary> {
        match action {
            Action::Verify => self.verify(target),
            Action::Repair => {
                let source = source.context("repair needs a source repository")?;
                self.repair(target, source)
            }
            Action::Install => {
                let source = source.context("install needs a source repository")?;
                let desired = desired_state.context("install needs a desired state")?;
                self.install(target, source, desired)?;
                Ok(ValidationSummary::default())
            }
            Action::Configure => {
                let source = source.context("configure needs a source repository")?;
                let desired = desired_state.context("configure needs a desired state")?;
                self.configure(target, source, desired)?;
                Ok(ValidationSummary::default())
            }
        }
    }

    /// Dropping the handle releases the catalog and any package maps.
    pub fn close_repository(&mut self, repository: RepositoryHandle) {
        drop(repository);
    }

    fn verify(&mut self, target: &mut RepositoryHandle) -> Result<ValidationSummary> {
        let mut summary = ValidationSummary::default();
        let validation = &mut self.validation;
        let mut report = |record: &ValidationRecord<'_>| {
            summary.count(record.kind);
            if let Some(callback) = validation.as_mut() {
                callback(record);
            }
        };
        target.repository()?.validate(&mut report)?;
        Ok(summary)
    }

    fn repair(
        &mut self,
        target: &mut RepositoryHandle,
        source: &mut RepositoryHandle,
    ) -> Result<ValidationSummary> {
        target.repository()?.repair(source.repository()?)?;
        // The exit status is defined by what a follow-up validation finds.
        let mut summary = ValidationSummary::default();
        let mut recount = |record: &ValidationRecord<'_>| summary.count(record.kind);
        target.repository()?.validate(&mut recount)?;
        Ok(summary)
    }

    fn install(
        &mut self,
        target: &mut RepositoryHandle,
        source: &mut RepositoryHandle,
        desired: &DesiredState,
    ) -> Result<()> {
        if target.is_open() {
            bail!(
                "{} already holds a repository; install never overwrites",
                target.path.display()
            );
        }
        if !directory_is_empty(&target.path)? {
            bail!(
                "{} is not empty; install needs a fresh target",
                target.path.display()
            );
        }
        let log = &mut self.log;
        let mut log_sink = move |source_tag: &str, level: LogLevel, message: &str| {
            if let Some(callback) = log.as_mut() {
                callback(source_tag, level, message);
            }
        };
        let progress = &mut self.progress;
        let mut progress_sink = move |update: &ProgressUpdate<'_>| {
            if let Some(callback) = progress.as_mut() {
                callback(update);
            }
        };
        let deployed = DeployedRepository::create_from(
            source.repository()?,
            &desired.fileset_ids,
            &target.path,
            &mut log_sink,
            &mut progress_sink,
            &self.cancel,
        )?;
        target.repository = Some(Box::new(deployed));
        Ok(())
    }

    fn configure(
        &mut self,
        target: &mut RepositoryHandle,
        source: &mut RepositoryHandle,
        desired: &DesiredState,
    ) -> Result<()> {
        let log = &mut self.log;
        let mut log_sink = move |source_tag: &str, level: LogLevel, message: &str| {
            if let Some(callback) = log.as_mut() {
                callback(source_tag, level, message);
            }
        };
        target
            .repository()?
            .configure(source.repository()?, &desired.fileset_ids, &mut log_sink)
    }
}

fn directory_is_empty(path: &Path) -> Result<bool> {
    match fs::read_dir(path) {
        Ok(mut entries) => Ok(entries.next().is_none()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(true),
        Err(err) => Err(RepositoryError::io(path, err).into()),
    }
}
