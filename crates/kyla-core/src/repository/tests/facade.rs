//! Installer facade behavior: action dispatch, callbacks, cancellation.

use std::sync::atomic::Ordering;

use super::*;
use crate::error::RepositoryError;
use crate::installer::{Action, DesiredState, Installer};
use crate::progress::LogLevel;

#[test]
fn detection_prefers_loose_then_deployed_then_packed() -> Result<()> {
    let (_loose_temp, loose_repo) = build_fixture("Loose", &[("a.txt", b"hi")])?;
    let (_packed_temp, packed_repo) = build_fixture("Packed", &[("a.txt", b"hi")])?;

    assert!(open_repository(&loose_repo).is_ok());
    assert!(open_repository(&packed_repo).is_ok());

    let empty = tempdir()?;
    let err = open_repository(empty.path()).expect_err("empty dir is no repository");
    assert!(matches!(
        err.downcast_ref::<RepositoryError>(),
        Some(RepositoryError::NotARepository { .. })
    ));
    Ok(())
}

#[test]
fn verify_counts_and_forwards_records() -> Result<()> {
    let (_temp, repo) = build_fixture("Loose", &[("a.txt", b"hi"), ("c.txt", b"")])?;
    fs::write(loose_object_path(&repo, &hi_digest()), b"HI")?;

    let mut seen = Vec::new();
    let mut installer = Installer::new();
    installer.set_validation_callback(|record: &ValidationRecord<'_>| {
        seen.push((record.digest, record.kind));
    });
    let mut target = installer.open_target_repository(&repo)?;
    let summary = installer.execute(Action::Verify, &mut target, None, None)?;

    assert_eq!(summary.ok, 1);
    assert_eq!(summary.corrupted, 1);
    assert_eq!(summary.missing, 0);
    assert!(!summary.is_clean());
    drop(installer);
    assert_eq!(seen.len(), 2);
    assert!(seen.contains(&(hi_digest(), ValidationKind::Corrupted)));
    Ok(())
}

#[test]
fn repair_reports_the_follow_up_validation() -> Result<()> {
    let files: &[(&str, &[u8])] = &[("a.txt", b"hi")];
    let (_temp, repo) = build_fixture("Loose", files)?;
    let (_source_temp, source_repo) = build_fixture("Loose", files)?;
    fs::remove_file(loose_object_path(&repo, &hi_digest()))?;

    let mut installer = Installer::new();
    let mut target = installer.open_target_repository(&repo)?;
    let mut source = installer.open_source_repository(&source_repo)?;
    let summary = installer.execute(Action::Repair, &mut target, Some(&mut source), None)?;
    assert!(summary.is_clean());
    assert_eq!(summary.ok, 1);
    Ok(())
}

#[test]
fn install_deploys_into_an_empty_directory_only() -> Result<()> {
    let (temp, repo) = build_fixture("Loose", &[("a.txt", b"hi"), ("b.txt", b"hi")])?;

    let mut logged = Vec::new();
    let mut installer = Installer::new();
    installer.set_log_callback(|source: &str, level: LogLevel, message: &str| {
        logged.push(format!("{source}/{}: {message}", level.as_str()));
    });

    let target_dir = temp.path().join("install-here");
    let mut source = installer.open_source_repository(&repo)?;
    let mut target = installer.open_target_repository(&target_dir)?;
    assert!(!target.is_open(), "missing directory gives a pending handle");

    let desired = DesiredState {
        fileset_ids: vec![core_set_id()],
    };
    installer.execute(
        Action::Install,
        &mut target,
        Some(&mut source),
        Some(&desired),
    )?;
    assert!(target.is_open());
    assert_eq!(fs::read(target_dir.join("a.txt"))?, b"hi");
    drop(installer);
    assert!(
        logged.iter().any(|line| line.contains("deploying file set")),
        "deploy emits log records"
    );

    // A second install into the now-populated target must refuse.
    let mut installer = Installer::new();
    let mut source = installer.open_source_repository(&repo)?;
    let mut target = installer.open_target_repository(&target_dir)?;
    let err = installer
        .execute(
            Action::Install,
            &mut target,
            Some(&mut source),
            Some(&desired),
        )
        .expect_err("install never overwrites");
    assert!(err.to_string().contains("never overwrites"));
    Ok(())
}

#[test]
fn install_refuses_a_non_empty_non_repository_directory() -> Result<()> {
    let (temp, repo) = build_fixture("Loose", &[("a.txt", b"hi")])?;
    let target_dir = temp.path().join("cluttered");
    fs::create_dir_all(&target_dir)?;
    fs::write(target_dir.join("leftover"), b"junk")?;

    let mut installer = Installer::new();
    let mut source = installer.open_source_repository(&repo)?;
    let mut target = installer.open_target_repository(&target_dir)?;
    let desired = DesiredState {
        fileset_ids: vec![core_set_id()],
    };
    let err = installer
        .execute(
            Action::Install,
            &mut target,
            Some(&mut source),
            Some(&desired),
        )
        .expect_err("non-empty target refused");
    assert!(err.to_string().contains("not empty"));
    Ok(())
}

#[test]
fn cancellation_stops_at_an_object_boundary() -> Result<()> {
    let (temp, repo) = build_fixture("Loose", &[("a.txt", b"hi"), ("b.txt", b"other")])?;

    let mut installer = Installer::new();
    installer.cancellation_flag().store(true, Ordering::Relaxed);
    let mut source = installer.open_source_repository(&repo)?;
    let target_dir = temp.path().join("cancelled");
    let mut target = installer.open_target_repository(&target_dir)?;
    let desired = DesiredState {
        fileset_ids: vec![core_set_id()],
    };
    let err = installer
        .execute(
            Action::Install,
            &mut target,
            Some(&mut source),
            Some(&desired),
        )
        .expect_err("pre-set flag cancels the deploy");
    assert!(matches!(
        err.downcast_ref::<RepositoryError>(),
        Some(RepositoryError::Cancelled)
    ));
    Ok(())
}

#[test]
fn query_surface_reflects_the_catalog() -> Result<()> {
    let (_temp, repo) = build_fixture_with_filesets(
        "Loose",
        &[("a.txt", b"hi"), ("c.txt", b"solo")],
        &[
            (CORE_SET, "core", &["a.txt"]),
            (EXTRA_SET, "extra", &["c.txt"]),
        ],
    )?;
    let installer = Installer::new();
    let source = installer.open_source_repository(&repo)?;
    let infos = installer.query_filesets(&source)?;
    assert_eq!(infos.len(), 2);
    assert_eq!(installer.query_fileset_name(&source, &core_set_id())?, "core");
    assert_eq!(installer.query_fileset_name(&source, &extra_set_id())?, "extra");
    Ok(())
}
