//! Contract properties: deduplication, idempotence, reflection, and
//! boundary behaviors shared by every layout.

use std::sync::atomic::AtomicBool;

use super::*;
use crate::error::RepositoryError;
use crate::progress::null_log;

#[test]
fn identical_content_is_stored_once() -> Result<()> {
    let (_temp, repo) = build_fixture("Loose", &[("a.txt", b"same"), ("b.txt", b"same")])?;
    let repository = LooseRepository::open(&repo)?;
    let rows: i64 = repository.catalog().connection().query_row(
        "SELECT COUNT(*) FROM content_objects",
        [],
        |row| row.get(0),
    )?;
    assert_eq!(rows, 1, "one content object row per unique digest");
    let files: i64 = repository.catalog().connection().query_row(
        "SELECT COUNT(*) FROM files",
        [],
        |row| row.get(0),
    )?;
    assert_eq!(files, 2, "both paths reference the shared object");

    let copies = fs::read_dir(repo.join(LOOSE_DIR).join(LOOSE_OBJECTS_DIR))?.count();
    assert_eq!(copies, 1, "one physical copy in the object store");
    Ok(())
}

#[test]
fn validate_is_idempotent() -> Result<()> {
    let (_temp, repo) = build_fixture("Loose", &[("a.txt", b"hi"), ("c.txt", b"")])?;
    let mut repository = LooseRepository::open(&repo)?;
    let first = collect_validation(&mut repository)?;
    let second = collect_validation(&mut repository)?;
    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(second.iter()) {
        assert_eq!(a.0, b.0);
        assert_eq!(a.1, b.1);
        assert_eq!(a.2, b.2);
    }
    Ok(())
}

#[test]
fn second_repair_changes_nothing() -> Result<()> {
    let files: &[(&str, &[u8])] = &[("a.txt", b"hi")];
    let (_temp, repo) = build_fixture("Loose", files)?;
    let (_source_temp, source_repo) = build_fixture("Loose", files)?;
    fs::write(loose_object_path(&repo, &hi_digest()), b"XX")?;

    let mut target = LooseRepository::open(&repo)?;
    let mut source = LooseRepository::open(&source_repo)?;
    target.repair(&mut source)?;
    let after_first = fs::read(loose_object_path(&repo, &hi_digest()))?;
    let mtime_first = fs::metadata(loose_object_path(&repo, &hi_digest()))?.modified()?;

    target.repair(&mut source)?;
    assert_eq!(fs::read(loose_object_path(&repo, &hi_digest()))?, after_first);
    assert_eq!(
        fs::metadata(loose_object_path(&repo, &hi_digest()))?.modified()?,
        mtime_first,
        "a clean repository takes no writes"
    );
    Ok(())
}

#[test]
fn validation_records_arrive_in_non_decreasing_size_order() -> Result<()> {
    let (_temp, repo) = build_fixture(
        "Loose",
        &[("big.txt", b"a larger payload"), ("small.txt", b"hi"), ("empty", b"")],
    )?;
    let mut repository = LooseRepository::open(&repo)?;
    let sizes: Vec<u64> = repository
        .catalog()
        .content_objects_by_size()?
        .iter()
        .map(|row| row.size)
        .collect();
    let mut sorted = sizes.clone();
    sorted.sort_unstable();
    assert_eq!(sizes, sorted);

    let records = collect_validation(&mut repository)?;
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].0, Digest::NULL, "the empty object comes first");
    Ok(())
}

#[test]
fn zero_size_objects_carry_the_null_digest() -> Result<()> {
    let (_temp, repo) = build_fixture("Loose", &[("empty", b"")])?;
    let repository = LooseRepository::open(&repo)?;
    let rows = repository.catalog().content_objects_by_size()?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].digest, Digest::NULL);
    assert_eq!(rows[0].size, 0);
    Ok(())
}

#[test]
fn unknown_objects_are_a_typed_error() -> Result<()> {
    let (_temp, repo) = build_fixture("Loose", &[("a.txt", b"hi")])?;
    let mut repository = LooseRepository::open(&repo)?;
    let absent = digest_bytes(b"never stored");
    let err = repository
        .get_content_objects(&[absent], &mut |_, _| Ok(()))
        .expect_err("absent digest should fail");
    let repo_err = err
        .downcast_ref::<RepositoryError>()
        .expect("typed repository error");
    assert!(matches!(repo_err, RepositoryError::UnknownObject { digest } if *digest == absent));
    Ok(())
}

#[test]
fn sinks_fire_exactly_once_per_requested_digest() -> Result<()> {
    let (_temp, repo) = build_fixture("Loose", &[("a.txt", b"hi"), ("b.txt", b"other")])?;
    let mut repository = LooseRepository::open(&repo)?;
    let wanted = [hi_digest(), digest_bytes(b"other")];
    let mut seen = Vec::new();
    repository.get_content_objects(&wanted, &mut |digest, bytes| {
        seen.push((*digest, bytes.to_vec()));
        Ok(())
    })?;
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0], (hi_digest(), b"hi".to_vec()));
    assert_eq!(seen[1], (digest_bytes(b"other"), b"other".to_vec()));
    Ok(())
}

#[test]
fn unicode_and_spaced_paths_survive_build_and_deploy() -> Result<()> {
    let files: &[(&str, &[u8])] = &[("über dir/naïve file.txt", b"payload")];
    let (temp, repo) = build_fixture("Loose", files)?;

    let target = temp.path().join("deployed");
    let mut source = LooseRepository::open(&repo)?;
    let mut log = null_log();
    let mut progress = null_progress();
    let cancel = AtomicBool::new(false);
    let mut deployed = DeployedRepository::create_from(
        &mut source,
        &[core_set_id()],
        &target,
        &mut log,
        &mut progress,
        &cancel,
    )?;

    assert_eq!(fs::read(target.join("über dir/naïve file.txt"))?, b"payload");
    let records = collect_validation(&mut deployed)?;
    assert_eq!(records.len(), 1);
    assert!(records[0].1.ends_with("über dir/naïve file.txt"));
    assert_eq!(records[0].2, ValidationKind::Ok);
    Ok(())
}

#[test]
fn fileset_reflection_reports_one_row_per_fileset() -> Result<()> {
    let (_temp, repo) = build_fixture_with_filesets(
        "Loose",
        &[("a.txt", b"hi"), ("b.txt", b"hi"), ("c.txt", b"solo")],
        &[
            (CORE_SET, "core", &["a.txt", "b.txt"]),
            (EXTRA_SET, "extra", &["c.txt"]),
        ],
    )?;
    let repository = LooseRepository::open(&repo)?;
    let mut infos = repository.fileset_infos()?;
    infos.sort_by_key(|info| info.file_count);
    assert_eq!(infos.len(), 2);
    assert_eq!(infos[0].id, extra_set_id());
    assert_eq!(infos[0].file_count, 1);
    assert_eq!(infos[1].id, core_set_id());
    assert_eq!(infos[1].file_count, 2);
    assert_eq!(infos[1].file_size, 4, "duplicates count once per file row");

    assert_eq!(repository.fileset_name(&core_set_id())?, "core");
    assert!(repository.fileset_name(&Uuid::new_v4()).is_err());
    Ok(())
}

#[test]
fn deployed_round_trip_preserves_bytes() -> Result<()> {
    let files: &[(&str, &[u8])] = &[
        ("bin/app", b"\x00\x01\x02binary"),
        ("doc/readme.txt", b"text payload"),
        ("empty.marker", b""),
    ];
    let (temp, repo) = build_fixture("Packed", files)?;

    let target = temp.path().join("deployed");
    let mut source = PackedRepository::open(&repo)?;
    let mut log = null_log();
    let mut progress = null_progress();
    let cancel = AtomicBool::new(false);
    DeployedRepository::create_from(
        &mut source,
        &[core_set_id()],
        &target,
        &mut log,
        &mut progress,
        &cancel,
    )?;

    for (path, bytes) in files {
        assert_eq!(&fs::read(target.join(path))?, bytes, "{path} round-trips");
    }
    Ok(())
}
