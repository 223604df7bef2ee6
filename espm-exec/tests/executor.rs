//! End-to-end executor tests against a scripted build backend.

use std::{fs, os::unix::fs::PermissionsExt, path::Path, sync::Arc};

use espm_common::{Notifier, PackageUniverse, SyntheticUniverse};
use espm_exec::{BackendConfig, ContinueOnFailure, EbuildBackend, Error, Executor};
use espm_resolve::Resolver;
use espm_types::{PackageId, RepositoryName};
use espm_vdb::Vdb;
use rstest::rstest;
use tempfile::tempdir;
use testresult::TestResult;

struct Fixture {
    _dir: tempfile::TempDir,
    universe: SyntheticUniverse,
    vdb: Vdb,
    config: BackendConfig,
    log: std::path::PathBuf,
    replies: std::path::PathBuf,
}

fn write_backend_script(dir: &Path, log: &Path, replies: &Path) -> TestResult {
    let script = format!(
        r#"#!/usr/bin/env bash
ebuild="$1"
phases="$2"
echo "${{phases}}" >> "{log}"
if [[ "${{ebuild}}" == *bad* && "${{phases}}" == *fetch* ]]; then
    exit 3
fi
case "${{phases}}" in
    *stage*)
        mkdir -p "${{IMAGE}}/usr"
        echo made-by-build > "${{IMAGE}}/usr/made"
        echo "BEST_VERSION cat/dep" >&${{PALUDIS_PIPE_COMMAND_WRITE_FD}}
        read -r -u ${{PALUDIS_PIPE_COMMAND_READ_FD}} reply
        echo "${{reply}}" > "{replies}"
        ;;
esac
exit 0
"#,
        log = log.display(),
        replies = replies.display(),
    );
    let path = dir.join("ebuild.bash");
    fs::write(&path, script)?;
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
    Ok(())
}

fn add_id(
    universe: &mut SyntheticUniverse,
    canonical: &str,
    installed: bool,
    ebuild: Option<&Path>,
) -> Arc<PackageId> {
    let (name, version, slot, repository) = PackageId::canonical_parts(canonical).unwrap();
    let mut builder = PackageId::builder(name, version, repository).with_eapi("8");
    if let Some(slot) = slot {
        builder = builder.with_slot(slot);
    }
    if installed {
        builder = builder.installed_at(1);
    }
    if let Some(ebuild) = ebuild {
        builder = builder.with_ebuild_path(ebuild.to_path_buf());
    }
    universe.add(builder.build())
}

fn fixture(extra: &[&str]) -> TestResult<Fixture> {
    let dir = tempdir()?;
    let base = dir.path();
    let backend_dir = base.join("backend");
    fs::create_dir_all(&backend_dir)?;
    let log = base.join("phases.log");
    let replies = base.join("replies.log");
    write_backend_script(&backend_dir, &log, &replies)?;

    let config = BackendConfig::rooted_at(base, backend_dir);
    fs::create_dir_all(&config.root)?;
    fs::create_dir_all(&config.tmpdir)?;

    let ebuild = base.join("fake.ebuild");
    fs::write(&ebuild, "# synthetic\n")?;
    let bad_ebuild = base.join("bad.ebuild");
    fs::write(&bad_ebuild, "# synthetic\n")?;

    let mut universe = SyntheticUniverse::with_conventional_destination()?;
    add_id(&mut universe, "cat/one-1::repo", false, Some(&ebuild));
    add_id(&mut universe, "cat/dep-2::installed", true, None);
    for canonical in extra {
        add_id(&mut universe, canonical, false, Some(&bad_ebuild));
    }

    let vdb = Vdb::open(base.join("vdb"), RepositoryName::new("installed")?)?;
    Ok(Fixture {
        _dir: dir,
        universe,
        vdb,
        config,
        log,
        replies,
    })
}

#[rstest]
fn install_flow_builds_merges_and_records() -> TestResult {
    let fx = fixture(&[])?;
    let notifier = Notifier::silent();
    let lists = Resolver::new(&fx.universe, &notifier).resolve(&["cat/one".to_string()])?;

    let backend = EbuildBackend::new(fx.config.clone(), &fx.universe);
    let executor = Executor::new(&backend, &fx.vdb, &notifier);
    let outcome = executor.execute(&lists)?;
    assert!(outcome.is_clean());

    // The staged file went live and the database has a record for it.
    let made = fx.config.root.join("usr/made");
    assert_eq!(fs::read_to_string(made)?, "made-by-build\n");
    let installed = fx.vdb.installed_ids()?;
    assert_eq!(installed.len(), 1);
    assert_eq!(installed[0].name().to_string(), "cat/one");

    // The backend saw the expected phase lists in order.
    let phases = fs::read_to_string(&fx.log)?;
    let phases: Vec<&str> = phases.lines().collect();
    assert_eq!(
        phases,
        vec![
            "pretend",
            "fetch",
            "unpack prepare configure compile test stage",
            "postinst",
        ]
    );
    Ok(())
}

#[rstest]
fn pipe_commands_answer_from_the_universe() -> TestResult {
    let fx = fixture(&[])?;
    let notifier = Notifier::silent();
    let lists = Resolver::new(&fx.universe, &notifier).resolve(&["cat/one".to_string()])?;

    let backend = EbuildBackend::new(fx.config.clone(), &fx.universe);
    Executor::new(&backend, &fx.vdb, &notifier).execute(&lists)?;

    assert_eq!(fs::read_to_string(&fx.replies)?, "Ocat/dep-2::installed\n");
    Ok(())
}

#[rstest]
fn failure_stops_by_default() -> TestResult {
    let fx = fixture(&["cat/bad-1::repo"])?;
    let notifier = Notifier::silent();
    let lists = Resolver::new(&fx.universe, &notifier).resolve(&["cat/bad".to_string()])?;

    let backend = EbuildBackend::new(fx.config.clone(), &fx.universe);
    let executor = Executor::new(&backend, &fx.vdb, &notifier);
    let error = executor.execute(&lists).expect_err("fetch must fail");
    assert!(matches!(error, Error::FetchFailed { code: 3, .. }));
    assert_eq!(error.exit_code(), 3);
    Ok(())
}

#[rstest]
fn failure_skips_dependents_when_continuing() -> TestResult {
    let fx = fixture(&["cat/bad-1::repo"])?;
    let notifier = Notifier::silent();
    let lists = Resolver::new(&fx.universe, &notifier).resolve(&["cat/bad".to_string()])?;

    let backend = EbuildBackend::new(fx.config.clone(), &fx.universe);
    let executor = Executor::new(&backend, &fx.vdb, &notifier)
        .with_continue_on_failure(ContinueOnFailure::Always);
    let outcome = executor.execute(&lists)?;

    assert_eq!(outcome.failed.len(), 1);
    // The install and its usable marker never ran.
    assert_eq!(outcome.skipped.len(), 2);
    assert!(fx.vdb.installed_ids()?.is_empty());
    Ok(())
}

#[rstest]
fn raised_abort_flag_stops_before_work() -> TestResult {
    let fx = fixture(&[])?;
    let notifier = Notifier::silent();
    let lists = Resolver::new(&fx.universe, &notifier).resolve(&["cat/one".to_string()])?;

    let backend = EbuildBackend::new(fx.config.clone(), &fx.universe);
    let executor = Executor::new(&backend, &fx.vdb, &notifier);
    executor.abort_flag().raise();
    assert!(matches!(
        executor.execute(&lists),
        Err(Error::Aborted)
    ));
    assert!(fx.universe.installed_ids(&"cat/one".parse()?).is_empty());
    Ok(())
}
