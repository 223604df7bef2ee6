//! The end-to-end resolution scenarios, driven through the session API.

use std::sync::Once;

use espm_common::SyntheticUniverse;
use espm_resolve::{ArrowKind, Decision, JobKind, ResolverLists, ResolverPolicy};
use espm_session::{EXIT_OK, EXIT_TAKEN_ERRORS, Session, SessionContext};
use espm_types::{DependenciesClass, PackageId};
use pretty_assertions::assert_eq;
use rstest::rstest;
use testresult::TestResult;

static LOGGER: Once = Once::new();

fn init_logging() {
    LOGGER.call_once(|| {
        let _ = simplelog::SimpleLogger::init(
            simplelog::LevelFilter::Debug,
            simplelog::Config::default(),
        );
    });
}

/// Builds a universe from `(canonical, [(class, deps)], installed)` rows.
fn universe(rows: &[(&str, &[(DependenciesClass, &str)], bool)]) -> SyntheticUniverse {
    let mut universe = SyntheticUniverse::with_conventional_destination().unwrap();
    for (canonical, deps, installed) in rows {
        let (name, version, slot, repository) = PackageId::canonical_parts(canonical).unwrap();
        let mut builder = PackageId::builder(name, version, repository);
        if let Some(slot) = slot {
            builder = builder.with_slot(slot);
        }
        if *installed {
            builder = builder.installed_at(1);
        }
        for (class, raw) in *deps {
            builder = builder.with_dependencies(*class, *raw);
        }
        universe.add(builder.build());
    }
    universe
}

fn installs(lists: &ResolverLists) -> Vec<String> {
    lists
        .taken
        .iter()
        .filter_map(|id| lists.job(*id))
        .filter_map(|job| match &job.kind {
            JobKind::SimpleInstall { origin, .. } => Some(origin.canonical_form()),
            _ => None,
        })
        .collect()
}

fn kept(lists: &ResolverLists) -> Vec<String> {
    lists
        .resolutions
        .iter()
        .filter_map(|resolution| match &resolution.decision {
            Some(Decision::ExistingNoChange { id, .. }) => Some(id.canonical_form()),
            _ => None,
        })
        .collect()
}

fn resolve(universe: &SyntheticUniverse, targets: &[&str]) -> TestResult<ResolverLists> {
    init_logging();
    let session = Session::new(universe, SessionContext::default());
    let targets: Vec<String> = targets.iter().map(|t| t.to_string()).collect();
    Ok(session.resolve(&targets)?)
}

/// Scenario 1: a single target with one available version.
#[rstest]
fn scenario_empty_universe_installs_the_target() -> TestResult {
    let universe = universe(&[("cat/one-1::repo", &[], false)]);
    let lists = resolve(&universe, &["cat/one"])?;
    assert_eq!(installs(&lists), vec!["cat/one-1::repo"]);
    assert_eq!(Session::exit_code(&lists, None), EXIT_OK);
    Ok(())
}

/// Scenario 2: a linear build dependency chain installs leaves first.
#[rstest]
fn scenario_linear_build_chain() -> TestResult {
    let universe = universe(&[
        ("cat/one-1::repo", &[(DependenciesClass::Build, "cat/two")], false),
        ("cat/two-1::repo", &[(DependenciesClass::Build, "cat/three")], false),
        ("cat/three-1::repo", &[], false),
    ]);
    let lists = resolve(&universe, &["cat/one"])?;
    assert_eq!(
        installs(&lists),
        vec!["cat/three-1::repo", "cat/two-1::repo", "cat/one-1::repo"]
    );
    Ok(())
}

/// Scenario 3: an any-of group with an installed alternative keeps it and
/// installs only the target.
#[rstest]
fn scenario_any_of_with_installed_alternative() -> TestResult {
    let universe = universe(&[
        (
            "cat/one-1::repo",
            &[(DependenciesClass::Build, "|| ( cat/two cat/three )")],
            false,
        ),
        ("cat/two-1::repo", &[], false),
        ("cat/three-1::repo", &[], false),
        ("cat/three-1::installed", &[], true),
    ]);
    let lists = resolve(&universe, &["cat/one"])?;
    assert_eq!(installs(&lists), vec!["cat/one-1::repo"]);
    assert_eq!(kept(&lists), vec!["cat/three-1::installed"]);
    Ok(())
}

/// Scenario 4: a slotted dependency picks the requested slot, not the
/// highest version overall.
#[rstest]
fn scenario_slotted_upgrade() -> TestResult {
    let universe = universe(&[
        (
            "cat/one-1::repo",
            &[(DependenciesClass::Build, "cat/two:slot2")],
            false,
        ),
        ("cat/two-1.1:slot1::repo", &[], false),
        ("cat/two-1.2:slot2::repo", &[], false),
        ("cat/two-1.3:slot3::repo", &[], false),
    ]);
    let lists = resolve(&universe, &["cat/one"])?;
    assert_eq!(
        installs(&lists),
        vec!["cat/two-1.2:slot2::repo", "cat/one-1::repo"]
    );
    Ok(())
}

/// Scenario 5: a runtime dependency cycle installs both sides; only a run
/// edge is broken, never a build edge.
#[rstest]
fn scenario_runtime_cycle() -> TestResult {
    let universe = universe(&[
        ("cat/a-1::repo", &[(DependenciesClass::Run, "cat/b")], false),
        ("cat/b-1::repo", &[(DependenciesClass::Run, "cat/a")], false),
    ]);
    let lists = resolve(&universe, &["cat/a"])?;

    let mut installed = installs(&lists);
    installed.sort();
    assert_eq!(installed, vec!["cat/a-1::repo", "cat/b-1::repo"]);
    assert!(lists.unorderable.is_empty());

    // Every surviving arrow between the two usable markers is a runtime
    // arrow at most once; the build arrows into the installs are intact.
    for job in &lists.jobs {
        if matches!(job.kind, JobKind::SimpleInstall { .. }) {
            assert!(
                job.arrows
                    .iter()
                    .any(|arrow| arrow.kind == ArrowKind::Build),
                "install lost its build arrows"
            );
        }
    }
    Ok(())
}

/// Scenario 6: a block on an installed package fails without permission
/// and becomes a removal with it.
#[rstest]
fn scenario_block_and_replace() -> TestResult {
    let universe = universe(&[("cat/old-1::installed", &[], true)]);

    let lists = resolve(&universe, &["!cat/old"])?;
    assert!(lists.has_taken_errors());
    assert_eq!(Session::exit_code(&lists, None), EXIT_TAKEN_ERRORS);
    let Some(Decision::UnableToMake {
        unmet_constraints, ..
    }) = &lists.resolutions[0].decision
    else {
        panic!("expected an unable decision");
    };
    assert!(unmet_constraints.iter().any(|constraint| constraint.block.is_some()));

    init_logging();
    let session = Session::new(&universe, SessionContext::default()).with_policy(ResolverPolicy {
        permit_uninstall: true,
        ..ResolverPolicy::default()
    });
    let lists = session.resolve(&["!cat/old".to_string()])?;
    assert!(!lists.has_taken_errors());
    let removals: Vec<&JobKind> = lists
        .jobs
        .iter()
        .filter(|job| matches!(job.kind, JobKind::Uninstall { .. }))
        .map(|job| &job.kind)
        .collect();
    assert_eq!(removals.len(), 1);
    Ok(())
}

/// The plan survives the serialise/deserialise handoff between the two
/// process halves.
#[rstest]
fn plan_survives_the_process_boundary() -> TestResult {
    let universe = universe(&[
        ("cat/one-1::repo", &[(DependenciesClass::Build, "cat/two")], false),
        ("cat/two-1::repo", &[], false),
    ]);
    let session = Session::new(&universe, SessionContext::default());
    let lists = session.resolve(&["cat/one".to_string()])?;

    let stream = session.serialise(&lists);
    let restored = session.deserialise(&stream)?;
    assert_eq!(installs(&restored), installs(&lists));
    assert_eq!(session.serialise(&restored), stream);
    Ok(())
}

/// Display renders without colour control sequences when disabled.
#[rstest]
fn display_is_stable_without_colour() -> TestResult {
    colored::control::set_override(false);
    let universe = universe(&[("cat/one-1::repo", &[], false)]);
    let session = Session::new(&universe, SessionContext::default());
    let lists = session.resolve(&["cat/one".to_string()])?;
    let rendered = session.display(&lists);
    assert!(rendered.contains("n cat/one-1::repo"));
    assert!(!rendered.contains('\u{1b}'));
    Ok(())
}

/// Untaken suggestions stay out of the executed plan but are displayed.
#[rstest]
fn suggestions_stay_untaken() -> TestResult {
    let universe = universe(&[
        (
            "cat/one-1::repo",
            &[(DependenciesClass::Build, "suggest: cat/extra")],
            false,
        ),
        ("cat/extra-1::repo", &[], false),
    ]);
    let lists = resolve(&universe, &["cat/one"])?;
    assert_eq!(installs(&lists), vec!["cat/one-1::repo"]);
    assert_eq!(lists.untaken.len(), 1);
    Ok(())
}
