//! The resolver core.

use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    sync::Arc,
};

use espm_common::{DestinationType, Notification, Notifier, PackageUniverse};
use espm_types::{
    DepTree,
    DependenciesClass,
    DependencyLabel,
    PackageDep,
    PackageId,
};

use crate::{
    ArrowKind,
    Constraint,
    Decision,
    ChangeDestination,
    Error,
    Job,
    JobId,
    JobKind,
    Reason,
    Resolution,
    Resolvent,
    ResolverLists,
    SanitisedDependency,
    UnsuitableCandidate,
    UseExisting,
    order::order_jobs,
    sanitise::{AnyOfLookup, SanitisedDependencies, sanitise_dependencies},
    Arrow,
    UnmetNote,
};

/// A hard ceiling on restarts, far above what monotone preset accumulation
/// can legitimately produce.
const RESTART_BOUND: usize = 1000;

/// The tunable knobs of a resolve.
#[derive(Clone, Debug)]
pub struct ResolverPolicy {
    /// Whether blocks on installed packages may be honoured by
    /// uninstalling them.
    pub permit_uninstall: bool,
    /// Whether suggested dependencies are taken rather than listed as
    /// untaken.
    pub take_suggestions: bool,
    /// The willingness to keep installed ids for build-time dependencies.
    pub build_use_existing: UseExisting,
    /// The willingness to keep installed ids for runtime dependencies.
    pub run_use_existing: UseExisting,
    /// The willingness to keep installed ids for targets.
    pub target_use_existing: UseExisting,
    /// Where targets install to.
    pub destination: DestinationType,
}

impl Default for ResolverPolicy {
    fn default() -> Self {
        Self {
            permit_uninstall: false,
            take_suggestions: false,
            build_use_existing: UseExisting::IfSame,
            run_use_existing: UseExisting::IfPossible,
            target_use_existing: UseExisting::IfPossible,
            destination: DestinationType::InstallToSlash,
        }
    }
}

/// A request to start over with an extra preset constraint.
///
/// Raised when a newly learned constraint invalidates a decision that was
/// already made; the driver merges the preset and runs a fresh pass.
/// Presets only ever accumulate, so the restart loop terminates.
#[derive(Clone, Debug)]
pub struct SuggestRestart {
    /// The resolvent whose decision became invalid.
    pub resolvent: Resolvent,
    /// The constraint to preset on the next attempt.
    pub constraint: Constraint,
}

enum PassOutcome {
    Done(ResolverLists),
    Restart(SuggestRestart),
}

/// The dependency resolver.
///
/// Builds a resolvent → resolution map by iteratively deciding resolvents
/// and propagating the chosen ids' flattened dependencies as new
/// constraints, restarting from scratch whenever a late constraint
/// invalidates an early decision.
pub struct Resolver<'a> {
    universe: &'a dyn PackageUniverse,
    notifier: &'a Notifier,
    policy: ResolverPolicy,
}

impl std::fmt::Debug for Resolver<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl<'a> Resolver<'a> {
    /// Creates a resolver over `universe` with the default policy.
    pub fn new(universe: &'a dyn PackageUniverse, notifier: &'a Notifier) -> Self {
        Self {
            universe,
            notifier,
            policy: ResolverPolicy::default(),
        }
    }

    /// Replaces the policy.
    pub fn with_policy(mut self, policy: ResolverPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Resolves `targets` (specs, blockers, or set names) into ordered
    /// lists.
    ///
    /// # Errors
    ///
    /// Returns an error on a malformed target, a missing destination
    /// repository, or a broken internal invariant. Unable-to-make outcomes
    /// are data in the returned lists, not errors.
    pub fn resolve(&self, targets: &[String]) -> Result<ResolverLists, Error> {
        let mut presets: Vec<(Resolvent, Constraint)> = Vec::new();
        let mut seen: BTreeSet<String> = BTreeSet::new();

        loop {
            match self.one_pass(targets, &presets)? {
                PassOutcome::Done(lists) => return Ok(lists),
                PassOutcome::Restart(restart) => {
                    let key = format!("{} {}", restart.resolvent, restart.constraint);
                    if !seen.insert(key) || seen.len() > RESTART_BOUND {
                        return Err(Error::InternalInvariant(format!(
                            "restart for {} did not make progress",
                            restart.resolvent
                        )));
                    }
                    self.notifier.notify(&Notification::ResolverRestart {
                        resolvent: restart.resolvent.to_string(),
                    });
                    log::debug!(
                        "restarting with preset {} for {}",
                        restart.constraint,
                        restart.resolvent
                    );
                    let mut constraint = restart.constraint;
                    constraint.reason = Arc::new(Reason::Preset);
                    presets.push((restart.resolvent, constraint));
                }
            }
        }
    }

    fn one_pass(
        &self,
        targets: &[String],
        presets: &[(Resolvent, Constraint)],
    ) -> Result<PassOutcome, Error> {
        let mut pass = Pass {
            resolver: self,
            resolutions: BTreeMap::new(),
            decision_order: Vec::new(),
            queue: VecDeque::new(),
            queued: BTreeSet::new(),
        };

        for (resolvent, constraint) in presets {
            if let Some(restart) = pass.add_constraint(resolvent.clone(), constraint.clone()) {
                return Err(Error::InternalInvariant(format!(
                    "preset for {} rejected at seeding time",
                    restart.resolvent
                )));
            }
        }
        for target in targets {
            pass.add_target(target)?;
        }

        while let Some(resolvent) = pass.queue.pop_front() {
            pass.queued.remove(&resolvent);
            if let Some(restart) = pass.step(&resolvent)? {
                return Ok(PassOutcome::Restart(restart));
            }
            self.notifier.notify(&Notification::ResolverStep {
                resolvent: resolvent.to_string(),
                pending: pass.queue.len(),
            });
        }

        Ok(PassOutcome::Done(pass.finish()?))
    }
}

struct Pass<'a, 'b> {
    resolver: &'b Resolver<'a>,
    resolutions: BTreeMap<Resolvent, Resolution>,
    decision_order: Vec<Resolvent>,
    queue: VecDeque<Resolvent>,
    queued: BTreeSet<Resolvent>,
}

/// The any-of election view over a pass in progress.
struct PassLookup<'x> {
    universe: &'x dyn PackageUniverse,
    resolutions: &'x BTreeMap<Resolvent, Resolution>,
}

impl AnyOfLookup for PassLookup<'_> {
    fn installed_satisfying(&self, spec: &PackageDep) -> bool {
        self.universe
            .matching_ids(spec)
            .iter()
            .any(|id| id.is_installed())
    }

    fn decided_satisfying(&self, spec: &PackageDep) -> bool {
        self.resolutions.values().any(|resolution| {
            resolution
                .decision
                .as_ref()
                .and_then(Decision::chosen_id)
                .map(|id| {
                    id.name() == spec.name()
                        && spec.matches_version_slot_repo(
                            id.version(),
                            id.slot(),
                            id.repository(),
                        )
                })
                .unwrap_or(false)
        })
    }

    fn any_unmasked(&self, spec: &PackageDep) -> bool {
        self.universe
            .matching_ids(spec)
            .iter()
            .any(|id| !id.is_installed() && !id.is_masked())
    }
}

impl Pass<'_, '_> {
    fn policy(&self) -> &ResolverPolicy {
        &self.resolver.policy
    }

    fn universe(&self) -> &dyn PackageUniverse {
        self.resolver.universe
    }

    fn enqueue(&mut self, resolvent: &Resolvent) {
        if self.queued.insert(resolvent.clone()) {
            self.queue.push_back(resolvent.clone());
        }
    }

    fn add_target(&mut self, target: &str) -> Result<(), Error> {
        let destination = self.policy().destination;

        if !target.contains('/') {
            let members = self
                .universe()
                .set(target)
                .map_err(|_| Error::BadTarget(target.to_string()))?;
            for spec in members {
                let constraint = Constraint {
                    spec: spec.clone(),
                    block: None,
                    destination,
                    use_existing: self.policy().target_use_existing,
                    nothing_is_fine_too: false,
                    untaken: false,
                    reason: Arc::new(Reason::Set {
                        name: target.to_string(),
                    }),
                };
                let resolvent = Resolvent::for_spec(&spec, destination);
                if let Some(restart) = self.add_constraint(resolvent, constraint) {
                    return Err(Error::InternalInvariant(format!(
                        "target constraint for {} rejected immediately",
                        restart.resolvent
                    )));
                }
            }
            return Ok(());
        }

        let (block, spec) = PackageDep::parse_with_block(target)?;
        let constraint = Constraint {
            spec: spec.clone(),
            block,
            destination,
            use_existing: self.policy().target_use_existing,
            nothing_is_fine_too: block.is_some(),
            untaken: false,
            reason: Arc::new(Reason::Target {
                text: target.to_string(),
            }),
        };
        let resolvent = Resolvent::for_spec(&spec, destination);
        if let Some(restart) = self.add_constraint(resolvent, constraint) {
            return Err(Error::InternalInvariant(format!(
                "target constraint for {} rejected immediately",
                restart.resolvent
            )));
        }
        Ok(())
    }

    /// Adds a constraint, detecting when it invalidates an existing
    /// decision.
    fn add_constraint(
        &mut self,
        resolvent: Resolvent,
        constraint: Constraint,
    ) -> Option<SuggestRestart> {
        let resolution = self
            .resolutions
            .entry(resolvent.clone())
            .or_insert_with(|| Resolution::new(resolvent.clone()));

        let violated = resolution
            .decision
            .as_ref()
            .map(|decision| decision_violates(decision, &constraint))
            .unwrap_or(false);

        resolution.constraints.push(constraint.clone());

        if violated {
            return Some(SuggestRestart {
                resolvent,
                constraint,
            });
        }

        if resolution.decision.is_none()
            || matches!(resolution.decision, Some(Decision::NothingNoChange))
        {
            // A nothing decision may be revisited without a restart; no
            // dependencies were derived from it.
            if matches!(resolution.decision, Some(Decision::NothingNoChange)) {
                resolution.decision = None;
            }
            self.enqueue(&resolvent);
        }
        None
    }

    /// Decides one resolvent and propagates the chosen id's dependencies.
    fn step(&mut self, resolvent: &Resolvent) -> Result<Option<SuggestRestart>, Error> {
        let Some(resolution) = self.resolutions.get(resolvent) else {
            return Ok(None);
        };
        if let Some(decision) = &resolution.decision {
            let still_fine = resolution
                .constraints
                .iter()
                .all(|constraint| !decision_violates(decision, constraint));
            if still_fine {
                return Ok(None);
            }
        }

        let decision = self.decide(resolvent)?;
        let chosen = decision.chosen_id().cloned();
        let first_decision = !self.decision_order.contains(resolvent);

        if let Some(resolution) = self.resolutions.get_mut(resolvent) {
            resolution.decision = Some(decision);
        }
        if first_decision {
            self.decision_order.push(resolvent.clone());
        }

        let Some(chosen) = chosen else {
            return Ok(None);
        };

        // Flatten the chosen id's dependency keys before mutating any
        // state; the election needs a consistent view.
        let mut sanitised = SanitisedDependencies::default();
        for class in DependenciesClass::DEPENDENCY_CLASSES {
            let newly_loaded = chosen
                .dependencies(*class)
                .map(|key| !key.is_evaluated())
                .unwrap_or(false);
            let lookup = PassLookup {
                universe: self.resolver.universe,
                resolutions: &self.resolutions,
            };
            let flattened = sanitise_dependencies(&chosen, *class, &lookup)?;
            sanitised.dependencies.extend(flattened.dependencies);
            sanitised.unmet_groups.extend(flattened.unmet_groups);
            if newly_loaded {
                self.resolver
                    .notifier
                    .notify(&Notification::MetadataLoaded {
                        id: chosen.canonical_form(),
                        class: *class,
                    });
            }
        }

        let untaken_resolution = self
            .resolutions
            .get(resolvent)
            .map(Resolution::is_untaken)
            .unwrap_or(false);
        let direct_target = self
            .resolutions
            .get(resolvent)
            .map(|resolution| {
                resolution.constraints.iter().any(|constraint| {
                    matches!(
                        constraint.reason.as_ref(),
                        Reason::Target { .. } | Reason::Set { .. }
                    )
                })
            })
            .unwrap_or(false);

        for dep in &sanitised.dependencies {
            if !care_about_dep(dep) {
                continue;
            }
            let untaken = untaken_resolution
                || (dep.is_suggestion() && !self.policy().take_suggestions);
            let constraint = match &dep.spec {
                DepTree::Block { strength, spec } => Constraint {
                    spec: spec.clone(),
                    block: Some(*strength),
                    destination: resolvent.destination,
                    use_existing: UseExisting::IfPossible,
                    nothing_is_fine_too: true,
                    untaken,
                    reason: Arc::new(Reason::Dependency {
                        from: Arc::clone(&chosen),
                        dep: dep.clone(),
                    }),
                },
                DepTree::Package(spec) => Constraint {
                    spec: spec.clone(),
                    block: None,
                    destination: resolvent.destination,
                    use_existing: self.use_existing_for(dep),
                    nothing_is_fine_too: false,
                    untaken,
                    reason: Arc::new(Reason::Dependency {
                        from: Arc::clone(&chosen),
                        dep: dep.clone(),
                    }),
                },
                _ => continue,
            };
            let child = Resolvent::for_spec(&constraint.spec, resolvent.destination);
            if let Some(restart) = self.add_constraint(child, constraint) {
                return Ok(Some(restart));
            }
        }

        if let Some(resolution) = self.resolutions.get_mut(resolvent) {
            // A group directly under the tree root of a resolution the user
            // asked for fails it; anywhere else it is a display-only note.
            for group in &sanitised.unmet_groups {
                let fatal = group.directly_rooted && direct_target;
                if fatal {
                    log::warn!(
                        "no viable alternative in {} for targetted {resolvent}",
                        group.group
                    );
                }
                resolution.unmet_notes.push(UnmetNote {
                    group: group.group.clone(),
                    origin: format!(
                        "{} of {}",
                        group.class.human_name(),
                        chosen.canonical_form()
                    ),
                    fatal,
                });
            }
            resolution.sanitised = sanitised.dependencies;
        }
        Ok(None)
    }

    fn use_existing_for(&self, dep: &SanitisedDependency) -> UseExisting {
        let runtimeish = dep.active_labels.iter().any(|label| {
            matches!(
                label,
                DependencyLabel::Run
                    | DependencyLabel::Post
                    | DependencyLabel::Suggest
                    | DependencyLabel::Recommend
            )
        });
        if runtimeish {
            self.policy().run_use_existing
        } else {
            self.policy().build_use_existing
        }
    }

    /// Elects a candidate for one resolvent from its current constraints.
    fn decide(&self, resolvent: &Resolvent) -> Result<Decision, Error> {
        let resolution = self.resolutions.get(resolvent).ok_or_else(|| {
            Error::InternalInvariant(format!("deciding unknown resolvent {resolvent}"))
        })?;
        let constraints = &resolution.constraints;

        let wants_presence = constraints
            .iter()
            .any(|constraint| constraint.block.is_none() && !constraint.nothing_is_fine_too);
        let blocks: Vec<&Constraint> = constraints
            .iter()
            .filter(|constraint| constraint.block.is_some())
            .collect();

        let installed: Vec<Arc<PackageId>> = self
            .universe()
            .installed_ids(&resolvent.name)
            .into_iter()
            .filter(|id| resolvent.slot.allows(id.slot()))
            .collect();

        if !blocks.is_empty() && !wants_presence {
            let blocked: Vec<Arc<PackageId>> = installed
                .iter()
                .filter(|id| {
                    blocks.iter().any(|constraint| {
                        constraint.spec.matches_version_slot_repo(
                            id.version(),
                            id.slot(),
                            id.repository(),
                        )
                    })
                })
                .cloned()
                .collect();

            if blocked.is_empty() {
                return Ok(Decision::NothingNoChange);
            }
            if self.policy().permit_uninstall
                || blocks.iter().all(|constraint| constraint.untaken)
            {
                return Ok(Decision::Remove { ids: blocked });
            }
            let unsuitable = blocked
                .into_iter()
                .map(|id| UnsuitableCandidate {
                    problems: blocks
                        .iter()
                        .map(|constraint| format!("blocked by {constraint}"))
                        .collect(),
                    id,
                })
                .collect();
            return Ok(Decision::UnableToMake {
                unsuitable,
                unmet_constraints: blocks.into_iter().cloned().collect(),
            });
        }

        if !wants_presence && blocks.is_empty() && installed.is_empty() {
            return Ok(Decision::NothingNoChange);
        }

        let acceptable = |id: &PackageId| {
            constraints.iter().all(|constraint| match constraint.block {
                Some(_) => !constraint.spec.matches_version_slot_repo(
                    id.version(),
                    id.slot(),
                    id.repository(),
                ),
                None => constraint.allows_candidate(id),
            })
        };

        // Highest version first, then repository name.
        let mut origin: Vec<Arc<PackageId>> = self
            .universe()
            .ids(&resolvent.name)
            .into_iter()
            .filter(|id| !id.is_installed() && resolvent.slot.allows(id.slot()))
            .collect();
        origin.sort_by(|a, b| {
            b.version()
                .cmp(a.version())
                .then_with(|| a.repository().cmp(b.repository()))
        });

        let mut installed_sorted = installed.clone();
        installed_sorted.sort_by(|a, b| b.version().cmp(a.version()));

        let mut unsuitable: Vec<UnsuitableCandidate> = Vec::new();

        for existing in &installed_sorted {
            if !acceptable(existing) {
                continue;
            }
            let permitted = constraints
                .iter()
                .all(|constraint| self.use_existing_permits(constraint, existing, &origin));
            if permitted {
                let is_best = !origin
                    .iter()
                    .any(|id| acceptable(id) && id.version() > existing.version());
                return Ok(Decision::ExistingNoChange {
                    id: Arc::clone(existing),
                    is_transient: existing.is_transient(),
                    is_best,
                });
            }
            unsuitable.push(UnsuitableCandidate {
                id: Arc::clone(existing),
                problems: vec!["installed, but a constraint refuses existing ids".to_string()],
            });
        }

        for candidate in &origin {
            if candidate.is_masked() {
                unsuitable.push(UnsuitableCandidate {
                    id: Arc::clone(candidate),
                    problems: candidate
                        .masks()
                        .iter()
                        .map(|mask| format!("masked: {mask}"))
                        .collect(),
                });
                continue;
            }
            if !acceptable(candidate) {
                unsuitable.push(UnsuitableCandidate {
                    id: Arc::clone(candidate),
                    problems: constraints
                        .iter()
                        .filter(|constraint| match constraint.block {
                            Some(_) => constraint.spec.matches_version_slot_repo(
                                candidate.version(),
                                candidate.slot(),
                                candidate.repository(),
                            ),
                            None => !constraint.allows_candidate(candidate),
                        })
                        .map(|constraint| format!("does not match {constraint}"))
                        .collect(),
                });
                continue;
            }

            let Some(repository) = self.universe().repository_for(resolvent.destination) else {
                return Err(Error::NoDestinationRepository {
                    destination: resolvent.destination.to_string(),
                });
            };
            let replacing: Vec<Arc<PackageId>> = installed_sorted
                .iter()
                .filter(|id| id.slot() == candidate.slot())
                .cloned()
                .collect();
            return Ok(Decision::ChangesToMake {
                origin: Arc::clone(candidate),
                destination: ChangeDestination {
                    repository,
                    replacing,
                },
            });
        }

        Ok(Decision::UnableToMake {
            unsuitable,
            unmet_constraints: constraints.clone(),
        })
    }

    fn use_existing_permits(
        &self,
        constraint: &Constraint,
        existing: &PackageId,
        origin: &[Arc<PackageId>],
    ) -> bool {
        match constraint.use_existing {
            UseExisting::Never => false,
            UseExisting::IfTransient => existing.is_transient(),
            UseExisting::IfSameVersion => origin
                .iter()
                .any(|id| id.version() == existing.version()),
            UseExisting::IfSame => origin
                .iter()
                .any(|id| id.version() == existing.version() && id.slot() == existing.slot()),
            UseExisting::IfPossible => true,
        }
    }

    /// Converts the decided resolutions into an ordered job graph.
    fn finish(mut self) -> Result<ResolverLists, Error> {
        let mut lists = ResolverLists::default();
        for resolvent in &self.decision_order {
            if let Some(resolution) = self.resolutions.remove(resolvent) {
                lists.resolutions.push(resolution);
            }
        }

        let mut next_job = 0usize;
        let mut new_job = |kind: JobKind, resolution_index: usize, jobs: &mut Vec<Job>| {
            let id = JobId(next_job);
            next_job += 1;
            jobs.push(Job {
                id,
                kind,
                resolution_index,
                arrows: Vec::new(),
            });
            id
        };

        let mut jobs: Vec<Job> = Vec::new();
        let mut install_jobs: BTreeMap<Resolvent, JobId> = BTreeMap::new();
        let mut usable_jobs: BTreeMap<Resolvent, JobId> = BTreeMap::new();
        let mut uninstall_jobs: Vec<JobId> = Vec::new();
        // Jobs whose package already has a version on disk; the orderer may
        // sacrifice runtime arrows into them.
        let mut installed_jobs: BTreeSet<usize> = BTreeSet::new();

        // Pretend jobs first: they run before anything touches the system.
        for (index, resolution) in lists.resolutions.iter().enumerate() {
            if resolution.is_untaken() {
                continue;
            }
            if let Some(Decision::ChangesToMake { origin, .. }) = &resolution.decision {
                new_job(
                    JobKind::Pretend {
                        origin: Arc::clone(origin),
                    },
                    index,
                    &mut jobs,
                );
            }
        }

        for (index, resolution) in lists.resolutions.iter().enumerate() {
            if resolution.is_untaken() {
                continue;
            }
            if let Some(Decision::Remove { ids }) = &resolution.decision {
                let id = new_job(JobKind::Uninstall { ids: ids.clone() }, index, &mut jobs);
                uninstall_jobs.push(id);
            }
            if resolution.is_taken_error() {
                lists.taken_errors.push(index);
            }
        }

        let sync_point = if uninstall_jobs.is_empty() {
            None
        } else {
            let id = new_job(
                JobKind::SyncPoint {
                    name: "removals-before-installs".to_string(),
                },
                0,
                &mut jobs,
            );
            for uninstall in &uninstall_jobs {
                jobs[id.0].arrows.push(Arrow {
                    from: *uninstall,
                    kind: ArrowKind::Build,
                });
            }
            Some(id)
        };

        for (index, resolution) in lists.resolutions.iter().enumerate() {
            let Some(Decision::ChangesToMake {
                origin,
                destination,
            }) = &resolution.decision
            else {
                continue;
            };
            if resolution.is_untaken() {
                let id = new_job(
                    JobKind::UntakenInstall {
                        origin: Arc::clone(origin),
                    },
                    index,
                    &mut jobs,
                );
                lists.untaken.push(id);
                continue;
            }

            let fetch = new_job(
                JobKind::Fetch {
                    origin: Arc::clone(origin),
                },
                index,
                &mut jobs,
            );
            let install = new_job(
                JobKind::SimpleInstall {
                    origin: Arc::clone(origin),
                    destination_repository: destination.repository.clone(),
                    replacing: destination.replacing.clone(),
                },
                index,
                &mut jobs,
            );
            jobs[install.0].arrows.push(Arrow {
                from: fetch,
                kind: ArrowKind::Build,
            });
            if let Some(sync_point) = sync_point {
                jobs[install.0].arrows.push(Arrow {
                    from: sync_point,
                    kind: ArrowKind::Build,
                });
            }
            let usable = new_job(
                JobKind::Usable {
                    id: Arc::clone(origin),
                },
                index,
                &mut jobs,
            );
            jobs[usable.0].arrows.push(Arrow {
                from: install,
                kind: ArrowKind::Runtime,
            });

            if !destination.replacing.is_empty() {
                installed_jobs.insert(install.0);
                installed_jobs.insert(usable.0);
            }

            install_jobs.insert(resolution.resolvent.clone(), install);
            usable_jobs.insert(resolution.resolvent.clone(), usable);
        }

        // Dependency arrows between package jobs.
        for resolution in &lists.resolutions {
            let Some(install) = install_jobs.get(&resolution.resolvent) else {
                continue;
            };
            let Some(usable) = usable_jobs.get(&resolution.resolvent) else {
                continue;
            };
            let mut wanted: Vec<(JobId, Arrow)> = Vec::new();
            for dep in &resolution.sanitised {
                let DepTree::Package(spec) = &dep.spec else {
                    continue;
                };
                let child = Resolvent::for_spec(spec, resolution.resolvent.destination);
                let Some(child_usable) = usable_jobs.get(&child) else {
                    continue;
                };
                if child_usable == usable {
                    continue;
                }
                for label in &dep.active_labels {
                    let arrow = match label {
                        DependencyLabel::Build
                        | DependencyLabel::Test
                        | DependencyLabel::Fetch
                        | DependencyLabel::Install => (
                            *install,
                            Arrow {
                                from: *child_usable,
                                kind: ArrowKind::Build,
                            },
                        ),
                        DependencyLabel::CompileAgainst => (
                            *install,
                            Arrow {
                                from: *child_usable,
                                kind: ArrowKind::BuildAgainst,
                            },
                        ),
                        DependencyLabel::Run => (
                            *usable,
                            Arrow {
                                from: *child_usable,
                                kind: ArrowKind::Runtime,
                            },
                        ),
                        DependencyLabel::Post
                        | DependencyLabel::Suggest
                        | DependencyLabel::Recommend => (
                            *usable,
                            Arrow {
                                from: *child_usable,
                                kind: ArrowKind::Post,
                            },
                        ),
                    };
                    wanted.push(arrow);
                }
            }
            for (target, arrow) in wanted {
                if !jobs[target.0].arrows.contains(&arrow) {
                    jobs[target.0].arrows.push(arrow);
                }
            }
        }

        let (order, unorderable) = order_jobs(&mut jobs, &installed_jobs);
        lists.taken = order
            .into_iter()
            .filter(|id| {
                !matches!(jobs[id.0].kind, JobKind::UntakenInstall { .. })
            })
            .collect();
        lists.unorderable = unorderable;
        lists.jobs = jobs;
        Ok(lists)
    }
}

/// Whether a dependency participates in resolution at all.
fn care_about_dep(dep: &SanitisedDependency) -> bool {
    if dep.active_labels.is_empty() {
        return false;
    }
    // Fetch-only dependencies are the fetch phase's concern.
    !dep.active_labels
        .iter()
        .all(|label| matches!(label, DependencyLabel::Fetch))
}

/// Whether a decision is incompatible with a newly arrived constraint.
fn decision_violates(decision: &Decision, constraint: &Constraint) -> bool {
    match decision {
        Decision::ExistingNoChange { id, .. } | Decision::ChangesToMake { origin: id, .. } => {
            match constraint.block {
                Some(_) => constraint.spec.matches_version_slot_repo(
                    id.version(),
                    id.slot(),
                    id.repository(),
                ),
                None => {
                    if !constraint.allows_candidate(id) {
                        return true;
                    }
                    matches!(decision, Decision::ExistingNoChange { .. })
                        && constraint.use_existing == UseExisting::Never
                }
            }
        }
        Decision::NothingNoChange => {
            constraint.block.is_none() && !constraint.nothing_is_fine_too
        }
        Decision::Remove { ids } => match constraint.block {
            Some(_) => false,
            None => ids.iter().any(|id| constraint.allows_candidate(id)),
        },
        Decision::UnableToMake { .. } => false,
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use espm_common::SyntheticUniverse;
    use espm_types::{Mask, MaskKind};
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use testresult::TestResult;

    use super::*;

    struct UniverseBuilder {
        universe: SyntheticUniverse,
    }

    impl UniverseBuilder {
        fn new() -> Self {
            Self {
                universe: SyntheticUniverse::with_conventional_destination().unwrap(),
            }
        }

        fn origin(self, canonical: &str, deps: &[(DependenciesClass, &str)]) -> Self {
            self.id(canonical, deps, false, false)
        }

        fn installed(self, canonical: &str, deps: &[(DependenciesClass, &str)]) -> Self {
            self.id(canonical, deps, true, false)
        }

        fn masked(self, canonical: &str) -> Self {
            self.id(canonical, &[], false, true)
        }

        fn id(
            mut self,
            canonical: &str,
            deps: &[(DependenciesClass, &str)],
            installed: bool,
            masked: bool,
        ) -> Self {
            let (name, version, slot, repository) =
                PackageId::canonical_parts(canonical).unwrap();
            let mut builder = PackageId::builder(name, version, repository);
            if let Some(slot) = slot {
                builder = builder.with_slot(slot);
            }
            if installed {
                builder = builder.installed_at(1);
            }
            if masked {
                builder = builder.with_mask(Mask {
                    kind: MaskKind::Keyword,
                    explanation: "not keyworded here".to_string(),
                });
            }
            for (class, raw) in deps {
                builder = builder.with_dependencies(*class, *raw);
            }
            self.universe.add(builder.build());
            self
        }

        fn build(self) -> SyntheticUniverse {
            self.universe
        }
    }

    fn install_order(lists: &ResolverLists) -> Vec<String> {
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

    fn resolve(universe: &SyntheticUniverse, targets: &[&str]) -> Result<ResolverLists, Error> {
        let notifier = Notifier::silent();
        let targets: Vec<String> = targets.iter().map(|t| t.to_string()).collect();
        Resolver::new(universe, &notifier).resolve(&targets)
    }

    /// Scenario: a single target with one available id becomes one install.
    #[rstest]
    fn single_target_installs() -> TestResult {
        let universe = UniverseBuilder::new().origin("cat/one-1::repo", &[]).build();
        let lists = resolve(&universe, &["cat/one"])?;
        assert_eq!(install_order(&lists), vec!["cat/one-1::repo"]);
        assert!(!lists.has_taken_errors());
        Ok(())
    }

    /// Scenario: a linear build chain is installed leaves first.
    #[rstest]
    fn build_chain_orders_leaves_first() -> TestResult {
        let universe = UniverseBuilder::new()
            .origin("cat/one-1::repo", &[(DependenciesClass::Build, "cat/two")])
            .origin("cat/two-1::repo", &[(DependenciesClass::Build, "cat/three")])
            .origin("cat/three-1::repo", &[])
            .build();
        let lists = resolve(&universe, &["cat/one"])?;
        assert_eq!(
            install_order(&lists),
            vec!["cat/three-1::repo", "cat/two-1::repo", "cat/one-1::repo"]
        );
        Ok(())
    }

    /// Scenario: an any-of group with an installed alternative keeps it.
    #[rstest]
    fn any_of_keeps_installed_alternative() -> TestResult {
        let universe = UniverseBuilder::new()
            .origin(
                "cat/one-1::repo",
                &[(DependenciesClass::Build, "|| ( cat/two cat/three )")],
            )
            .origin("cat/two-1::repo", &[])
            .origin("cat/three-1::repo", &[])
            .installed("cat/three-1::installed", &[])
            .build();
        let lists = resolve(&universe, &["cat/one"])?;
        assert_eq!(install_order(&lists), vec!["cat/one-1::repo"]);
        let kept: Vec<String> = lists
            .resolutions
            .iter()
            .filter_map(|resolution| match &resolution.decision {
                Some(Decision::ExistingNoChange { id, .. }) => Some(id.canonical_form()),
                _ => None,
            })
            .collect();
        assert_eq!(kept, vec!["cat/three-1::installed"]);
        Ok(())
    }

    /// Scenario: a slotted dependency selects the matching slot, not the
    /// highest version.
    #[rstest]
    fn slotted_dependency_selects_matching_slot() -> TestResult {
        let universe = UniverseBuilder::new()
            .origin(
                "cat/one-1::repo",
                &[(DependenciesClass::Build, "cat/two:slot2")],
            )
            .origin("cat/two-1.1:slot1::repo", &[])
            .origin("cat/two-1.2:slot2::repo", &[])
            .origin("cat/two-1.3:slot3::repo", &[])
            .build();
        let lists = resolve(&universe, &["cat/one"])?;
        assert_eq!(
            install_order(&lists),
            vec!["cat/two-1.2:slot2::repo", "cat/one-1::repo"]
        );
        Ok(())
    }

    /// Scenario: a runtime cycle installs both and breaks only a run edge.
    #[rstest]
    fn runtime_cycle_installs_both() -> TestResult {
        let universe = UniverseBuilder::new()
            .origin("cat/a-1::repo", &[(DependenciesClass::Run, "cat/b")])
            .origin("cat/b-1::repo", &[(DependenciesClass::Run, "cat/a")])
            .build();
        let lists = resolve(&universe, &["cat/a"])?;
        let installs = install_order(&lists);
        assert_eq!(installs.len(), 2);
        assert!(lists.unorderable.is_empty());
        // Build arrows survive untouched: every install still follows its
        // fetch.
        for job in &lists.jobs {
            if matches!(job.kind, JobKind::SimpleInstall { .. }) {
                assert!(job
                    .arrows
                    .iter()
                    .any(|arrow| arrow.kind == ArrowKind::Build));
            }
        }
        Ok(())
    }

    /// Scenario: a block target on an installed id fails without
    /// permission and removes with it.
    #[rstest]
    fn block_target_requires_permission() -> TestResult {
        let universe = UniverseBuilder::new()
            .installed("cat/old-1::installed", &[])
            .build();

        let lists = resolve(&universe, &["!cat/old"])?;
        assert!(lists.has_taken_errors());

        let notifier = Notifier::silent();
        let policy = ResolverPolicy {
            permit_uninstall: true,
            ..ResolverPolicy::default()
        };
        let lists = Resolver::new(&universe, &notifier)
            .with_policy(policy)
            .resolve(&["!cat/old".to_string()])?;
        assert!(!lists.has_taken_errors());
        let uninstalls: Vec<&Job> = lists
            .jobs
            .iter()
            .filter(|job| matches!(job.kind, JobKind::Uninstall { .. }))
            .collect();
        assert_eq!(uninstalls.len(), 1);
        Ok(())
    }

    /// A late exact-version constraint forces a restart; the preset makes
    /// the second pass pick the older version everywhere.
    #[rstest]
    fn late_constraint_restarts_and_converges() -> TestResult {
        let universe = UniverseBuilder::new()
            .origin(
                "cat/a-1::repo",
                &[(DependenciesClass::Build, "cat/c cat/b")],
            )
            .origin("cat/b-1::repo", &[(DependenciesClass::Build, "=cat/c-1")])
            .origin("cat/c-1::repo", &[])
            .origin("cat/c-2::repo", &[])
            .build();

        let restarts = Rc::new(RefCell::new(0usize));
        let counter = Rc::clone(&restarts);
        let notifier = Notifier::new(move |notification| {
            if matches!(notification, Notification::ResolverRestart { .. }) {
                *counter.borrow_mut() += 1;
            }
        });
        let lists = Resolver::new(&universe, &notifier).resolve(&["cat/a".to_string()])?;

        assert_eq!(*restarts.borrow(), 1);
        assert!(!lists.has_taken_errors());
        assert!(install_order(&lists).contains(&"cat/c-1::repo".to_string()));
        assert!(!install_order(&lists).contains(&"cat/c-2::repo".to_string()));
        Ok(())
    }

    /// Masked candidates are rejected with their mask reasons.
    #[rstest]
    fn masked_candidates_are_unsuitable() -> TestResult {
        let universe = UniverseBuilder::new().masked("cat/one-1::repo").build();
        let lists = resolve(&universe, &["cat/one"])?;
        assert!(lists.has_taken_errors());
        let Some(Decision::UnableToMake { unsuitable, .. }) =
            &lists.resolutions[0].decision
        else {
            panic!("expected an unable decision");
        };
        assert_eq!(unsuitable.len(), 1);
        assert!(unsuitable[0].problems[0].contains("not keyworded here"));
        Ok(())
    }

    /// Suggested dependencies land on the untaken list, not the plan.
    #[rstest]
    fn suggestions_are_untaken() -> TestResult {
        let universe = UniverseBuilder::new()
            .origin(
                "cat/one-1::repo",
                &[(DependenciesClass::Build, "suggest: cat/extra")],
            )
            .origin("cat/extra-1::repo", &[])
            .build();
        let lists = resolve(&universe, &["cat/one"])?;
        assert_eq!(install_order(&lists), vec!["cat/one-1::repo"]);
        assert_eq!(lists.untaken.len(), 1);
        Ok(())
    }

    /// Sets expand into their members.
    #[rstest]
    fn set_targets_expand() -> TestResult {
        let mut universe = UniverseBuilder::new()
            .origin("cat/one-1::repo", &[])
            .origin("cat/two-1::repo", &[])
            .build();
        universe.add_set(
            "world",
            vec!["cat/one".parse()?, "cat/two".parse()?],
        );
        let lists = resolve(&universe, &["world"])?;
        assert_eq!(install_order(&lists).len(), 2);
        Ok(())
    }

    /// Unknown targets fail hard.
    #[rstest]
    fn unknown_set_is_a_bad_target() {
        let universe = UniverseBuilder::new().build();
        assert!(matches!(
            resolve(&universe, &["nonsuch"]),
            Err(Error::BadTarget(_))
        ));
    }

    /// An any-of group with no viable alternative directly under a
    /// targetted id's tree root fails the resolution.
    #[rstest]
    fn unviable_any_of_on_a_target_is_a_taken_error() -> TestResult {
        let universe = UniverseBuilder::new()
            .origin(
                "cat/one-1::repo",
                &[(DependenciesClass::Build, "|| ( cat/ghost cat/phantom )")],
            )
            .build();
        let lists = resolve(&universe, &["cat/one"])?;

        assert!(lists.has_taken_errors());
        let resolution = &lists.resolutions[0];
        assert_eq!(resolution.unmet_notes.len(), 1);
        let note = &resolution.unmet_notes[0];
        assert!(note.fatal);
        assert_eq!(note.group, "|| ( cat/ghost cat/phantom )");
        assert!(note.origin.contains("cat/one-1::repo"));
        Ok(())
    }

    /// The same group on a dependency of a dependency is recorded as a
    /// note without failing anything.
    #[rstest]
    fn unviable_any_of_on_a_dependency_is_a_note_only() -> TestResult {
        let universe = UniverseBuilder::new()
            .origin("cat/top-1::repo", &[(DependenciesClass::Build, "cat/mid")])
            .origin(
                "cat/mid-1::repo",
                &[(DependenciesClass::Build, "|| ( cat/ghost cat/phantom )")],
            )
            .build();
        let lists = resolve(&universe, &["cat/top"])?;

        assert!(!lists.has_taken_errors());
        assert_eq!(
            install_order(&lists),
            vec!["cat/mid-1::repo", "cat/top-1::repo"]
        );
        let mid = lists
            .resolutions
            .iter()
            .find(|resolution| resolution.resolvent.name.to_string() == "cat/mid")
            .expect("mid resolution");
        assert_eq!(mid.unmet_notes.len(), 1);
        assert!(!mid.unmet_notes[0].fatal);
        Ok(())
    }

    /// When a runtime cycle involves a package that already has a version
    /// on disk, the run edge into that package is the one sacrificed.
    #[rstest]
    fn runtime_cycle_breaks_into_installed_sink() -> TestResult {
        let universe = UniverseBuilder::new()
            .origin("cat/a-1::repo", &[(DependenciesClass::Run, ">=cat/b-2")])
            .origin("cat/b-2::repo", &[(DependenciesClass::Run, "cat/a")])
            .installed("cat/b-1::installed", &[])
            .build();
        let lists = resolve(&universe, &["cat/a"])?;

        assert!(lists.unorderable.is_empty());
        assert_eq!(install_order(&lists).len(), 2);

        let usable_of = |name: &str| {
            lists
                .jobs
                .iter()
                .find(|job| {
                    matches!(&job.kind, JobKind::Usable { id } if id.name().to_string() == name)
                })
                .expect("usable job")
        };
        // b replaces an installed version, so its usable marker lost the
        // runtime arrow from a; a keeps both of its arrows.
        assert_eq!(usable_of("cat/b").arrows.len(), 1);
        assert_eq!(usable_of("cat/a").arrows.len(), 2);
        Ok(())
    }
}
