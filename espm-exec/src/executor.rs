//! The job executor.

use std::{
    collections::BTreeSet,
    fs,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{SystemTime, UNIX_EPOCH},
};

use espm_common::{Destination, Notification, Notifier};
use espm_merge::{Merger, MergerOptions};
use espm_resolve::{ArrowKind, Job, JobId, JobKind, ResolverLists};
use espm_types::PackageId;
use strum::Display as StrumDisplay;

use crate::{
    BuildPhase,
    EbuildBackend,
    Error,
    backend::INSTALL_PHASES,
};

/// When execution keeps going after a job failed.
#[derive(Clone, Copy, Debug, Eq, PartialEq, StrumDisplay)]
#[strum(serialize_all = "kebab-case")]
pub enum ContinueOnFailure {
    /// Continue only when the failed job was a fetch.
    IfFetching,
    /// Stop at the first failure.
    Never,
    /// Continue with jobs whose build-time predecessors all succeeded.
    IfSatisfied,
    /// Continue with jobs that do not depend on the failure at all.
    IfIndependent,
    /// Continue regardless, skipping only what cannot run.
    Always,
}

/// A shared flag polled at phase boundaries.
///
/// Raising it lets the current phase finish, then stops the run with a
/// controlled interruption.
#[derive(Clone, Debug, Default)]
pub struct AbortFlag {
    raised: Arc<AtomicBool>,
}

impl AbortFlag {
    /// Creates a lowered flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the flag.
    pub fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
    }

    /// Whether the flag has been raised.
    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }
}

/// What one execute run did.
#[derive(Clone, Debug, Default)]
pub struct ExecuteOutcome {
    /// Jobs that ran and failed.
    pub failed: Vec<JobId>,
    /// Jobs skipped because a predecessor failed.
    pub skipped: Vec<JobId>,
}

impl ExecuteOutcome {
    /// Whether everything ran cleanly.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }
}

/// Consumes an ordered job list, dispatching through the build backend and
/// the merge destination.
#[derive(Debug)]
pub struct Executor<'a> {
    backend: &'a EbuildBackend<'a>,
    destination: &'a dyn Destination,
    notifier: &'a Notifier,
    continue_on_failure: ContinueOnFailure,
    abort: AbortFlag,
    merger_options: MergerOptions,
}

impl<'a> Executor<'a> {
    /// Creates an executor with the stop-at-first-failure policy.
    pub fn new(
        backend: &'a EbuildBackend<'a>,
        destination: &'a dyn Destination,
        notifier: &'a Notifier,
    ) -> Self {
        Self {
            backend,
            destination,
            notifier,
            continue_on_failure: ContinueOnFailure::Never,
            abort: AbortFlag::new(),
            merger_options: MergerOptions::default(),
        }
    }

    /// Replaces the continuation policy.
    pub fn with_continue_on_failure(mut self, policy: ContinueOnFailure) -> Self {
        self.continue_on_failure = policy;
        self
    }

    /// Replaces the merger options template.
    pub fn with_merger_options(mut self, options: MergerOptions) -> Self {
        self.merger_options = options;
        self
    }

    /// Returns a handle on the abort flag.
    pub fn abort_flag(&self) -> AbortFlag {
        self.abort.clone()
    }

    /// Runs every taken job in order.
    ///
    /// # Errors
    ///
    /// Returns an error when a job fails and the continuation policy does
    /// not allow going on, or when the abort flag is raised. Tolerated
    /// failures are reported in the outcome instead.
    pub fn execute(&self, lists: &ResolverLists) -> Result<ExecuteOutcome, Error> {
        let mut failed: BTreeSet<JobId> = BTreeSet::new();
        let mut skipped: BTreeSet<JobId> = BTreeSet::new();

        for job_id in &lists.taken {
            if self.abort.is_raised() {
                log::warn!("abort flag raised; stopping after the finished phase");
                return Err(Error::Aborted);
            }
            let Some(job) = lists.job(*job_id) else {
                continue;
            };

            if let Some(blocker) = self.blocking_predecessor(job, lists, &failed, &skipped) {
                self.notifier.notify(&Notification::JobSkipped {
                    description: job.description(),
                });
                log::warn!(
                    "skipping {} because {} did not complete",
                    job.description(),
                    blocker
                );
                skipped.insert(job.id);
                continue;
            }

            self.notifier.notify(&Notification::JobStarted {
                description: job.description(),
            });
            match self.run_job(job) {
                Ok(()) => {
                    self.notifier.notify(&Notification::JobFinished {
                        description: job.description(),
                        success: true,
                    });
                }
                Err(error) => {
                    self.notifier.notify(&Notification::JobFinished {
                        description: job.description(),
                        success: false,
                    });
                    failed.insert(job.id);
                    if !self.continues_after_failure(job) {
                        return Err(error);
                    }
                    log::warn!("continuing past failure of {}: {error}", job.description());
                }
            }
        }

        Ok(ExecuteOutcome {
            failed: failed.into_iter().collect(),
            skipped: skipped.into_iter().collect(),
        })
    }

    /// Whether the run keeps going after `job` failed.
    fn continues_after_failure(&self, job: &Job) -> bool {
        match self.continue_on_failure {
            ContinueOnFailure::Never => false,
            ContinueOnFailure::Always
            | ContinueOnFailure::IfSatisfied
            | ContinueOnFailure::IfIndependent => true,
            ContinueOnFailure::IfFetching => matches!(job.kind, JobKind::Fetch { .. }),
        }
    }

    /// The description of the incomplete predecessor that keeps `job` from
    /// running, if any.
    fn blocking_predecessor(
        &self,
        job: &Job,
        lists: &ResolverLists,
        failed: &BTreeSet<JobId>,
        skipped: &BTreeSet<JobId>,
    ) -> Option<String> {
        let direct_required = |job: &Job| {
            job.arrows
                .iter()
                .filter(|arrow| {
                    matches!(
                        arrow.kind,
                        ArrowKind::Build | ArrowKind::BuildAgainst | ArrowKind::Runtime
                    )
                })
                .find(|arrow| failed.contains(&arrow.from) || skipped.contains(&arrow.from))
                .map(|arrow| arrow.from)
        };

        let blocking = match self.continue_on_failure {
            // Build-time predecessors are what a build actually consumes.
            ContinueOnFailure::IfSatisfied => job
                .arrows
                .iter()
                .filter(|arrow| arrow.kind.is_rigid())
                .find(|arrow| failed.contains(&arrow.from) || skipped.contains(&arrow.from))
                .map(|arrow| arrow.from),
            ContinueOnFailure::IfIndependent => {
                self.transitive_blocker(job, lists, failed, skipped)
            }
            _ => direct_required(job),
        };

        blocking.map(|id| {
            lists
                .job(id)
                .map(Job::description)
                .unwrap_or_else(|| id.to_string())
        })
    }

    /// Finds a failed or skipped job anywhere in `job`'s predecessor
    /// closure.
    fn transitive_blocker(
        &self,
        job: &Job,
        lists: &ResolverLists,
        failed: &BTreeSet<JobId>,
        skipped: &BTreeSet<JobId>,
    ) -> Option<JobId> {
        let mut queue: Vec<JobId> = job.arrows.iter().map(|arrow| arrow.from).collect();
        let mut seen: BTreeSet<JobId> = queue.iter().copied().collect();
        while let Some(id) = queue.pop() {
            if failed.contains(&id) || skipped.contains(&id) {
                return Some(id);
            }
            if let Some(pred) = lists.job(id) {
                for arrow in &pred.arrows {
                    if seen.insert(arrow.from) {
                        queue.push(arrow.from);
                    }
                }
            }
        }
        None
    }

    fn run_job(&self, job: &Job) -> Result<(), Error> {
        match &job.kind {
            JobKind::Fetch { origin } => self
                .backend
                .run_phases(origin, &[BuildPhase::Fetch])
                .map_err(|error| match error {
                    Error::PhaseFailed { id, code, .. } => Error::FetchFailed { id, code },
                    other => other,
                }),
            JobKind::Pretend { origin } => self.backend.run_phases(origin, &[BuildPhase::Pretend]),
            JobKind::SimpleInstall {
                origin,
                destination_repository,
                replacing,
            } => {
                let build_start_time = unix_now();
                self.backend.run_phases(origin, INSTALL_PHASES)?;

                let image = self.backend.image_dir(origin);
                fs::create_dir_all(&image)
                    .map_err(|e| Error::io(&image, "creating the staging image", e))?;

                let installed =
                    installed_form(origin, destination_repository, build_start_time)?;
                let mut options = self.merger_options.clone();
                options.build_start_time = build_start_time;
                Merger::new(&image, &self.backend.config().root, self.destination, options)
                    .merge(&installed, replacing, None)?;

                self.backend.run_phases(origin, &[BuildPhase::Postinst])
            }
            JobKind::Uninstall { ids } => {
                for id in ids {
                    if id.ebuild_path().is_some() {
                        self.backend.run_phases(id, &[BuildPhase::Prerm])?;
                    }
                    self.destination.unmerge(id, &|_| false)?;
                    if id.ebuild_path().is_some() {
                        self.backend.run_phases(id, &[BuildPhase::Postrm])?;
                    }
                }
                Ok(())
            }
            JobKind::Usable { .. } | JobKind::SyncPoint { .. } | JobKind::UntakenInstall { .. } => {
                Ok(())
            }
        }
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// The installed-side id a merged origin id turns into.
fn installed_form(
    origin: &PackageId,
    repository: &espm_types::RepositoryName,
    installed_time: i64,
) -> Result<PackageId, Error> {
    let mut builder = PackageId::builder(
        origin.name().clone(),
        origin.version().clone(),
        repository.clone(),
    )
    .with_eapi(origin.eapi())
    .installed_at(installed_time)
    .with_keywords(origin.keywords().to_vec())
    .with_choices(origin.choices().clone());
    if let Some(slot) = origin.slot() {
        builder = builder.with_slot(slot.clone());
    }
    for key in origin.dependency_keys() {
        builder = builder.with_dependencies(key.class(), key.raw());
    }
    Ok(builder.build())
}
