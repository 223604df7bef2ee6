//! Jobs and the resolver output lists.

use std::{
    fmt::{Display, Formatter},
    sync::Arc,
};

use espm_types::{PackageId, RepositoryName};
use strum::{Display as StrumDisplay, EnumString};

use crate::Resolution;

/// The identifier of a job within one resolver output.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct JobId(pub usize);

impl Display for JobId {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The kind of a typed predecessor edge between jobs.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, StrumDisplay, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum ArrowKind {
    /// The source must exist before the sink builds.
    Build,
    /// The source must exist before the sink builds against it.
    BuildAgainst,
    /// The source installation must finish before the sink becomes usable.
    Runtime,
    /// The sink must be installed before the source may finish its post
    /// phase.
    Post,
}

impl ArrowKind {
    /// Whether edges of this kind may never be broken to resolve a cycle.
    pub fn is_rigid(self) -> bool {
        matches!(self, ArrowKind::Build | ArrowKind::BuildAgainst)
    }
}

/// A typed predecessor edge: the job `from` comes before the owning job.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Arrow {
    /// The predecessor job.
    pub from: JobId,
    /// The kind of ordering requirement.
    pub kind: ArrowKind,
}

/// What a job does.
#[derive(Clone, Debug)]
pub enum JobKind {
    /// Download the distfiles of an origin id.
    Fetch {
        /// The id whose distfiles are fetched.
        origin: Arc<PackageId>,
    },
    /// Run the pretend phase of an origin id.
    Pretend {
        /// The id whose pretend phase runs.
        origin: Arc<PackageId>,
    },
    /// Build and merge an origin id.
    SimpleInstall {
        /// The id to build and install.
        origin: Arc<PackageId>,
        /// The repository the install goes to.
        destination_repository: RepositoryName,
        /// The installed ids the merge replaces.
        replacing: Vec<Arc<PackageId>>,
    },
    /// Marker: the id may now satisfy runtime dependencies.
    Usable {
        /// The id that became usable.
        id: Arc<PackageId>,
    },
    /// A named ordering barrier.
    SyncPoint {
        /// The barrier name.
        name: String,
    },
    /// Display-only: an install the user chose not to take.
    UntakenInstall {
        /// The id that would have been installed.
        origin: Arc<PackageId>,
    },
    /// Uninstall ids.
    Uninstall {
        /// The installed ids to remove.
        ids: Vec<Arc<PackageId>>,
    },
}

/// One unit of executor work, with its ordering arrows.
#[derive(Clone, Debug)]
pub struct Job {
    /// The job id.
    pub id: JobId,
    /// What the job does.
    pub kind: JobKind,
    /// The index of the resolution that spawned the job.
    pub resolution_index: usize,
    /// The typed predecessor edges; the set completely determines ordering.
    pub arrows: Vec<Arrow>,
}

impl Job {
    /// A short human readable description.
    pub fn description(&self) -> String {
        match &self.kind {
            JobKind::Fetch { origin } => format!("fetch {}", origin.canonical_form()),
            JobKind::Pretend { origin } => format!("pretend {}", origin.canonical_form()),
            JobKind::SimpleInstall {
                origin,
                destination_repository,
                ..
            } => format!(
                "install {} to ::{destination_repository}",
                origin.canonical_form()
            ),
            JobKind::Usable { id } => format!("usable {}", id.canonical_form()),
            JobKind::SyncPoint { name } => format!("sync point {name}"),
            JobKind::UntakenInstall { origin } => {
                format!("untaken install {}", origin.canonical_form())
            }
            JobKind::Uninstall { ids } => {
                let ids: Vec<String> = ids.iter().map(|id| id.canonical_form()).collect();
                format!("uninstall {}", ids.join(", "))
            }
        }
    }
}

/// Everything one resolve produced: resolutions, jobs, and the ordered
/// taken/untaken/error views over them.
#[derive(Clone, Debug, Default)]
pub struct ResolverLists {
    /// Every resolution, in decision order.
    pub resolutions: Vec<Resolution>,
    /// The job store; a [`JobId`] indexes into it.
    pub jobs: Vec<Job>,
    /// Taken jobs in execution order.
    pub taken: Vec<JobId>,
    /// Untaken (display-only) jobs.
    pub untaken: Vec<JobId>,
    /// Indices into `resolutions` of failures the user would care about.
    pub taken_errors: Vec<usize>,
    /// Jobs that could not be ordered because of an unbreakable cycle.
    pub unorderable: Vec<JobId>,
}

impl ResolverLists {
    /// Looks a job up by id.
    pub fn job(&self, id: JobId) -> Option<&Job> {
        self.jobs.get(id.0)
    }

    /// Whether any taken resolution failed.
    pub fn has_taken_errors(&self) -> bool {
        !self.taken_errors.is_empty() || !self.unorderable.is_empty()
    }
}
