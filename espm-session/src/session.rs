//! End-to-end session flows.

use espm_common::PackageUniverse;
use espm_exec::{BackendConfig, EbuildBackend, ExecuteOutcome, Executor};
use espm_plan::{deserialise_lists, render_plan, serialise_lists};
use espm_resolve::{Resolver, ResolverLists, ResolverPolicy};
use espm_vdb::Vdb;

use crate::{Error, SessionContext};

/// The exit code of a clean run.
pub const EXIT_OK: i32 = 0;
/// The exit code when at least one taken resolution failed.
pub const EXIT_TAKEN_ERRORS: i32 = 1;
/// The lowest exit code of an execution failure; specific phase codes
/// propagate when higher.
pub const EXIT_EXECUTION_FAILURE: i32 = 2;

/// One resolve/display/execute session over a universe.
///
/// The session owns the context and policy; the universe and destination
/// are collaborators implemented elsewhere.
pub struct Session<'a> {
    universe: &'a dyn PackageUniverse,
    context: SessionContext,
    policy: ResolverPolicy,
}

impl std::fmt::Debug for Session<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("context", &self.context)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl<'a> Session<'a> {
    /// Creates a session over `universe`.
    pub fn new(universe: &'a dyn PackageUniverse, context: SessionContext) -> Self {
        Self {
            universe,
            context,
            policy: ResolverPolicy::default(),
        }
    }

    /// Replaces the resolver policy.
    pub fn with_policy(mut self, policy: ResolverPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Returns the session context.
    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    /// Resolves targets into ordered lists.
    ///
    /// # Errors
    ///
    /// Returns an error on malformed targets or broken configuration;
    /// unable-to-make outcomes are data in the lists.
    pub fn resolve(&self, targets: &[String]) -> Result<ResolverLists, Error> {
        Ok(Resolver::new(self.universe, &self.context.notifier)
            .with_policy(self.policy.clone())
            .resolve(targets)?)
    }

    /// Renders the human readable plan.
    pub fn display(&self, lists: &ResolverLists) -> String {
        render_plan(lists)
    }

    /// Serialises lists for the execute half of a split session.
    pub fn serialise(&self, lists: &ResolverLists) -> String {
        serialise_lists(lists)
    }

    /// Reads lists serialised by the plan half back.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream is malformed or ids cannot be found
    /// in this session's universe.
    pub fn deserialise(&self, stream: &str) -> Result<ResolverLists, Error> {
        Ok(deserialise_lists(stream, self.universe)?)
    }

    /// Executes a plan against a backend, merging through the installed
    /// package database and holding its lock for the duration of the run.
    ///
    /// Plans with taken errors are refused without touching anything.
    ///
    /// # Errors
    ///
    /// Returns an error when execution stops early; tolerated failures are
    /// part of the outcome.
    pub fn execute(
        &self,
        lists: &ResolverLists,
        backend_config: BackendConfig,
        vdb: &Vdb,
    ) -> Result<ExecuteOutcome, Error> {
        if lists.has_taken_errors() {
            return Err(Error::Config(
                "refusing to execute a plan with taken errors".to_string(),
            ));
        }
        let _lock = vdb.lock()?;
        let backend = EbuildBackend::new(backend_config, self.universe);
        let executor = Executor::new(&backend, vdb, &self.context.notifier);
        Ok(executor.execute(lists)?)
    }

    /// Maps a finished resolve (and optional execution) onto the process
    /// exit code contract.
    pub fn exit_code(
        lists: &ResolverLists,
        execution: Option<&Result<ExecuteOutcome, Error>>,
    ) -> i32 {
        if lists.has_taken_errors() {
            return EXIT_TAKEN_ERRORS;
        }
        match execution {
            None => EXIT_OK,
            Some(Ok(outcome)) if outcome.failed.is_empty() => EXIT_OK,
            Some(Ok(_)) => EXIT_EXECUTION_FAILURE,
            Some(Err(Error::Exec(error))) => error.exit_code(),
            Some(Err(_)) => EXIT_EXECUTION_FAILURE,
        }
    }
}
