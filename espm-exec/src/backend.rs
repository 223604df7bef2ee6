//! The bash build backend contract.

use std::{
    fs::File,
    io::{BufRead, BufReader, Write},
    os::fd::AsRawFd,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use espm_common::PackageUniverse;
use espm_types::{DepTree, DependenciesClass, PackageDep, PackageId};
use rustix::pipe::pipe;
use strum::Display as StrumDisplay;

use crate::Error;

/// One phase of the backend's phase scripts.
#[derive(Clone, Copy, Debug, Eq, PartialEq, StrumDisplay)]
#[strum(serialize_all = "lowercase")]
pub enum BuildPhase {
    /// Sanity checks before anything happens.
    Pretend,
    /// Download distfiles.
    Fetch,
    /// Unpack sources.
    Unpack,
    /// Apply patches and prepare sources.
    Prepare,
    /// Configure the build.
    Configure,
    /// Compile.
    Compile,
    /// Run the test suite.
    Test,
    /// Install into the staging image.
    Stage,
    /// After the merge went live.
    Postinst,
    /// Before files of an installed version are removed.
    Prerm,
    /// After files of an installed version were removed.
    Postrm,
}

/// The install phases in order, up to and including staging.
pub const INSTALL_PHASES: &[BuildPhase] = &[
    BuildPhase::Unpack,
    BuildPhase::Prepare,
    BuildPhase::Configure,
    BuildPhase::Compile,
    BuildPhase::Test,
    BuildPhase::Stage,
];

/// Filesystem locations and identity the backend runs with.
#[derive(Clone, Debug)]
pub struct BackendConfig {
    /// The directory holding `ebuild.bash`.
    pub backend_dir: PathBuf,
    /// Scratch space for builds; images are staged beneath it.
    pub tmpdir: PathBuf,
    /// The configuration directory exported to the backend.
    pub config_dir: PathBuf,
    /// Where distfiles live.
    pub distdir: PathBuf,
    /// The root filesystem merges go to.
    pub root: PathBuf,
    /// Bashrc files sourced by the backend.
    pub bashrc_files: Vec<PathBuf>,
    /// Hook script directories.
    pub hook_dirs: Vec<PathBuf>,
    /// Fetcher script directories.
    pub fetchers_dirs: Vec<PathBuf>,
    /// Syncer script directories.
    pub syncers_dirs: Vec<PathBuf>,
    /// Eclass directories.
    pub eclassdirs: Vec<PathBuf>,
    /// Exlib directories.
    pub exlibsdirs: Vec<PathBuf>,
    /// Profile directories, most specific first.
    pub profile_dirs: Vec<PathBuf>,
    /// The uid dropped to for unprivileged work.
    pub reduced_uid: u32,
    /// The gid dropped to for unprivileged work.
    pub reduced_gid: u32,
    /// The log level exported to the backend.
    pub log_level: String,
    /// The accepted licence specification.
    pub accept_license: String,
    /// Whether partial downloads may be resumed after truncation to the
    /// last fully written block.
    pub safe_resume: bool,
}

impl BackendConfig {
    /// A config rooted at `base`, with conventional subdirectories.
    pub fn rooted_at(base: &Path, backend_dir: PathBuf) -> Self {
        Self {
            backend_dir,
            tmpdir: base.join("tmp"),
            config_dir: base.join("config"),
            distdir: base.join("distfiles"),
            root: base.join("root"),
            bashrc_files: Vec::new(),
            hook_dirs: Vec::new(),
            fetchers_dirs: Vec::new(),
            syncers_dirs: Vec::new(),
            eclassdirs: Vec::new(),
            exlibsdirs: Vec::new(),
            profile_dirs: Vec::new(),
            reduced_uid: 65534,
            reduced_gid: 65534,
            log_level: "qa".to_string(),
            accept_license: "*".to_string(),
            safe_resume: true,
        }
    }
}

/// Drives `ebuild.bash` with the fixed process contract: one child per
/// phase list, the environment table of the ebuild API, and a
/// line-oriented pipe-command channel answering version queries while the
/// child runs.
pub struct EbuildBackend<'a> {
    config: BackendConfig,
    universe: &'a dyn PackageUniverse,
}

impl std::fmt::Debug for EbuildBackend<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EbuildBackend")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<'a> EbuildBackend<'a> {
    /// Creates a backend over `universe` with `config`.
    pub fn new(config: BackendConfig, universe: &'a dyn PackageUniverse) -> Self {
        Self { config, universe }
    }

    /// Returns the config.
    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// The staging image directory for one id.
    pub fn image_dir(&self, id: &PackageId) -> PathBuf {
        self.config
            .tmpdir
            .join(id.name().category().as_str())
            .join(format!("{}-{}", id.name().package(), id.version()))
            .join("image")
    }

    /// Runs one phase list for `id` and waits for completion.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PhaseFailed`] with the child's exit code on a
    /// non-zero exit, or the underlying error when the child cannot be
    /// spawned or spoken to.
    pub fn run_phases(&self, id: &PackageId, phases: &[BuildPhase]) -> Result<(), Error> {
        let ebuild = id.ebuild_path().ok_or_else(|| Error::MissingEbuild {
            id: id.canonical_form(),
        })?;
        let bash =
            which::which("bash").map_err(|e| Error::NoInterpreter(e.to_string()))?;
        let script = self.config.backend_dir.join("ebuild.bash");
        let phase_list = phases
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" ");

        // The pipe-command channel: the child writes one request per line
        // to its write end and reads exactly one reply line from its read
        // end. Both descriptor numbers travel in the environment.
        let (request_read, request_write) =
            pipe().map_err(|e| Error::io(&script, "creating the request pipe", e.into()))?;
        let (response_read, response_write) =
            pipe().map_err(|e| Error::io(&script, "creating the response pipe", e.into()))?;

        let mut command = Command::new(&bash);
        command
            .arg(&script)
            .arg(ebuild)
            .arg(&phase_list)
            .stdin(Stdio::null())
            .env(
                "PALUDIS_PIPE_COMMAND_WRITE_FD",
                request_write.as_raw_fd().to_string(),
            )
            .env(
                "PALUDIS_PIPE_COMMAND_READ_FD",
                response_read.as_raw_fd().to_string(),
            );
        for (key, value) in self.environment_for(id) {
            command.env(key, value);
        }

        log::debug!(
            "running {phase_list} for {} via {}",
            id.canonical_form(),
            script.display()
        );
        let mut child = command
            .spawn()
            .map_err(|e| Error::io(&script, "spawning the build backend", e))?;

        // Close the child's ends in this process, so that the request
        // stream reaches end-of-file when the child exits.
        drop(request_write);
        drop(response_read);

        let mut responses = File::from(response_write);
        let requests = BufReader::new(File::from(request_read));
        for line in requests.lines() {
            let line =
                line.map_err(|e| Error::io(&script, "reading a pipe command", e))?;
            let reply = self.handle_pipe_command(&line);
            log::debug!("pipe command {line:?} -> {reply:?}");
            responses
                .write_all(format!("{reply}\n").as_bytes())
                .map_err(|e| Error::io(&script, "answering a pipe command", e))?;
        }

        let status = child
            .wait()
            .map_err(|e| Error::io(&script, "waiting for the build backend", e))?;
        if status.success() {
            Ok(())
        } else {
            Err(Error::PhaseFailed {
                id: id.canonical_form(),
                phases: phase_list,
                code: status.code().unwrap_or(1),
            })
        }
    }

    /// Answers one pipe-command request line.
    ///
    /// Replies are `O<text>` on success and `E<message>` on error.
    fn handle_pipe_command(&self, line: &str) -> String {
        let (command, argument) = line.split_once(' ').unwrap_or((line, ""));
        match command {
            "BEST_VERSION" => match self.best_installed(argument) {
                Ok(Some(id)) => format!("O{}", id.canonical_form()),
                Ok(None) => "O".to_string(),
                Err(reason) => format!("E{reason}"),
            },
            "HAS_VERSION" => match self.best_installed(argument) {
                Ok(Some(_)) => "Oyes".to_string(),
                Ok(None) => "Ono".to_string(),
                Err(reason) => format!("E{reason}"),
            },
            "MATCH" => {
                let Some((canonical, spec)) = argument.split_once(' ') else {
                    return "EMATCH needs an id and a spec".to_string();
                };
                let spec: PackageDep = match spec.parse() {
                    Ok(spec) => spec,
                    Err(e) => return format!("E{e}"),
                };
                match self.universe.id_by_canonical_form(canonical) {
                    Ok(id) => {
                        let matched = id.name() == spec.name()
                            && spec.matches_version_slot_repo(
                                id.version(),
                                id.slot(),
                                id.repository(),
                            );
                        format!("O{}", if matched { "yes" } else { "no" })
                    }
                    Err(e) => format!("E{e}"),
                }
            }
            other => format!("Eunknown pipe command {other:?}"),
        }
    }

    fn best_installed(
        &self,
        spec: &str,
    ) -> Result<Option<std::sync::Arc<PackageId>>, String> {
        let spec: PackageDep = spec.parse().map_err(|e: espm_types::Error| e.to_string())?;
        let mut matching: Vec<_> = self
            .universe
            .matching_ids(&spec)
            .into_iter()
            .filter(|id| id.is_installed())
            .collect();
        matching.sort_by(|a, b| b.version().cmp(a.version()));
        Ok(matching.into_iter().next())
    }

    /// The environment table one child is started with.
    pub fn environment_for(&self, id: &PackageId) -> Vec<(String, String)> {
        fn join_paths(paths: &[PathBuf]) -> String {
            paths
                .iter()
                .map(|path| path.display().to_string())
                .collect::<Vec<_>>()
                .join(" ")
        }

        let version = id.version();
        let pv = version.remove_revision().to_string();
        let files_dir = id
            .ebuild_path()
            .and_then(Path::parent)
            .map(|dir| dir.join("files"))
            .unwrap_or_default();

        let enabled_flags: Vec<String> = id
            .choices()
            .sets()
            .iter()
            .flat_map(|set| set.values.iter())
            .filter(|value| value.enabled)
            .map(|value| value.name_with_prefix().to_string())
            .collect();
        let expand_names: Vec<String> = id
            .choices()
            .sets()
            .iter()
            .filter(|set| set.prefix.is_some())
            .map(|set| set.raw_name.clone())
            .collect();

        let mut environment = vec![
            ("P".to_string(), format!("{}-{pv}", id.name().package())),
            ("PN".to_string(), id.name().package().to_string()),
            ("PV".to_string(), pv),
            ("PR".to_string(), version.revision_only()),
            ("PVR".to_string(), version.to_string()),
            ("CATEGORY".to_string(), id.name().category().to_string()),
            (
                "SLOT".to_string(),
                id.slot().map(ToString::to_string).unwrap_or_default(),
            ),
            ("REPOSITORY".to_string(), id.repository().to_string()),
            ("EAPI".to_string(), id.eapi().to_string()),
            (
                "PKGMANAGER".to_string(),
                format!("espm-{}", env!("CARGO_PKG_VERSION")),
            ),
            (
                "PALUDIS_TMPDIR".to_string(),
                self.config.tmpdir.display().to_string(),
            ),
            (
                "PALUDIS_CONFIG_DIR".to_string(),
                self.config.config_dir.display().to_string(),
            ),
            (
                "PALUDIS_BASHRC_FILES".to_string(),
                join_paths(&self.config.bashrc_files),
            ),
            (
                "PALUDIS_HOOK_DIRS".to_string(),
                join_paths(&self.config.hook_dirs),
            ),
            (
                "PALUDIS_FETCHERS_DIRS".to_string(),
                join_paths(&self.config.fetchers_dirs),
            ),
            (
                "PALUDIS_SYNCERS_DIRS".to_string(),
                join_paths(&self.config.syncers_dirs),
            ),
            ("PALUDIS_COMMAND".to_string(), "espm".to_string()),
            (
                "PALUDIS_EBUILD_LOG_LEVEL".to_string(),
                self.config.log_level.clone(),
            ),
            (
                "PALUDIS_EBUILD_DIR".to_string(),
                self.config.backend_dir.display().to_string(),
            ),
            (
                "PALUDIS_REDUCED_UID".to_string(),
                self.config.reduced_uid.to_string(),
            ),
            (
                "PALUDIS_REDUCED_GID".to_string(),
                self.config.reduced_gid.to_string(),
            ),
            ("USE".to_string(), enabled_flags.join(" ")),
            ("USE_EXPAND".to_string(), expand_names.join(" ")),
            ("USE_EXPAND_HIDDEN".to_string(), String::new()),
            ("A".to_string(), self.distfiles_for(id, true)),
            ("AA".to_string(), self.distfiles_for(id, false)),
            (
                "ACCEPT_LICENSE".to_string(),
                self.config.accept_license.clone(),
            ),
            ("ROOT".to_string(), self.config.root.display().to_string()),
            (
                "DISTDIR".to_string(),
                self.config.distdir.display().to_string(),
            ),
            ("FILESDIR".to_string(), files_dir.display().to_string()),
            (
                "ECLASSDIR".to_string(),
                self.config
                    .eclassdirs
                    .first()
                    .map(|dir| dir.display().to_string())
                    .unwrap_or_default(),
            ),
            (
                "ECLASSDIRS".to_string(),
                join_paths(&self.config.eclassdirs),
            ),
            (
                "EXLIBSDIRS".to_string(),
                join_paths(&self.config.exlibsdirs),
            ),
            (
                "PALUDIS_PROFILE_DIR".to_string(),
                self.config
                    .profile_dirs
                    .first()
                    .map(|dir| dir.display().to_string())
                    .unwrap_or_default(),
            ),
            (
                "PALUDIS_PROFILE_DIRS".to_string(),
                join_paths(&self.config.profile_dirs),
            ),
            (
                "PALUDIS_PIPE_COMMANDS_SUPPORTED".to_string(),
                "yes".to_string(),
            ),
            (
                "IMAGE".to_string(),
                self.image_dir(id).display().to_string(),
            ),
        ];
        if self.config.safe_resume {
            environment.push(("PALUDIS_USE_SAFE_RESUME".to_string(), "yes".to_string()));
        }
        environment
    }

    /// The distfile names of an id, honouring enabled conditions when
    /// `active_only`.
    fn distfiles_for(&self, id: &PackageId, active_only: bool) -> String {
        fn collect(
            id: &PackageId,
            nodes: &[DepTree],
            active_only: bool,
            out: &mut Vec<String>,
        ) {
            for node in nodes {
                match node {
                    DepTree::FetchableUri { uri, filename } => {
                        let name = filename.clone().unwrap_or_else(|| {
                            uri.rsplit('/').next().unwrap_or(uri).to_string()
                        });
                        if !out.contains(&name) {
                            out.push(name);
                        }
                    }
                    DepTree::AllOf(children) | DepTree::AnyOf(children) => {
                        collect(id, children, active_only, out);
                    }
                    DepTree::Conditional {
                        choice,
                        negated,
                        children,
                    } => {
                        let state = id.choices().state(choice).unwrap_or(false);
                        if !active_only || state != *negated {
                            collect(id, children, active_only, out);
                        }
                    }
                    _ => {}
                }
            }
        }

        let mut names = Vec::new();
        if let Some(key) = id.dependencies(DependenciesClass::Fetches) {
            if let Ok(nodes) = key.value() {
                collect(id, nodes, active_only, &mut names);
            }
        }
        names.join(" ")
    }
}
