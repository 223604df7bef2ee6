//! Serialisation of resolver output to and from the record grammar.

use std::{str::FromStr, sync::Arc};

use espm_common::{DestinationType, PackageUniverse};
use espm_resolve::{
    Arrow,
    ArrowKind,
    ChangeDestination,
    Constraint,
    Decision,
    Job,
    JobId,
    JobKind,
    Reason,
    Resolution,
    Resolvent,
    ResolventSlot,
    ResolverLists,
    SanitisedDependency,
    UnmetNote,
    UnsuitableCandidate,
    UseExisting,
};
use espm_types::{
    BlockStrength,
    DepTree,
    DependenciesClass,
    DependencyLabel,
    PackageDep,
    PackageId,
    QualifiedPackageName,
    Slot,
};

use crate::{Error, PlanValue};

/// Serialises resolver output into one self-describing text stream.
///
/// The stream carries the full lists: jobs with their arrows, decisions,
/// constraints, reasons and resolvents, with package ids in their canonical
/// `cat/pkg-ver:slot::repo` form. [`deserialise_lists`] reads it back,
/// re-looking ids up in the receiving universe.
pub fn serialise_lists(lists: &ResolverLists) -> String {
    format!("{}\n", encode_lists(lists))
}

/// Reads a serialised plan back, resolving canonical id forms through
/// `universe`.
///
/// # Errors
///
/// Returns an error if the stream is malformed or an id cannot be found in
/// `universe`.
pub fn deserialise_lists(
    input: &str,
    universe: &dyn PackageUniverse,
) -> Result<ResolverLists, Error> {
    decode_lists(&PlanValue::parse(input)?, universe)
}

fn field(name: &str, value: PlanValue) -> (String, PlanValue) {
    (name.to_string(), value)
}

fn id_str(id: &PackageId) -> PlanValue {
    PlanValue::str(id.canonical_form())
}

fn id_list(ids: &[Arc<PackageId>]) -> PlanValue {
    PlanValue::List(ids.iter().map(|id| id_str(id)).collect())
}

fn encode_lists(lists: &ResolverLists) -> PlanValue {
    PlanValue::record(
        "ResolverLists",
        vec![
            field(
                "resolutions",
                PlanValue::List(lists.resolutions.iter().map(encode_resolution).collect()),
            ),
            field(
                "jobs",
                PlanValue::List(lists.jobs.iter().map(encode_job).collect()),
            ),
            field("taken", encode_job_ids(&lists.taken)),
            field("untaken", encode_job_ids(&lists.untaken)),
            field(
                "errors",
                PlanValue::List(
                    lists
                        .taken_errors
                        .iter()
                        .map(|index| PlanValue::Int(*index as i64))
                        .collect(),
                ),
            ),
            field("unorderable", encode_job_ids(&lists.unorderable)),
        ],
    )
}

fn encode_job_ids(ids: &[JobId]) -> PlanValue {
    PlanValue::List(ids.iter().map(|id| PlanValue::Int(id.0 as i64)).collect())
}

fn encode_resolvent(resolvent: &Resolvent) -> PlanValue {
    PlanValue::record(
        "Resolvent",
        vec![
            field("name", PlanValue::str(resolvent.name.to_string())),
            field(
                "slot",
                PlanValue::str(match &resolvent.slot {
                    ResolventSlot::Named(slot) => slot.to_string(),
                    ResolventSlot::Any => "*".to_string(),
                }),
            ),
            field(
                "destination",
                PlanValue::str(resolvent.destination.to_string()),
            ),
        ],
    )
}

fn encode_reason(reason: &Reason) -> PlanValue {
    let fields = match reason {
        Reason::Target { text } => vec![
            field("kind", PlanValue::str("target")),
            field("text", PlanValue::str(text.clone())),
        ],
        Reason::Set { name } => vec![
            field("kind", PlanValue::str("set")),
            field("name", PlanValue::str(name.clone())),
        ],
        Reason::Dependency { from, dep } => vec![
            field("kind", PlanValue::str("dependency")),
            field("from", id_str(from)),
            field("spec", PlanValue::str(dep.spec.to_string())),
            field("class", PlanValue::str(dep.class.to_string())),
            field(
                "labels",
                PlanValue::List(
                    dep.active_labels
                        .iter()
                        .map(|label| PlanValue::str(label.to_string()))
                        .collect(),
                ),
            ),
            field("original", PlanValue::str(dep.original_spec.clone())),
            field("conditions", PlanValue::str(dep.active_conditions.clone())),
        ],
        Reason::Preset => vec![field("kind", PlanValue::str("preset"))],
        Reason::ViaBinary { other } => vec![
            field("kind", PlanValue::str("via-binary")),
            field("other", PlanValue::str(other.clone())),
        ],
    };
    PlanValue::record("Reason", fields)
}

fn encode_constraint(constraint: &Constraint) -> PlanValue {
    PlanValue::record(
        "Constraint",
        vec![
            field("spec", PlanValue::str(constraint.spec.to_string())),
            field(
                "block",
                PlanValue::str(match constraint.block {
                    None => "",
                    Some(BlockStrength::Weak) => "!",
                    Some(BlockStrength::Strong) => "!!",
                }),
            ),
            field(
                "destination",
                PlanValue::str(constraint.destination.to_string()),
            ),
            field(
                "use_existing",
                PlanValue::str(constraint.use_existing.to_string()),
            ),
            field(
                "nothing_is_fine_too",
                PlanValue::bool(constraint.nothing_is_fine_too),
            ),
            field("untaken", PlanValue::bool(constraint.untaken)),
            field("reason", encode_reason(&constraint.reason)),
        ],
    )
}

fn encode_decision(decision: &Decision) -> PlanValue {
    let fields = match decision {
        Decision::NothingNoChange => vec![field("kind", PlanValue::str("nothing"))],
        Decision::ExistingNoChange {
            id,
            is_transient,
            is_best,
        } => vec![
            field("kind", PlanValue::str("existing")),
            field("id", id_str(id)),
            field("transient", PlanValue::bool(*is_transient)),
            field("best", PlanValue::bool(*is_best)),
        ],
        Decision::ChangesToMake {
            origin,
            destination,
        } => vec![
            field("kind", PlanValue::str("changes")),
            field("origin", id_str(origin)),
            field(
                "repository",
                PlanValue::str(destination.repository.to_string()),
            ),
            field("replacing", id_list(&destination.replacing)),
        ],
        Decision::Remove { ids } => vec![
            field("kind", PlanValue::str("remove")),
            field("ids", id_list(ids)),
        ],
        Decision::UnableToMake {
            unsuitable,
            unmet_constraints,
        } => vec![
            field("kind", PlanValue::str("unable")),
            field(
                "unsuitable",
                PlanValue::List(
                    unsuitable
                        .iter()
                        .map(|candidate| {
                            PlanValue::record(
                                "Unsuitable",
                                vec![
                                    field("id", id_str(&candidate.id)),
                                    field(
                                        "problems",
                                        PlanValue::List(
                                            candidate
                                                .problems
                                                .iter()
                                                .map(|problem| PlanValue::str(problem.clone()))
                                                .collect(),
                                        ),
                                    ),
                                ],
                            )
                        })
                        .collect(),
                ),
            ),
            field(
                "unmet",
                PlanValue::List(unmet_constraints.iter().map(encode_constraint).collect()),
            ),
        ],
    };
    PlanValue::record("Decision", fields)
}

fn encode_resolution(resolution: &Resolution) -> PlanValue {
    let mut fields = vec![
        field("resolvent", encode_resolvent(&resolution.resolvent)),
        field(
            "constraints",
            PlanValue::List(resolution.constraints.iter().map(encode_constraint).collect()),
        ),
        field(
            "notes",
            PlanValue::List(
                resolution
                    .unmet_notes
                    .iter()
                    .map(|note| {
                        PlanValue::record(
                            "Note",
                            vec![
                                field("group", PlanValue::str(note.group.clone())),
                                field("origin", PlanValue::str(note.origin.clone())),
                                field("fatal", PlanValue::bool(note.fatal)),
                            ],
                        )
                    })
                    .collect(),
            ),
        ),
    ];
    if let Some(decision) = &resolution.decision {
        fields.push(field("decision", encode_decision(decision)));
    }
    PlanValue::record("Resolution", fields)
}

fn encode_job(job: &Job) -> PlanValue {
    let kind = match &job.kind {
        JobKind::Fetch { origin } => PlanValue::record(
            "Kind",
            vec![
                field("kind", PlanValue::str("fetch")),
                field("origin", id_str(origin)),
            ],
        ),
        JobKind::Pretend { origin } => PlanValue::record(
            "Kind",
            vec![
                field("kind", PlanValue::str("pretend")),
                field("origin", id_str(origin)),
            ],
        ),
        JobKind::SimpleInstall {
            origin,
            destination_repository,
            replacing,
        } => PlanValue::record(
            "Kind",
            vec![
                field("kind", PlanValue::str("install")),
                field("origin", id_str(origin)),
                field(
                    "repository",
                    PlanValue::str(destination_repository.to_string()),
                ),
                field("replacing", id_list(replacing)),
            ],
        ),
        JobKind::Usable { id } => PlanValue::record(
            "Kind",
            vec![
                field("kind", PlanValue::str("usable")),
                field("id", id_str(id)),
            ],
        ),
        JobKind::SyncPoint { name } => PlanValue::record(
            "Kind",
            vec![
                field("kind", PlanValue::str("sync-point")),
                field("name", PlanValue::str(name.clone())),
            ],
        ),
        JobKind::UntakenInstall { origin } => PlanValue::record(
            "Kind",
            vec![
                field("kind", PlanValue::str("untaken-install")),
                field("origin", id_str(origin)),
            ],
        ),
        JobKind::Uninstall { ids } => PlanValue::record(
            "Kind",
            vec![
                field("kind", PlanValue::str("uninstall")),
                field("ids", id_list(ids)),
            ],
        ),
    };
    PlanValue::record(
        "Job",
        vec![
            field("id", PlanValue::Int(job.id.0 as i64)),
            field("kind", kind),
            field("resolution", PlanValue::Int(job.resolution_index as i64)),
            field(
                "arrows",
                PlanValue::List(
                    job.arrows
                        .iter()
                        .map(|arrow| {
                            PlanValue::record(
                                "Arrow",
                                vec![
                                    field("from", PlanValue::Int(arrow.from.0 as i64)),
                                    field("kind", PlanValue::str(arrow.kind.to_string())),
                                ],
                            )
                        })
                        .collect(),
                ),
            ),
        ],
    )
}

fn bad(record: &'static str, reason: impl Into<String>) -> Error {
    Error::BadRecord {
        record,
        reason: reason.into(),
    }
}

fn decode_lists(
    value: &PlanValue,
    universe: &dyn PackageUniverse,
) -> Result<ResolverLists, Error> {
    if value.record_name() != Some("ResolverLists") {
        return Err(bad("ResolverLists", "unexpected top level record"));
    }

    let mut lists = ResolverLists::default();
    for resolution in value.field("resolutions")?.as_list()? {
        lists
            .resolutions
            .push(decode_resolution(resolution, universe)?);
    }
    for job in value.field("jobs")?.as_list()? {
        lists.jobs.push(decode_job(job, universe)?);
    }
    lists.taken = decode_job_ids(value.field("taken")?)?;
    lists.untaken = decode_job_ids(value.field("untaken")?)?;
    for index in value.field("errors")?.as_list()? {
        lists.taken_errors.push(index.as_int()? as usize);
    }
    lists.unorderable = decode_job_ids(value.field("unorderable")?)?;
    Ok(lists)
}

fn decode_job_ids(value: &PlanValue) -> Result<Vec<JobId>, Error> {
    value
        .as_list()?
        .iter()
        .map(|id| Ok(JobId(id.as_int()? as usize)))
        .collect()
}

fn decode_id(
    value: &PlanValue,
    universe: &dyn PackageUniverse,
) -> Result<Arc<PackageId>, Error> {
    Ok(universe.id_by_canonical_form(value.as_str()?)?)
}

fn decode_id_list(
    value: &PlanValue,
    universe: &dyn PackageUniverse,
) -> Result<Vec<Arc<PackageId>>, Error> {
    value
        .as_list()?
        .iter()
        .map(|id| decode_id(id, universe))
        .collect()
}

fn decode_resolvent(value: &PlanValue) -> Result<Resolvent, Error> {
    let name: QualifiedPackageName = value.field("name")?.as_str()?.parse()?;
    let slot = match value.field("slot")?.as_str()? {
        "*" => ResolventSlot::Any,
        slot => ResolventSlot::Named(Slot::new(slot)?),
    };
    let destination = decode_destination(value.field("destination")?)?;
    Ok(Resolvent {
        name,
        slot,
        destination,
    })
}

fn decode_destination(value: &PlanValue) -> Result<DestinationType, Error> {
    DestinationType::from_str(value.as_str()?)
        .map_err(|_| bad("Resolvent", "unknown destination type"))
}

fn decode_reason(
    value: &PlanValue,
    universe: &dyn PackageUniverse,
) -> Result<Reason, Error> {
    match value.field("kind")?.as_str()? {
        "target" => Ok(Reason::Target {
            text: value.field("text")?.as_str()?.to_string(),
        }),
        "set" => Ok(Reason::Set {
            name: value.field("name")?.as_str()?.to_string(),
        }),
        "preset" => Ok(Reason::Preset),
        "via-binary" => Ok(Reason::ViaBinary {
            other: value.field("other")?.as_str()?.to_string(),
        }),
        "dependency" => {
            let from = decode_id(value.field("from")?, universe)?;
            let spec = decode_dep_node(value.field("spec")?.as_str()?)?;
            let class = DependenciesClass::from_str(value.field("class")?.as_str()?)
                .map_err(|_| bad("Reason", "unknown dependencies class"))?;
            let mut labels = std::collections::BTreeSet::new();
            for label in value.field("labels")?.as_list()? {
                labels.insert(
                    DependencyLabel::from_str(label.as_str()?)
                        .map_err(|_| bad("Reason", "unknown dependency label"))?,
                );
            }
            Ok(Reason::Dependency {
                from,
                dep: SanitisedDependency {
                    spec,
                    original_spec: value.field("original")?.as_str()?.to_string(),
                    active_labels: labels,
                    class,
                    active_conditions: value.field("conditions")?.as_str()?.to_string(),
                },
            })
        }
        other => Err(bad("Reason", format!("unknown reason kind {other:?}"))),
    }
}

fn decode_dep_node(text: &str) -> Result<DepTree, Error> {
    let (block, spec) = PackageDep::parse_with_block(text)?;
    Ok(match block {
        Some(strength) => DepTree::Block { strength, spec },
        None => DepTree::Package(spec),
    })
}

fn decode_constraint(
    value: &PlanValue,
    universe: &dyn PackageUniverse,
) -> Result<Constraint, Error> {
    let spec: PackageDep = value.field("spec")?.as_str()?.parse()?;
    let block = match value.field("block")?.as_str()? {
        "" => None,
        "!" => Some(BlockStrength::Weak),
        "!!" => Some(BlockStrength::Strong),
        other => return Err(bad("Constraint", format!("unknown block marker {other:?}"))),
    };
    let use_existing = UseExisting::from_str(value.field("use_existing")?.as_str()?)
        .map_err(|_| bad("Constraint", "unknown use-existing policy"))?;
    Ok(Constraint {
        spec,
        block,
        destination: decode_destination(value.field("destination")?)?,
        use_existing,
        nothing_is_fine_too: value.field("nothing_is_fine_too")?.as_bool()?,
        untaken: value.field("untaken")?.as_bool()?,
        reason: Arc::new(decode_reason(value.field("reason")?, universe)?),
    })
}

fn decode_decision(
    value: &PlanValue,
    universe: &dyn PackageUniverse,
) -> Result<Decision, Error> {
    match value.field("kind")?.as_str()? {
        "nothing" => Ok(Decision::NothingNoChange),
        "existing" => Ok(Decision::ExistingNoChange {
            id: decode_id(value.field("id")?, universe)?,
            is_transient: value.field("transient")?.as_bool()?,
            is_best: value.field("best")?.as_bool()?,
        }),
        "changes" => Ok(Decision::ChangesToMake {
            origin: decode_id(value.field("origin")?, universe)?,
            destination: ChangeDestination {
                repository: value.field("repository")?.as_str()?.parse()?,
                replacing: decode_id_list(value.field("replacing")?, universe)?,
            },
        }),
        "remove" => Ok(Decision::Remove {
            ids: decode_id_list(value.field("ids")?, universe)?,
        }),
        "unable" => {
            let mut unsuitable = Vec::new();
            for candidate in value.field("unsuitable")?.as_list()? {
                let mut problems = Vec::new();
                for problem in candidate.field("problems")?.as_list()? {
                    problems.push(problem.as_str()?.to_string());
                }
                unsuitable.push(UnsuitableCandidate {
                    id: decode_id(candidate.field("id")?, universe)?,
                    problems,
                });
            }
            let mut unmet_constraints = Vec::new();
            for constraint in value.field("unmet")?.as_list()? {
                unmet_constraints.push(decode_constraint(constraint, universe)?);
            }
            Ok(Decision::UnableToMake {
                unsuitable,
                unmet_constraints,
            })
        }
        other => Err(bad("Decision", format!("unknown decision kind {other:?}"))),
    }
}

fn decode_resolution(
    value: &PlanValue,
    universe: &dyn PackageUniverse,
) -> Result<Resolution, Error> {
    let mut resolution = Resolution::new(decode_resolvent(value.field("resolvent")?)?);
    for constraint in value.field("constraints")?.as_list()? {
        resolution
            .constraints
            .push(decode_constraint(constraint, universe)?);
    }
    for note in value.field("notes")?.as_list()? {
        resolution.unmet_notes.push(UnmetNote {
            group: note.field("group")?.as_str()?.to_string(),
            origin: note.field("origin")?.as_str()?.to_string(),
            fatal: note.field("fatal")?.as_bool()?,
        });
    }
    if let Some(decision) = value.field_opt("decision") {
        resolution.decision = Some(decode_decision(decision, universe)?);
    }
    Ok(resolution)
}

fn decode_job(value: &PlanValue, universe: &dyn PackageUniverse) -> Result<Job, Error> {
    let kind_value = value.field("kind")?;
    let kind = match kind_value.field("kind")?.as_str()? {
        "fetch" => JobKind::Fetch {
            origin: decode_id(kind_value.field("origin")?, universe)?,
        },
        "pretend" => JobKind::Pretend {
            origin: decode_id(kind_value.field("origin")?, universe)?,
        },
        "install" => JobKind::SimpleInstall {
            origin: decode_id(kind_value.field("origin")?, universe)?,
            destination_repository: kind_value.field("repository")?.as_str()?.parse()?,
            replacing: decode_id_list(kind_value.field("replacing")?, universe)?,
        },
        "usable" => JobKind::Usable {
            id: decode_id(kind_value.field("id")?, universe)?,
        },
        "sync-point" => JobKind::SyncPoint {
            name: kind_value.field("name")?.as_str()?.to_string(),
        },
        "untaken-install" => JobKind::UntakenInstall {
            origin: decode_id(kind_value.field("origin")?, universe)?,
        },
        "uninstall" => JobKind::Uninstall {
            ids: decode_id_list(kind_value.field("ids")?, universe)?,
        },
        other => return Err(bad("Job", format!("unknown job kind {other:?}"))),
    };

    let mut arrows = Vec::new();
    for arrow in value.field("arrows")?.as_list()? {
        arrows.push(Arrow {
            from: JobId(arrow.field("from")?.as_int()? as usize),
            kind: ArrowKind::from_str(arrow.field("kind")?.as_str()?)
                .map_err(|_| bad("Job", "unknown arrow kind"))?,
        });
    }

    Ok(Job {
        id: JobId(value.field("id")?.as_int()? as usize),
        kind,
        resolution_index: value.field("resolution")?.as_int()? as usize,
        arrows,
    })
}

#[cfg(test)]
mod tests {
    use espm_common::{Notifier, SyntheticUniverse};
    use espm_resolve::Resolver;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use testresult::TestResult;

    use super::*;

    fn universe() -> SyntheticUniverse {
        let mut universe = SyntheticUniverse::with_conventional_destination().unwrap();
        for (canonical, deps, installed) in [
            ("cat/one-1::repo", "cat/two !cat/old", false),
            ("cat/two-1::repo", "", false),
            ("cat/two-1::installed", "", true),
            ("cat/old-1::installed", "", true),
        ] {
            let (name, version, slot, repository) =
                PackageId::canonical_parts(canonical).unwrap();
            let mut builder = PackageId::builder(name, version, repository);
            if let Some(slot) = slot {
                builder = builder.with_slot(slot);
            }
            if installed {
                builder = builder.installed_at(1);
            }
            if !deps.is_empty() {
                builder = builder.with_dependencies(DependenciesClass::Run, deps);
            }
            universe.add(builder.build());
        }
        universe
    }

    /// A full resolve survives the stream round trip: same jobs, same
    /// order, same decisions.
    #[rstest]
    fn round_trip_preserves_everything() -> TestResult {
        let universe = universe();
        let notifier = Notifier::silent();
        let lists = Resolver::new(&universe, &notifier)
            .with_policy(espm_resolve::ResolverPolicy {
                permit_uninstall: true,
                ..Default::default()
            })
            .resolve(&["cat/one".to_string()])?;

        let stream = serialise_lists(&lists);
        let restored = deserialise_lists(&stream, &universe)?;

        assert_eq!(restored.taken, lists.taken);
        assert_eq!(restored.untaken, lists.untaken);
        assert_eq!(restored.taken_errors, lists.taken_errors);
        assert_eq!(restored.jobs.len(), lists.jobs.len());
        assert_eq!(restored.resolutions.len(), lists.resolutions.len());
        for (restored_job, job) in restored.jobs.iter().zip(&lists.jobs) {
            assert_eq!(restored_job.id, job.id);
            assert_eq!(restored_job.arrows, job.arrows);
            assert_eq!(
                restored_job.description(),
                job.description()
            );
        }
        // Serialising the restored lists reproduces the stream exactly.
        assert_eq!(serialise_lists(&restored), stream);
        Ok(())
    }

    #[rstest]
    fn unknown_id_fails_lookup() -> TestResult {
        let universe = universe();
        let stream = serialise_lists(&ResolverLists::default());
        assert!(deserialise_lists(&stream, &universe).is_ok());

        let broken = stream.replace("ResolverLists", "SomethingElse");
        assert!(deserialise_lists(&broken, &universe).is_err());
        Ok(())
    }
}
