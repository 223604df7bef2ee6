//! Flattening of dependency trees into concrete constraints.

use std::collections::BTreeSet;

use espm_types::{
    DepTree,
    DependenciesClass,
    DependencyLabel,
    Error as TypesError,
    PackageDep,
    PackageId,
};

/// One concrete dependency left over after flattening a tree against a
/// choice valuation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SanitisedDependency {
    /// The surviving node; a package spec or a block.
    pub spec: DepTree,
    /// The original text of the enclosing group, for display.
    pub original_spec: String,
    /// Every label kind active for the dependency after flattening.
    pub active_labels: BTreeSet<DependencyLabel>,
    /// The metadata class the dependency came from.
    pub class: DependenciesClass,
    /// The conditions that were met for the dependency to survive, as text.
    pub active_conditions: String,
}

impl SanitisedDependency {
    /// The human readable name of the originating metadata key.
    pub fn metadata_key_human_name(&self) -> &'static str {
        self.class.human_name()
    }

    /// Whether the active label set means the dependency is merely
    /// suggested.
    pub fn is_suggestion(&self) -> bool {
        !self.active_labels.is_empty()
            && self.active_labels.iter().all(|label| {
                matches!(label, DependencyLabel::Suggest | DependencyLabel::Recommend)
            })
    }
}

/// An any-of group none of whose alternatives was viable.
///
/// The group contributes no constraint; whether it fails anything is the
/// resolver's call, which needs to know if the group sat directly under the
/// tree root or inside a nested group.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UnmetAnyOfGroup {
    /// The original text of the group.
    pub group: String,
    /// The metadata class the group came from.
    pub class: DependenciesClass,
    /// The conditions that were met for the group to be reached, as text.
    pub active_conditions: String,
    /// Whether the group sits directly under the tree root rather than
    /// inside a conditional or an explicit group.
    pub directly_rooted: bool,
}

/// Everything flattening one metadata key produced.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SanitisedDependencies {
    /// The surviving concrete dependencies, in tree order.
    pub dependencies: Vec<SanitisedDependency>,
    /// Any-of groups with no viable alternative.
    pub unmet_groups: Vec<UnmetAnyOfGroup>,
}

/// The queries an any-of election needs.
///
/// Implemented by the resolver over its current state; tests stub it.
pub trait AnyOfLookup {
    /// Whether an installed id satisfies `spec` together with the
    /// constraints known for its resolvent.
    fn installed_satisfying(&self, spec: &PackageDep) -> bool;

    /// Whether a decision taken so far already satisfies `spec`.
    fn decided_satisfying(&self, spec: &PackageDep) -> bool;

    /// Whether any concrete unmasked candidate for `spec` exists.
    fn any_unmasked(&self, spec: &PackageDep) -> bool;
}

/// Flattens the `class` dependency tree of `id` into concrete dependencies.
///
/// Conditionals are evaluated against `id`'s own choices, any-of groups are
/// decided through `lookup`, label markers replace the active label set for
/// their following siblings (consecutive markers accumulate), and each
/// surviving package or block is emitted with a snapshot of the active
/// labels. An any-of group with no viable alternative contributes nothing
/// and is reported in `unmet_groups` instead. For identical inputs the
/// output is identical.
///
/// # Errors
///
/// Returns an error if the metadata key fails to parse.
pub fn sanitise_dependencies(
    id: &PackageId,
    class: DependenciesClass,
    lookup: &dyn AnyOfLookup,
) -> Result<SanitisedDependencies, TypesError> {
    let Some(key) = id.dependencies(class) else {
        return Ok(SanitisedDependencies::default());
    };
    let nodes = key.value()?;

    let mut out = SanitisedDependencies::default();
    let initial: BTreeSet<DependencyLabel> = class.initial_labels().iter().copied().collect();
    walk(id, class, lookup, nodes, &initial, &[], None, true, &mut out);
    Ok(out)
}

#[allow(clippy::too_many_arguments)]
fn walk(
    id: &PackageId,
    class: DependenciesClass,
    lookup: &dyn AnyOfLookup,
    children: &[DepTree],
    labels_in: &BTreeSet<DependencyLabel>,
    conditions: &[String],
    group_text: Option<&str>,
    rooted: bool,
    out: &mut SanitisedDependencies,
) {
    let mut labels = labels_in.clone();
    let mut last_was_label = false;

    for child in children {
        match child {
            DepTree::Label(label) => {
                if !last_was_label {
                    labels.clear();
                }
                labels.insert(*label);
                last_was_label = true;
                continue;
            }
            DepTree::Conditional {
                choice,
                negated,
                children: inner,
            } => {
                let state = id.choices().state(choice).unwrap_or(false);
                if state == *negated {
                    last_was_label = false;
                    continue;
                }
                let mut conditions = conditions.to_vec();
                conditions.push(format!("{}{choice}?", if *negated { "!" } else { "" }));
                let text = child.to_string();
                walk(
                    id,
                    class,
                    lookup,
                    inner,
                    &labels,
                    &conditions,
                    Some(&text),
                    false,
                    out,
                );
            }
            DepTree::AllOf(inner) => {
                let text = child.to_string();
                walk(
                    id,
                    class,
                    lookup,
                    inner,
                    &labels,
                    conditions,
                    Some(&text),
                    false,
                    out,
                );
            }
            DepTree::AnyOf(inner) => {
                match elect_any_of_child(id, lookup, inner) {
                    Some(chosen) => {
                        let text = child.to_string();
                        walk(
                            id,
                            class,
                            lookup,
                            std::slice::from_ref(chosen),
                            &labels,
                            conditions,
                            Some(&text),
                            false,
                            out,
                        );
                    }
                    None => {
                        log::debug!(
                            "no viable alternative in {child} for {}",
                            id.canonical_form()
                        );
                        out.unmet_groups.push(UnmetAnyOfGroup {
                            group: child.to_string(),
                            class,
                            active_conditions: conditions.join(" "),
                            directly_rooted: rooted,
                        });
                    }
                }
            }
            DepTree::Package(_) | DepTree::Block { .. } => {
                out.dependencies.push(SanitisedDependency {
                    spec: child.clone(),
                    original_spec: group_text
                        .map(str::to_string)
                        .unwrap_or_else(|| child.to_string()),
                    active_labels: labels.clone(),
                    class,
                    active_conditions: conditions.join(" "),
                });
            }
            DepTree::License(_) | DepTree::FetchableUri { .. } | DepTree::SimpleText(_) => {}
        }
        last_was_label = false;
    }
}

/// Decides which child of an any-of group to honour.
///
/// Election order: a child whose packages are all installed and acceptable,
/// then a child already satisfied by a decision, then the first child with
/// concrete unmasked candidates. A group with no viable child contributes
/// nothing; the enclosing tree does not fail.
fn elect_any_of_child<'a>(
    id: &PackageId,
    lookup: &dyn AnyOfLookup,
    children: &'a [DepTree],
) -> Option<&'a DepTree> {
    let viable: Vec<(&DepTree, Vec<&PackageDep>)> = children
        .iter()
        .filter_map(|child| packages_in(id, child).map(|packages| (child, packages)))
        .filter(|(_, packages)| !packages.is_empty())
        .collect();

    for (child, packages) in &viable {
        if packages.iter().all(|spec| lookup.installed_satisfying(spec)) {
            return Some(child);
        }
    }
    for (child, packages) in &viable {
        if packages.iter().all(|spec| lookup.decided_satisfying(spec)) {
            return Some(child);
        }
    }
    for (child, packages) in &viable {
        if packages.iter().all(|spec| lookup.any_unmasked(spec)) {
            return Some(child);
        }
    }
    None
}

/// Collects the package specs a child requires, after evaluating its
/// conditionals against `id`'s choices.
///
/// Returns `None` for a child that is switched off by an unmet condition.
fn packages_in<'a>(id: &PackageId, child: &'a DepTree) -> Option<Vec<&'a PackageDep>> {
    match child {
        DepTree::Package(spec) => Some(vec![spec]),
        DepTree::AllOf(children) => {
            let mut specs = Vec::new();
            for inner in children {
                specs.extend(packages_in(id, inner)?);
            }
            Some(specs)
        }
        DepTree::Conditional {
            choice,
            negated,
            children,
        } => {
            let state = id.choices().state(choice).unwrap_or(false);
            if state == *negated {
                return None;
            }
            let mut specs = Vec::new();
            for inner in children {
                specs.extend(packages_in(id, inner)?);
            }
            Some(specs)
        }
        // Blocks cannot occur inside any-of groups; everything else carries
        // no packages to elect over.
        _ => Some(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use espm_types::{
        ChoiceName,
        ChoiceSet,
        ChoiceValue,
        Choices,
        RepositoryName,
        Version,
    };
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use testresult::TestResult;

    use super::*;

    /// A lookup with fixed answers per package name.
    #[derive(Default)]
    struct FixedLookup {
        installed: Vec<String>,
        decided: Vec<String>,
        available: Vec<String>,
    }

    impl AnyOfLookup for FixedLookup {
        fn installed_satisfying(&self, spec: &PackageDep) -> bool {
            self.installed.contains(&spec.name().to_string())
        }

        fn decided_satisfying(&self, spec: &PackageDep) -> bool {
            self.decided.contains(&spec.name().to_string())
        }

        fn any_unmasked(&self, spec: &PackageDep) -> bool {
            self.available.contains(&spec.name().to_string())
        }
    }

    fn id_with(build_deps: &str, enabled: &[&str], disabled: &[&str]) -> PackageId {
        let mut values = Vec::new();
        for (flags, enabled) in [(enabled, true), (disabled, false)] {
            for flag in flags {
                values.push(ChoiceValue {
                    name: ChoiceName::new(flag).unwrap(),
                    prefix: None,
                    enabled,
                    locked: false,
                    explicitly_listed: true,
                    enabled_by_default: false,
                });
            }
        }
        PackageId::builder(
            "cat/owner".parse().unwrap(),
            Version::new("1").unwrap(),
            RepositoryName::new("test").unwrap(),
        )
        .with_choices(Choices::new(vec![ChoiceSet {
            raw_name: "USE".to_string(),
            human_name: "USE".to_string(),
            prefix: None,
            values,
        }]))
        .with_dependencies(DependenciesClass::Build, build_deps)
        .build()
    }

    fn specs(deps: &[SanitisedDependency]) -> Vec<String> {
        deps.iter().map(|dep| dep.spec.to_string()).collect()
    }

    #[rstest]
    fn met_conditions_flatten() -> TestResult {
        let id = id_with(
            "cat/always ssl? ( cat/with-ssl ) doc? ( cat/with-doc ) !doc? ( cat/without-doc )",
            &["ssl"],
            &["doc"],
        );
        let deps = sanitise_dependencies(&id, DependenciesClass::Build, &FixedLookup::default())?
            .dependencies;
        assert_eq!(
            specs(&deps),
            vec!["cat/always", "cat/with-ssl", "cat/without-doc"]
        );
        assert_eq!(deps[1].active_conditions, "ssl?");
        assert_eq!(deps[1].original_spec, "ssl? ( cat/with-ssl )");
        Ok(())
    }

    #[rstest]
    fn unknown_flags_count_as_disabled() -> TestResult {
        let id = id_with("mystery? ( cat/never )", &[], &[]);
        let deps = sanitise_dependencies(&id, DependenciesClass::Build, &FixedLookup::default())?;
        assert!(deps.dependencies.is_empty());
        assert!(deps.unmet_groups.is_empty());
        Ok(())
    }

    #[rstest]
    fn labels_replace_and_accumulate() -> TestResult {
        let id = id_with("cat/one run: cat/two post: suggest: cat/three", &[], &[]);
        let deps = sanitise_dependencies(&id, DependenciesClass::Build, &FixedLookup::default())?
            .dependencies;

        assert_eq!(
            deps[0].active_labels.iter().copied().collect::<Vec<_>>(),
            vec![DependencyLabel::Build]
        );
        assert_eq!(
            deps[1].active_labels.iter().copied().collect::<Vec<_>>(),
            vec![DependencyLabel::Run]
        );
        assert_eq!(
            deps[2].active_labels.iter().copied().collect::<Vec<_>>(),
            vec![DependencyLabel::Post, DependencyLabel::Suggest]
        );
        Ok(())
    }

    /// An installed alternative wins the election regardless of listing
    /// order or version.
    #[rstest]
    fn any_of_prefers_installed() -> TestResult {
        let id = id_with("|| ( cat/first cat/second )", &[], &[]);
        let lookup = FixedLookup {
            installed: vec!["cat/second".to_string()],
            decided: Vec::new(),
            available: vec!["cat/first".to_string(), "cat/second".to_string()],
        };
        let deps = sanitise_dependencies(&id, DependenciesClass::Build, &lookup)?.dependencies;
        assert_eq!(specs(&deps), vec!["cat/second"]);
        assert_eq!(deps[0].original_spec, "|| ( cat/first cat/second )");
        Ok(())
    }

    #[rstest]
    fn any_of_falls_back_to_first_available() -> TestResult {
        let id = id_with("|| ( cat/first cat/second )", &[], &[]);
        let lookup = FixedLookup {
            installed: Vec::new(),
            decided: Vec::new(),
            available: vec!["cat/first".to_string(), "cat/second".to_string()],
        };
        let deps = sanitise_dependencies(&id, DependenciesClass::Build, &lookup)?.dependencies;
        assert_eq!(specs(&deps), vec!["cat/first"]);
        Ok(())
    }

    /// A group with no viable alternative contributes no constraint, but
    /// is reported back for the resolver to note.
    #[rstest]
    fn any_of_without_viable_child_is_reported() -> TestResult {
        let id = id_with("cat/kept || ( cat/first cat/second )", &[], &[]);
        let result =
            sanitise_dependencies(&id, DependenciesClass::Build, &FixedLookup::default())?;
        assert_eq!(specs(&result.dependencies), vec!["cat/kept"]);
        assert_eq!(result.unmet_groups.len(), 1);
        let group = &result.unmet_groups[0];
        assert_eq!(group.group, "|| ( cat/first cat/second )");
        assert_eq!(group.active_conditions, "");
        assert!(group.directly_rooted);
        Ok(())
    }

    /// A group nested inside a conditional is reported as not directly
    /// under the root.
    #[rstest]
    fn nested_unviable_any_of_is_not_directly_rooted() -> TestResult {
        let id = id_with("ssl? ( || ( cat/first cat/second ) )", &["ssl"], &[]);
        let result =
            sanitise_dependencies(&id, DependenciesClass::Build, &FixedLookup::default())?;
        assert!(result.dependencies.is_empty());
        assert_eq!(result.unmet_groups.len(), 1);
        let group = &result.unmet_groups[0];
        assert_eq!(group.active_conditions, "ssl?");
        assert!(!group.directly_rooted);
        Ok(())
    }

    /// The output is a pure function of its inputs.
    #[rstest]
    fn determinism() -> TestResult {
        let id = id_with(
            "cat/always ssl? ( cat/with-ssl ) || ( cat/first cat/second ) !cat/blocked",
            &["ssl"],
            &[],
        );
        let lookup = FixedLookup {
            installed: Vec::new(),
            decided: Vec::new(),
            available: vec!["cat/first".to_string()],
        };
        let first = sanitise_dependencies(&id, DependenciesClass::Build, &lookup)?;
        let second = sanitise_dependencies(&id, DependenciesClass::Build, &lookup)?;
        assert_eq!(first, second);
        assert_eq!(
            specs(&first.dependencies),
            vec!["cat/always", "cat/with-ssl", "cat/first", "!cat/blocked"]
        );
        Ok(())
    }

    #[rstest]
    fn suggestions_are_flagged() -> TestResult {
        let id = id_with("suggest: cat/nice-to-have", &[], &[]);
        let deps = sanitise_dependencies(&id, DependenciesClass::Build, &FixedLookup::default())?
            .dependencies;
        assert!(deps[0].is_suggestion());
        Ok(())
    }
}
