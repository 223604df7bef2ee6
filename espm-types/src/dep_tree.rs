//! Dependency trees.

use std::fmt::{Display, Formatter};

use serde::Serialize;
use strum::{Display as StrumDisplay, EnumIter, EnumString};

use crate::{BlockStrength, ChoiceName, PackageDep};

/// A dependency-type label.
///
/// Labels annotate dependency groups with the role the listed packages play
/// for the depending package. A `label:` marker inside a dependency string
/// replaces the active label set for its following siblings.
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
    StrumDisplay,
    EnumIter,
    EnumString,
)]
#[strum(serialize_all = "kebab-case")]
pub enum DependencyLabel {
    /// Needed to build the depending package.
    Build,
    /// Needed at runtime.
    Run,
    /// May be installed after the depending package.
    Post,
    /// Must be present while compiling against the depending package.
    CompileAgainst,
    /// Suggested, never required.
    Suggest,
    /// Recommended, installed unless discarded.
    Recommend,
    /// Needed only when running tests.
    Test,
    /// Needed to fetch distfiles.
    Fetch,
    /// Needed while installing.
    Install,
}

/// A metadata class whose value is a dependency tree.
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
    StrumDisplay,
    EnumIter,
    EnumString,
)]
#[strum(serialize_all = "snake_case")]
pub enum DependenciesClass {
    /// Build dependencies (`DEPEND`).
    Build,
    /// Runtime dependencies (`RDEPEND`).
    Run,
    /// Post dependencies (`PDEPEND`).
    Post,
    /// Compile-against dependencies (`CDEPEND`).
    CompileAgainst,
    /// Suggestions (`SDEPEND`).
    Suggestions,
    /// Fetchable sources (`SRC_URI`).
    Fetches,
    /// Licences (`LICENSE`).
    License,
    /// Restrictions (`RESTRICT`).
    Restrict,
    /// Listed options (`MYOPTIONS`).
    Myoptions,
    /// Old-style virtuals provided (`PROVIDE`).
    Provide,
    /// Inherited build libraries (`INHERITED`).
    Inherited,
}

impl DependenciesClass {
    /// The metadata classes holding package dependencies, in evaluation
    /// order.
    pub const DEPENDENCY_CLASSES: &[DependenciesClass] = &[
        DependenciesClass::Build,
        DependenciesClass::Run,
        DependenciesClass::Post,
        DependenciesClass::CompileAgainst,
        DependenciesClass::Suggestions,
    ];

    /// The metadata variable the class is read from.
    pub fn variable_name(self) -> &'static str {
        match self {
            DependenciesClass::Build => "DEPEND",
            DependenciesClass::Run => "RDEPEND",
            DependenciesClass::Post => "PDEPEND",
            DependenciesClass::CompileAgainst => "CDEPEND",
            DependenciesClass::Suggestions => "SDEPEND",
            DependenciesClass::Fetches => "SRC_URI",
            DependenciesClass::License => "LICENSE",
            DependenciesClass::Restrict => "RESTRICT",
            DependenciesClass::Myoptions => "MYOPTIONS",
            DependenciesClass::Provide => "PROVIDE",
            DependenciesClass::Inherited => "INHERITED",
        }
    }

    /// The human readable name used when displaying sanitised dependencies.
    pub fn human_name(self) -> &'static str {
        match self {
            DependenciesClass::Build => "build dependencies",
            DependenciesClass::Run => "run dependencies",
            DependenciesClass::Post => "post dependencies",
            DependenciesClass::CompileAgainst => "compile against dependencies",
            DependenciesClass::Suggestions => "suggestions",
            DependenciesClass::Fetches => "fetches",
            DependenciesClass::License => "licences",
            DependenciesClass::Restrict => "restrictions",
            DependenciesClass::Myoptions => "options",
            DependenciesClass::Provide => "provides",
            DependenciesClass::Inherited => "inherited",
        }
    }

    /// The label set active at the top of a tree of this class.
    pub fn initial_labels(self) -> &'static [DependencyLabel] {
        match self {
            DependenciesClass::Build => &[DependencyLabel::Build],
            DependenciesClass::Run => &[DependencyLabel::Run],
            DependenciesClass::Post => &[DependencyLabel::Post],
            DependenciesClass::CompileAgainst => &[DependencyLabel::CompileAgainst],
            DependenciesClass::Suggestions => &[DependencyLabel::Suggest],
            DependenciesClass::Fetches => &[DependencyLabel::Fetch],
            DependenciesClass::License
            | DependenciesClass::Restrict
            | DependenciesClass::Myoptions
            | DependenciesClass::Provide
            | DependenciesClass::Inherited => &[],
        }
    }

    /// Whether values of this class hold package dependency specs (rather
    /// than URIs or plain text).
    pub fn holds_package_deps(self) -> bool {
        matches!(
            self,
            DependenciesClass::Build
                | DependenciesClass::Run
                | DependenciesClass::Post
                | DependenciesClass::CompileAgainst
                | DependenciesClass::Suggestions
                | DependenciesClass::Provide
        )
    }
}

/// One node of a dependency tree.
///
/// Trees are finite and immutable once built. The nodes a tree may contain
/// depend on the [`DependenciesClass`] it was parsed for; the parser enforces
/// that an [`DepTree::AnyOf`] group never contains blockers.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub enum DepTree {
    /// All children apply.
    AllOf(Vec<DepTree>),
    /// Exactly one child is chosen.
    AnyOf(Vec<DepTree>),
    /// The children apply iff the named choice has the wanted state.
    Conditional {
        /// The choice the condition tests.
        choice: ChoiceName,
        /// Whether the condition is `!flag?` rather than `flag?`.
        negated: bool,
        /// The guarded children.
        children: Vec<DepTree>,
    },
    /// A package dependency.
    Package(PackageDep),
    /// A blocked package.
    Block {
        /// The strength of the block.
        strength: BlockStrength,
        /// The blocked spec.
        spec: PackageDep,
    },
    /// A licence name.
    License(String),
    /// A fetchable source with an optional target filename (`uri -> name`).
    FetchableUri {
        /// The source location.
        uri: String,
        /// The filename the source is saved under, if renamed.
        filename: Option<String>,
    },
    /// A label marker replacing the active label set for its siblings.
    Label(DependencyLabel),
    /// An uninterpreted token (restrictions, options).
    SimpleText(String),
}

impl DepTree {
    /// Whether the node or any descendant is a block.
    pub fn contains_block(&self) -> bool {
        match self {
            DepTree::Block { .. } => true,
            DepTree::AllOf(children) | DepTree::AnyOf(children) => {
                children.iter().any(DepTree::contains_block)
            }
            DepTree::Conditional { children, .. } => children.iter().any(DepTree::contains_block),
            _ => false,
        }
    }

    /// Prints `children` space-separated without enclosing parentheses, as
    /// at the top level of a dependency string.
    pub fn unparenthesised(children: &[DepTree]) -> String {
        children
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Display for DepTree {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            DepTree::AllOf(children) => write!(f, "( {} )", DepTree::unparenthesised(children)),
            DepTree::AnyOf(children) => write!(f, "|| ( {} )", DepTree::unparenthesised(children)),
            DepTree::Conditional {
                choice,
                negated,
                children,
            } => {
                let bang = if *negated { "!" } else { "" };
                write!(
                    f,
                    "{bang}{choice}? ( {} )",
                    DepTree::unparenthesised(children)
                )
            }
            DepTree::Package(spec) => write!(f, "{spec}"),
            DepTree::Block { strength, spec } => match strength {
                BlockStrength::Weak => write!(f, "!{spec}"),
                BlockStrength::Strong => write!(f, "!!{spec}"),
            },
            DepTree::License(text) | DepTree::SimpleText(text) => write!(f, "{text}"),
            DepTree::FetchableUri { uri, filename } => match filename {
                Some(filename) => write!(f, "{uri} -> {filename}"),
                None => write!(f, "{uri}"),
            },
            DepTree::Label(label) => write!(f, "{label}:"),
        }
    }
}
