#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]

mod error;
pub use error::Error;

mod version;
pub use version::NumericPart;
pub use version::SuffixKind;
pub use version::Version;
pub use version::VersionSuffix;

mod name;
pub use name::CategoryName;
pub use name::PackageNamePart;
pub use name::QualifiedPackageName;
pub use name::RepositoryName;

mod slot;
pub use slot::Slot;
pub use slot::SlotRequirement;

mod keyword;
pub use keyword::Keyword;

mod choice;
pub use choice::ChoiceName;
pub use choice::ChoiceSet;
pub use choice::ChoiceValue;
pub use choice::Choices;

mod spec;
pub use spec::BlockStrength;
pub use spec::PackageDep;
pub use spec::UseRequirement;
pub use spec::UseRequirementKind;
pub use spec::VersionOp;

mod dep_tree;
pub use dep_tree::DepTree;
pub use dep_tree::DependenciesClass;
pub use dep_tree::DependencyLabel;

mod dep_string;
pub use dep_string::parse_dependency_string;

mod package_id;
pub use package_id::DependenciesKey;
pub use package_id::Mask;
pub use package_id::MaskKind;
pub use package_id::PackageId;
pub use package_id::PackageIdBuilder;
