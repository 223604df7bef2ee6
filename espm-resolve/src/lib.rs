#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]

mod error;
pub use error::Error;

mod resolvent;
pub use resolvent::Resolvent;
pub use resolvent::ResolventSlot;

mod sanitise;
pub use sanitise::AnyOfLookup;
pub use sanitise::SanitisedDependencies;
pub use sanitise::SanitisedDependency;
pub use sanitise::UnmetAnyOfGroup;
pub use sanitise::sanitise_dependencies;

mod constraint;
pub use constraint::Constraint;
pub use constraint::Reason;
pub use constraint::UseExisting;

mod decision;
pub use decision::ChangeDestination;
pub use decision::Decision;
pub use decision::Resolution;
pub use decision::UnmetNote;
pub use decision::UnsuitableCandidate;

mod job;
pub use job::Arrow;
pub use job::ArrowKind;
pub use job::Job;
pub use job::JobId;
pub use job::JobKind;
pub use job::ResolverLists;

mod order;
pub use order::order_jobs;

mod resolver;
pub use resolver::Resolver;
pub use resolver::ResolverPolicy;
pub use resolver::SuggestRestart;
