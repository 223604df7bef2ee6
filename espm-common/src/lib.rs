#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]

mod error;
pub use error::Error;

mod notifier;
pub use notifier::Notification;
pub use notifier::Notifier;

mod universe;
pub use universe::DestinationType;
pub use universe::PackageUniverse;

mod destination;
pub use destination::Destination;
pub use destination::EntryKind;
pub use destination::FileHashes;
pub use destination::JournalEntry;
pub use destination::MergeJournal;

mod synthetic;
pub use synthetic::SyntheticUniverse;
