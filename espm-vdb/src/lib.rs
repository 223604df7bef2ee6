#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]

mod error;
pub use error::Error;

mod contents;
pub use contents::ContentsEntry;
pub use contents::ContentsFile;

mod lock;
pub use lock::VdbLock;

mod db;
pub use db::Vdb;
pub use db::contents_to_journal;
pub use db::journal_to_contents;
