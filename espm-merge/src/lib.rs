#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]

mod error;
pub use error::Error;

mod hash;
pub use hash::hash_file;

mod merger;
pub use merger::Merger;
pub use merger::MergerOptions;
