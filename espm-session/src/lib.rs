#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]

mod error;
pub use error::Error;

mod context;
pub use context::SessionContext;

mod session;
pub use session::EXIT_EXECUTION_FAILURE;
pub use session::EXIT_OK;
pub use session::EXIT_TAKEN_ERRORS;
pub use session::Session;
