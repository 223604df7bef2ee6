#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]

mod error;
pub use error::Error;

mod backend;
pub use backend::BackendConfig;
pub use backend::BuildPhase;
pub use backend::EbuildBackend;
pub use backend::INSTALL_PHASES;

mod executor;
pub use executor::AbortFlag;
pub use executor::ContinueOnFailure;
pub use executor::ExecuteOutcome;
pub use executor::Executor;
