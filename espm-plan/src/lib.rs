#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]

mod error;
pub use error::Error;

mod record;
pub use record::PlanValue;

mod codec;
pub use codec::deserialise_lists;
pub use codec::serialise_lists;

mod handoff;
pub use handoff::SERIALISED_RESOLUTION_FD_VAR;
pub use handoff::read_serialised_plan;
pub use handoff::write_serialised_plan;

mod display;
pub use display::render_plan;
