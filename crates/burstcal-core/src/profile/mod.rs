//! Profile store: one immutable record per instrument/band, selected by name.

pub mod config;
mod store;

pub use config::{
    EnvironmentSpec, FrameFormat, FrameOrder, InvocationProperties, MethodParameters,
    PipelinePolicy,
};
pub use store::{InstrumentProfile, ProfileStore};
