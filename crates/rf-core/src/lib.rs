//! rf-core: Shared types, constants and error handling for the sampler.
//!
//! This crate has no audio-processing logic of its own; it exists so that
//! `rf-dsp`, `rf-file` and `rf-engine` can share a single definition of the
//! pipe sample data model, the engine's fixed-point constants and the error
//! type that crosses all of their boundaries.

mod constants;
mod error;
mod pipe;
mod sample;

pub use constants::*;
pub use error::*;
pub use pipe::*;
pub use sample::*;
