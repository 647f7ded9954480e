//! Real-time polyphonic playback engine and offline sample-preparation
//! pipeline for pipe-organ samples, built on [`rf_core`]'s pipe-sample model
//! and [`rf_dsp`]'s FFT/FIR/release-table facility.

mod decoder;
mod engine;
mod interp;
mod prep;
mod voice;

pub use decoder::{BodyKind, Decoder};
pub use engine::{PlaybackEngine, VoiceHandle};
pub use interp::InterpTable;
pub use prep::{prepare_pipe, PipeSpec, ReleaseInput};
pub use voice::{CallbackStatus, Decoders, Voice, VoiceCallback, VoiceState};
