//! rf-file: WAV container boundary for the sampler.
//!
//! Reads and writes the PCM data, loop markers, release marker, pitch info
//! and INFO-list metadata that the sample preparation pipeline and the
//! pipe-sample data model need. Everything else about the RIFF/WAVE format
//! (non-PCM encodings, other chunk types) is out of scope; unrecognised
//! chunks are either dropped with a warning or preserved verbatim, per the
//! caller's choice.

mod riff;
mod wav;

pub use wav::{
    read_wav, write_wav, LoopMarker, LoopPreference, PitchInfo, WavData, WavMarkers,
    SUPPORTED_INFO_TAGS,
};
