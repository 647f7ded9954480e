//! Error types shared across the sampler core

use thiserror::Error;

/// Core error type
#[derive(Error, Debug)]
pub enum RfError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("out of memory")]
    OutOfMemory,

    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("not a wave file")]
    NotAWave,

    #[error("file truncated")]
    FileTruncated,

    #[error("duplicate required chunk: {0}")]
    DuplicateRequiredChunk(&'static str),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("conflicting loop definitions between smpl and cue/ltxt chunks")]
    ConflictingLoops,

    #[error("too many markers (max {0})")]
    TooManyMarkers(usize),

    #[error("too many chunks (max {0})")]
    TooManyChunks(usize),

    #[error("malformed cue chunk: {0}")]
    MalformedCue(String),

    #[error("malformed smpl chunk: {0}")]
    MalformedSmpl(String),

    #[error("malformed adtl chunk: {0}")]
    MalformedAdtl(String),
}

/// Result type alias
pub type RfResult<T> = Result<T, RfError>;

/// Bit-masked non-fatal warnings accumulated while loading a pipe sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RfWarnings(pub u32);

impl RfWarnings {
    pub const FILE_TRUNCATED: u32 = 1 << 0;
    pub const UNKNOWN_CHUNK_DROPPED: u32 = 1 << 1;
    pub const SMPL_PITCH_WITHOUT_LOOP: u32 = 1 << 2;

    #[inline]
    pub fn set(&mut self, bit: u32) {
        self.0 |= bit;
    }

    #[inline]
    pub fn has(&self, bit: u32) -> bool {
        self.0 & bit != 0
    }
}
