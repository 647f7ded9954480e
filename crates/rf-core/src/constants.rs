//! Fixed-point and block-size constants shared by the decoder, the resampler
//! tables and the playback engine. These are wire constants, not tunables:
//! the decoder's polyphase interpolation table is generated against
//! `SMPL_POSITION_SCALE` and `SMPL_INTERP_TAPS` and both sides must agree.

/// Fractional-position fixed-point scale. A decoder's `fpos` is always in
/// `[0, SMPL_POSITION_SCALE)`; `rate` is expressed in the same units, so a
/// `rate` of `SMPL_POSITION_SCALE` plays back at the sample's native speed.
pub const SMPL_POSITION_SCALE: u32 = 16384;

/// Number of taps in the polyphase resampling filter, and the width of the
/// per-channel history register each decoder keeps.
pub const SMPL_INTERP_TAPS: usize = 8;

/// Length of the symmetric FIR inverse-interpolation prefilter applied to
/// attack/sustain and release audio during sample preparation.
pub const SMPL_INVERSE_FILTER_LEN: usize = 191;

/// Samples shaved off the head of a prefiltered release to discard the
/// filter's pre-ringing (`SMPL_INVERSE_FILTER_LEN / 8`).
pub const SMPL_INVERSE_FILTER_PRE_READ: usize = SMPL_INVERSE_FILTER_LEN / 8;

/// Output samples produced by one playback engine callback.
pub const OUTPUT_SAMPLES: usize = 64;

/// Width of the fade gain/delta vectors maintained by each decoder.
pub const FADE_VEC_LEN: usize = 4;

/// Maximum number of loops a sampler body may define.
pub const MAX_LOOP: usize = 16;

/// Maximum number of decoders a single voice may reserve (attack + release).
pub const PLAYENG_MAX_DECODERS_PER_INSTANCE: usize = 2;

/// Maximum number of segments in a release-alignment table.
pub const RELTABLE_MAX_ENTRIES: usize = 128;

/// Decode-flags bit: the decoder has entered its sustain/terminal loop.
pub const DEC_IS_LOOPING: u32 = 1;
/// Decode-flags bit: the decoder's fade envelope has not yet settled.
pub const DEC_IS_FADING: u32 = 2;

/// Minimum trailing silence run appended as the synthetic terminal loop of a
/// release recording.
pub const RELEASE_SILENCE_TAIL: usize = 32;
