//! The pipe sample data model: the shape a prepared rank sample takes once
//! it has been through the preparation pipeline and is ready for the
//! playback engine to decode. Shared by `rf-engine` (builds and decodes
//! these) and `rf-dsp` (builds the release table that hangs off one).

use crate::sample::Sample;

/// One loop start candidate within a sample body. `first_valid_end` indexes
/// into the body's `ends` list: once the playhead has advanced past this
/// start, only `ends[first_valid_end..]` are eligible loop-back points,
/// which lets later loop iterations pick longer loops than earlier ones.
#[derive(Debug, Clone, Copy)]
pub struct LoopStart {
    pub start_smpl: u64,
    pub first_valid_end: usize,
}

/// One loop end candidate. `start_idx` names the [`LoopStart`] the decoder
/// jumps back to when this end fires.
#[derive(Debug, Clone, Copy)]
pub struct LoopEnd {
    pub end_smpl: u64,
    pub start_idx: usize,
}

/// The two on-disk encodings a pipe sample's quantised frames may use.
/// `I12` packs a stereo frame into 3 bytes (`(a << 12) | (b & 0xFFF)`,
/// little-endian) and is only defined for 2 channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackedFormat {
    I16,
    I12,
}

/// Quantised, packed PCM frames as they sit in a built pipe sample: the
/// representation the decoder reads directly, not the float working buffers
/// the preparation pipeline uses to get there.
#[derive(Debug, Clone)]
pub struct PackedAudio {
    pub format: PackedFormat,
    pub channels: usize,
    pub frames: usize,
    pub bytes: Vec<u8>,
}

impl PackedAudio {
    /// Bytes occupied by one frame (all channels) of this encoding.
    pub fn frame_stride(&self) -> usize {
        match self.format {
            PackedFormat::I16 => 2 * self.channels,
            PackedFormat::I12 => {
                debug_assert_eq!(self.channels, 2, "12-bit packing is stereo-only");
                3
            }
        }
    }
}

/// A decodable audio body: either the attack/sustain recording or the
/// release recording of a pipe sample, already prefiltered, quantised, and
/// with its loop points resolved.
#[derive(Debug, Clone)]
pub struct SampleBody {
    /// Linear gain applied uniformly to this body's decoded output, to
    /// recover unity amplitude after quantisation scaled it down.
    pub gain: Sample,
    pub starts: Vec<LoopStart>,
    pub ends: Vec<LoopEnd>,
    pub data: PackedAudio,
}

impl SampleBody {
    pub fn num_channels(&self) -> usize {
        self.data.channels
    }

    pub fn num_frames(&self) -> usize {
        self.data.frames
    }
}

/// One piecewise-linear segment of a release-alignment table: maps a
/// sustain-loop sample index back onto a position (and implied gain) within
/// the release recording, so a release can be triggered from any point in
/// the sustain loop without an audible splice.
#[derive(Debug, Clone, Copy)]
pub struct ReleaseTableEntry {
    /// Highest sustain-loop sample index this entry applies to. Entries are
    /// kept in ascending order of `last_sample` and are scanned from the
    /// front; the first entry whose `last_sample` is greater than or equal
    /// to the query position applies.
    pub last_sample: u64,
    /// Index into the pipe's release list this segment should trigger.
    pub release_id: u32,
    /// Line slope mapping sustain position to release position.
    pub m: f64,
    /// Line intercept (always less than or equal to the segment's first
    /// sustain position it covers).
    pub b: f64,
    /// Gain to apply to the release body when triggered from this segment.
    pub gain: Sample,
    /// Mean squared alignment error accumulated while this segment was
    /// built, retained for diagnostics.
    pub avgerr: f32,
}

/// A built release-alignment table. See [`crate::constants::RELTABLE_MAX_ENTRIES`]
/// for the hard cap on `entries.len()`.
#[derive(Debug, Clone, Default)]
pub struct ReleaseTable {
    pub entries: Vec<ReleaseTableEntry>,
}

impl ReleaseTable {
    /// Look up the release-recording offset and gain for a release
    /// triggered while the sustain loop's playhead is at `sustain_pos`.
    ///
    /// Returns `(release_offset, gain)`, or `None` if the table has no
    /// entries (the pipe has no release recording).
    ///
    /// The offset returned wraps via `fmod` against the segment's period
    /// `m`; a sign-correcting `abs` is applied before the modulo exactly as
    /// the original analysis tool did, to avoid emitting a negative sample
    /// offset for positions upstream of a segment's intercept. This masks
    /// rather than fixes whatever produces those positions; see
    /// `reltable::build` for the construction-side detail and a logged
    /// warning when it triggers.
    pub fn find(&self, sustain_pos: u64) -> Option<(u32, f64, Sample)> {
        if self.entries.is_empty() {
            return None;
        }
        let mut idx = self.entries.len() - 1;
        for (i, e) in self.entries.iter().enumerate() {
            if sustain_pos as f64 <= e.last_sample as f64 {
                idx = i;
                break;
            }
        }
        let entry = &self.entries[idx];
        let raw = sustain_pos as f64 - entry.b;
        if raw < 0.0 {
            log::warn!(
                "release table lookup at {sustain_pos} fell before segment intercept {} (entry {idx})",
                entry.b
            );
        }
        let offset = if entry.m > 0.0 {
            (raw.abs()) % entry.m
        } else {
            raw.abs()
        };

        // Interpolate gain towards the next segment across this segment's
        // span, so the alignment gain doesn't step discontinuously at a
        // segment boundary.
        let gain = if idx + 1 < self.entries.len() {
            let prev_last = if idx == 0 {
                0
            } else {
                self.entries[idx - 1].last_sample
            };
            let span = (entry.last_sample.saturating_sub(prev_last)).max(1) as f64;
            let t = ((sustain_pos.saturating_sub(prev_last)) as f64 / span).clamp(0.0, 1.0);
            let next_gain = self.entries[idx + 1].gain as f64;
            ((1.0 - t) * entry.gain as f64 + t * next_gain) as Sample
        } else {
            entry.gain
        };

        Some((entry.release_id, offset, gain))
    }
}

/// A fully prepared pipe sample: the attack/sustain body, its release list
/// (zero or more recordings, indexed by the release-alignment table's
/// `release_id`), and the metadata needed to drive a decoder (native pitch,
/// sample rate).
#[derive(Debug, Clone)]
pub struct PipeSample {
    pub attack: SampleBody,
    /// One or more release recordings. A release-alignment table entry's
    /// `release_id` indexes this list directly.
    pub releases: Vec<SampleBody>,
    pub reltable: ReleaseTable,
    /// Recorded fundamental frequency in Hz, used by the engine to compute
    /// a decoder's playback rate for a requested pitch.
    pub frequency: f64,
    pub sample_rate: u32,
}

impl PipeSample {
    pub fn has_release(&self) -> bool {
        !self.releases.is_empty()
    }

    pub fn release(&self, release_id: u32) -> Option<&SampleBody> {
        self.releases.get(release_id as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(entries: Vec<ReleaseTableEntry>) -> ReleaseTable {
        ReleaseTable { entries }
    }

    #[test]
    fn find_on_empty_table_is_none() {
        assert!(ReleaseTable::default().find(100).is_none());
    }

    #[test]
    fn find_picks_first_segment_covering_position_and_names_its_release() {
        let t = table(vec![
            ReleaseTableEntry { last_sample: 100, release_id: 0, m: 50.0, b: 0.0, gain: 1.0, avgerr: 0.0 },
            ReleaseTableEntry { last_sample: 200, release_id: 1, m: 50.0, b: 0.0, gain: 0.8, avgerr: 0.0 },
        ]);
        let (release_id, _offset, _gain) = t.find(50).unwrap();
        assert_eq!(release_id, 0);
        let (release_id, _offset, _gain) = t.find(150).unwrap();
        assert_eq!(release_id, 1);
    }

    #[test]
    fn find_interpolates_gain_across_a_segment_span() {
        let t = table(vec![
            ReleaseTableEntry { last_sample: 100, release_id: 0, m: 50.0, b: 0.0, gain: 1.0, avgerr: 0.0 },
            ReleaseTableEntry { last_sample: 200, release_id: 0, m: 50.0, b: 0.0, gain: 0.8, avgerr: 0.0 },
        ]);
        let (_, _, gain_start) = t.find(0).unwrap();
        let (_, _, gain_end) = t.find(100).unwrap();
        assert!((gain_start - 1.0).abs() < 1e-6);
        assert!(gain_end < gain_start);
    }

    #[test]
    fn find_never_returns_negative_offset() {
        let t = table(vec![ReleaseTableEntry {
            last_sample: 1000,
            release_id: 0,
            m: 37.0,
            b: 40.0,
            gain: 1.0,
            avgerr: 0.0,
        }]);
        // sustain_pos < b would make (sustain_pos - b) negative without the
        // abs() correction.
        let (_, offset, _) = t.find(10).unwrap();
        assert!(offset >= 0.0);
    }
}
