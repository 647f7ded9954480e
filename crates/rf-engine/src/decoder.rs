//! Per-voice decoder: 8-tap polyphase resampler, stochastic loop selection,
//! and the linear fade envelope, grounded in the original `decode_least16x2`
//! decode loop.

use std::sync::Arc;

use rf_core::{
    PackedAudio, PackedFormat, PipeSample, Sample, DEC_IS_FADING, DEC_IS_LOOPING, FADE_VEC_LEN,
    OUTPUT_SAMPLES, SMPL_INTERP_TAPS, SMPL_POSITION_SCALE,
};

use crate::interp::InterpTable;

const LCG_MUL: u32 = 1103515245;
const LCG_ADD: u32 = 12345;

#[inline]
fn update_rnd(rnd: u32) -> u32 {
    rnd.wrapping_mul(LCG_MUL).wrapping_add(LCG_ADD)
}

/// Which of a pipe sample's bodies a decoder is playing: the attack/sustain
/// body, or one release recording selected by the release-alignment
/// table's `release_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Attack,
    Release(u32),
}

#[derive(Debug, Clone, Copy, Default)]
struct ChannelHistory {
    taps: [Sample; SMPL_INTERP_TAPS],
}

impl ChannelHistory {
    #[inline]
    fn push(&mut self, sample: Sample) {
        self.taps.rotate_left(1);
        self.taps[SMPL_INTERP_TAPS - 1] = sample;
    }

    #[inline]
    fn accum(&self, coefs: &[Sample; SMPL_INTERP_TAPS]) -> Sample {
        self.taps.iter().zip(coefs.iter()).map(|(a, b)| a * b).sum()
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct FadeState {
    state: [Sample; FADE_VEC_LEN],
    delta: [Sample; FADE_VEC_LEN],
    nb_frames: u32,
    target: Sample,
}

impl FadeState {
    fn configure(&mut self, target_frames: u32, gain: Sample) {
        if target_frames != 0 {
            let decay_frames = target_frames.div_ceil(FADE_VEC_LEN as u32);
            let current_gain = self.state[FADE_VEC_LEN - 1];
            let gpf = (gain - current_gain) / decay_frames as Sample;
            let gps = gpf / FADE_VEC_LEN as Sample;
            for (i, lane) in self.state.iter_mut().enumerate() {
                *lane = current_gain + (i as Sample + 1.0) * gps;
            }
            self.delta = [gpf; FADE_VEC_LEN];
            self.nb_frames = decay_frames;
        } else {
            self.state = [gain; FADE_VEC_LEN];
            self.nb_frames = 0;
        }
        self.target = gain;
    }

    /// Sum `tmp` (interleaved, `channels`-wide) into `out` under the fade
    /// envelope. The delta is applied once per `FADE_VEC_LEN`-wide vector of
    /// frames, not once per sample.
    fn process(&mut self, out: &mut [&mut [Sample]], tmp: &[Sample], channels: usize) -> u32 {
        let mut fade = self.state;
        let mut fadefr = self.nb_frames;
        let frames = out[0].len();

        let mut i = 0;
        while i < frames {
            let vec_len = FADE_VEC_LEN.min(frames - i);
            for lane in 0..vec_len {
                let frame = i + lane;
                for (ch, channel_out) in out.iter_mut().enumerate().take(channels) {
                    channel_out[frame] += tmp[frame * channels + ch] * fade[lane];
                }
            }
            if fadefr > 0 {
                fadefr -= 1;
                if fadefr > 0 {
                    for (lane, d) in fade.iter_mut().zip(self.delta.iter()) {
                        *lane += d;
                    }
                } else {
                    fade = [self.target; FADE_VEC_LEN];
                }
            }
            i += FADE_VEC_LEN;
        }

        self.state = fade;
        self.nb_frames = fadefr;
        fadefr
    }
}

fn read_frame(data: &PackedAudio, frame: usize) -> [Sample; 2] {
    let stride = data.frame_stride();
    let off = frame * stride;
    match data.format {
        PackedFormat::I16 => {
            let mut out = [0.0; 2];
            for (ch, slot) in out.iter_mut().enumerate().take(data.channels) {
                let o = off + ch * 2;
                let v = i16::from_le_bytes([data.bytes[o], data.bytes[o + 1]]);
                *slot = v as Sample;
            }
            out
        }
        PackedFormat::I12 => {
            let b = &data.bytes[off..off + 3];
            let v = u32::from_le_bytes([b[0], b[1], b[2], 0]);
            let a = ((v << 8) as i32) >> 20;
            let c = ((v << 20) as i32) >> 20;
            [a as Sample, c as Sample]
        }
    }
}

/// A single playing instance of one body (attack or release) of a pipe
/// sample. Owns its own resampler history, loop-selection state, and fade
/// envelope; the pipe sample itself is shared read-only.
pub struct Decoder {
    sample: Arc<PipeSample>,
    which: BodyKind,
    interp: Arc<InterpTable>,
    channels: usize,
    history: Vec<ChannelHistory>,
    fade: FadeState,
    pub ipos: u32,
    pub fpos: u32,
    pub rate: u32,
    rndstate: u32,
    loopend_idx: usize,
}

impl Decoder {
    fn body(&self) -> &rf_core::SampleBody {
        match self.which {
            BodyKind::Attack => &self.sample.attack,
            BodyKind::Release(id) => self
                .sample
                .release(id)
                .expect("release decoder instantiated with an out-of-range release_id"),
        }
    }

    /// Seed history from up to `SMPL_INTERP_TAPS` samples preceding `ipos`
    /// (zero-padded on the low side), bind to the body's first loop end, and
    /// configure an immediate (zero-frame) fade to the body's unity gain.
    pub fn instantiate(
        sample: Arc<PipeSample>,
        which: BodyKind,
        interp: Arc<InterpTable>,
        ipos: u32,
        fpos: u32,
    ) -> Self {
        let body_of = |which: BodyKind| -> &rf_core::SampleBody {
            match which {
                BodyKind::Attack => &sample.attack,
                BodyKind::Release(id) => sample
                    .release(id)
                    .expect("release decoder instantiated with an out-of-range release_id"),
            }
        };

        let channels = body_of(which).num_channels();
        let mut history = vec![ChannelHistory::default(); channels];

        {
            let body = body_of(which);
            let first = ipos.saturating_sub(SMPL_INTERP_TAPS as u32);
            for i in first..ipos {
                let frame = read_frame(&body.data, i as usize);
                for (ch, hist) in history.iter_mut().enumerate().take(channels) {
                    hist.push(frame[ch]);
                }
            }
        }

        let mut fade = FadeState::default();
        let gain = body_of(which).gain;
        fade.configure(0, gain);

        Self {
            sample,
            which,
            interp,
            channels,
            history,
            fade,
            ipos,
            fpos,
            rate: SMPL_POSITION_SCALE,
            rndstate: 0,
            loopend_idx: 0,
        }
    }

    /// Reconfigure the fade target. `gain` is relative to the body's
    /// intrinsic gain, matching the original's `setfade` contract.
    pub fn setfade(&mut self, target_frames: u32, gain: Sample) {
        let body_gain = self.body().gain;
        self.fade.configure(target_frames, body_gain * gain);
    }

    /// Decode exactly `OUTPUT_SAMPLES` frames, summing into `out` (one slice
    /// per channel, already sized to `OUTPUT_SAMPLES`). Returns the
    /// `DEC_IS_LOOPING` / `DEC_IS_FADING` flag bits.
    pub fn decode(&mut self, out: &mut [&mut [Sample]]) -> u32 {
        let channels = self.channels;
        let mut tmp = vec![0.0 as Sample; OUTPUT_SAMPLES * channels];

        let mut ipos = self.ipos;
        let mut fpos = self.fpos;
        let mut rndstate = self.rndstate;
        let mut loopend_idx = self.loopend_idx;

        for frame in 0..OUTPUT_SAMPLES {
            let coefs = self.interp.row(fpos);
            for (ch, hist) in self.history.iter().enumerate().take(channels) {
                tmp[frame * channels + ch] = hist.accum(coefs);
            }
            fpos += self.rate;

            while fpos >= SMPL_POSITION_SCALE {
                let body = self.body();
                let next = read_frame(&body.data, ipos as usize);
                for (ch, hist) in self.history.iter_mut().enumerate().take(channels) {
                    hist.push(next[ch]);
                }
                ipos += 1;
                if ipos > body.ends[loopend_idx].end_smpl as u32 {
                    let start_idx = body.ends[loopend_idx].start_idx;
                    let start = &body.starts[start_idx];
                    ipos = start.start_smpl as u32;
                    rndstate = update_rnd(rndstate);
                    let span = body.ends.len() - start.first_valid_end;
                    loopend_idx = start.first_valid_end + (rndstate as usize % span);
                }
                fpos -= SMPL_POSITION_SCALE;
            }
        }

        self.ipos = ipos;
        self.fpos = fpos;
        self.rndstate = rndstate;
        self.loopend_idx = loopend_idx;

        let mut flags = 0u32;
        {
            let body = self.body();
            let start_idx = body.ends[self.loopend_idx].start_idx;
            if self.ipos >= body.starts[start_idx].start_smpl as u32 {
                flags |= DEC_IS_LOOPING;
            }
        }

        if self.fade.process(out, &tmp, channels) > 0 {
            flags |= DEC_IS_FADING;
        }
        flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rf_core::{LoopEnd, LoopStart, PackedAudio, PackedFormat, ReleaseTable, SampleBody};

    fn one_frame_looped_sample() -> Arc<PipeSample> {
        // A single stereo frame [1000, -1000] that loops on itself forever.
        let bytes = 1000i16.to_le_bytes().iter().chain((-1000i16).to_le_bytes().iter()).copied().collect();
        let attack = SampleBody {
            gain: 1.0,
            starts: vec![LoopStart { start_smpl: 0, first_valid_end: 0 }],
            ends: vec![LoopEnd { end_smpl: 0, start_idx: 0 }],
            data: PackedAudio {
                format: PackedFormat::I16,
                channels: 2,
                frames: 1,
                bytes,
            },
        };
        Arc::new(PipeSample {
            attack,
            releases: Vec::new(),
            reltable: ReleaseTable::default(),
            frequency: 440.0,
            sample_rate: 48_000,
        })
    }

    #[test]
    fn decode_reports_looping_once_past_attack_start() {
        let sample = one_frame_looped_sample();
        let interp = Arc::new(InterpTable::new());
        let mut dec = Decoder::instantiate(sample, BodyKind::Attack, interp, 0, 0);
        dec.rate = SMPL_POSITION_SCALE;

        let mut left = vec![0.0 as Sample; OUTPUT_SAMPLES];
        let mut right = vec![0.0 as Sample; OUTPUT_SAMPLES];
        let flags = {
            let mut out: Vec<&mut [Sample]> = vec![&mut left, &mut right];
            dec.decode(&mut out)
        };
        assert_ne!(flags & DEC_IS_LOOPING, 0);
    }

    #[test]
    fn setfade_zero_frames_snaps_all_lanes_to_target() {
        let sample = one_frame_looped_sample();
        let interp = Arc::new(InterpTable::new());
        let mut dec = Decoder::instantiate(sample, BodyKind::Attack, interp, 0, 0);
        dec.setfade(0, 0.25);
        assert!(dec.fade.state.iter().all(|&g| (g - 0.25).abs() < 1e-6));
    }
}
