//! Sample preparation pipeline: ingest → frequency estimate → prefilter →
//! envelope/correlation → release-alignment table → quantised pack,
//! grounded in the pipeline described end to end by the original loader and
//! reassembled here from `rf-file`'s WAV reader and `rf-dsp`'s FFT/FIR/
//! reltable facility.

use std::sync::Arc;

use rf_core::{
    LoopEnd, LoopStart, PackedAudio, PackedFormat, PipeSample, PlanarAudio, RELEASE_SILENCE_TAIL,
    RfError, RfResult, Sample, SampleBody, SMPL_INVERSE_FILTER_LEN, SMPL_INVERSE_FILTER_PRE_READ,
};
use rf_dsp::{build_release_table, FftFacility, FirFilter, ReleaseAnalysis};
use rf_file::WavData;

const LCG_MUL: u32 = 1103515245;
const LCG_ADD: u32 = 12345;

#[inline]
fn next_rnd(state: &mut u32) -> u32 {
    *state = state.wrapping_mul(LCG_MUL).wrapping_add(LCG_ADD);
    *state
}

/// TPDF-family dither: sums `passes` independent `U(0,1)` draws from the
/// engine's LCG and recenters, an Irwin–Hall generalisation of the
/// standard 2-pass triangular dither to the 4-pass / 2-pass split the
/// quantiser uses for 16-bit vs. 12-bit output.
fn dither(state: &mut u32, passes: u32) -> f32 {
    let mut sum = 0.0f32;
    for _ in 0..passes {
        sum += (next_rnd(state) as f32) / (u32::MAX as f32);
    }
    sum - passes as f32 / 2.0
}

/// One released recording contributing to the release-alignment table. Its
/// `release_id` in the built pipe sample is its position in
/// [`PipeSpec::releases`], not anything carried in the WAV file itself.
pub struct ReleaseInput {
    pub wav: WavData,
}

/// Everything the pipeline needs to turn one pipe's raw captures into a
/// playable [`PipeSample`].
pub struct PipeSpec {
    pub attack: WavData,
    pub releases: Vec<ReleaseInput>,
    pub format: PackedFormat,
}

fn build_loops(wav: &WavData) -> (Vec<LoopStart>, Vec<LoopEnd>, usize) {
    if wav.markers.loops.is_empty() {
        return (Vec::new(), Vec::new(), wav.audio.num_frames());
    }

    // One start/end pair per loop marker, no start-value dedup: a start
    // shared by two markers with different ends (nested loops sharing an
    // anchor) must keep both ends reachable. `wav.markers.loops` is already
    // sorted ascending by `end`, so `ends[i].start_idx = i` already pairs
    // each end with its own start in final sorted order.
    let starts: Vec<LoopStart> = wav
        .markers
        .loops
        .iter()
        .map(|l| LoopStart { start_smpl: l.start, first_valid_end: 0 })
        .collect();
    let ends: Vec<LoopEnd> = wav
        .markers
        .loops
        .iter()
        .enumerate()
        .map(|(i, l)| LoopEnd { end_smpl: l.end, start_idx: i })
        .collect();

    // For each start, the smallest end index whose position is strictly
    // greater than the start's own position: scan the end-sorted `ends`
    // from the front, skipping every end that the start has already moved
    // past, so restarting from this start can stochastically land on any
    // loop (short or long) that hasn't already ended.
    let mut starts = starts;
    for start in &mut starts {
        let mut idx = 0;
        while ends[idx].end_smpl <= start.start_smpl {
            idx += 1;
        }
        start.first_valid_end = idx;
    }

    let attack_len = ends.last().map(|e| e.end_smpl as usize + 1).unwrap_or(wav.audio.num_frames());
    (starts, ends, attack_len)
}

/// Standard MIDI-note-to-Hz conversion, fractional cents included. Read as
/// "frequency in Hz equals 440 Hz times a power-of-two ratio from A4" rather
/// than the dimensionally inverted "sample_rate divided by that ratio" —
/// `sample_rate / frequency` elsewhere gives the pipe's fundamental period
/// in samples, which is what a frequency-in-Hz value is for in this
/// pipeline.
fn midi_to_frequency(note: u32, fraction: u32) -> f64 {
    let semis = note as f64 + fraction as f64 / u32::MAX as f64;
    440.0 * 2f64.powf((semis - 69.0) / 12.0)
}

fn build_prefilter_kernel() -> [f32; SMPL_INVERSE_FILTER_LEN] {
    // Designing the true inverse-interpolation equalisation curve is out of
    // scope (the original's analysis tool does this offline from measured
    // filter response); this boundary implementation substitutes a
    // symmetric windowed-sinc low-pass of the same tap count, which is the
    // right shape (zero-phase, unity DC gain, gentle rolloff) for the
    // prefilter's role in the pipeline even though its passband correction
    // is nominal rather than measured.
    let taps = SMPL_INVERSE_FILTER_LEN;
    let half = (taps - 1) as f64 / 2.0;
    let cutoff = 0.45;
    let mut kernel = [0.0f32; SMPL_INVERSE_FILTER_LEN];
    let mut sum = 0.0f64;
    for (k, coef) in kernel.iter_mut().enumerate() {
        let x = k as f64 - half;
        let sinc = if x.abs() < 1e-9 {
            2.0 * cutoff
        } else {
            (2.0 * std::f64::consts::PI * cutoff * x).sin() / (std::f64::consts::PI * x)
        };
        let n = (taps - 1) as f64;
        let w = 0.42 - 0.5 * (std::f64::consts::TAU * k as f64 / n).cos()
            + 0.08 * (2.0 * std::f64::consts::TAU * k as f64 / n).cos();
        let c = sinc * w;
        *coef = c as f32;
        sum += c;
    }
    if sum.abs() > 1e-9 {
        for c in kernel.iter_mut() {
            *c = (*c as f64 / sum) as f32;
        }
    }
    kernel
}

fn prefilter_looped(
    filter: &FirFilter,
    audio: &PlanarAudio,
    susp_start: usize,
) -> RfResult<PlanarAudio> {
    let pre_read = (filter.kern_len() - 1) / 2;
    let length = audio.num_frames();
    let mut out = PlanarAudio::new(audio.num_channels(), length, audio.sample_rate);
    for ch in 0..audio.num_channels() {
        filter.run(audio.channel(ch), out.channel_mut(ch), false, susp_start, length, pre_read, true)?;
    }
    Ok(out)
}

/// Filter linearly (no loop) and shift the result left by the symmetric
/// kernel's group delay plus `SMPL_INVERSE_FILTER_PRE_READ` extra samples,
/// so the returned buffer (length `out_len`) both cancels the filter's
/// phase delay and discards its pre-ringing, per spec §4.4 step 3.
fn prefilter_release(filter: &FirFilter, audio: &PlanarAudio, out_len: usize) -> RfResult<PlanarAudio> {
    let pre_read = (filter.kern_len() - 1) / 2 + SMPL_INVERSE_FILTER_PRE_READ;
    let mut out = PlanarAudio::new(audio.num_channels(), out_len, audio.sample_rate);
    for ch in 0..audio.num_channels() {
        filter.run(audio.channel(ch), out.channel_mut(ch), false, 0, out_len, pre_read, false)?;
    }
    Ok(out)
}

fn quantise(audio: &PlanarAudio, format: PackedFormat) -> (PackedAudio, Sample) {
    let channels = audio.num_channels();
    let frames = audio.num_frames();
    let maxv = audio
        .channels()
        .iter()
        .flat_map(|c| c.iter())
        .fold(0.0f32, |acc, &s| acc.max(s.abs()));
    let maxv = maxv.max(1e-9);

    let (target_max, passes) = match format {
        PackedFormat::I16 => (32767.0f32, 4u32),
        PackedFormat::I12 => (2047.0f32, 2u32),
    };
    let boost = target_max / maxv;

    let mut rng = 0x2545F491u32;
    let stride = match format {
        PackedFormat::I16 => 2 * channels,
        PackedFormat::I12 => 3,
    };
    let mut bytes = vec![0u8; frames * stride];

    for frame in 0..frames {
        let mut q = [0i32; 2];
        for ch in 0..channels.min(2) {
            let s = audio.channel(ch)[frame] * boost + dither(&mut rng, passes);
            q[ch] = s.round().clamp(-(target_max + 1.0), target_max) as i32;
        }
        match format {
            PackedFormat::I16 => {
                for ch in 0..channels {
                    let v = q[ch.min(1)] as i16;
                    let off = frame * stride + ch * 2;
                    bytes[off..off + 2].copy_from_slice(&v.to_le_bytes());
                }
            }
            PackedFormat::I12 => {
                let a = (q[0] as i32) & 0xFFF;
                let b = (q[1] as i32) & 0xFFF;
                let packed = ((a << 12) | b) as u32;
                let off = frame * stride;
                bytes[off..off + 3].copy_from_slice(&packed.to_le_bytes()[..3]);
            }
        }
    }

    (
        PackedAudio {
            format,
            channels,
            frames,
            bytes,
        },
        1.0 / boost,
    )
}

/// Append `RELEASE_SILENCE_TAIL` frames of silence to a quantised release
/// body, so it has somewhere to settle once it finishes decaying: a release
/// decoder loops the tail forever rather than needing the engine to track
/// "has this release finished" separately.
fn append_silence_tail(audio: PackedAudio) -> PackedAudio {
    let stride = audio.frame_stride();
    let mut bytes = audio.bytes;
    bytes.extend(std::iter::repeat(0u8).take(RELEASE_SILENCE_TAIL * stride));
    PackedAudio {
        format: audio.format,
        channels: audio.channels,
        frames: audio.frames + RELEASE_SILENCE_TAIL,
        bytes,
    }
}

/// Run the full preparation pipeline for one pipe sample.
pub fn prepare_pipe(spec: PipeSpec, facility: Arc<FftFacility>) -> RfResult<PipeSample> {
    let attack_wav = &spec.attack;
    let (starts, ends, attack_len) = build_loops(attack_wav);
    if starts.is_empty() {
        return Err(RfError::InvalidParam(
            "pipe sample has no loop; cannot build a sustain body".into(),
        ));
    }
    let sustain_anchor = starts[0].start_smpl as usize;

    let pitch = attack_wav
        .markers
        .pitch
        .ok_or_else(|| RfError::InvalidParam("pipe sample has no pitch info".into()))?;
    let frequency = midi_to_frequency(pitch.midi_note, pitch.midi_pitch_fraction);
    let period = ((attack_wav.sample_rate as f64 / frequency).round().max(1.0)) as usize;

    let kernel = build_prefilter_kernel();
    let max_block = attack_len.max(period * 4).max(1024);
    let mut attack_filter = FirFilter::new(facility.clone(), SMPL_INVERSE_FILTER_LEN, max_block)?;
    attack_filter.build_conv(&kernel, 1.0)?;

    let mut attack_audio = PlanarAudio::new(attack_wav.audio.num_channels(), attack_len, attack_wav.sample_rate);
    for ch in 0..attack_wav.audio.num_channels() {
        attack_audio.channel_mut(ch).copy_from_slice(&attack_wav.audio.channel(ch)[..attack_len]);
    }
    let attack_filtered = prefilter_looped(&attack_filter, &attack_audio, sustain_anchor)?;

    let window = (2 * period).max(1);
    let mut envelope = vec![0.0f32; attack_len];
    {
        let mut env_filter = FirFilter::new(facility.clone(), window, attack_len)?;
        env_filter.build_rect(window, 1.0)?;
        for ch in 0..attack_filtered.num_channels() {
            let squared: Vec<f32> = attack_filtered.channel(ch).iter().map(|s| s * s).collect();
            env_filter.run(&squared, &mut envelope, true, sustain_anchor, attack_len, 0, true)?;
        }
    }

    let mut release_bodies = Vec::new();
    let mut analyses: Vec<(u32, Vec<f32>, f32)> = Vec::new();
    for (idx, rel) in spec.releases.iter().enumerate() {
        let release_id = idx as u32;
        let rel_len = rel.wav.audio.num_frames().saturating_sub(SMPL_INVERSE_FILTER_PRE_READ).max(1);
        let mut rel_filter = FirFilter::new(facility.clone(), SMPL_INVERSE_FILTER_LEN, rel_len)?;
        rel_filter.build_conv(&kernel, 1.0)?;
        let rel_audio = prefilter_release(&rel_filter, &rel.wav.audio, rel_len)?;

        let mut corr = vec![0.0f32; attack_len];
        let mut rel_power = 0.0f32;
        {
            let mut xcorr_filter = FirFilter::new(facility.clone(), window, attack_len)?;
            for ch in 0..rel_audio.num_channels().min(attack_filtered.num_channels()) {
                let win = &rel_audio.channel(ch)[..window.min(rel_audio.num_frames())];
                rel_power += xcorr_filter.build_xcorr(win, 1.0)?;
                xcorr_filter.run(attack_filtered.channel(ch), &mut corr, true, sustain_anchor, attack_len, 0, true)?;
            }
        }
        analyses.push((release_id, corr, rel_power));

        let (packed, gain) = quantise(&rel_audio, spec.format);
        release_bodies.push((packed, gain));
    }

    let release_analyses: Vec<ReleaseAnalysis> = analyses
        .iter()
        .map(|(id, corr, rel_power)| ReleaseAnalysis {
            release_id: *id,
            corr,
            rel_power: *rel_power,
        })
        .collect();
    let reltable = build_release_table(&envelope, &release_analyses, period);

    let (attack_packed, attack_gain) = quantise(&attack_filtered, spec.format);

    let releases = release_bodies
        .into_iter()
        .map(|(data, gain)| {
            let decay_frames = data.frames;
            let data = append_silence_tail(data);
            SampleBody {
                gain,
                starts: vec![LoopStart { start_smpl: decay_frames as u64, first_valid_end: 0 }],
                ends: vec![LoopEnd { end_smpl: data.frames.saturating_sub(1) as u64, start_idx: 0 }],
                data,
            }
        })
        .collect();

    Ok(PipeSample {
        attack: SampleBody {
            gain: attack_gain,
            starts,
            ends,
            data: attack_packed,
        },
        releases,
        reltable,
        frequency,
        sample_rate: attack_wav.sample_rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;
    use rf_core::PlanarAudio as PA;

    /// Unpack one channel of an `I16` [`PackedAudio`] body back to floats,
    /// applying `gain` to recover the pre-quantisation amplitude, mirroring
    /// what a [`crate::Decoder`] does one frame at a time.
    fn decode_i16(audio: &PackedAudio, gain: Sample) -> Vec<f32> {
        assert_eq!(audio.format, PackedFormat::I16);
        let stride = audio.frame_stride();
        let mut out = Vec::with_capacity(audio.frames * audio.channels);
        for frame in 0..audio.frames {
            let off = frame * stride;
            for ch in 0..audio.channels {
                let o = off + ch * 2;
                let v = i16::from_le_bytes([audio.bytes[o], audio.bytes[o + 1]]);
                out.push(v as f32 * gain);
            }
        }
        out
    }

    fn silent_wav(frames: usize, loop_start: u64, loop_end: u64) -> WavData {
        let mut markers = rf_file::WavMarkers::default();
        markers.loops.push(rf_file::LoopMarker { start: loop_start, end: loop_end });
        markers.pitch = Some(rf_file::PitchInfo { midi_note: 69, midi_pitch_fraction: 0 });
        WavData {
            sample_rate: 48_000,
            channels: 2,
            bits_per_sample: 16,
            audio: PA::new(2, frames, 48_000),
            markers,
            warnings: rf_core::RfWarnings::default(),
        }
    }

    #[test]
    fn midi_a4_maps_near_440hz() {
        assert!((midi_to_frequency(69, 0) - 440.0).abs() < 1e-6);
    }

    #[test]
    fn prepare_pipe_with_no_releases_still_builds_attack_body() {
        let attack = silent_wav(2000, 500, 1900);
        let spec = PipeSpec { attack, releases: Vec::new(), format: PackedFormat::I16 };
        let facility = Arc::new(FftFacility::new());
        let pipe = prepare_pipe(spec, facility).unwrap();
        assert!(!pipe.attack.starts.is_empty());
        assert!(pipe.releases.is_empty());
        assert!(pipe.reltable.entries.is_empty());
    }

    #[test]
    fn prepare_pipe_with_two_releases_keeps_both_bodies() {
        let attack = silent_wav(2000, 500, 1900);
        let releases = vec![
            ReleaseInput { wav: silent_wav(400, 0, 399) },
            ReleaseInput { wav: silent_wav(400, 0, 399) },
        ];
        let spec = PipeSpec { attack, releases, format: PackedFormat::I16 };
        let facility = Arc::new(FftFacility::new());
        let pipe = prepare_pipe(spec, facility).unwrap();
        assert_eq!(pipe.releases.len(), 2);
        assert!(pipe.release(0).is_some());
        assert!(pipe.release(1).is_some());
        assert!(pipe.release(2).is_none());
    }

    #[test]
    fn dither_is_centered_and_bounded() {
        let mut state = 12345u32;
        let mut sum = 0.0f32;
        let n = 10_000;
        for _ in 0..n {
            let d = dither(&mut state, 4);
            assert!((-2.0..=2.0).contains(&d));
            sum += d;
        }
        assert!((sum / n as f32).abs() < 0.05);
    }

    #[test]
    fn quantise_round_trip_rms_error_is_within_full_scale_budget() {
        let frames = 48_000;
        let mut rng = ChaCha8Rng::seed_from_u64(0x6f72_6761_6e21);
        let mut audio = PA::new(1, frames, 48_000);
        for s in audio.channel_mut(0).iter_mut() {
            *s = rng.random_range(-0.5f32..=0.5);
        }

        let (packed, gain) = quantise(&audio, PackedFormat::I16);
        let decoded = decode_i16(&packed, gain);

        let mse: f64 = audio
            .channel(0)
            .iter()
            .zip(decoded.iter())
            .map(|(&orig, &rt)| {
                let err = (orig - rt) as f64;
                err * err
            })
            .sum::<f64>()
            / frames as f64;
        let rms = mse.sqrt();
        assert!(rms <= 2f64.powi(-13), "rms error {rms} exceeds 2^-13 full scale");
    }
}
