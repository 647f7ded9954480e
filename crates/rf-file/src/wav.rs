//! WAV ingest/export: the external-collaborator boundary described in the
//! engine's interface contract. Harvests exactly what the sample
//! preparation pipeline needs — PCM frames, loop markers, a release
//! marker, and pitch metadata — and nothing about mixing, playback, or the
//! sampler's own data model.

use std::collections::BTreeMap;

use rf_core::{PlanarAudio, RfError, RfResult, RfWarnings};

use crate::riff::{iter_chunks, open_riff_wave, u16_le, u32_le};

/// Four-character INFO tags the reader/writer round-trips as UTF-8 text.
/// Anything else is dropped on rewrite unless `preserve_unknown_chunks` is
/// set, in which case it's carried verbatim.
pub const SUPPORTED_INFO_TAGS: &[&str] = &[
    "IARL", "IART", "ICMS", "ICMT", "ICOP", "ICRD", "ICRP", "IDIM", "IDPI", "IENG", "IGNR", "IKEY",
    "ILGT", "IMED", "INAM", "IPLT", "IPRD", "ISBJ", "ISFT", "ISHP", "ISRC", "ISRF", "ITCH",
];

const PCM_SUBFORMAT_GUID_TAIL: [u8; 14] = [
    0x00, 0x00, 0x10, 0x00, 0x80, 0x00, 0x00, 0xAA, 0x00, 0x38, 0x9B, 0x71, 0x00, 0x00,
];

/// A sample-accurate loop region, `[start, end]` inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopMarker {
    pub start: u64,
    pub end: u64,
}

/// MIDI pitch as stored in the `smpl` chunk: a whole note plus a 32-bit
/// fixed-point fractional-cents offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PitchInfo {
    pub midi_note: u32,
    pub midi_pitch_fraction: u32,
}

/// Which loop source to trust when `smpl` and `cue`/`ltxt` disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPreference {
    PreferSmpl,
    PreferCueLtxt,
}

#[derive(Debug, Default)]
pub struct WavMarkers {
    /// Sorted ascending by `end`, deduplicated.
    pub loops: Vec<LoopMarker>,
    /// Position of the zero-length cue point used as the release trigger,
    /// if one was found.
    pub release_marker: Option<u64>,
    pub pitch: Option<PitchInfo>,
    pub info: BTreeMap<String, String>,
    /// Cue-point labels from `adtl`'s `labl`/`note` sub-chunks, by cue id.
    pub labels: BTreeMap<u32, String>,
    /// Raw bytes of unrecognised chunks, kept only when the caller asked
    /// to preserve them; tag is `"LIST:INFO:xxxx"` or the bare top-level id.
    pub preserved_unknown: Vec<(String, Vec<u8>)>,
}

pub struct WavData {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub audio: PlanarAudio,
    pub markers: WavMarkers,
    pub warnings: RfWarnings,
}

struct FmtChunk {
    format_tag: u16,
    channels: u16,
    sample_rate: u32,
    bits_per_sample: u16,
}

fn parse_fmt(data: &[u8]) -> RfResult<FmtChunk> {
    if data.len() < 16 {
        return Err(RfError::MalformedCue("fmt chunk too short".into()));
    }
    let mut format_tag = u16_le(data, 0);
    let channels = u16_le(data, 2);
    let sample_rate = u32_le(data, 4);
    let bits_per_sample = u16_le(data, 14);

    if format_tag == 0xFFFE {
        if data.len() < 40 {
            return Err(RfError::MalformedCue("extensible fmt chunk too short".into()));
        }
        let actual_tag = u16_le(data, 24);
        if data[26..40] != PCM_SUBFORMAT_GUID_TAIL {
            return Err(RfError::UnsupportedFormat(
                "extensible fmt subformat is not PCM".into(),
            ));
        }
        format_tag = actual_tag;
    }

    if format_tag != 1 {
        return Err(RfError::UnsupportedFormat(format!(
            "format tag {format_tag} is not PCM"
        )));
    }
    if bits_per_sample != 16 && bits_per_sample != 24 {
        return Err(RfError::UnsupportedFormat(format!(
            "{bits_per_sample}-bit PCM is not supported"
        )));
    }
    if channels != 1 && channels != 2 {
        return Err(RfError::UnsupportedFormat(format!(
            "{channels}-channel audio is not supported"
        )));
    }

    Ok(FmtChunk {
        format_tag,
        channels,
        sample_rate,
        bits_per_sample,
    })
}

fn deinterleave(data: &[u8], channels: u16, bits_per_sample: u16, sample_rate: u32) -> RfResult<PlanarAudio> {
    let bytes_per_sample = (bits_per_sample / 8) as usize;
    let frame_bytes = bytes_per_sample * channels as usize;
    if frame_bytes == 0 {
        return Err(RfError::InvalidParam("zero-byte audio frame".into()));
    }
    let num_frames = data.len() / frame_bytes;
    let mut planar = PlanarAudio::new(channels as usize, num_frames, sample_rate);

    for frame in 0..num_frames {
        let base = frame * frame_bytes;
        for ch in 0..channels as usize {
            let off = base + ch * bytes_per_sample;
            let sample = match bits_per_sample {
                16 => i16::from_le_bytes([data[off], data[off + 1]]) as f32 / 32768.0,
                24 => {
                    let b = [data[off], data[off + 1], data[off + 2], 0];
                    let raw = i32::from_le_bytes(b) << 8 >> 8;
                    raw as f32 / 8_388_608.0
                }
                _ => unreachable!(),
            };
            planar.channel_mut(ch)[frame] = sample;
        }
    }
    Ok(planar)
}

struct CuePoint {
    id: u32,
    position: u32,
}

fn parse_cue(data: &[u8]) -> RfResult<Vec<CuePoint>> {
    if data.len() < 4 {
        return Err(RfError::MalformedCue("cue chunk too short".into()));
    }
    let count = u32_le(data, 0) as usize;
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let off = 4 + i * 24;
        if off + 24 > data.len() {
            return Err(RfError::MalformedCue("cue point truncated".into()));
        }
        out.push(CuePoint {
            id: u32_le(data, off),
            position: u32_le(data, off + 20),
        });
    }
    Ok(out)
}

struct SmplChunk {
    midi_unity_note: u32,
    midi_pitch_fraction: u32,
    loops: Vec<(u32, u32, u32)>, // cue_id, start, end
}

fn parse_smpl(data: &[u8]) -> RfResult<SmplChunk> {
    if data.len() < 36 {
        return Err(RfError::MalformedSmpl("smpl chunk too short".into()));
    }
    let midi_unity_note = u32_le(data, 12);
    let midi_pitch_fraction = u32_le(data, 16);
    let num_loops = u32_le(data, 28) as usize;
    let mut loops = Vec::with_capacity(num_loops);
    for i in 0..num_loops {
        let off = 36 + i * 24;
        if off + 24 > data.len() {
            return Err(RfError::MalformedSmpl("smpl loop truncated".into()));
        }
        let cue_id = u32_le(data, off);
        let start = u32_le(data, off + 8);
        let end = u32_le(data, off + 12);
        loops.push((cue_id, start, end));
    }
    Ok(SmplChunk {
        midi_unity_note,
        midi_pitch_fraction,
        loops,
    })
}

struct AdtlData {
    ltxt: Vec<(u32, u32)>, // cue_id, sample_length
    labels: BTreeMap<u32, String>,
}

fn parse_adtl(data: &[u8]) -> RfResult<AdtlData> {
    let mut ltxt = Vec::new();
    let mut labels = BTreeMap::new();
    for chunk in iter_chunks(data) {
        let chunk = chunk?;
        match &chunk.id {
            b"ltxt" => {
                if chunk.data.len() < 8 {
                    return Err(RfError::MalformedAdtl("ltxt chunk too short".into()));
                }
                let cue_id = u32_le(chunk.data, 0);
                let sample_length = u32_le(chunk.data, 4);
                ltxt.push((cue_id, sample_length));
            }
            b"labl" | b"note" => {
                if chunk.data.len() < 4 {
                    return Err(RfError::MalformedAdtl("labl/note chunk too short".into()));
                }
                let cue_id = u32_le(chunk.data, 0);
                let text = cstr_trim(&chunk.data[4..]);
                labels.insert(cue_id, text);
            }
            _ => {}
        }
    }
    Ok(AdtlData { ltxt, labels })
}

fn cstr_trim(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

fn parse_info(data: &[u8], preserve_unknown: bool, warnings: &mut RfWarnings) -> RfResult<(BTreeMap<String, String>, Vec<(String, Vec<u8>)>)> {
    let mut info = BTreeMap::new();
    let mut preserved = Vec::new();
    for chunk in iter_chunks(data) {
        let chunk = chunk?;
        let tag = std::str::from_utf8(&chunk.id).unwrap_or("????").to_string();
        if SUPPORTED_INFO_TAGS.contains(&tag.as_str()) {
            info.insert(tag, cstr_trim(chunk.data));
        } else if preserve_unknown {
            preserved.push((format!("LIST:INFO:{tag}"), chunk.data.to_vec()));
        } else {
            log::warn!("dropping unsupported INFO tag {tag}");
            warnings.set(RfWarnings::UNKNOWN_CHUNK_DROPPED);
        }
    }
    Ok((info, preserved))
}

/// Parse a RIFF/WAVE byte buffer into PCM frames and sampler metadata.
pub fn read_wav(bytes: &[u8], loop_pref: Option<LoopPreference>, preserve_unknown_chunks: bool) -> RfResult<WavData> {
    let body = open_riff_wave(bytes)?;

    let mut fmt: Option<FmtChunk> = None;
    let mut data: Option<&[u8]> = None;
    let mut cue_points: Option<Vec<CuePoint>> = None;
    let mut smpl: Option<SmplChunk> = None;
    let mut adtl: Option<AdtlData> = None;
    let mut info: BTreeMap<String, String> = BTreeMap::new();
    let mut preserved_unknown = Vec::new();
    let mut warnings = RfWarnings::default();
    let mut truncated = false;

    for chunk in iter_chunks(body) {
        let chunk = match chunk {
            Ok(c) => c,
            Err(RfError::FileTruncated) => {
                truncated = true;
                break;
            }
            Err(e) => return Err(e),
        };
        match &chunk.id {
            b"fmt " => {
                if fmt.is_some() {
                    return Err(RfError::DuplicateRequiredChunk("fmt "));
                }
                fmt = Some(parse_fmt(chunk.data)?);
            }
            b"fact" => {}
            b"data" => {
                if data.is_some() {
                    return Err(RfError::DuplicateRequiredChunk("data"));
                }
                data = Some(chunk.data);
            }
            b"cue " => {
                cue_points = Some(parse_cue(chunk.data)?);
            }
            b"smpl" => {
                smpl = Some(parse_smpl(chunk.data)?);
            }
            b"LIST" => {
                if chunk.data.len() < 4 {
                    return Err(RfError::MalformedAdtl("LIST chunk too short".into()));
                }
                match &chunk.data[0..4] {
                    b"INFO" => {
                        let (i, p) = parse_info(&chunk.data[4..], preserve_unknown_chunks, &mut warnings)?;
                        info.extend(i);
                        preserved_unknown.extend(p);
                    }
                    b"adtl" => {
                        adtl = Some(parse_adtl(&chunk.data[4..])?);
                    }
                    _ => {
                        if preserve_unknown_chunks {
                            preserved_unknown.push(("LIST".to_string(), chunk.data.to_vec()));
                        } else {
                            log::warn!("dropping unrecognised LIST sub-list");
                            warnings.set(RfWarnings::UNKNOWN_CHUNK_DROPPED);
                        }
                    }
                }
            }
            other => {
                if preserve_unknown_chunks {
                    let tag = std::str::from_utf8(other).unwrap_or("????").to_string();
                    preserved_unknown.push((tag, chunk.data.to_vec()));
                } else {
                    log::warn!(
                        "dropping unrecognised chunk {:?}",
                        std::str::from_utf8(other).unwrap_or("????")
                    );
                    warnings.set(RfWarnings::UNKNOWN_CHUNK_DROPPED);
                }
            }
        }
    }
    if truncated {
        log::warn!("WAV file ended mid-chunk, continuing with what was read");
        warnings.set(RfWarnings::FILE_TRUNCATED);
    }

    let fmt = fmt.ok_or(RfError::MalformedCue("missing fmt chunk".into()))?;
    let data = data.ok_or(RfError::MalformedCue("missing data chunk".into()))?;
    let audio = deinterleave(data, fmt.channels, fmt.bits_per_sample, fmt.sample_rate)?;
    let num_frames = audio.num_frames() as u64;

    let cue_loops: Vec<LoopMarker> = match (&cue_points, &adtl) {
        (Some(cues), Some(adtl)) => adtl
            .ltxt
            .iter()
            .filter_map(|&(cue_id, sample_length)| {
                cues.iter()
                    .find(|c| c.id == cue_id)
                    .map(|c| LoopMarker {
                        start: c.position as u64,
                        end: c.position as u64 + sample_length as u64,
                    })
            })
            .collect(),
        _ => Vec::new(),
    };

    let smpl_loops: Vec<LoopMarker> = smpl
        .as_ref()
        .map(|s| {
            s.loops
                .iter()
                .map(|&(_, start, end)| LoopMarker {
                    start: start as u64,
                    end: end as u64,
                })
                .collect()
        })
        .unwrap_or_default();

    let mut loops = if !cue_loops.is_empty() && !smpl_loops.is_empty() {
        let mut a = cue_loops.clone();
        let mut b = smpl_loops.clone();
        a.sort_by_key(|l| (l.start, l.end));
        b.sort_by_key(|l| (l.start, l.end));
        if a == b {
            a
        } else {
            match loop_pref {
                Some(LoopPreference::PreferSmpl) => smpl_loops,
                Some(LoopPreference::PreferCueLtxt) => cue_loops,
                None => return Err(RfError::ConflictingLoops),
            }
        }
    } else if !cue_loops.is_empty() {
        cue_loops
    } else {
        smpl_loops
    };

    for l in &loops {
        if l.start > l.end || l.end >= num_frames {
            return Err(RfError::MalformedCue(format!(
                "loop [{}, {}] out of range for {num_frames} frames",
                l.start, l.end
            )));
        }
    }
    loops.sort_by_key(|l| (l.end, l.start));
    loops.dedup();
    if loops.len() > rf_core::MAX_LOOP {
        return Err(RfError::TooManyMarkers(rf_core::MAX_LOOP));
    }

    let attack_len = loops.last().map(|l| l.end + 1).unwrap_or(num_frames);

    let release_marker = cue_points.as_ref().and_then(|cues| {
        let ltxt_ids: std::collections::HashSet<u32> = adtl
            .as_ref()
            .map(|a| a.ltxt.iter().map(|&(id, _)| id).collect())
            .unwrap_or_default();
        cues.iter()
            .filter(|c| !ltxt_ids.contains(&c.id) && c.position as u64 >= attack_len)
            .map(|c| c.position as u64)
            .max()
    });

    let pitch = smpl.as_ref().map(|s| PitchInfo {
        midi_note: s.midi_unity_note,
        midi_pitch_fraction: s.midi_pitch_fraction,
    });
    if pitch.is_some() && loops.is_empty() {
        warnings.set(RfWarnings::SMPL_PITCH_WITHOUT_LOOP);
    }

    let labels = adtl.map(|a| a.labels).unwrap_or_default();

    Ok(WavData {
        sample_rate: fmt.sample_rate,
        channels: fmt.channels,
        bits_per_sample: fmt.bits_per_sample,
        audio,
        markers: WavMarkers {
            loops,
            release_marker,
            pitch,
            info,
            labels,
            preserved_unknown,
        },
        warnings,
    })
}

fn push_chunk(out: &mut Vec<u8>, id: &[u8; 4], data: &[u8]) {
    out.extend_from_slice(id);
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(data);
    if data.len() % 2 == 1 {
        out.push(0);
    }
}

fn cstr_pad(s: &str) -> Vec<u8> {
    let mut v = s.as_bytes().to_vec();
    v.push(0);
    v
}

/// Serialize `data` back into a RIFF/WAVE byte buffer. Loop information is
/// written both as `cue`/`adtl:ltxt` and as `smpl` loops so that a
/// subsequent read never observes a conflict between the two sources.
pub fn write_wav(data: &WavData, preserve_unknown_chunks: bool) -> RfResult<Vec<u8>> {
    let channels = data.channels;
    let bits_per_sample = data.bits_per_sample;
    let bytes_per_sample = (bits_per_sample / 8) as usize;
    let num_frames = data.audio.num_frames();

    let mut fmt = Vec::with_capacity(16);
    fmt.extend_from_slice(&1u16.to_le_bytes()); // PCM
    fmt.extend_from_slice(&channels.to_le_bytes());
    fmt.extend_from_slice(&data.sample_rate.to_le_bytes());
    let byte_rate = data.sample_rate * channels as u32 * bytes_per_sample as u32;
    fmt.extend_from_slice(&byte_rate.to_le_bytes());
    let block_align = channels * bytes_per_sample as u16;
    fmt.extend_from_slice(&block_align.to_le_bytes());
    fmt.extend_from_slice(&bits_per_sample.to_le_bytes());

    let mut pcm = Vec::with_capacity(num_frames * channels as usize * bytes_per_sample);
    for frame in 0..num_frames {
        for ch in 0..channels as usize {
            let sample = data.audio.channel(ch)[frame];
            match bits_per_sample {
                16 => {
                    let v = (sample.clamp(-1.0, 1.0) * 32767.0).round() as i16;
                    pcm.extend_from_slice(&v.to_le_bytes());
                }
                24 => {
                    let v = (sample.clamp(-1.0, 1.0) * 8_388_607.0).round() as i32;
                    pcm.extend_from_slice(&v.to_le_bytes()[0..3]);
                }
                _ => unreachable!(),
            }
        }
    }

    let mut cue = Vec::new();
    cue.extend_from_slice(&(data.markers.loops.len() as u32 + data.markers.release_marker.is_some() as u32).to_le_bytes());
    let mut ltxt_entries = Vec::new();
    for (i, l) in data.markers.loops.iter().enumerate() {
        let id = i as u32;
        cue.extend_from_slice(&id.to_le_bytes());
        cue.extend_from_slice(&(l.start as u32).to_le_bytes());
        cue.extend_from_slice(b"data");
        cue.extend_from_slice(&0u32.to_le_bytes());
        cue.extend_from_slice(&0u32.to_le_bytes());
        cue.extend_from_slice(&(l.start as u32).to_le_bytes());
        ltxt_entries.push((id, (l.end - l.start) as u32));
    }
    if let Some(rel) = data.markers.release_marker {
        let id = data.markers.loops.len() as u32;
        cue.extend_from_slice(&id.to_le_bytes());
        cue.extend_from_slice(&(rel as u32).to_le_bytes());
        cue.extend_from_slice(b"data");
        cue.extend_from_slice(&0u32.to_le_bytes());
        cue.extend_from_slice(&0u32.to_le_bytes());
        cue.extend_from_slice(&(rel as u32).to_le_bytes());
    }

    let mut adtl = Vec::new();
    adtl.extend_from_slice(b"adtl");
    for (id, sample_length) in &ltxt_entries {
        let mut ltxt = Vec::new();
        ltxt.extend_from_slice(&id.to_le_bytes());
        ltxt.extend_from_slice(&sample_length.to_le_bytes());
        ltxt.extend_from_slice(&0u32.to_le_bytes()); // purpose id
        ltxt.extend_from_slice(&0u16.to_le_bytes()); // country
        ltxt.extend_from_slice(&0u16.to_le_bytes()); // language
        ltxt.extend_from_slice(&0u16.to_le_bytes()); // dialect
        ltxt.extend_from_slice(&0u16.to_le_bytes()); // codepage
        push_chunk(&mut adtl, b"ltxt", &ltxt);
    }
    for (id, text) in &data.markers.labels {
        let mut labl = Vec::new();
        labl.extend_from_slice(&id.to_le_bytes());
        labl.extend_from_slice(&cstr_pad(text));
        push_chunk(&mut adtl, b"labl", &labl);
    }

    let mut smpl = Vec::new();
    if let Some(pitch) = data.markers.pitch {
        smpl.extend_from_slice(&0u32.to_le_bytes()); // manufacturer
        smpl.extend_from_slice(&0u32.to_le_bytes()); // product
        smpl.extend_from_slice(&0u32.to_le_bytes()); // sample period
        smpl.extend_from_slice(&pitch.midi_note.to_le_bytes());
        smpl.extend_from_slice(&pitch.midi_pitch_fraction.to_le_bytes());
        smpl.extend_from_slice(&0u32.to_le_bytes()); // smpte format
        smpl.extend_from_slice(&0u32.to_le_bytes()); // smpte offset
        smpl.extend_from_slice(&(data.markers.loops.len() as u32).to_le_bytes());
        smpl.extend_from_slice(&0u32.to_le_bytes()); // sampler data
        for (i, l) in data.markers.loops.iter().enumerate() {
            smpl.extend_from_slice(&(i as u32).to_le_bytes());
            smpl.extend_from_slice(&0u32.to_le_bytes()); // loop type: forward
            smpl.extend_from_slice(&(l.start as u32).to_le_bytes());
            smpl.extend_from_slice(&(l.end as u32).to_le_bytes());
            smpl.extend_from_slice(&0u32.to_le_bytes()); // fraction
            smpl.extend_from_slice(&0u32.to_le_bytes()); // play count (infinite)
        }
    }

    let mut info = Vec::new();
    info.extend_from_slice(b"INFO");
    for (tag, value) in &data.markers.info {
        if tag.len() == 4 {
            let mut id = [0u8; 4];
            id.copy_from_slice(tag.as_bytes());
            push_chunk(&mut info, &id, &cstr_pad(value));
        }
    }
    if preserve_unknown_chunks {
        for (tag, bytes) in &data.markers.preserved_unknown {
            if let Some(stripped) = tag.strip_prefix("LIST:INFO:") {
                if stripped.len() == 4 {
                    let mut id = [0u8; 4];
                    id.copy_from_slice(stripped.as_bytes());
                    push_chunk(&mut info, &id, bytes);
                }
            }
        }
    }

    let mut out = Vec::new();
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&0u32.to_le_bytes()); // filled in below
    out.extend_from_slice(b"WAVE");
    push_chunk(&mut out, b"fmt ", &fmt);
    push_chunk(&mut out, b"data", &pcm);
    if !cue.is_empty() {
        push_chunk(&mut out, b"cue ", &cue);
    }
    if adtl.len() > 4 {
        push_chunk(&mut out, b"LIST", &adtl);
    }
    if !smpl.is_empty() {
        push_chunk(&mut out, b"smpl", &smpl);
    }
    if info.len() > 4 {
        push_chunk(&mut out, b"LIST", &info);
    }
    if preserve_unknown_chunks {
        for (tag, bytes) in &data.markers.preserved_unknown {
            if tag == "LIST" || tag.starts_with("LIST:INFO:") {
                continue;
            }
            if tag.len() == 4 {
                let mut id = [0u8; 4];
                id.copy_from_slice(tag.as_bytes());
                push_chunk(&mut out, &id, bytes);
            }
        }
    }

    let total_len = (out.len() - 8) as u32;
    out[4..8].copy_from_slice(&total_len.to_le_bytes());

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rf_core::PlanarAudio;

    fn make_wav(sample_rate: u32, frames: usize) -> WavData {
        let mut audio = PlanarAudio::new(2, frames, sample_rate);
        for f in 0..frames {
            let v = ((f % 100) as f32 / 100.0) - 0.5;
            audio.channel_mut(0)[f] = v;
            audio.channel_mut(1)[f] = -v;
        }
        WavData {
            sample_rate,
            channels: 2,
            bits_per_sample: 16,
            audio,
            markers: WavMarkers {
                loops: vec![LoopMarker { start: 100, end: 4999 }],
                release_marker: Some(5100),
                pitch: Some(PitchInfo {
                    midi_note: 60,
                    midi_pitch_fraction: 0,
                }),
                info: BTreeMap::from([("INAM".to_string(), "Test Pipe".to_string())]),
                labels: BTreeMap::new(),
                preserved_unknown: Vec::new(),
            },
            warnings: RfWarnings::default(),
        }
    }

    #[test]
    fn round_trip_preserves_format_loops_and_pitch() {
        let original = make_wav(48_000, 6000);
        let bytes = write_wav(&original, false).unwrap();
        let read_back = read_wav(&bytes, None, false).unwrap();

        assert_eq!(read_back.sample_rate, 48_000);
        assert_eq!(read_back.channels, 2);
        assert_eq!(read_back.markers.loops, original.markers.loops);
        assert_eq!(read_back.markers.release_marker, original.markers.release_marker);
        assert_eq!(read_back.markers.pitch, original.markers.pitch);
        assert_eq!(read_back.markers.info.get("INAM"), Some(&"Test Pipe".to_string()));
    }

    #[test]
    fn rejects_non_wave_header() {
        let err = read_wav(b"not a riff file at all", None, false).unwrap_err();
        assert!(matches!(err, RfError::NotAWave));
    }

    #[test]
    fn loop_out_of_range_is_malformed() {
        let mut data = make_wav(48_000, 200);
        data.markers.loops = vec![LoopMarker { start: 0, end: 500 }];
        let bytes = write_wav(&data, false).unwrap();
        let err = read_wav(&bytes, None, false).unwrap_err();
        assert!(matches!(err, RfError::MalformedCue(_)));
    }
}
