//! Release-alignment table construction.
//!
//! Builds the piecewise-linear map from an attack/sustain playback position
//! to a release recording's entry offset (plus an alignment gain), given an
//! envelope of the attack/sustain body and a cross-correlation of each
//! candidate release's prefix against it. See [`rf_core::ReleaseTable`] for
//! the runtime lookup side.

use rf_core::{ReleaseTable, ReleaseTableEntry};

/// Per-release inputs to the table builder: a cross-correlation of the
/// release prefix against the attack/sustain envelope, and the release
/// prefix's total power.
pub struct ReleaseAnalysis<'a> {
    pub release_id: u32,
    pub corr: &'a [f32],
    pub rel_power: f32,
}

const MAX_ENTRIES: usize = rf_core::RELTABLE_MAX_ENTRIES;
const SPLIT_EXCESS_THRESHOLD: f64 = 0.3;

struct Candidate {
    position: u64,
    release_id: u32,
    gain: f32,
}

struct LeafNode {
    start_idx: usize,
    end_idx: usize,
    m: f64,
    b: f64,
    ideal_error: f64,
    actual_error: f64,
}

fn combined_mse(envelope: &[f32], releases: &[ReleaseAnalysis]) -> (Vec<f32>, Vec<u32>) {
    let n = envelope.len();
    let mut mse = vec![f32::INFINITY; n];
    let mut winner = vec![0u32; n];
    for rel in releases {
        for i in 0..n {
            let corr_i = rel.corr.get(i).copied().unwrap_or(0.0);
            let candidate = (rel.rel_power + envelope[i] - 2.0 * corr_i).max(0.0).sqrt();
            if candidate < mse[i] {
                mse[i] = candidate;
                winner[i] = rel.release_id;
            }
        }
    }
    (mse, winner)
}

fn local_min_index(mse: &[f32], center: isize, half_window: isize) -> usize {
    let lo = (center - half_window).max(0) as usize;
    let hi = ((center + half_window).max(0) as usize).min(mse.len() - 1);
    let mut best = lo;
    for i in lo..=hi {
        if mse[i] < mse[best] {
            best = i;
        }
    }
    best
}

/// Walk outward from the global error minimum collecting the local-minimum
/// position once per roughly-one-period stride, per spec §4.3 step 3.
fn collect_candidate_positions(mse: &[f32], period: usize) -> Vec<usize> {
    let n = mse.len();
    if n == 0 {
        return Vec::new();
    }
    let mut errpos = 0usize;
    for i in 1..n {
        if mse[i] < mse[errpos] {
            errpos = i;
        }
    }

    let lf = 2 * (period / 15).max(1);
    let skip = (period as isize - lf as isize / 2).max(1) as usize;

    let mut positions = vec![errpos];

    let mut cur = errpos;
    loop {
        if cur < skip {
            break;
        }
        let probe = (cur - skip) as isize;
        let found = local_min_index(mse, probe, lf as isize / 2);
        if found == cur {
            break;
        }
        positions.push(found);
        cur = found;
        if cur == 0 {
            break;
        }
    }

    let mut cur = errpos;
    loop {
        let probe = cur + skip;
        if probe >= n {
            break;
        }
        let found = local_min_index(mse, probe as isize, lf as isize / 2);
        if found == cur {
            break;
        }
        positions.push(found);
        cur = found;
        if cur >= n - 1 {
            break;
        }
    }

    positions.sort_unstable();
    positions.dedup();
    positions
}

/// Least-squares fit of `position[i] = b + m * i` over `start..=end`.
fn fit_line(candidates: &[Candidate], start: usize, end: usize) -> (f64, f64) {
    let count = end - start + 1;
    if count == 1 {
        return (0.0, candidates[start].position as f64);
    }
    let n = count as f64;
    let mut sum_i = 0.0;
    let mut sum_x = 0.0;
    let mut sum_ii = 0.0;
    let mut sum_ix = 0.0;
    for (local_i, cand) in candidates[start..=end].iter().enumerate() {
        let i = local_i as f64;
        let x = cand.position as f64;
        sum_i += i;
        sum_x += x;
        sum_ii += i * i;
        sum_ix += i * x;
    }
    let denom = n * sum_ii - sum_i * sum_i;
    let m = if denom.abs() < 1e-12 {
        0.0
    } else {
        (n * sum_ix - sum_i * sum_x) / denom
    };
    let b = (sum_x - m * sum_i) / n;
    (m, b)
}

/// Look up `mse` at a possibly fractional position via linear interpolation,
/// clamped to the array bounds.
fn mse_at(mse: &[f32], pos: f64) -> f64 {
    if mse.is_empty() {
        return 0.0;
    }
    let pos = pos.clamp(0.0, (mse.len() - 1) as f64);
    let lo = pos.floor() as usize;
    let hi = (lo + 1).min(mse.len() - 1);
    let frac = pos - lo as f64;
    (mse[lo] as f64) * (1.0 - frac) + (mse[hi] as f64) * frac
}

fn node_errors(mse: &[f32], candidates: &[Candidate], start: usize, end: usize, m: f64, b: f64) -> (f64, f64) {
    let mut ideal = 0.0;
    let mut actual = 0.0;
    for (local_i, cand) in candidates[start..=end].iter().enumerate() {
        ideal += mse[cand.position as usize] as f64;
        let approx_pos = b + m * local_i as f64;
        actual += mse_at(mse, approx_pos);
    }
    (ideal, actual)
}

fn make_leaf(mse: &[f32], candidates: &[Candidate], start: usize, end: usize) -> LeafNode {
    let (m, b) = fit_line(candidates, start, end);
    let (ideal_error, actual_error) = node_errors(mse, candidates, start, end, m, b);
    LeafNode {
        start_idx: start,
        end_idx: end,
        m,
        b,
        ideal_error,
        actual_error,
    }
}

/// Build a release-alignment table from an attack/sustain envelope and one
/// or more candidate releases' cross-correlation analyses, per spec §4.3.
///
/// `period` is the pipe's fundamental period in samples, used to size the
/// local-minimum search window and stride during candidate collection.
pub fn build(envelope: &[f32], releases: &[ReleaseAnalysis], period: usize) -> ReleaseTable {
    if envelope.is_empty() || releases.is_empty() {
        return ReleaseTable::default();
    }

    let (mse, winner) = combined_mse(envelope, releases);
    let positions = collect_candidate_positions(&mse, period.max(1));

    let rel_power_by_id: std::collections::HashMap<u32, f32> =
        releases.iter().map(|r| (r.release_id, r.rel_power)).collect();
    let corr_by_id: std::collections::HashMap<u32, &[f32]> =
        releases.iter().map(|r| (r.release_id, r.corr)).collect();

    let candidates: Vec<Candidate> = positions
        .iter()
        .map(|&pos| {
            let release_id = winner[pos];
            let rel_power = rel_power_by_id.get(&release_id).copied().unwrap_or(1.0).max(1e-9);
            let corr = corr_by_id
                .get(&release_id)
                .and_then(|c| c.get(pos))
                .copied()
                .unwrap_or(0.0);
            Candidate {
                position: pos as u64,
                release_id,
                gain: corr / rel_power,
            }
        })
        .collect();

    let mut leaves = vec![make_leaf(&mse, &candidates, 0, candidates.len() - 1)];

    loop {
        if leaves.len() >= MAX_ENTRIES {
            break;
        }
        let worst = leaves
            .iter()
            .enumerate()
            .filter(|(_, leaf)| leaf.end_idx > leaf.start_idx)
            .max_by(|(_, a), (_, b)| {
                (a.actual_error - a.ideal_error)
                    .partial_cmp(&(b.actual_error - b.ideal_error))
                    .unwrap_or(std::cmp::Ordering::Equal)
            });

        let Some((worst_idx, _)) = worst else { break };
        let excess = leaves[worst_idx].actual_error - leaves[worst_idx].ideal_error;
        if excess < SPLIT_EXCESS_THRESHOLD {
            break;
        }

        let node = &leaves[worst_idx];
        let (start, end, m, b) = (node.start_idx, node.end_idx, node.m, node.b);
        let threshold = node.actual_error / 2.0;

        let mut cumulative = 0.0;
        let mut split_at = end;
        for (local_i, cand) in candidates[start..=end].iter().enumerate() {
            let idx = start + local_i;
            let approx_pos = b + m * local_i as f64;
            cumulative += mse_at(&mse, approx_pos);
            let _ = cand;
            if cumulative >= threshold {
                split_at = idx;
                break;
            }
        }
        // The triggering index only stays in the left node when it was the
        // segment's very first candidate; otherwise the left node stops one
        // short of it and the right node starts there.
        let (stop1, start2) = if split_at == start { (start, start + 1) } else { (split_at - 1, split_at) };
        let start2 = start2.min(end);
        if start2 > end {
            break;
        }

        let left = make_leaf(&mse, &candidates, start, stop1);
        let right = make_leaf(&mse, &candidates, start2, end);

        leaves.remove(worst_idx);
        leaves.insert(worst_idx, right);
        leaves.insert(worst_idx, left);
    }

    leaves.sort_by_key(|leaf| leaf.start_idx);

    let mut entries = Vec::with_capacity(leaves.len());
    for leaf in &leaves {
        let span = &candidates[leaf.start_idx..=leaf.end_idx];
        let first_position = span[0].position as f64;

        let mut b = leaf.b;
        if leaf.m.abs() > 1e-9 {
            while b > first_position {
                b -= leaf.m;
            }
        } else {
            b = b.min(first_position);
        }

        let gain = span.iter().map(|c| c.gain).fold(f32::MIN, f32::max);

        // Majority winner release within this leaf's span.
        let mut counts: std::collections::HashMap<u32, usize> = std::collections::HashMap::new();
        for c in span {
            *counts.entry(c.release_id).or_insert(0) += 1;
        }
        let release_id = counts
            .into_iter()
            .max_by_key(|&(_, count)| count)
            .map(|(id, _)| id)
            .unwrap_or(0);

        let node_len = (leaf.end_idx - leaf.start_idx + 1) as f64;
        entries.push(ReleaseTableEntry {
            last_sample: span.last().unwrap().position,
            release_id,
            m: leaf.m,
            b,
            gain,
            avgerr: (leaf.ideal_error / node_len) as f32,
        });
    }

    ReleaseTable { entries }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A synthetic pipe: constant envelope, release identical to the
    /// sustain waveform, so alignment gain should be unity everywhere and
    /// the returned offset periodic with the fundamental period.
    #[test]
    fn constant_envelope_identical_release_has_unity_gain() {
        let period = 64usize;
        let n = period * 20;
        let envelope = vec![1.0f32; n];
        // corr[i] models a release that perfectly matches the sustain
        // waveform's energy at every position: corr = rel_power everywhere.
        let rel_power = 1.0f32;
        let corr = vec![rel_power; n];
        let releases = [ReleaseAnalysis {
            release_id: 0,
            corr: &corr,
            rel_power,
        }];

        let table = build(&envelope, &releases, period);
        assert!(!table.entries.is_empty());

        for probe in [0u64, period as u64, (period * 5) as u64, (n - 1) as u64] {
            let (release_id, offset, gain) = table.find(probe).unwrap();
            assert_eq!(release_id, 0);
            assert!(offset >= 0.0);
            assert!((gain - 1.0).abs() < 1e-2, "gain {gain} at probe {probe}");
        }
    }

    #[test]
    fn empty_inputs_produce_empty_table() {
        let table = build(&[], &[], 64);
        assert!(table.entries.is_empty());
    }

    #[test]
    fn table_never_exceeds_max_entries() {
        let period = 8usize;
        let n = period * 400;
        let envelope: Vec<f32> = (0..n).map(|i| (i % 37) as f32 * 0.01).collect();
        let corr: Vec<f32> = (0..n).map(|i| ((i * 3) % 29) as f32 * 0.01).collect();
        let releases = [ReleaseAnalysis {
            release_id: 0,
            corr: &corr,
            rel_power: 5.0,
        }];
        let table = build(&envelope, &releases, period);
        assert!(table.entries.len() <= rf_core::RELTABLE_MAX_ENTRIES);
    }
}
