//! Shared FFT / convolution facility.
//!
//! Both the FIR filter runner ([`crate::firfilter`]) and the release-alignment
//! builder ([`crate::reltable`]) need a real-input forward DFT, its inverse,
//! and a combined multiply-then-inverse step for one partition of overlap-add
//! convolution. This module owns that: a plan cache keyed by transform
//! length, built on top of `realfft`/`rustfft`.
//!
//! Plans are immutable once built and may be shared across threads for read;
//! `FftFacility::get_real_conv` serializes creation behind a mutex so two
//! callers racing to build the same length both observe one cached plan.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex;

use rf_core::{RfError, RfResult};

/// An immutable forward/inverse plan pair for one transform length.
pub struct FftPlan {
    length: usize,
    fwd: Arc<dyn RealToComplex<f32>>,
    inv: Arc<dyn ComplexToReal<f32>>,
}

impl FftPlan {
    #[inline]
    pub fn length(&self) -> usize {
        self.length
    }

    /// Number of complex bins a spectrum buffer for this plan holds.
    #[inline]
    pub fn spectrum_len(&self) -> usize {
        self.length / 2 + 1
    }
}

/// A frequency-domain kernel built by [`FftFacility::build_kernel`], ready to
/// be passed to [`FftFacility::execute_conv`].
#[derive(Clone)]
pub struct RealConvKernel {
    length: usize,
    spectrum: Vec<Complex<f32>>,
}

impl RealConvKernel {
    #[inline]
    pub fn length(&self) -> usize {
        self.length
    }
}

/// Cache of FFT plans keyed by transform length. One facility is normally
/// shared by an entire sample-preparation run, or owned by the playback
/// engine for the lifetime of the process.
pub struct FftFacility {
    planner: Mutex<RealFftPlanner<f32>>,
    cache: Mutex<HashMap<usize, Arc<FftPlan>>>,
}

impl Default for FftFacility {
    fn default() -> Self {
        Self::new()
    }
}

impl FftFacility {
    pub fn new() -> Self {
        Self {
            planner: Mutex::new(RealFftPlanner::new()),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Recommend a transform length for a kernel of `kernel_len` taps
    /// convolved against blocks of at most `max_block_len` samples: the
    /// smallest multiple of 32 no less than `kernel_len + max_block_len - 1`.
    pub fn recommend_length(kernel_len: usize, max_block_len: usize) -> usize {
        let min_len = (kernel_len + max_block_len).saturating_sub(1).max(1);
        min_len.div_ceil(32) * 32
    }

    /// Fetch (building and caching if necessary) the plan for transform
    /// length `n`. Idempotent: a second call with the same `n` returns the
    /// same cached [`FftPlan`].
    pub fn get_real_conv(&self, n: usize) -> RfResult<Arc<FftPlan>> {
        if n == 0 || n % 2 != 0 {
            return Err(RfError::InvalidParam(format!(
                "fft length must be a nonzero even number, got {n}"
            )));
        }
        if let Some(plan) = self.cache.lock().unwrap().get(&n) {
            return Ok(plan.clone());
        }
        let mut planner = self.planner.lock().unwrap();
        let fwd = planner.plan_fft_forward(n);
        let inv = planner.plan_fft_inverse(n);
        drop(planner);
        let plan = Arc::new(FftPlan {
            length: n,
            fwd,
            inv,
        });
        self.cache.lock().unwrap().insert(n, plan.clone());
        Ok(plan)
    }

    /// Forward transform: `input` must hold `plan.length()` real samples
    /// (zero-padded by the caller as needed). Returns `plan.spectrum_len()`
    /// complex bins in natural frequency order.
    pub fn execute_fwd(&self, plan: &FftPlan, input: &[f32]) -> RfResult<Vec<Complex<f32>>> {
        let mut scratch = input.to_vec();
        scratch.resize(plan.length, 0.0);
        let mut out = vec![Complex::new(0.0, 0.0); plan.spectrum_len()];
        plan.fwd
            .process(&mut scratch, &mut out)
            .map_err(|_| RfError::OutOfMemory)?;
        Ok(out)
    }

    /// Same as [`Self::execute_fwd`] but writes into a caller-supplied
    /// spectrum buffer, avoiding an allocation on the hot path.
    pub fn execute_fwd_reord(
        &self,
        plan: &FftPlan,
        input: &[f32],
        out: &mut [Complex<f32>],
        scratch: &mut [f32],
    ) -> RfResult<()> {
        debug_assert_eq!(scratch.len(), plan.length);
        debug_assert_eq!(out.len(), plan.spectrum_len());
        scratch[..input.len().min(plan.length)].copy_from_slice(&input[..input.len().min(plan.length)]);
        if input.len() < plan.length {
            scratch[input.len()..].fill(0.0);
        }
        plan.fwd
            .process(scratch, out)
            .map_err(|_| RfError::OutOfMemory)
    }

    /// Inverse transform of a complex spectrum into `plan.length()` real
    /// samples. `spectrum` is consumed (realfft's inverse transform
    /// overwrites its input as scratch space). The result is normalised by
    /// `1/N`; callers that pre-scaled their kernel by `2/N` when building it
    /// (see [`Self::build_kernel`]) should not rescale again.
    pub fn execute_rev_reord(
        &self,
        plan: &FftPlan,
        spectrum: &mut [Complex<f32>],
    ) -> RfResult<Vec<f32>> {
        debug_assert_eq!(spectrum.len(), plan.spectrum_len());
        let mut out = vec![0.0f32; plan.length];
        plan.inv
            .process(spectrum, &mut out)
            .map_err(|_| RfError::OutOfMemory)?;
        let norm = 1.0 / plan.length as f32;
        for s in &mut out {
            *s *= norm;
        }
        Ok(out)
    }

    /// Combined multiply-and-inverse: forward transform `input`, multiply
    /// pointwise with `kernel`'s spectrum, and inverse-transform the result.
    /// This is one partition of overlap-add convolution; the caller is
    /// responsible for summing the `plan.length()`-sample result into its
    /// output at the right offset.
    pub fn execute_conv(
        &self,
        plan: &FftPlan,
        input: &[f32],
        kernel: &RealConvKernel,
    ) -> RfResult<Vec<f32>> {
        debug_assert_eq!(kernel.length, plan.length);
        let mut spectrum = self.execute_fwd(plan, input)?;
        for (s, k) in spectrum.iter_mut().zip(&kernel.spectrum) {
            *s *= k;
        }
        self.execute_rev_reord(plan, &mut spectrum)
    }

    /// Build a frequency-domain kernel from a time-domain buffer (already
    /// zero-padded or truncated to the caller's taste up to `plan.length()`
    /// samples), pre-scaling by `2/N` so that [`Self::execute_conv`]'s
    /// inverse transform needs no further normalisation beyond its own
    /// `1/N`.
    pub fn build_kernel(&self, plan: &FftPlan, time_domain: &[f32]) -> RfResult<RealConvKernel> {
        let scale = 2.0 / plan.length as f32;
        let mut padded = vec![0.0f32; plan.length];
        let copy_len = time_domain.len().min(plan.length);
        for (dst, src) in padded.iter_mut().zip(&time_domain[..copy_len]) {
            *dst = src * scale;
        }
        let spectrum = self.execute_fwd(plan, &padded)?;
        Ok(RealConvKernel {
            length: plan.length,
            spectrum,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recommend_length_is_multiple_of_32() {
        let n = FftFacility::recommend_length(191, 512);
        assert_eq!(n % 32, 0);
        assert!(n >= 191 + 512 - 1);
    }

    #[test]
    fn get_real_conv_is_idempotent() {
        let facility = FftFacility::new();
        let a = facility.get_real_conv(1024).unwrap();
        let b = facility.get_real_conv(1024).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn forward_then_inverse_is_identity() {
        let facility = FftFacility::new();
        let n = 1024;
        let plan = facility.get_real_conv(n).unwrap();

        let mut input = vec![0.0f32; n];
        input[3] = 1.0;

        let mut spectrum = facility.execute_fwd(&plan, &input).unwrap();
        let output = facility.execute_rev_reord(&plan, &mut spectrum).unwrap();

        let peak = input.iter().map(|v| v.abs()).fold(0.0f32, f32::max);
        let max_err = input
            .iter()
            .zip(&output)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0f32, f32::max);
        assert!(max_err <= 1e-4 * peak.max(1.0));
    }

    #[test]
    fn zero_kernel_produces_zero_output() {
        let facility = FftFacility::new();
        let n = FftFacility::recommend_length(5, 50);
        let plan = facility.get_real_conv(n).unwrap();

        let kernel = facility.build_kernel(&plan, &vec![0.0f32; 5]).unwrap();
        let input = vec![1.0f32; 50];
        let output = facility.execute_conv(&plan, &input, &kernel).unwrap();
        assert!(output.iter().all(|&v| v.abs() < 1e-6));
    }

    #[test]
    fn identity_convolution_matches_expected_shape() {
        // End-to-end scenario: kernel [0.25, 0.5, 0.75, 1.0, 0.5], 50 ones.
        let facility = FftFacility::new();
        let kernel_time = [0.25f32, 0.5, 0.75, 1.0, 0.5];
        let input = vec![1.0f32; 50];
        let out_len = kernel_time.len() + input.len() - 1;
        let n = FftFacility::recommend_length(kernel_time.len(), input.len());
        let plan = facility.get_real_conv(n).unwrap();
        let kernel = facility.build_kernel(&plan, &kernel_time).unwrap();

        let mut padded_input = input.clone();
        padded_input.resize(n, 0.0);
        let conv = facility.execute_conv(&plan, &padded_input, &kernel).unwrap();

        assert!((conv[0] - 0.25).abs() < 1e-3);
        assert!((conv[1] - 0.75).abs() < 1e-3);
        assert!((conv[2] - 1.5).abs() < 1e-3);
        assert!((conv[3] - 2.5).abs() < 1e-3);
        for i in 4..out_len - 4 {
            assert!((conv[i] - 3.0).abs() < 1e-3, "index {i}: {}", conv[i]);
        }
    }
}
