//! FIR filter runner: overlap-add convolution of a fixed frequency-domain
//! kernel against a linear or looped input buffer, with pre-read alignment
//! to strip a symmetric kernel's delay.
//!
//! Used by the sample preparation pipeline to apply the 191-tap inverse
//! interpolation prefilter (looped around the sustain anchor for the
//! attack/sustain body, linear for each release) and to build the
//! envelope/cross-correlation signals the release-alignment builder
//! consumes.

use rf_core::RfResult;

use crate::fft::{FftFacility, FftPlan, RealConvKernel};
use std::sync::Arc;

/// A precomputed convolution kernel bound to its transform plan. `kern_len`
/// must be strictly less than `plan.length()`; the difference is the
/// overlap-add window available per iteration.
pub struct FirFilter {
    facility: Arc<FftFacility>,
    plan: Arc<FftPlan>,
    kern_len: usize,
    kernel: RealConvKernel,
}

impl FirFilter {
    /// Build a filter for a kernel of `kern_len` taps that will be run
    /// against input blocks of at most `max_block_len` samples at a time.
    /// The kernel contents are filled in afterwards by one of the
    /// `build_*` methods.
    pub fn new(facility: Arc<FftFacility>, kern_len: usize, max_block_len: usize) -> RfResult<Self> {
        let n = FftFacility::recommend_length(kern_len, max_block_len);
        let plan = facility.get_real_conv(n)?;
        let kernel = facility.build_kernel(&plan, &vec![0.0f32; kern_len])?;
        Ok(Self {
            facility,
            plan,
            kern_len,
            kernel,
        })
    }

    #[inline]
    pub fn kern_len(&self) -> usize {
        self.kern_len
    }

    #[inline]
    pub fn conv_len(&self) -> usize {
        self.plan.length()
    }

    #[inline]
    pub fn max_input_per_iteration(&self) -> usize {
        self.conv_len() - self.kern_len + 1
    }

    /// Replace the kernel with a rectangular window of `length` ones scaled
    /// by `scale`. Running this filter sums `length` consecutive input
    /// samples (times `scale`) into each output sample.
    pub fn build_rect(&mut self, length: usize, scale: f32) -> RfResult<()> {
        assert!(length <= self.kern_len);
        let time = vec![scale; length];
        self.kernel = self.facility.build_kernel(&self.plan, &time)?;
        Ok(())
    }

    /// Replace the kernel with a reversed, `scale`-premultiplied copy of
    /// `buffer` (cross-correlation kernel). Returns the sum of squares of
    /// `buffer` (unscaled), which callers use as the reference signal's
    /// total power.
    pub fn build_xcorr(&mut self, buffer: &[f32], scale: f32) -> RfResult<f32> {
        assert!(buffer.len() <= self.kern_len);
        let mut time: Vec<f32> = buffer.iter().rev().map(|&v| v * scale).collect();
        time.resize(self.kern_len, 0.0);
        let sum_sq = buffer.iter().map(|v| v * v).sum();
        self.kernel = self.facility.build_kernel(&self.plan, &time)?;
        Ok(sum_sq)
    }

    /// Replace the kernel with `buffer` (already in forward time order)
    /// premultiplied by `scale` (direct convolution kernel).
    pub fn build_conv(&mut self, buffer: &[f32], scale: f32) -> RfResult<()> {
        assert!(buffer.len() <= self.kern_len);
        let time: Vec<f32> = buffer.iter().map(|&v| v * scale).collect();
        self.kernel = self.facility.build_kernel(&self.plan, &time)?;
        Ok(())
    }

    /// Run the filter over `input`, producing `length` samples into
    /// `output` starting at offset 0.
    ///
    /// - `add_to_output`: sum into `output` rather than overwrite.
    /// - `is_looped`: past index `length - 1`, treat the source as wrapping
    ///   back to `susp_start` rather than going to zero.
    /// - `pre_read`: shift the convolution result left by this many samples
    ///   before writing, so a symmetric kernel's `(kern_len - 1) / 2` group
    ///   delay can be cancelled by the caller.
    pub fn run(
        &self,
        input: &[f32],
        output: &mut [f32],
        add_to_output: bool,
        susp_start: usize,
        length: usize,
        pre_read: usize,
        is_looped: bool,
    ) -> RfResult<()> {
        debug_assert!(output.len() >= length);
        if !add_to_output {
            output[..length].fill(0.0);
        }

        let max_in = self.max_input_per_iteration();
        let mut read_pos: usize = 0;
        // write_pos tracks where the *start* of this iteration's conv_len
        // result lands, already shifted left by pre_read.
        let mut write_pos: isize = -(pre_read as isize);

        loop {
            let mut block = vec![0.0f32; self.conv_len()];
            let mut wrote_any_input = false;
            for i in 0..max_in {
                let src_idx = read_pos + i;
                let sample = if src_idx < input.len() {
                    wrote_any_input = true;
                    input[src_idx]
                } else if is_looped && !input.is_empty() {
                    let looped_idx = susp_start + (src_idx - input.len());
                    if looped_idx < input.len() {
                        wrote_any_input = true;
                        input[looped_idx]
                    } else {
                        0.0
                    }
                } else {
                    0.0
                };
                block[i] = sample;
            }

            if !wrote_any_input && read_pos > 0 {
                break;
            }

            let conv = self
                .facility
                .execute_conv(&self.plan, &block, &self.kernel)?;

            for (i, &sample) in conv.iter().enumerate() {
                let out_idx = write_pos + i as isize;
                if out_idx >= 0 && (out_idx as usize) < length {
                    output[out_idx as usize] += sample;
                }
            }

            read_pos += max_in;
            write_pos += max_in as isize;

            if read_pos >= length + pre_read {
                break;
            }
            if !is_looped && read_pos >= input.len() && read_pos >= length + pre_read {
                break;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_kernel_sums_window() {
        let facility = Arc::new(FftFacility::new());
        let mut filter = FirFilter::new(facility, 8, 64).unwrap();
        filter.build_rect(4, 1.0).unwrap();

        let input = vec![1.0f32; 64];
        let mut output = vec![0.0f32; 64];
        filter
            .run(&input, &mut output, false, 0, 64, 0, false)
            .unwrap();

        // steady state: once the rect window is fully inside the input,
        // each output sample sums 4 consecutive ones.
        assert!((output[10] - 4.0).abs() < 1e-3);
    }

    #[test]
    fn xcorr_reports_sum_of_squares() {
        let facility = Arc::new(FftFacility::new());
        let mut filter = FirFilter::new(facility, 8, 64).unwrap();
        let buf = [1.0f32, 2.0, 3.0];
        let energy = filter.build_xcorr(&buf, 1.0).unwrap();
        assert!((energy - 14.0).abs() < 1e-6);
    }
}
