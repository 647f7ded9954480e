//! rf-dsp: the sampler's shared DSP facility.
//!
//! ## Modules
//! - `fft` - plan-cached real-input DFT and combined multiply/inverse
//!   convolution step, shared by everything below it.
//! - `firfilter` - overlap-add FIR filter runner (looped or linear input,
//!   pre-read alignment, kernel builders).
//! - `reltable` - release-alignment table construction.

pub mod fft;
pub mod firfilter;
pub mod reltable;

pub use fft::{FftFacility, FftPlan, RealConvKernel};
pub use firfilter::FirFilter;
pub use reltable::{build as build_release_table, ReleaseAnalysis};
