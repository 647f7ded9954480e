//! Sample types shared between the file loader, the DSP facility and the
//! playback engine.

/// Every stage of the pipeline (prefilter, envelope/correlation, decode,
/// resampler taps) works in single precision; this matches the precision of
/// the packed 16-bit/12-bit sample data the engine ultimately decodes.
pub type Sample = f32;

/// Channel-planar audio: one contiguous buffer per channel, all the same
/// length. Used for everything upstream of quantisation (ingest, prefilter,
/// envelope/correlation analysis).
#[derive(Debug, Clone)]
pub struct PlanarAudio {
    channels: Vec<Vec<Sample>>,
    pub sample_rate: u32,
}

impl PlanarAudio {
    pub fn new(num_channels: usize, num_frames: usize, sample_rate: u32) -> Self {
        Self {
            channels: vec![vec![0.0; num_frames]; num_channels],
            sample_rate,
        }
    }

    pub fn from_channels(channels: Vec<Vec<Sample>>, sample_rate: u32) -> Self {
        debug_assert!(channels.windows(2).all(|w| w[0].len() == w[1].len()));
        Self {
            channels,
            sample_rate,
        }
    }

    #[inline]
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    #[inline]
    pub fn num_frames(&self) -> usize {
        self.channels.first().map_or(0, |c| c.len())
    }

    #[inline]
    pub fn channel(&self, idx: usize) -> &[Sample] {
        &self.channels[idx]
    }

    #[inline]
    pub fn channel_mut(&mut self, idx: usize) -> &mut [Sample] {
        &mut self.channels[idx]
    }

    #[inline]
    pub fn channels(&self) -> &[Vec<Sample>] {
        &self.channels
    }

    #[inline]
    pub fn channels_mut(&mut self) -> &mut [Vec<Sample>] {
        &mut self.channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn planar_audio_reports_shape() {
        let buf = PlanarAudio::new(2, 1024, 48_000);
        assert_eq!(buf.num_channels(), 2);
        assert_eq!(buf.num_frames(), 1024);
        assert_eq!(buf.sample_rate, 48_000);
    }

    #[test]
    fn planar_audio_from_channels_preserves_data() {
        let buf = PlanarAudio::from_channels(vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]], 44_100);
        assert_eq!(buf.channel(0), &[1.0, 2.0, 3.0]);
        assert_eq!(buf.channel(1), &[4.0, 5.0, 6.0]);
    }

}
