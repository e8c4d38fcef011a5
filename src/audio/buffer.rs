//! Decoded audio sample buffers.
//! Samples are interleaved PCM f32 (L, R, L, R, ...).

use crate::core::time::Time;

/// Interleaved f32 audio samples at a fixed rate and channel count.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSamples {
    pub data: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioSamples {
    pub fn new(sample_rate: u32, channels: u16, data: Vec<f32>) -> Self {
        Self {
            data,
            sample_rate,
            channels,
        }
    }

    /// Silent buffer of `frames` samples per channel.
    pub fn silence(sample_rate: u32, channels: u16, frames: usize) -> Self {
        Self::new(sample_rate, channels, vec![0.0; frames * channels as usize])
    }

    /// Number of samples per channel.
    pub fn sample_count(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.data.len() / self.channels as usize
        }
    }

    /// Duration in seconds.
    pub fn duration(&self) -> Time {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.sample_count() as f64 / self.sample_rate as f64
        }
    }

    /// Sample `frame` of channel `channel`.
    #[inline]
    pub fn sample(&self, frame: usize, channel: usize) -> f32 {
        self.data[frame * self.channels as usize + channel]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_and_duration() {
        let samples = AudioSamples::silence(48_000, 2, 960);
        assert_eq!(samples.data.len(), 1920);
        assert_eq!(samples.sample_count(), 960);
        assert!((samples.duration() - 0.02).abs() < 1e-9);
    }

    #[test]
    fn test_sample_indexing() {
        let samples = AudioSamples::new(8_000, 2, vec![0.1, 0.2, 0.3, 0.4]);
        assert_eq!(samples.sample(1, 0), 0.3);
        assert_eq!(samples.sample(1, 1), 0.4);
    }

    #[test]
    fn test_degenerate_formats() {
        let samples = AudioSamples::new(0, 0, vec![1.0]);
        assert_eq!(samples.sample_count(), 0);
        assert_eq!(samples.duration(), 0.0);
    }
}
