//! Audio drift correction against a foreign master clock.

use crate::playback::clock::AV_NOSYNC_THRESHOLD;

/// Maximum change of a frame's sample count, percent.
pub const SAMPLE_CORRECTION_PERCENT_MAX: usize = 10;
/// Measurements needed before the average is trusted.
pub const AUDIO_DIFF_AVG_NB: usize = 20;

/// Exponentially averaged audio-to-master drift.
#[derive(Debug, Clone)]
pub struct DriftCorrector {
    diff_cum: f64,
    avg_count: usize,
    avg_coef: f64,
    /// Averaged drift below this is ignored, seconds.
    threshold: f64,
}

impl DriftCorrector {
    pub fn new(threshold: f64) -> Self {
        Self {
            diff_cum: 0.0,
            avg_count: 0,
            avg_coef: (0.01f64.ln() / AUDIO_DIFF_AVG_NB as f64).exp(),
            threshold,
        }
    }

    pub fn reset(&mut self) {
        self.diff_cum = 0.0;
        self.avg_count = 0;
    }

    /// Sample count a frame of `nb_samples` should be stretched to, given
    /// `diff = audio_clock - master_clock` (NaN when unknown).
    pub fn wanted_samples(&mut self, nb_samples: usize, sample_rate: u32, diff: f64) -> usize {
        if diff.is_nan() || diff.abs() >= AV_NOSYNC_THRESHOLD {
            // Too far off: the error is probably a discontinuity.
            self.reset();
            return nb_samples;
        }
        self.diff_cum = diff + self.avg_coef * self.diff_cum;
        if self.avg_count < AUDIO_DIFF_AVG_NB {
            self.avg_count += 1;
            return nb_samples;
        }
        let avg_diff = self.diff_cum * (1.0 - self.avg_coef);
        if avg_diff.abs() < self.threshold {
            return nb_samples;
        }
        let wanted = nb_samples as i64 + (diff * sample_rate as f64) as i64;
        let min = (nb_samples * (100 - SAMPLE_CORRECTION_PERCENT_MAX) / 100) as i64;
        let max = (nb_samples * (100 + SAMPLE_CORRECTION_PERCENT_MAX) / 100) as i64;
        wanted.clamp(min, max) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn warmed(threshold: f64, diff: f64) -> DriftCorrector {
        let mut corrector = DriftCorrector::new(threshold);
        for _ in 0..AUDIO_DIFF_AVG_NB {
            assert_eq!(corrector.wanted_samples(1000, 48_000, diff), 1000);
        }
        corrector
    }

    #[test]
    fn test_no_correction_while_warming_up() {
        warmed(0.01, 0.5);
    }

    #[test]
    fn test_audio_ahead_is_stretched_within_bounds() {
        let mut corrector = warmed(0.01, 0.5);
        assert_eq!(corrector.wanted_samples(1000, 48_000, 0.5), 1100);
    }

    #[test]
    fn test_audio_behind_is_squeezed() {
        let mut corrector = warmed(0.01, -0.001);
        let wanted = corrector.wanted_samples(1000, 48_000, -0.001);
        // Average drift stays below the threshold.
        assert_eq!(wanted, 1000);

        let diff = -1.0 / 1024.0;
        let mut corrector = warmed(0.0001, diff);
        assert_eq!(corrector.wanted_samples(1000, 48_000, diff), 954);
    }

    #[test]
    fn test_large_or_unknown_diff_resets() {
        let mut corrector = warmed(0.01, 0.5);
        assert_eq!(corrector.wanted_samples(1000, 48_000, 20.0), 1000);
        assert_eq!(corrector.wanted_samples(1000, 48_000, 0.5), 1000);
        assert_eq!(corrector.wanted_samples(1000, 48_000, f64::NAN), 1000);
    }
}
