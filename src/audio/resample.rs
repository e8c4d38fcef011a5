//! Sample rate and channel layout conversion with drift compensation.
//!
//! Matching input passes straight through. Once a rate change or a
//! compensation request shows up, a rubato resampler is created and kept for
//! every later frame, so no fractional sample is lost at frame boundaries.
//! Compensation adjusts the relative resampling ratio so a frame plays as
//! `wanted_samples` long.

use rubato::{FastFixedIn, PolynomialDegree, Resampler as _};
use tracing::debug;

use crate::audio::buffer::AudioSamples;

/// Input frames per resampler chunk.
pub const RESAMPLE_CHUNK_FRAMES: usize = 256;
/// Largest relative ratio change compensation may ask for.
const MAX_RELATIVE_RATIO: f64 = 1.2;

/// Error type for sample conversion
#[derive(Debug, thiserror::Error)]
pub enum ResampleError {
    #[error("Failed to create resampler: {0}")]
    Construction(String),
    #[error("Resampling failed: {0}")]
    Process(String),
}

struct Engine {
    in_rate: u32,
    in_channels: u16,
    inner: FastFixedIn<f32>,
    /// Deinterleaved input not yet consumed by a chunk.
    pending: Vec<Vec<f32>>,
    chunk: Vec<Vec<f32>>,
}

impl Engine {
    fn new(in_rate: u32, in_channels: u16, out_rate: u32) -> Result<Self, ResampleError> {
        let channels = in_channels.max(1) as usize;
        let inner = FastFixedIn::<f32>::new(
            out_rate as f64 / in_rate as f64,
            MAX_RELATIVE_RATIO,
            PolynomialDegree::Cubic,
            RESAMPLE_CHUNK_FRAMES,
            channels,
        )
        .map_err(|e| ResampleError::Construction(e.to_string()))?;
        Ok(Self {
            in_rate,
            in_channels,
            inner,
            pending: vec![Vec::with_capacity(RESAMPLE_CHUNK_FRAMES * 4); channels],
            chunk: vec![Vec::with_capacity(RESAMPLE_CHUNK_FRAMES); channels],
        })
    }

    fn matches(&self, input: &AudioSamples) -> bool {
        self.in_rate == input.sample_rate && self.in_channels == input.channels
    }
}

/// Converts decoded audio to the output device format.
pub struct Resampler {
    out_rate: u32,
    out_channels: u16,
    engine: Option<Engine>,
}

impl Resampler {
    pub fn new(out_rate: u32, out_channels: u16) -> Self {
        Self {
            out_rate,
            out_channels,
            engine: None,
        }
    }

    pub fn out_rate(&self) -> u32 {
        self.out_rate
    }

    pub fn out_channels(&self) -> u16 {
        self.out_channels
    }

    /// Whether a resampler is carrying state between frames.
    pub fn is_active(&self) -> bool {
        self.engine.is_some()
    }

    /// Input frames buffered inside the converter.
    pub fn buffered_frames(&self) -> usize {
        self.engine
            .as_ref()
            .map_or(0, |engine| engine.pending.first().map_or(0, Vec::len))
    }

    /// Seconds of input accepted but not yet returned by [`Resampler::convert`].
    pub fn latency(&self) -> f64 {
        let Some(engine) = &self.engine else {
            return 0.0;
        };
        self.buffered_frames() as f64 / engine.in_rate.max(1) as f64
            + engine.inner.output_delay() as f64 / self.out_rate.max(1) as f64
    }

    /// Forget buffered input and filter history.
    pub fn reset(&mut self) {
        if let Some(engine) = &mut self.engine {
            engine.inner.reset();
            for channel in &mut engine.pending {
                channel.clear();
            }
        }
    }

    /// Convert `input`, treating it as `wanted_samples` frames long.
    ///
    /// Returns interleaved output samples.
    pub fn convert(
        &mut self,
        input: &AudioSamples,
        wanted_samples: usize,
    ) -> Result<Vec<f32>, ResampleError> {
        let in_frames = input.sample_count();
        if in_frames == 0 || input.sample_rate == 0 || self.out_channels == 0 {
            return Ok(Vec::new());
        }
        let needs_engine = input.sample_rate != self.out_rate || wanted_samples != in_frames;
        if self.engine.is_none() && !needs_engine {
            return Ok(self.map_frames(input.channels as usize, in_frames, |frame, channel| {
                input.sample(frame, channel)
            }));
        }
        if !self.engine.as_ref().is_some_and(|engine| engine.matches(input)) {
            debug!(
                from = input.sample_rate,
                to = self.out_rate,
                channels = input.channels,
                "creating audio resampler"
            );
            self.engine = Some(Engine::new(input.sample_rate, input.channels, self.out_rate)?);
        }
        let Some(engine) = self.engine.as_mut() else {
            return Ok(Vec::new());
        };

        engine
            .inner
            .set_resample_ratio_relative(wanted_samples as f64 / in_frames as f64, false)
            .map_err(|e| ResampleError::Process(e.to_string()))?;
        let in_channels = engine.pending.len();
        for (i, sample) in input.data.iter().enumerate() {
            engine.pending[i % in_channels].push(*sample);
        }

        let mut planes: Vec<Vec<f32>> = vec![Vec::new(); in_channels];
        loop {
            let needed = engine.inner.input_frames_next();
            if engine.pending[0].len() < needed {
                break;
            }
            for (chunk, pending) in engine.chunk.iter_mut().zip(&mut engine.pending) {
                chunk.clear();
                chunk.extend(pending.drain(..needed));
            }
            let output = engine
                .inner
                .process(&engine.chunk, None)
                .map_err(|e| ResampleError::Process(e.to_string()))?;
            for (plane, out) in planes.iter_mut().zip(output) {
                plane.extend(out);
            }
        }
        let frames = planes[0].len();
        Ok(self.map_frames(in_channels, frames, |frame, channel| planes[channel][frame]))
    }

    /// Interleave `frames` frames into the output layout, reading input
    /// samples through `sample(frame, channel)`.
    fn map_frames(
        &self,
        in_channels: usize,
        frames: usize,
        sample: impl Fn(usize, usize) -> f32,
    ) -> Vec<f32> {
        let out_channels = self.out_channels as usize;
        let mut out = Vec::with_capacity(frames * out_channels);
        for frame in 0..frames {
            for channel in 0..out_channels {
                let value = if in_channels == out_channels {
                    sample(frame, channel)
                } else if in_channels == 1 {
                    sample(frame, 0)
                } else if out_channels == 1 {
                    let sum: f32 = (0..in_channels).map(|c| sample(frame, c)).sum();
                    sum / in_channels as f32
                } else {
                    sample(frame, channel % in_channels)
                };
                out.push(value);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough() {
        let mut resampler = Resampler::new(48_000, 2);
        let input = AudioSamples::new(48_000, 2, vec![0.5, -0.5, 0.25, -0.25]);
        assert_eq!(resampler.convert(&input, 2).unwrap(), input.data);
        assert!(!resampler.is_active());
        assert_eq!(resampler.latency(), 0.0);
    }

    #[test]
    fn test_channel_mapping() {
        let mut stereo = Resampler::new(8_000, 2);
        let mono = AudioSamples::new(8_000, 1, vec![0.5, 0.5]);
        assert_eq!(stereo.convert(&mono, 2).unwrap(), vec![0.5, 0.5, 0.5, 0.5]);

        let mut downmix = Resampler::new(8_000, 1);
        let input = AudioSamples::new(8_000, 2, vec![1.0, 0.0, 0.5, 0.5]);
        assert_eq!(downmix.convert(&input, 2).unwrap(), vec![0.5, 0.5]);
    }

    #[test]
    fn test_rate_conversion_keeps_every_fractional_sample() {
        let mut resampler = Resampler::new(48_000, 1);
        let input = AudioSamples::silence(44_100, 1, 1024);
        let mut produced = 0;
        for _ in 0..100 {
            produced += resampler.convert(&input, 1024).unwrap().len();
        }
        let ratio = 48_000.0 / 44_100.0;
        let exact = 102_400.0 * ratio;
        let accounted = produced as f64 + resampler.buffered_frames() as f64 * ratio;
        assert!(
            (accounted - exact).abs() < 2.0,
            "produced {produced}, buffered {}, exact {exact}",
            resampler.buffered_frames()
        );
        assert!(resampler.latency() > 0.0);
    }

    #[test]
    fn test_ramp_continues_across_frames() {
        let mut resampler = Resampler::new(2_000, 1);
        let ramp: Vec<f32> = (0..2048).map(|i| i as f32).collect();
        let mut out = resampler
            .convert(&AudioSamples::new(1_000, 1, ramp[..1024].to_vec()), 1024)
            .unwrap();
        out.extend(
            resampler
                .convert(&AudioSamples::new(1_000, 1, ramp[1024..].to_vec()), 1024)
                .unwrap(),
        );
        assert!(out.len() > 3000);
        // Skip the filter warm-up at the start.
        for pair in out[64..].windows(2) {
            assert!(pair[1] > pair[0], "{} then {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_compensation_stretches_output() {
        let mut resampler = Resampler::new(48_000, 1);
        let input = AudioSamples::silence(48_000, 1, 1000);
        let produced: usize = (0..20)
            .map(|_| resampler.convert(&input, 1100).unwrap().len())
            .sum();
        assert!(resampler.is_active());
        assert!((21_400..=22_100).contains(&produced), "produced {produced}");

        let mut squeeze = Resampler::new(48_000, 1);
        let produced: usize = (0..20)
            .map(|_| squeeze.convert(&input, 900).unwrap().len())
            .sum();
        assert!((17_400..=18_100).contains(&produced), "produced {produced}");
    }

    #[test]
    fn test_reset_drops_buffered_input() {
        let mut resampler = Resampler::new(48_000, 1);
        resampler
            .convert(&AudioSamples::silence(44_100, 1, 100), 100)
            .unwrap();
        assert_eq!(resampler.buffered_frames(), 100);
        resampler.reset();
        assert_eq!(resampler.buffered_frames(), 0);
        assert!(resampler.is_active());
    }
}
