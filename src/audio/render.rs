//! Pull callback feeding the audio output device.
//!
//! [`AudioRenderer::fill`] runs on the device thread. It drains the audio
//! frame queue, applies drift compensation and volume, and re-anchors the
//! audio clock to the sample that will actually be heard next.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{trace, warn};

use crate::audio::resample::Resampler;
use crate::audio::sync::DriftCorrector;
use crate::audio::{AudioParams, SAMPLE_SIZE};
use crate::core::time::relative_now;
use crate::core::MediaKind;
use crate::playback::state::{PlayerState, MIX_MAX_VOLUME};
use crate::playback::sync::SyncSource;
use crate::queue::Frame;

/// Bytes of silence emitted when no frame is ready.
pub const AUDIO_MIN_BUFFER_SIZE: usize = 512;

/// Audio render callback state
pub struct AudioRenderer {
    state: Arc<PlayerState>,
    params: AudioParams,
    resampler: Resampler,
    drift: DriftCorrector,
    buf: Vec<f32>,
    /// Next sample of `buf` to play.
    buf_index: usize,
    /// PTS just past the end of `buf`, NaN when unknown.
    audio_clock: f64,
    audio_clock_serial: i32,
}

impl AudioRenderer {
    pub fn new(state: Arc<PlayerState>, params: AudioParams) -> Self {
        let threshold = params.hw_buf_size as f64 / params.bytes_per_sec.max(1) as f64;
        Self {
            state,
            resampler: Resampler::new(params.sample_rate, params.channels),
            drift: DriftCorrector::new(threshold),
            params,
            buf: Vec::new(),
            buf_index: 0,
            audio_clock: f64::NAN,
            audio_clock_serial: -1,
        }
    }

    /// Fill `out` with interleaved samples.
    pub fn fill(&mut self, out: &mut [f32]) {
        self.fill_at(out, relative_now());
    }

    /// Fill `out` as if called at wall time `callback_time`.
    pub fn fill_at(&mut self, out: &mut [f32], callback_time: f64) {
        let deadline = Instant::now() + self.max_wait();
        let mut written = 0;
        while written < out.len() {
            if self.buf_index >= self.buf.len() {
                if !self.decode_frame(deadline) {
                    let channels = self.params.channels.max(1) as usize;
                    let frames = AUDIO_MIN_BUFFER_SIZE / self.params.frame_size.max(1);
                    self.buf.clear();
                    self.buf.resize(frames.max(1) * channels, 0.0);
                }
                self.buf_index = 0;
            }
            let len = (self.buf.len() - self.buf_index).min(out.len() - written);
            let src = &self.buf[self.buf_index..self.buf_index + len];
            let dst = &mut out[written..written + len];
            let volume = self.state.volume();
            if self.state.is_muted() || volume == 0 {
                dst.fill(0.0);
            } else if volume == MIX_MAX_VOLUME {
                dst.copy_from_slice(src);
            } else {
                let gain = volume as f32 / MIX_MAX_VOLUME as f32;
                for (d, s) in dst.iter_mut().zip(src) {
                    *d = s * gain;
                }
            }
            written += len;
            self.buf_index += len;
        }

        if !self.audio_clock.is_nan() {
            let write_buf_size = (self.buf.len() - self.buf_index) * SAMPLE_SIZE;
            let pending = (2 * self.params.hw_buf_size + write_buf_size) as f64;
            let pts = self.audio_clock - pending / self.params.bytes_per_sec as f64;
            self.state
                .audclk
                .set_at(pts, self.audio_clock_serial, callback_time);
            self.state
                .extclk
                .sync_to_slave_at(&self.state.audclk, callback_time);
        }
    }

    /// Half the hardware buffer duration.
    fn max_wait(&self) -> Duration {
        Duration::from_secs_f64(
            self.params.hw_buf_size as f64 / self.params.bytes_per_sec.max(1) as f64 / 2.0,
        )
    }

    /// Load the next frame of the live serial into `buf`.
    ///
    /// Returns false when paused, aborted, or nothing arrives before
    /// `deadline`. Frames the resampler only buffers are followed by the
    /// next one.
    fn decode_frame(&mut self, deadline: Instant) -> bool {
        loop {
            if self.state.is_paused() {
                return false;
            }
            let Some(frame) = self.next_live_frame(deadline) else {
                return false;
            };
            let Some(samples) = frame.audio() else {
                return false;
            };

            if frame.serial != self.audio_clock_serial {
                self.resampler.reset();
            }
            let nb_samples = samples.sample_count();
            let wanted = self.synchronize(nb_samples, samples.sample_rate);
            self.buf = match self.resampler.convert(samples, wanted) {
                Ok(buf) => buf,
                Err(err) => {
                    warn!("{}", err);
                    return false;
                }
            };

            self.audio_clock = if frame.pts.is_nan() {
                f64::NAN
            } else {
                frame.pts + nb_samples as f64 / samples.sample_rate as f64
                    - self.resampler.latency()
            };
            self.audio_clock_serial = frame.serial;
            trace!(
                pts = frame.pts,
                nb_samples,
                wanted,
                "audio frame rendered"
            );
            if !self.buf.is_empty() {
                return true;
            }
        }
    }

    /// Pop frames until one of the live serial shows up.
    fn next_live_frame(&self, deadline: Instant) -> Option<Frame> {
        let channel = self.state.channel(MediaKind::Audio);
        loop {
            let wait = deadline.saturating_duration_since(Instant::now());
            let frame = channel.frames.peek_readable_timeout(wait)?;
            channel.frames.next();
            if frame.serial == channel.packets.serial() {
                return Some(frame);
            }
        }
    }

    fn synchronize(&mut self, nb_samples: usize, sample_rate: u32) -> usize {
        if self.state.master_sync_type() == SyncSource::Audio {
            return nb_samples;
        }
        let diff = self.state.audclk.get() - self.state.master_clock();
        self.drift.wanted_samples(nb_samples, sample_rate, diff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::AudioSamples;
    use crate::config::PlayerConfig;
    use crate::core::time::Rational;
    use crate::decode::StreamInfo;
    use crate::playback::state::SourceInfo;
    use crate::queue::{Frame, FrameData};
    use crossbeam::channel;

    fn setup(volume: u8) -> (Arc<PlayerState>, AudioRenderer) {
        let (tx, _rx) = channel::unbounded();
        let config = PlayerConfig {
            volume,
            ..PlayerConfig::default()
        };
        let state = Arc::new(PlayerState::new(config, SourceInfo::default(), tx));
        let audio = state.channel(MediaKind::Audio);
        audio.activate(StreamInfo::audio(0, Rational::new(1, 1000), 1000, 1));
        audio.packets.start();
        let params = AudioParams::new(1000, 1, 100);
        let renderer = AudioRenderer::new(Arc::clone(&state), params);
        (state, renderer)
    }

    fn push(state: &PlayerState, pts: f64, serial: i32, value: f32, count: usize) {
        let frames = &state.channel(MediaKind::Audio).frames;
        frames.peek_writable().unwrap().push(Frame {
            pts,
            serial,
            data: FrameData::Audio(Arc::new(AudioSamples::new(1000, 1, vec![value; count]))),
            ..Frame::default()
        });
    }

    #[test]
    fn test_fill_copies_samples_and_sets_clock() {
        let (state, mut renderer) = setup(100);
        let serial = state.channel(MediaKind::Audio).packets.serial();
        push(&state, 2.0, serial, 0.5, 300);

        let mut out = vec![0.0; 200];
        renderer.fill_at(&mut out, 50.0);
        assert!(out.iter().all(|s| *s == 0.5));

        // End of frame at 2.3 s, minus two hardware buffers and 100 unplayed
        // samples: 2.3 - (800 + 400) / 4000.
        let clock = state.audclk.get_at(50.0);
        assert!((clock - 2.0).abs() < 1e-9);
        assert!((state.extclk.get_at(50.0) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_stale_frames_are_skipped() {
        let (state, mut renderer) = setup(100);
        let audio = state.channel(MediaKind::Audio);
        let old = audio.packets.serial();
        push(&state, 0.0, old, 0.9, 100);
        audio.packets.flush();
        push(&state, 5.0, audio.packets.serial(), 0.25, 100);

        let mut out = vec![0.0; 100];
        renderer.fill_at(&mut out, 0.0);
        assert!(out.iter().all(|s| *s == 0.25));
    }

    #[test]
    fn test_silence_when_empty_or_muted() {
        let (state, mut renderer) = setup(100);
        let mut out = vec![1.0; 64];
        renderer.fill_at(&mut out, 0.0);
        assert!(out.iter().all(|s| *s == 0.0));

        let serial = state.channel(MediaKind::Audio).packets.serial();
        push(&state, 0.0, serial, 0.5, 600);
        state.toggle_mute();
        let mut out = vec![1.0; 64];
        renderer.fill_at(&mut out, 0.0);
        assert!(out.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_volume_scales_output() {
        let (state, mut renderer) = setup(50);
        let serial = state.channel(MediaKind::Audio).packets.serial();
        push(&state, 0.0, serial, 1.0, 100);
        let mut out = vec![0.0; 100];
        renderer.fill_at(&mut out, 0.0);
        assert!(out.iter().all(|s| (*s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_underrun_waits_once_per_callback() {
        let (_state, mut renderer) = setup(100);
        // Half of a 100 frame buffer at 1 kHz.
        assert!((renderer.max_wait().as_secs_f64() - 0.05).abs() < 1e-9);
        let started = Instant::now();
        let mut out = vec![1.0; 1024];
        renderer.fill_at(&mut out, 0.0);
        assert!(started.elapsed() < Duration::from_millis(200));
        assert!(out.iter().all(|s| *s == 0.0));
        // 512 bytes of mono f32.
        assert_eq!(renderer.buf.len(), 128);
    }
}
