//! Audio output path.
//!
//! The output device is a collaborator behind [`AudioOutput`]; it negotiates
//! its hardware parameters and then pulls samples from an [`AudioRenderer`]
//! on its own thread.

pub mod buffer;
#[cfg(feature = "cpal")]
pub mod player;
pub mod render;
pub mod resample;
pub mod sync;

pub use buffer::AudioSamples;
#[cfg(feature = "cpal")]
pub use player::CpalOutput;
pub use render::AudioRenderer;
pub use resample::{ResampleError, Resampler};
pub use sync::DriftCorrector;

/// Bytes per interleaved f32 sample.
pub const SAMPLE_SIZE: usize = std::mem::size_of::<f32>();

/// Upper bound on device callbacks per second when sizing the buffer.
pub const AUDIO_MAX_CALLBACKS_PER_SEC: u32 = 30;

/// Error type for audio output
#[derive(Debug, thiserror::Error)]
pub enum AudioOutputError {
    #[error("No audio device available")]
    NoDevice,
    #[error("Unsupported audio format: {0}")]
    Unsupported(String),
    #[error("Audio backend error: {0}")]
    Backend(String),
    #[error("Audio output is not open")]
    NotOpen,
}

/// Format requested from the output device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpec {
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioSpec {
    /// Device buffer size in sample frames: the smallest power of two
    /// keeping the callback rate under [`AUDIO_MAX_CALLBACKS_PER_SEC`],
    /// and at least 512.
    pub fn buffer_frames(&self) -> u32 {
        let per_callback = (self.sample_rate / AUDIO_MAX_CALLBACKS_PER_SEC).max(1);
        let log2 = 31 - per_callback.leading_zeros();
        (render::AUDIO_MIN_BUFFER_SIZE as u32).max(2 << log2)
    }
}

/// Hardware parameters the device settled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioParams {
    pub sample_rate: u32,
    pub channels: u16,
    /// Bytes per sample frame.
    pub frame_size: usize,
    pub bytes_per_sec: usize,
    /// Device buffer size in bytes.
    pub hw_buf_size: usize,
}

impl AudioParams {
    pub fn new(sample_rate: u32, channels: u16, buffer_frames: u32) -> Self {
        let frame_size = channels as usize * SAMPLE_SIZE;
        Self {
            sample_rate,
            channels,
            frame_size,
            bytes_per_sec: sample_rate as usize * frame_size,
            hw_buf_size: buffer_frames as usize * frame_size,
        }
    }
}

/// Audio output device.
pub trait AudioOutput {
    /// Open the device close to `wanted`.
    fn open(&mut self, wanted: AudioSpec) -> Result<AudioParams, AudioOutputError>;

    /// Start pulling samples from `renderer`.
    fn start(&mut self, renderer: AudioRenderer) -> Result<(), AudioOutputError>;

    /// Stop the callback and release the device. Idempotent.
    fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_frames() {
        let spec = AudioSpec { sample_rate: 48_000, channels: 2 };
        assert_eq!(spec.buffer_frames(), 2048);
        let spec = AudioSpec { sample_rate: 8_000, channels: 1 };
        assert_eq!(spec.buffer_frames(), 512);
    }

    #[test]
    fn test_params() {
        let params = AudioParams::new(44_100, 2, 1024);
        assert_eq!(params.frame_size, 8);
        assert_eq!(params.bytes_per_sec, 352_800);
        assert_eq!(params.hw_buf_size, 8192);
    }
}
