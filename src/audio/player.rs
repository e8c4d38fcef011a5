//! cpal audio output.
//! The stream callback is the audio clock's only writer.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, Host, SampleFormat, SampleRate, StreamConfig};
use tracing::{error, info, warn};

use crate::audio::{AudioOutput, AudioOutputError, AudioParams, AudioRenderer, AudioSpec};

impl From<cpal::DefaultStreamConfigError> for AudioOutputError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        AudioOutputError::Backend(format!("cpal default config error: {}", err))
    }
}

impl From<cpal::SupportedStreamConfigsError> for AudioOutputError {
    fn from(err: cpal::SupportedStreamConfigsError) -> Self {
        AudioOutputError::Backend(format!("cpal config query error: {}", err))
    }
}

impl From<cpal::BuildStreamError> for AudioOutputError {
    fn from(err: cpal::BuildStreamError) -> Self {
        AudioOutputError::Backend(format!("cpal build stream error: {}", err))
    }
}

impl From<cpal::PlayStreamError> for AudioOutputError {
    fn from(err: cpal::PlayStreamError) -> Self {
        AudioOutputError::Backend(format!("cpal play stream error: {}", err))
    }
}

/// Audio output on the default cpal device
pub struct CpalOutput {
    _host: Host,
    device: Device,
    stream_config: Option<StreamConfig>,
    stream: Option<cpal::Stream>,
}

impl CpalOutput {
    pub fn new() -> Result<Self, AudioOutputError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(AudioOutputError::NoDevice)?;
        Ok(Self {
            _host: host,
            device,
            stream_config: None,
            stream: None,
        })
    }

    /// Wanted layout if the device supports it as f32, else its default.
    fn negotiate(&self, wanted: AudioSpec) -> Result<(u16, u32), AudioOutputError> {
        let supported = self.device.supported_output_configs()?.any(|range| {
            range.sample_format() == SampleFormat::F32
                && range.channels() == wanted.channels
                && range.min_sample_rate().0 <= wanted.sample_rate
                && range.max_sample_rate().0 >= wanted.sample_rate
        });
        if supported {
            return Ok((wanted.channels, wanted.sample_rate));
        }
        let default = self.device.default_output_config()?;
        if default.sample_format() != SampleFormat::F32 {
            return Err(AudioOutputError::Unsupported(format!(
                "device sample format {:?}",
                default.sample_format()
            )));
        }
        warn!(
            "audio device does not support {} Hz / {} channels, using {} Hz / {} channels",
            wanted.sample_rate,
            wanted.channels,
            default.sample_rate().0,
            default.channels()
        );
        Ok((default.channels(), default.sample_rate().0))
    }
}

impl AudioOutput for CpalOutput {
    fn open(&mut self, wanted: AudioSpec) -> Result<AudioParams, AudioOutputError> {
        let (channels, sample_rate) = self.negotiate(wanted)?;
        let frames = AudioSpec {
            sample_rate,
            channels,
        }
        .buffer_frames();
        self.stream_config = Some(StreamConfig {
            channels,
            sample_rate: SampleRate(sample_rate),
            buffer_size: BufferSize::Fixed(frames),
        });
        info!(sample_rate, channels, frames, "audio device opened");
        Ok(AudioParams::new(sample_rate, channels, frames))
    }

    fn start(&mut self, mut renderer: AudioRenderer) -> Result<(), AudioOutputError> {
        let config = self
            .stream_config
            .clone()
            .ok_or(AudioOutputError::NotOpen)?;
        let stream = self.device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| renderer.fill(data),
            |err| error!("audio stream error: {}", err),
            None,
        )?;
        stream.play()?;
        self.stream = Some(stream);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(err) = stream.pause() {
                warn!("failed to pause audio stream: {}", err);
            }
            drop(stream);
        }
        self.stream_config = None;
    }
}
