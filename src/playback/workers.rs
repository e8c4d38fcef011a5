//! Per-stream decode threads.
//!
//! Each opened stream gets a [`StreamComponent`] guard owning its decode
//! thread. Dropping the guard aborts the packet queue, wakes the frame queue,
//! joins the thread and flushes the packet queue, in that order.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error, trace};

use crate::audio::AudioOutput;
use crate::core::time::from_micros;
use crate::core::MediaKind;
use crate::decode::{DecodeError, DecodeOutcome, Decoder, RawFrame, RawFrameData};
use crate::playback::clock::AV_NOSYNC_THRESHOLD;
use crate::playback::engine::QuitReason;
use crate::playback::state::PlayerState;
use crate::queue::{Frame, FrameData, QueueAborted};

/// An opened stream: its decode thread and, for audio, the output device.
pub struct StreamComponent {
    kind: MediaKind,
    state: Arc<PlayerState>,
    handle: Option<JoinHandle<()>>,
    output: Option<Box<dyn AudioOutput>>,
}

impl StreamComponent {
    /// Start the packet queue and spawn the decode thread for `decoder`.
    pub fn spawn(state: Arc<PlayerState>, decoder: Decoder) -> std::io::Result<Self> {
        let kind = decoder.kind();
        let channel = state.channel(kind);
        channel.packets.start();
        let mut component = Self {
            kind,
            state: Arc::clone(&state),
            handle: None,
            output: None,
        };
        let thread_state = Arc::clone(&state);
        let handle = thread::Builder::new()
            .name(format!("{kind}-decoder"))
            .spawn(move || run_decoder(thread_state, decoder))?;
        component.handle = Some(handle);
        debug!(%kind, "stream component opened");
        Ok(component)
    }

    /// Attach the audio output so it closes together with the stream.
    pub fn with_output(mut self, output: Box<dyn AudioOutput>) -> Self {
        self.output = Some(output);
        self
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }
}

impl Drop for StreamComponent {
    fn drop(&mut self) {
        let channel = self.state.channel(self.kind);
        channel.packets.abort();
        channel.frames.signal();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!(kind = %self.kind, "decode thread panicked");
            }
        }
        channel.packets.flush();
        if let Some(mut output) = self.output.take() {
            output.close();
        }
        channel.deactivate();
        debug!(kind = %self.kind, "stream component closed");
    }
}

fn run_decoder(state: Arc<PlayerState>, mut decoder: Decoder) {
    let kind = decoder.kind();
    let result = match kind {
        MediaKind::Video => video_loop(&state, &mut decoder),
        MediaKind::Audio => audio_loop(&state, &mut decoder),
        MediaKind::Subtitle => subtitle_loop(&state, &mut decoder),
    };
    match result {
        Ok(()) | Err(DecodeError::Aborted(_)) => debug!(%kind, "decode thread exiting"),
        Err(err) => {
            error!(%kind, "decode thread failed: {}", err);
            state.signal_quit(QuitReason::Failed(err.to_string()));
        }
    }
}

fn video_loop(state: &PlayerState, decoder: &mut Decoder) -> Result<(), DecodeError> {
    let channel = state.channel(MediaKind::Video);
    let duration = channel
        .stream()
        .map(|info| info.frame_duration())
        .unwrap_or(0.0);
    loop {
        let raw = match decoder.decode_frame()? {
            DecodeOutcome::Frame(raw) => raw,
            DecodeOutcome::Subtitle(_) | DecodeOutcome::Eof => continue,
        };
        let pts = raw.seconds();
        if should_drop_early(state, decoder, pts) {
            state.count_early_drop();
            trace!(pts, "video frame dropped before queueing");
            continue;
        }
        let RawFrameData::Picture(picture) = raw.data else {
            continue;
        };
        let frame = Frame {
            pts,
            duration,
            pos: raw.pos,
            serial: decoder.pkt_serial(),
            width: picture.width,
            height: picture.height,
            format: picture.format,
            uploaded: false,
            sar: picture.sample_aspect_ratio,
            data: FrameData::Picture(Arc::new(picture)),
        };
        let slot = channel.frames.peek_writable().ok_or(QueueAborted)?;
        slot.push(frame);
    }
}

/// A picture already behind the master clock is not worth queueing while
/// more packets are waiting.
fn should_drop_early(state: &PlayerState, decoder: &Decoder, pts: f64) -> bool {
    if pts.is_nan() || !state.framedrop_active() {
        return false;
    }
    let diff = pts - state.master_clock();
    !diff.is_nan()
        && diff.abs() < AV_NOSYNC_THRESHOLD
        && diff < 0.0
        && decoder.pkt_serial() == state.vidclk.serial()
        && state.channel(MediaKind::Video).packets.nb_packets() > 0
}

fn audio_loop(state: &PlayerState, decoder: &mut Decoder) -> Result<(), DecodeError> {
    let channel = state.channel(MediaKind::Audio);
    loop {
        let raw = match decoder.decode_frame()? {
            DecodeOutcome::Frame(raw) => raw,
            DecodeOutcome::Subtitle(_) | DecodeOutcome::Eof => continue,
        };
        let frame = audio_frame(raw, decoder.pkt_serial());
        let slot = channel.frames.peek_writable().ok_or(QueueAborted)?;
        slot.push(frame);
    }
}

fn audio_frame(raw: RawFrame, serial: i32) -> Frame {
    let pts = raw.seconds();
    let pos = raw.pos;
    let (duration, data) = match raw.data {
        RawFrameData::Audio(samples) => (samples.duration(), FrameData::Audio(Arc::new(samples))),
        RawFrameData::Picture(_) => (0.0, FrameData::Empty),
    };
    Frame {
        pts,
        duration,
        pos,
        serial,
        data,
        ..Frame::default()
    }
}

fn subtitle_loop(state: &PlayerState, decoder: &mut Decoder) -> Result<(), DecodeError> {
    let channel = state.channel(MediaKind::Subtitle);
    loop {
        let unit = match decoder.decode_frame()? {
            DecodeOutcome::Subtitle(unit) => unit,
            DecodeOutcome::Frame(_) | DecodeOutcome::Eof => continue,
        };
        let pts = unit.pts.map(from_micros).unwrap_or(f64::NAN);
        let duration = (unit.end_display_ms as f64 - unit.start_display_ms as f64) / 1000.0;
        let frame = Frame {
            pts,
            duration,
            serial: decoder.pkt_serial(),
            format: unit.format as i32,
            pos: -1,
            data: FrameData::Subtitle(Arc::new(unit)),
            ..Frame::default()
        };
        let slot = channel.frames.peek_writable().ok_or(QueueAborted)?;
        slot.push(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::AudioSamples;
    use crate::core::time::Rational;

    #[test]
    fn test_audio_frame_timing() {
        let mut raw = RawFrame::audio(AudioSamples::silence(48_000, 2, 1024)).with_pts(48_000);
        raw.time_base = Rational::new(1, 48_000);
        raw.pos = 4096;
        let frame = audio_frame(raw, 3);
        assert!((frame.pts - 1.0).abs() < 1e-9);
        assert!((frame.duration - 1024.0 / 48_000.0).abs() < 1e-9);
        assert_eq!(frame.serial, 3);
        assert_eq!(frame.pos, 4096);
        assert_eq!(frame.audio().map(|s| s.sample_count()), Some(1024));
    }

    #[test]
    fn test_audio_frame_without_pts_is_nan() {
        let frame = audio_frame(RawFrame::audio(AudioSamples::silence(8_000, 1, 80)), 1);
        assert!(frame.pts.is_nan());
    }
}
