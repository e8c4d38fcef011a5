//! Playback session coordinating the read thread, the decode threads, the
//! audio output and the video refresh loop.
//! Uses crossbeam channels to report the end of the session.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver};
use tracing::{error, info, warn};

use crate::audio::{AudioOutput, AudioOutputError, AudioRenderer, AudioSpec};
use crate::config::{ConfigError, PlayerConfig, SeekByBytes};
use crate::core::time::{relative_now, rescale, to_micros, Rational};
use crate::core::MediaKind;
use crate::decode::{DecodeError, Decoder, StreamParams};
use crate::demux::{DemuxError, Demuxer, SeekTarget};
use crate::playback::read_thread::ReadLoop;
use crate::playback::refresh::VideoRefresh;
use crate::playback::state::{PlayerState, PlayerStats, SourceInfo, VOLUME_STEP_DB};
use crate::playback::sync::{MAX_FRAME_DURATION, MAX_FRAME_DURATION_DISCONTINUOUS, REFRESH_RATE};
use crate::playback::workers::StreamComponent;
use crate::render::VideoSink;

/// Byte rate assumed for byte seeks when the source reports no bit rate.
const DEFAULT_BYTE_RATE: f64 = 180_000.0;

/// Why a session ended.
#[derive(Debug, Clone, PartialEq)]
pub enum QuitReason {
    /// Every stream drained and no loop iteration is left.
    EndOfPlayback,
    Failed(String),
}

/// Notification sent from the worker threads
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    /// The session is over; sent at most once.
    Quit(QuitReason),
    /// A recoverable failure such as a rejected seek.
    Error(String),
}

/// User action applied with [`Player::process_command`]
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerCommand {
    TogglePause,
    ToggleMute,
    VolumeUp,
    VolumeDown,
    StepFrame,
    /// Seek by this many seconds from the current position.
    SeekRelative(f64),
    /// Jump this many chapters forward (negative for backward).
    SeekChapter(i32),
    Quit,
}

/// Error type for the playback session
#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    #[error("Demux error: {0}")]
    Demux(#[from] DemuxError),
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("Audio error: {0}")]
    Audio(#[from] AudioOutputError),
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Thread error: {0}")]
    Thread(String),
    #[error("No audio or video stream could be opened")]
    NoStreams,
}

/// A playback session
pub struct Player {
    state: Arc<PlayerState>,
    events: Receiver<PlayerEvent>,
    read_thread: Option<JoinHandle<()>>,
    audio: Option<StreamComponent>,
    video: Option<StreamComponent>,
    subtitle: Option<StreamComponent>,
    refresh: VideoRefresh,
    closed: bool,
}

impl Player {
    /// Open a session on `demuxer` and start playing.
    ///
    /// Streams that fail to open are skipped with a warning; the session
    /// fails only when neither audio nor video is left. Without an
    /// `audio_output` the audio stream is not played.
    pub fn open(
        config: PlayerConfig,
        mut demuxer: Box<dyn Demuxer>,
        audio_output: Option<Box<dyn AudioOutput>>,
    ) -> Result<Self, PlayerError> {
        config.validate()?;
        let source = source_info(&config, demuxer.as_ref());

        if let Some(start) = config.start_time {
            let mut timestamp = to_micros(start);
            if let Some(origin) = source.start_time {
                timestamp += to_micros(origin);
            }
            if let Err(err) = demuxer.seek(SeekTarget::new(timestamp, 0, false)) {
                warn!("could not seek to position {:.3}: {}", start, err);
            }
        }

        let video_index = (!config.disable_video)
            .then(|| demuxer.find_best_stream(MediaKind::Video, config.stream_video))
            .flatten();
        let audio_index = (!config.disable_audio)
            .then(|| demuxer.find_best_stream(MediaKind::Audio, config.stream_audio))
            .flatten();
        let subtitle_index = (!config.disable_subtitles)
            .then(|| demuxer.find_best_stream(MediaKind::Subtitle, config.stream_subtitle))
            .flatten();

        let (tx, events) = channel::unbounded();
        let state = Arc::new(PlayerState::new(config, source, tx));
        let mut player = Self {
            state,
            events,
            read_thread: None,
            audio: None,
            video: None,
            subtitle: None,
            refresh: VideoRefresh::new(),
            closed: false,
        };

        if let Some(index) = audio_index {
            match audio_output {
                Some(output) => {
                    player.audio = player.open_component(demuxer.as_ref(), index, Some(output))
                }
                None => warn!("no audio output, audio stream {} not played", index),
            }
        }
        if let Some(index) = video_index {
            player.video = player.open_component(demuxer.as_ref(), index, None);
            if player.video.is_some() {
                player.state.control().queue_attachments = true;
            }
        }
        if let Some(index) = subtitle_index {
            player.subtitle = player.open_component(demuxer.as_ref(), index, None);
        }
        if player.audio.is_none() && player.video.is_none() {
            // Dropping `player` closes the subtitle component, if any.
            return Err(PlayerError::NoStreams);
        }

        let read_loop = ReadLoop::new(Arc::clone(&player.state), demuxer);
        let handle = thread::Builder::new()
            .name("read".into())
            .spawn(move || read_loop.run())
            .map_err(|err| PlayerError::Thread(err.to_string()))?;
        player.read_thread = Some(handle);
        info!(
            master = %player.state.master_sync_type(),
            video = player.video.is_some(),
            audio = player.audio.is_some(),
            subtitle = player.subtitle.is_some(),
            "playback started"
        );
        Ok(player)
    }

    fn open_component(
        &self,
        demuxer: &dyn Demuxer,
        index: usize,
        output: Option<Box<dyn AudioOutput>>,
    ) -> Option<StreamComponent> {
        match self.try_open_component(demuxer, index, output) {
            Ok(component) => Some(component),
            Err(err) => {
                warn!("failed to open stream {}: {}", index, err);
                None
            }
        }
    }

    fn try_open_component(
        &self,
        demuxer: &dyn Demuxer,
        index: usize,
        output: Option<Box<dyn AudioOutput>>,
    ) -> Result<StreamComponent, PlayerError> {
        let info = demuxer
            .streams()
            .iter()
            .find(|info| info.index == index)
            .cloned()
            .ok_or(DemuxError::InvalidStreamIndex(index))?;
        let kind = info.kind();
        let codec = demuxer.open_decoder(index)?;
        let mut decoder = Decoder::new(kind, Arc::clone(&self.state), codec, info.time_base);

        let audio = match (&info.params, output) {
            (StreamParams::Audio { sample_rate, channels }, Some(mut output)) => {
                let params = output.open(AudioSpec {
                    sample_rate: *sample_rate,
                    channels: *channels,
                })?;
                decoder.set_start_pts(info.start_time, info.time_base);
                Some((output, params))
            }
            (StreamParams::Audio { .. }, None) => return Err(AudioOutputError::NoDevice.into()),
            _ => None,
        };

        let channel = self.state.channel(kind);
        channel.activate(info);
        let component = match StreamComponent::spawn(Arc::clone(&self.state), decoder) {
            Ok(component) => component,
            Err(err) => {
                channel.deactivate();
                if let Some((mut output, _)) = audio {
                    output.close();
                }
                return Err(PlayerError::Thread(err.to_string()));
            }
        };

        match audio {
            Some((mut output, params)) => {
                let renderer = AudioRenderer::new(Arc::clone(&self.state), params);
                if let Err(err) = output.start(renderer) {
                    output.close();
                    // Dropping the component stops its decode thread.
                    return Err(err.into());
                }
                Ok(component.with_output(output))
            }
            None => Ok(component),
        }
    }

    /// Run one refresh cycle and return the seconds until the next one is due.
    pub fn refresh(&mut self, sink: &mut dyn VideoSink) -> f64 {
        self.refresh_at(sink, relative_now())
    }

    /// [`Player::refresh`] at wall time `now`.
    pub fn refresh_at(&mut self, sink: &mut dyn VideoSink, now: f64) -> f64 {
        let mut remaining = REFRESH_RATE;
        let force_refresh = self.state.control().force_refresh;
        if !self.state.is_paused() || force_refresh {
            self.refresh.refresh_at(&self.state, sink, now, &mut remaining);
        }
        remaining
    }

    /// Process a user command
    pub fn process_command(&mut self, command: PlayerCommand) {
        match command {
            PlayerCommand::TogglePause => self.state.toggle_pause(),
            PlayerCommand::ToggleMute => self.state.toggle_mute(),
            PlayerCommand::VolumeUp => self.state.update_volume(1, VOLUME_STEP_DB),
            PlayerCommand::VolumeDown => self.state.update_volume(-1, VOLUME_STEP_DB),
            PlayerCommand::StepFrame => self.state.step_to_next_frame(),
            PlayerCommand::SeekRelative(incr) => self.seek_relative(incr),
            PlayerCommand::SeekChapter(incr) => self.seek_chapter(incr),
            PlayerCommand::Quit => self.close(),
        }
    }

    /// Seek `incr` seconds away from the current position.
    pub fn seek_relative(&self, incr: f64) {
        seek_relative_at(&self.state, incr, relative_now());
    }

    /// Jump `incr` chapters from the one containing the master clock.
    pub fn seek_chapter(&self, incr: i32) {
        seek_chapter_at(&self.state, incr, relative_now());
    }

    pub fn stats(&self) -> PlayerStats {
        self.state.stats()
    }

    /// Session notifications; `Quit` arrives at most once.
    pub fn events(&self) -> &Receiver<PlayerEvent> {
        &self.events
    }

    pub fn state(&self) -> &Arc<PlayerState> {
        &self.state
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Stop every thread and release the output device. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.state.request_abort();
        if let Some(handle) = self.read_thread.take() {
            if handle.join().is_err() {
                error!("read thread panicked");
            }
        }
        // Each guard aborts, joins and flushes its stream.
        drop(self.audio.take());
        drop(self.video.take());
        drop(self.subtitle.take());
        info!("playback closed");
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.close();
    }
}

/// Request a seek `incr` seconds from the position at wall time `now`.
///
/// Byte seeks start from the last shown video or audio frame, then from the
/// read position, and scale `incr` by the bit rate.
fn seek_relative_at(state: &PlayerState, incr: f64, now: f64) {
    if state.source.seek_by_bytes {
        let pos = [MediaKind::Video, MediaKind::Audio]
            .into_iter()
            .filter(|kind| state.channel(*kind).is_active())
            .map(|kind| state.channel(kind).frames.last_pos())
            .find(|pos| *pos >= 0)
            .unwrap_or_else(|| state.read_position());
        let rate = match state.source.bit_rate {
            Some(bits) if bits > 0 => bits as f64 / 8.0,
            _ => DEFAULT_BYTE_RATE,
        };
        let incr = incr * rate;
        state.request_seek(pos + incr as i64, incr as i64, true);
    } else {
        let mut pos = state.master_clock_at(now);
        if pos.is_nan() {
            pos = state.control().last_seek_pos as f64 / 1_000_000.0;
        }
        pos += incr;
        if let Some(start) = state.source.start_time {
            pos = pos.max(start);
        }
        state.request_seek(to_micros(pos), to_micros(incr), false);
    }
}

fn seek_chapter_at(state: &PlayerState, incr: i32, now: f64) {
    let chapters = &state.source.chapters;
    if chapters.is_empty() {
        return;
    }
    let pos = state.master_clock_at(now);
    let current = chapters
        .iter()
        .position(|chapter| pos < chapter.start_seconds())
        .map(|next| next as i64 - 1)
        .unwrap_or(chapters.len() as i64);
    let target = (current + incr as i64).max(0) as usize;
    let Some(chapter) = chapters.get(target) else {
        return;
    };
    info!("seeking to chapter {}", target);
    state.request_seek(rescale(chapter.start, chapter.time_base, Rational::MICROS), 0, false);
}

fn source_info(config: &PlayerConfig, demuxer: &dyn Demuxer) -> SourceInfo {
    let realtime = demuxer.is_realtime();
    SourceInfo {
        realtime,
        max_frame_duration: if demuxer.has_discontinuous_timestamps() {
            MAX_FRAME_DURATION_DISCONTINUOUS
        } else {
            MAX_FRAME_DURATION
        },
        seek_by_bytes: match config.seek_by_bytes {
            SeekByBytes::On => true,
            SeekByBytes::Off => false,
            SeekByBytes::Auto => demuxer.prefers_byte_seek(),
        },
        infinite_buffer: config.infinite_buffer.unwrap_or(realtime),
        start_time: demuxer.start_time(),
        bit_rate: demuxer.bit_rate(),
        chapters: demuxer.chapters().to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{Decoded, StreamDecoder, StreamInfo};
    use crate::demux::{Chapter, Packet};
    use crate::queue::Frame;

    /// Video-only source that never yields a packet.
    struct IdleDemuxer {
        streams: Vec<StreamInfo>,
    }

    struct IdleCodec;

    impl StreamDecoder for IdleCodec {
        fn send_packet(&mut self, _packet: &Packet) -> Result<(), DecodeError> {
            Ok(())
        }

        fn receive_frame(&mut self) -> Result<Decoded, DecodeError> {
            Ok(Decoded::Again)
        }

        fn flush(&mut self) {}
    }

    impl Demuxer for IdleDemuxer {
        fn streams(&self) -> &[StreamInfo] {
            &self.streams
        }

        fn read_packet(&mut self) -> Result<Option<Packet>, DemuxError> {
            Ok(None)
        }

        fn seek(&mut self, _target: SeekTarget) -> Result<(), DemuxError> {
            Ok(())
        }

        fn open_decoder(&self, _index: usize) -> Result<Box<dyn StreamDecoder>, DecodeError> {
            Ok(Box::new(IdleCodec))
        }
    }

    fn state_with(source: SourceInfo) -> PlayerState {
        let (tx, _rx) = channel::unbounded();
        PlayerState::new(PlayerConfig::default(), source, tx)
    }

    fn pending_seek(state: &PlayerState) -> Option<(i64, i64, bool)> {
        state
            .control()
            .seek
            .map(|seek| (seek.pos, seek.rel, seek.by_bytes))
    }

    #[test]
    fn test_relative_seek_from_master_clock() {
        let state = state_with(SourceInfo::default());
        state.extclk.set_at(12.0, 0, 100.0);
        seek_relative_at(&state, 10.0, 100.0);
        assert_eq!(pending_seek(&state), Some((22_000_000, 10_000_000, false)));
    }

    #[test]
    fn test_relative_seek_falls_back_to_last_target() {
        let state = state_with(SourceInfo::default());
        state.control().last_seek_pos = 3_000_000;
        seek_relative_at(&state, 5.0, 100.0);
        assert_eq!(pending_seek(&state), Some((8_000_000, 5_000_000, false)));
    }

    #[test]
    fn test_relative_seek_clamps_to_source_start() {
        let state = state_with(SourceInfo {
            start_time: Some(1.0),
            ..SourceInfo::default()
        });
        state.extclk.set_at(2.0, 0, 100.0);
        seek_relative_at(&state, -10.0, 100.0);
        assert_eq!(pending_seek(&state), Some((1_000_000, -10_000_000, false)));
    }

    #[test]
    fn test_byte_seek_starts_from_last_shown_frame() {
        let state = state_with(SourceInfo {
            seek_by_bytes: true,
            bit_rate: Some(800_000),
            ..SourceInfo::default()
        });
        let video = state.channel(MediaKind::Video);
        video.activate(StreamInfo::video(0, Rational::new(1, 1000), None));
        video.packets.start();
        let frame = Frame {
            pos: 5_000,
            serial: video.packets.serial(),
            ..Frame::default()
        };
        video.frames.peek_writable().unwrap().push(frame);
        video.frames.next();

        seek_relative_at(&state, 2.0, 0.0);
        assert_eq!(pending_seek(&state), Some((205_000, 200_000, true)));
    }

    #[test]
    fn test_byte_seek_without_frames_uses_read_position() {
        let state = state_with(SourceInfo {
            seek_by_bytes: true,
            ..SourceInfo::default()
        });
        state.set_read_position(1_000);
        seek_relative_at(&state, 1.0, 0.0);
        assert_eq!(pending_seek(&state), Some((181_000, 180_000, true)));
    }

    #[test]
    fn test_chapter_seek_picks_neighbouring_chapter() {
        let tb = Rational::new(1, 1000);
        let chapters = vec![
            Chapter { start: 0, time_base: tb },
            Chapter { start: 60_000, time_base: tb },
            Chapter { start: 120_000, time_base: tb },
        ];
        let source = SourceInfo {
            chapters,
            ..SourceInfo::default()
        };
        let cases = [
            (70.0, 1, Some(120_000_000)),
            (70.0, -1, Some(0)),
            (70.0, 2, None),
            (130.0, -1, Some(120_000_000)),
            (130.0, 1, None),
            (10.0, -5, Some(0)),
        ];
        for (clock, incr, expected) in cases {
            let state = state_with(source.clone());
            state.extclk.set_at(clock, 0, 100.0);
            seek_chapter_at(&state, incr, 100.0);
            assert_eq!(
                pending_seek(&state).map(|(pos, _, _)| pos),
                expected,
                "clock {clock}, incr {incr}"
            );
        }
    }

    #[test]
    fn test_commands_drive_the_session() {
        let demuxer = IdleDemuxer {
            streams: vec![StreamInfo::video(0, Rational::new(1, 1000), None)],
        };
        let mut player = Player::open(PlayerConfig::default(), Box::new(demuxer), None).unwrap();

        player.process_command(PlayerCommand::TogglePause);
        assert!(player.state().is_paused());
        player.process_command(PlayerCommand::TogglePause);
        assert!(!player.state().is_paused());

        let volume = player.state().volume();
        player.process_command(PlayerCommand::VolumeDown);
        assert!(player.state().volume() < volume);
        player.process_command(PlayerCommand::VolumeUp);
        assert_eq!(player.state().volume(), volume);

        player.process_command(PlayerCommand::ToggleMute);
        assert!(player.state().is_muted());

        player.process_command(PlayerCommand::StepFrame);
        assert!(player.state().control().step);

        player.process_command(PlayerCommand::SeekRelative(5.0));
        assert_eq!(player.state().control().last_seek_pos, 5_000_000);

        player.process_command(PlayerCommand::Quit);
        assert!(player.is_closed());
    }
}
