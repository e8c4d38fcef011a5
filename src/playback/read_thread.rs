//! Demux thread.
//!
//! Pulls packets from the [`Demuxer`] and routes them to the packet queues.
//! Owns seeking: a seek flushes every packet queue, which bumps their serials
//! and makes all in-flight data of the old position stale downstream.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::core::time::{from_micros, ticks_to_seconds, to_micros};
use crate::core::MediaKind;
use crate::decode::StreamInfo;
use crate::demux::{DemuxError, Demuxer, Packet, SeekTarget};
use crate::playback::engine::{PlayerEvent, QuitReason};
use crate::playback::state::{PlayerState, SeekRequest};

/// Back-off while the queues are full or the source is exhausted.
pub const READ_WAIT: Duration = Duration::from_millis(10);

/// Outcome of one read loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pump {
    /// A packet was read or routed.
    Continue,
    /// A seek was performed and the queues flushed.
    Seeked,
    /// Nothing to do until woken or [`READ_WAIT`] passes.
    Wait,
    Exit,
}

/// Read loop state
pub struct ReadLoop {
    state: Arc<PlayerState>,
    demuxer: Box<dyn Demuxer>,
    /// Streams routed to each channel, fixed for the session.
    routes: Vec<(MediaKind, StreamInfo)>,
    last_paused: bool,
    eof: bool,
    /// 0 loops forever.
    loops_left: u32,
}

impl ReadLoop {
    pub fn new(state: Arc<PlayerState>, demuxer: Box<dyn Demuxer>) -> Self {
        let routes = MediaKind::ALL
            .iter()
            .filter_map(|kind| state.channel(*kind).stream().map(|info| (*kind, info)))
            .collect();
        let loops_left = state.config.loop_count;
        Self {
            state,
            demuxer,
            routes,
            last_paused: false,
            eof: false,
            loops_left,
        }
    }

    /// Run until abort, autoexit or a fatal read error.
    pub fn run(mut self) {
        loop {
            match self.pump_once() {
                Pump::Exit => break,
                Pump::Wait => self.state.wait_for_read_wakeup(READ_WAIT),
                Pump::Continue | Pump::Seeked => {}
            }
        }
        debug!("read thread exiting");
    }

    pub fn pump_once(&mut self) -> Pump {
        let state = Arc::clone(&self.state);
        if state.abort_requested() {
            return Pump::Exit;
        }

        let paused = state.is_paused();
        if paused != self.last_paused {
            self.last_paused = paused;
            if paused {
                let result = self.demuxer.pause();
                state.control().read_pause_unsupported =
                    matches!(result, Err(DemuxError::Unsupported));
            } else if let Err(err) = self.demuxer.play() {
                if !matches!(err, DemuxError::Unsupported) {
                    warn!("resume hint failed: {}", err);
                }
            }
        }
        if paused && state.source.realtime {
            return Pump::Wait;
        }

        let pending_seek = state.control().seek;
        if let Some(request) = pending_seek {
            self.seek(request);
            return Pump::Seeked;
        }

        let queue_attachments = std::mem::take(&mut state.control().queue_attachments);
        if queue_attachments {
            self.queue_attachments();
        }

        if !state.source.infinite_buffer && state.queues_full() {
            return Pump::Wait;
        }

        if !paused
            && state.channel(MediaKind::Audio).is_drained()
            && state.channel(MediaKind::Video).is_drained()
        {
            if self.loops_left != 1 && (self.loops_left == 0 || self.decrement_loops()) {
                let start = state.config.start_time.unwrap_or(0.0);
                info!(start, "restarting playback");
                state.request_seek(to_micros(start), 0, false);
            } else if state.config.autoexit {
                state.signal_quit(QuitReason::EndOfPlayback);
                return Pump::Exit;
            }
        }

        match self.demuxer.read_packet() {
            Ok(Some(packet)) => {
                self.eof = false;
                if let Some(pos) = self.demuxer.byte_position() {
                    state.set_read_position(pos);
                }
                self.route(packet);
                Pump::Continue
            }
            Ok(None) => {
                if !self.eof {
                    debug!("end of source");
                    self.queue_null_packets();
                    self.eof = true;
                }
                Pump::Wait
            }
            Err(err) => {
                error!("read error: {}", err);
                if !self.eof {
                    self.queue_null_packets();
                    self.eof = true;
                }
                if state.config.autoexit {
                    state.signal_quit(QuitReason::Failed(err.to_string()));
                } else {
                    state.post_event(PlayerEvent::Error(err.to_string()));
                }
                Pump::Exit
            }
        }
    }

    /// True while more loops remain after decrementing.
    fn decrement_loops(&mut self) -> bool {
        self.loops_left -= 1;
        self.loops_left != 0
    }

    fn seek(&mut self, request: SeekRequest) {
        let state = &self.state;
        let target = SeekTarget::new(request.pos, request.rel, request.by_bytes);
        match self.demuxer.seek(target) {
            Ok(()) => {
                for kind in MediaKind::ALL {
                    let channel = state.channel(kind);
                    if channel.is_active() {
                        channel.packets.flush();
                    }
                }
                let external = if request.by_bytes {
                    f64::NAN
                } else {
                    from_micros(request.pos)
                };
                state.extclk.set(external, 0);
                debug!(pos = request.pos, by_bytes = request.by_bytes, "seek done");
            }
            Err(err) => {
                error!("seek to {} failed: {}", request.pos, err);
                state.post_event(PlayerEvent::Error(err.to_string()));
            }
        }
        {
            let mut control = state.control();
            control.seek = None;
            control.queue_attachments = true;
        }
        self.eof = false;
        if state.is_paused() {
            state.step_to_next_frame();
        }
    }

    fn queue_attachments(&mut self) {
        let Some((_, info)) = self
            .routes
            .iter()
            .find(|(kind, info)| *kind == MediaKind::Video && info.attached_picture)
        else {
            return;
        };
        let Some(packet) = self.demuxer.attached_picture(info.index) else {
            return;
        };
        let video = &self.state.channel(MediaKind::Video).packets;
        if video.put(packet).is_ok() {
            // Null packet so the decoder emits the picture right away.
            let _ = video.put_null(info.index);
        }
    }

    fn queue_null_packets(&self) {
        for (kind, info) in &self.routes {
            // An aborted queue is shutting down anyway.
            let _ = self.state.channel(*kind).packets.put_null(info.index);
        }
    }

    fn in_play_range(&self, packet: &Packet, info: &StreamInfo) -> bool {
        let (Some(duration), Some(ts)) = (self.state.config.duration, packet.timestamp()) else {
            return true;
        };
        let stream_start = info.start_time.unwrap_or(0);
        let start = self.state.config.start_time.unwrap_or(0.0);
        ticks_to_seconds(ts - stream_start, info.time_base) - start <= duration
    }

    fn route(&self, packet: Packet) {
        let Some((kind, info)) = self
            .routes
            .iter()
            .find(|(_, info)| info.index == packet.stream_index)
        else {
            return;
        };
        if !self.in_play_range(&packet, info) {
            return;
        }
        if *kind == MediaKind::Video && info.attached_picture {
            return;
        }
        // Put only fails on abort, which the next iteration observes.
        let _ = self.state.channel(*kind).packets.put(packet);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlayerConfig;
    use crate::core::time::Rational;
    use crate::decode::{DecodeError, StreamDecoder};
    use crate::playback::state::SourceInfo;
    use crossbeam::channel;
    use std::collections::VecDeque;

    struct ScriptDemuxer {
        streams: Vec<StreamInfo>,
        packets: VecDeque<Packet>,
        seeks: Arc<parking_lot::Mutex<Vec<SeekTarget>>>,
    }

    impl Demuxer for ScriptDemuxer {
        fn streams(&self) -> &[StreamInfo] {
            &self.streams
        }

        fn read_packet(&mut self) -> Result<Option<Packet>, DemuxError> {
            Ok(self.packets.pop_front())
        }

        fn seek(&mut self, target: SeekTarget) -> Result<(), DemuxError> {
            self.seeks.lock().push(target);
            Ok(())
        }

        fn open_decoder(&self, index: usize) -> Result<Box<dyn StreamDecoder>, DecodeError> {
            Err(DecodeError::Unsupported(index))
        }
    }

    fn setup(config: PlayerConfig, packets: Vec<Packet>) -> (Arc<PlayerState>, ReadLoop) {
        let (tx, _rx) = channel::unbounded();
        let state = Arc::new(PlayerState::new(config, SourceInfo::default(), tx));
        let streams = vec![
            StreamInfo::video(0, Rational::new(1, 1000), Some(Rational::new(25, 1))),
            StreamInfo::audio(1, Rational::new(1, 1000), 48_000, 2),
        ];
        for info in &streams {
            let channel = state.channel(info.kind());
            channel.activate(info.clone());
            channel.packets.start();
        }
        let demuxer = ScriptDemuxer {
            streams,
            packets: packets.into(),
            seeks: Arc::default(),
        };
        let read = ReadLoop::new(Arc::clone(&state), Box::new(demuxer));
        (state, read)
    }

    #[test]
    fn test_routes_packets_by_stream() {
        let packets = vec![
            Packet::new(0, vec![1]).with_pts(0),
            Packet::new(1, vec![2]).with_pts(0),
            Packet::new(7, vec![3]).with_pts(0),
        ];
        let (state, mut read) = setup(PlayerConfig::default(), packets);
        for _ in 0..3 {
            assert_eq!(read.pump_once(), Pump::Continue);
        }
        assert_eq!(state.channel(MediaKind::Video).packets.nb_packets(), 1);
        assert_eq!(state.channel(MediaKind::Audio).packets.nb_packets(), 1);
    }

    #[test]
    fn test_eof_queues_one_null_packet_per_stream() {
        let (state, mut read) = setup(PlayerConfig::default(), Vec::new());
        assert_eq!(read.pump_once(), Pump::Wait);
        assert_eq!(read.pump_once(), Pump::Wait);
        for kind in [MediaKind::Video, MediaKind::Audio] {
            let packets = &state.channel(kind).packets;
            assert_eq!(packets.nb_packets(), 1);
            assert!(packets.get(false).unwrap().unwrap().packet.is_null());
        }
    }

    #[test]
    fn test_play_range_discards_late_packets() {
        let config = PlayerConfig {
            duration: Some(1.0),
            ..PlayerConfig::default()
        };
        let packets = vec![
            Packet::new(1, vec![0]).with_pts(500),
            Packet::new(1, vec![0]).with_pts(1500),
        ];
        let (state, mut read) = setup(config, packets);
        read.pump_once();
        read.pump_once();
        assert_eq!(state.channel(MediaKind::Audio).packets.nb_packets(), 1);
    }

    #[test]
    fn test_autoexit_when_drained() {
        let config = PlayerConfig {
            autoexit: true,
            ..PlayerConfig::default()
        };
        let (state, mut read) = setup(config, Vec::new());
        for kind in [MediaKind::Video, MediaKind::Audio] {
            let channel = state.channel(kind);
            channel.set_finished(channel.packets.serial());
        }
        assert_eq!(read.pump_once(), Pump::Exit);
    }

    #[test]
    fn test_loop_requests_restart_seek() {
        let config = PlayerConfig {
            loop_count: 2,
            start_time: Some(3.0),
            ..PlayerConfig::default()
        };
        let (state, mut read) = setup(config, Vec::new());
        for kind in [MediaKind::Video, MediaKind::Audio] {
            let channel = state.channel(kind);
            channel.set_finished(channel.packets.serial());
        }
        read.pump_once();
        assert_eq!(state.control().seek.map(|s| s.pos), Some(3_000_000));
        assert_eq!(read.pump_once(), Pump::Seeked);
        // The seek flushed the queues, so the streams are no longer drained
        // and the last loop is still pending.
        assert_eq!(read.loops_left, 1);
    }
}
