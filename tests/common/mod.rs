//! In-memory collaborators for driving whole sessions.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use avsync::audio::{AudioOutput, AudioOutputError, AudioParams, AudioRenderer, AudioSamples, AudioSpec};
use avsync::core::time::Rational;
use avsync::core::MediaKind;
use avsync::decode::{DecodeError, Decoded, Picture, RawFrame, StreamDecoder, StreamInfo};
use avsync::demux::{DemuxError, Demuxer, Packet, SeekTarget};
use parking_lot::Mutex;

/// Demuxer replaying a fixed packet list.
pub struct ScriptedDemuxer {
    pub streams: Vec<StreamInfo>,
    pub packets: VecDeque<Packet>,
    pub seeks: Arc<Mutex<Vec<SeekTarget>>>,
}

impl ScriptedDemuxer {
    pub fn new(streams: Vec<StreamInfo>, packets: Vec<Packet>) -> Self {
        Self {
            streams,
            packets: packets.into(),
            seeks: Arc::default(),
        }
    }
}

impl Demuxer for ScriptedDemuxer {
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
        let info = self
            .streams
            .iter()
            .find(|info| info.index == index)
            .ok_or(DecodeError::Unsupported(index))?;
        Ok(Box::new(ScriptedDecoder::new(info.clone())))
    }
}

/// Decoder turning every packet into one frame stamped with the packet PTS.
pub struct ScriptedDecoder {
    info: StreamInfo,
    pending: VecDeque<Option<i64>>,
    draining: bool,
}

impl ScriptedDecoder {
    pub fn new(info: StreamInfo) -> Self {
        Self {
            info,
            pending: VecDeque::new(),
            draining: false,
        }
    }

    fn frame(&self, pts: Option<i64>) -> RawFrame {
        let mut frame = match self.info.kind() {
            MediaKind::Audio => RawFrame::audio(AudioSamples::silence(48_000, 2, 480)),
            _ => RawFrame::picture(Picture {
                width: 16,
                height: 16,
                ..Picture::default()
            }),
        };
        frame.pts = pts;
        frame.time_base = self.info.time_base;
        frame
    }
}

impl StreamDecoder for ScriptedDecoder {
    fn send_packet(&mut self, packet: &Packet) -> Result<(), DecodeError> {
        if packet.is_null() {
            self.draining = true;
        } else {
            self.pending.push_back(packet.pts);
        }
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<Decoded, DecodeError> {
        if let Some(pts) = self.pending.pop_front() {
            return Ok(Decoded::Frame(self.frame(pts)));
        }
        if self.draining {
            self.draining = false;
            return Ok(Decoded::Eof);
        }
        Ok(Decoded::Again)
    }

    fn flush(&mut self) {
        self.pending.clear();
        self.draining = false;
    }
}

/// Audio output that never calls back; tests pull samples themselves.
#[derive(Default)]
pub struct SilentOutput {
    pub renderer: Option<AudioRenderer>,
    pub closed: bool,
}

impl AudioOutput for SilentOutput {
    fn open(&mut self, wanted: AudioSpec) -> Result<AudioParams, AudioOutputError> {
        Ok(AudioParams::new(
            wanted.sample_rate,
            wanted.channels,
            wanted.buffer_frames(),
        ))
    }

    fn start(&mut self, renderer: AudioRenderer) -> Result<(), AudioOutputError> {
        self.renderer = Some(renderer);
        Ok(())
    }

    fn close(&mut self) {
        self.renderer = None;
        self.closed = true;
    }
}

pub fn video_stream(index: usize, fps: i32) -> StreamInfo {
    StreamInfo::video(index, Rational::new(1, 1000), Some(Rational::new(fps, 1)))
}

pub fn audio_stream(index: usize) -> StreamInfo {
    StreamInfo::audio(index, Rational::new(1, 1000), 48_000, 2)
}

/// `count` packets for `stream_index`, `step_ms` apart.
pub fn packets(stream_index: usize, count: usize, step_ms: i64) -> Vec<Packet> {
    (0..count)
        .map(|i| {
            Packet::new(stream_index, vec![0; 64])
                .with_pts(i as i64 * step_ms)
                .with_duration(step_ms)
        })
        .collect()
}
