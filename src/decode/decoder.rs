//! Per-stream decode driver.
//!
//! The codec itself is a [`StreamDecoder`] collaborator. [`Decoder`] pulls
//! packets from its stream's packet queue, tracks the serial of the packet in
//! flight, flushes the codec whenever that serial changes, and stamps decoded
//! frames with a best-effort timestamp.

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::audio::buffer::AudioSamples;
use crate::config::PtsReorder;
use crate::core::time::{rescale, ticks_to_seconds, Rational, Time};
use crate::core::MediaKind;
use crate::demux::Packet;
use crate::playback::state::PlayerState;
use crate::queue::QueueAborted;

/// Error type for decoding operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    /// The codec rejected one packet; decoding continues.
    #[error("Invalid data: {0}")]
    InvalidData(String),
    /// The codec cannot take input until output is drained.
    #[error("Decoder input is full")]
    Again,
    #[error("Decoder failure: {0}")]
    Fatal(String),
    #[error("No decoder for stream {0}")]
    Unsupported(usize),
    #[error("Decoding aborted")]
    Aborted(#[from] QueueAborted),
}

impl DecodeError {
    /// Errors that terminate the decode thread.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DecodeError::Fatal(_) | DecodeError::Unsupported(_))
    }
}

/// A decoded picture.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Picture {
    pub width: u32,
    pub height: u32,
    /// Backend pixel format id.
    pub format: i32,
    pub sample_aspect_ratio: Rational,
    /// Packed plane data, opaque to the engine.
    pub planes: Vec<Vec<u8>>,
    pub strides: Vec<usize>,
}

/// One region of a subtitle.
#[derive(Debug, Clone, PartialEq)]
pub enum SubtitleRect {
    Text(String),
    Ass(String),
    Bitmap {
        x: i32,
        y: i32,
        width: u32,
        height: u32,
        data: Vec<u8>,
    },
}

/// A decoded subtitle. Display times are relative to `pts`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SubtitleUnit {
    /// Presentation time in microseconds.
    pub pts: Option<i64>,
    pub start_display_ms: u32,
    pub end_display_ms: u32,
    /// 0 for bitmap subtitles, 1 for text.
    pub format: u16,
    pub rects: Vec<SubtitleRect>,
}

/// Payload of a frame coming out of a codec.
#[derive(Debug, Clone, PartialEq)]
pub enum RawFrameData {
    Picture(Picture),
    Audio(AudioSamples),
}

/// A frame coming out of a [`StreamDecoder`].
///
/// Timestamps are in `time_base` ticks.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    pub pts: Option<i64>,
    pub pkt_dts: Option<i64>,
    pub best_effort_timestamp: Option<i64>,
    /// Byte position of the source packet, -1 when unknown.
    pub pos: i64,
    pub time_base: Rational,
    pub data: RawFrameData,
}

impl RawFrame {
    pub fn picture(picture: Picture) -> Self {
        Self {
            pts: None,
            pkt_dts: None,
            best_effort_timestamp: None,
            pos: -1,
            time_base: Rational::default(),
            data: RawFrameData::Picture(picture),
        }
    }

    pub fn audio(samples: AudioSamples) -> Self {
        Self {
            pts: None,
            pkt_dts: None,
            best_effort_timestamp: None,
            pos: -1,
            time_base: Rational::default(),
            data: RawFrameData::Audio(samples),
        }
    }

    pub fn with_pts(mut self, pts: i64) -> Self {
        self.pts = Some(pts);
        self
    }

    /// PTS in seconds, NaN when unknown.
    pub fn seconds(&self) -> Time {
        match self.pts {
            Some(pts) => ticks_to_seconds(pts, self.time_base),
            None => f64::NAN,
        }
    }

    /// Samples per channel for audio frames, 0 otherwise.
    pub fn nb_samples(&self) -> usize {
        match &self.data {
            RawFrameData::Audio(samples) => samples.sample_count(),
            RawFrameData::Picture(_) => 0,
        }
    }
}

/// Result of asking a codec for output.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Frame(RawFrame),
    /// Needs more input.
    Again,
    /// Fully drained after a null packet.
    Eof,
}

/// Codec collaborator for one stream.
///
/// Audio and video use the send/receive pair; subtitles are one packet in,
/// at most one unit out.
pub trait StreamDecoder: Send {
    /// Feed one packet. A null packet starts draining.
    fn send_packet(&mut self, packet: &Packet) -> Result<(), DecodeError>;

    fn receive_frame(&mut self) -> Result<Decoded, DecodeError>;

    fn decode_subtitle(&mut self, _packet: &Packet) -> Result<Option<SubtitleUnit>, DecodeError> {
        Ok(None)
    }

    /// Drop buffered codec state.
    fn flush(&mut self);
}

/// What one [`Decoder::decode_frame`] call produced.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeOutcome {
    Frame(RawFrame),
    Subtitle(SubtitleUnit),
    /// The codec drained completely for the current serial.
    Eof,
}

/// Stream decode driver
pub struct Decoder {
    kind: MediaKind,
    state: Arc<PlayerState>,
    codec: Box<dyn StreamDecoder>,
    time_base: Rational,
    reorder: PtsReorder,
    pending: Option<Packet>,
    pkt_serial: i32,
    start_pts: Option<i64>,
    start_pts_tb: Rational,
    next_pts: Option<i64>,
    next_pts_tb: Rational,
}

impl Decoder {
    pub fn new(
        kind: MediaKind,
        state: Arc<PlayerState>,
        codec: Box<dyn StreamDecoder>,
        time_base: Rational,
    ) -> Self {
        let reorder = state.config.reorder_pts;
        Self {
            kind,
            state,
            codec,
            time_base,
            reorder,
            pending: None,
            pkt_serial: -1,
            start_pts: None,
            start_pts_tb: Rational::default(),
            next_pts: None,
            next_pts_tb: Rational::default(),
        }
    }

    /// Seed timestamp reconstruction for sources whose first frames lack PTS.
    pub fn set_start_pts(&mut self, pts: Option<i64>, time_base: Rational) {
        self.start_pts = pts;
        self.start_pts_tb = time_base;
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Serial of the packet most recently fed to the codec.
    pub fn pkt_serial(&self) -> i32 {
        self.pkt_serial
    }

    /// Decode until one frame, one subtitle or end of stream is available.
    ///
    /// Packets of stale serials are dropped without reaching the codec.
    /// Returns `DecodeError::Aborted` once the packet queue is aborted and
    /// propagates fatal codec errors.
    pub fn decode_frame(&mut self) -> Result<DecodeOutcome, DecodeError> {
        let state = Arc::clone(&self.state);
        let channel = state.channel(self.kind);
        loop {
            if channel.packets.serial() == self.pkt_serial && self.kind != MediaKind::Subtitle {
                loop {
                    if channel.packets.is_aborted() {
                        return Err(QueueAborted.into());
                    }
                    match self.codec.receive_frame() {
                        Ok(Decoded::Frame(frame)) => return Ok(DecodeOutcome::Frame(self.stamp(frame))),
                        Ok(Decoded::Eof) => {
                            channel.set_finished(self.pkt_serial);
                            self.codec.flush();
                            return Ok(DecodeOutcome::Eof);
                        }
                        Ok(Decoded::Again) => break,
                        Err(err) if err.is_fatal() => return Err(err),
                        Err(err) => {
                            warn!("{} decoder: {}", self.kind, err);
                            break;
                        }
                    }
                }
            }

            let packet = self.next_packet()?;

            if self.kind == MediaKind::Subtitle {
                match self.codec.decode_subtitle(&packet) {
                    Ok(Some(unit)) => {
                        // Keep draining until the codec has nothing left.
                        if packet.is_null() {
                            self.pending = Some(packet);
                        }
                        return Ok(DecodeOutcome::Subtitle(unit));
                    }
                    Ok(None) if packet.is_null() => {
                        channel.set_finished(self.pkt_serial);
                        self.codec.flush();
                        return Ok(DecodeOutcome::Eof);
                    }
                    Ok(None) => {}
                    Err(err) if err.is_fatal() => return Err(err),
                    Err(err) => warn!("subtitle decoder: {}", err),
                }
                continue;
            }

            match self.codec.send_packet(&packet) {
                Ok(()) => {}
                Err(DecodeError::Again) => {
                    error!("{} decoder refused input while output was pending", self.kind);
                    self.pending = Some(packet);
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => warn!("{} decoder dropped packet: {}", self.kind, err),
            }
        }
    }

    /// Next packet of the live serial, resending a pending one first.
    fn next_packet(&mut self) -> Result<Packet, DecodeError> {
        let channel = self.state.channel(self.kind);
        loop {
            if channel.packets.nb_packets() == 0 {
                self.state.wake_read_thread();
            }
            let packet = match self.pending.take() {
                Some(packet) => packet,
                None => {
                    let Some(queued) = channel.packets.get(true)? else {
                        continue;
                    };
                    let old_serial = self.pkt_serial;
                    self.pkt_serial = queued.serial;
                    if old_serial != self.pkt_serial {
                        debug!("{} decoder: new serial {}", self.kind, self.pkt_serial);
                        self.codec.flush();
                        channel.set_finished(0);
                        self.next_pts = self.start_pts;
                        self.next_pts_tb = self.start_pts_tb;
                    }
                    queued.packet
                }
            };
            if channel.packets.serial() == self.pkt_serial {
                return Ok(packet);
            }
        }
    }

    fn stamp(&mut self, mut frame: RawFrame) -> RawFrame {
        match self.kind {
            MediaKind::Video => {
                frame.time_base = self.time_base;
                frame.pts = match self.reorder {
                    PtsReorder::Auto => frame.best_effort_timestamp.or(frame.pts).or(frame.pkt_dts),
                    PtsReorder::Decoder => frame.pts,
                    PtsReorder::Packet => frame.pkt_dts,
                };
            }
            MediaKind::Audio => {
                let sample_rate = match &frame.data {
                    RawFrameData::Audio(samples) => samples.sample_rate,
                    RawFrameData::Picture(_) => 0,
                };
                if sample_rate == 0 {
                    return frame;
                }
                let tb = Rational::new(1, sample_rate as i32);
                let source_tb = if frame.time_base.is_valid() {
                    frame.time_base
                } else {
                    self.time_base
                };
                frame.pts = match (frame.pts, self.next_pts) {
                    (Some(pts), _) => Some(rescale(pts, source_tb, tb)),
                    (None, Some(next)) => Some(rescale(next, self.next_pts_tb, tb)),
                    (None, None) => None,
                };
                frame.time_base = tb;
                if let Some(pts) = frame.pts {
                    self.next_pts = Some(pts + frame.nb_samples() as i64);
                    self.next_pts_tb = tb;
                }
            }
            MediaKind::Subtitle => {}
        }
        frame
    }
}
