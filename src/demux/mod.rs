//! Demuxer collaborator contract.
//!
//! The engine does not parse containers. A [`Demuxer`] hands it packets, seeks
//! on request, and builds the [`StreamDecoder`] for each stream it exposes.

pub mod packet;

pub use packet::Packet;

use crate::core::MediaKind;
use crate::core::time::Rational;
use crate::decode::{DecodeError, StreamDecoder, StreamInfo};

/// Error type for demuxing operations
#[derive(Debug, thiserror::Error)]
pub enum DemuxError {
    #[error("I/O error: {0}")]
    Io(String),
    #[error("Seek failed: {0}")]
    SeekFailed(String),
    #[error("Operation not supported by this source")]
    Unsupported,
    #[error("Invalid stream index: {0}")]
    InvalidStreamIndex(usize),
}

/// A positional seek request.
///
/// `target`, `min` and `max` are microseconds for time seeks and byte
/// offsets when `by_bytes` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekTarget {
    pub target: i64,
    pub min: i64,
    pub max: i64,
    pub by_bytes: bool,
}

impl SeekTarget {
    /// Build the bounded window for a seek of `rel` relative to the old
    /// position: forward seeks may not land before the old position, backward
    /// seeks may not land after it.
    pub fn new(pos: i64, rel: i64, by_bytes: bool) -> Self {
        let min = if rel > 0 { pos - rel + 2 } else { i64::MIN };
        let max = if rel < 0 { pos - rel - 2 } else { i64::MAX };
        Self {
            target: pos,
            min,
            max,
            by_bytes,
        }
    }
}

/// A chapter mark.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Chapter {
    pub start: i64,
    pub time_base: Rational,
}

impl Chapter {
    pub fn start_seconds(&self) -> f64 {
        crate::core::time::ticks_to_seconds(self.start, self.time_base)
    }
}

/// Source of compressed packets.
pub trait Demuxer: Send {
    /// Stream table of the opened source.
    fn streams(&self) -> &[StreamInfo];

    /// Read the next packet; `Ok(None)` at end of stream.
    fn read_packet(&mut self) -> Result<Option<Packet>, DemuxError>;

    fn seek(&mut self, target: SeekTarget) -> Result<(), DemuxError>;

    /// Network pause hint.
    fn pause(&mut self) -> Result<(), DemuxError> {
        Err(DemuxError::Unsupported)
    }

    /// Network resume hint.
    fn play(&mut self) -> Result<(), DemuxError> {
        Err(DemuxError::Unsupported)
    }

    /// Build a decoder for stream `index`.
    fn open_decoder(&self, index: usize) -> Result<Box<dyn StreamDecoder>, DecodeError>;

    fn chapters(&self) -> &[Chapter] {
        &[]
    }

    /// Source start time in seconds.
    fn start_time(&self) -> Option<f64> {
        None
    }

    /// Container bit rate in bits per second.
    fn bit_rate(&self) -> Option<u64> {
        None
    }

    /// RTP/RTSP/UDP style live sources.
    fn is_realtime(&self) -> bool {
        false
    }

    /// Formats whose timestamps may jump (e.g. MPEG-TS).
    fn has_discontinuous_timestamps(&self) -> bool {
        false
    }

    /// Formats that seek better by byte offset.
    fn prefers_byte_seek(&self) -> bool {
        false
    }

    /// Current read offset in bytes.
    fn byte_position(&self) -> Option<i64> {
        None
    }

    /// Cover-art packet for streams that carry a single attached picture.
    fn attached_picture(&self, _index: usize) -> Option<Packet> {
        None
    }

    /// Best stream of `kind`, honouring a wanted index when it matches.
    fn find_best_stream(&self, kind: MediaKind, wanted: Option<usize>) -> Option<usize> {
        let streams = self.streams();
        if let Some(index) = wanted {
            if streams.iter().any(|s| s.index == index && s.kind() == kind) {
                return Some(index);
            }
        }
        streams.iter().find(|s| s.kind() == kind).map(|s| s.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seek_target_windows() {
        let forward = SeekTarget::new(20_000_000, 10_000_000, false);
        assert_eq!(forward.min, 10_000_002);
        assert_eq!(forward.max, i64::MAX);

        let backward = SeekTarget::new(5_000_000, -10_000_000, false);
        assert_eq!(backward.min, i64::MIN);
        assert_eq!(backward.max, 14_999_998);

        let absolute = SeekTarget::new(0, 0, true);
        assert_eq!((absolute.min, absolute.max), (i64::MIN, i64::MAX));
        assert!(absolute.by_bytes);
    }

    #[test]
    fn test_null_packet() {
        let packet = Packet::null(3);
        assert!(packet.is_null());
        assert_eq!(packet.stream_index, 3);
        assert_eq!(Packet::new(0, vec![1]).with_dts(7).timestamp(), Some(7));
    }
}
