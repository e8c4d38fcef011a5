//! Compressed packets as handed from the demuxer to the packet queues.

/// A compressed packet for one stream.
///
/// A packet with no payload is the "null" packet pushed at end of stream so
/// a decoder can drain deterministically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Packet {
    pub stream_index: usize,
    /// Presentation timestamp in stream time base ticks.
    pub pts: Option<i64>,
    /// Decode timestamp in stream time base ticks.
    pub dts: Option<i64>,
    /// Duration in stream time base ticks, 0 when unknown.
    pub duration: i64,
    /// Byte offset in the source, -1 when unknown.
    pub pos: i64,
    pub data: Vec<u8>,
}

impl Packet {
    pub fn new(stream_index: usize, data: Vec<u8>) -> Self {
        Self {
            stream_index,
            pts: None,
            dts: None,
            duration: 0,
            pos: -1,
            data,
        }
    }

    /// End-of-stream marker for `stream_index`.
    pub fn null(stream_index: usize) -> Self {
        Self::new(stream_index, Vec::new())
    }

    pub fn with_pts(mut self, pts: i64) -> Self {
        self.pts = Some(pts);
        self
    }

    pub fn with_dts(mut self, dts: i64) -> Self {
        self.dts = Some(dts);
        self
    }

    pub fn with_duration(mut self, duration: i64) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_pos(mut self, pos: i64) -> Self {
        self.pos = pos;
        self
    }

    pub fn is_null(&self) -> bool {
        self.data.is_empty()
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Timestamp used for play range checks: PTS, falling back to DTS.
    pub fn timestamp(&self) -> Option<i64> {
        self.pts.or(self.dts)
    }
}
