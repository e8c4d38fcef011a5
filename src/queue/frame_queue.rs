//! Fixed-capacity ring of decoded frames for one stream.
//!
//! One decoder thread writes, one output loop reads. With keep-last enabled
//! the frame at `rindex` stays readable after it has been shown, so the
//! refresh loop can redisplay it until the next frame is due.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::audio::buffer::AudioSamples;
use crate::core::time::{Rational, Time};
use crate::decode::{Picture, SubtitleUnit};
use crate::queue::QueueStatus;

/// Payload of a decoded frame. Cloning shares the underlying buffer.
#[derive(Debug, Clone, Default)]
pub enum FrameData {
    #[default]
    Empty,
    Picture(Arc<Picture>),
    Audio(Arc<AudioSamples>),
    Subtitle(Arc<SubtitleUnit>),
}

/// A decoded frame with its presentation metadata.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    /// Presentation time in seconds, NaN when unknown.
    pub pts: Time,
    /// Estimated duration in seconds.
    pub duration: f64,
    /// Byte position of the source packet, -1 when unknown.
    pub pos: i64,
    pub serial: i32,
    pub width: u32,
    pub height: u32,
    pub format: i32,
    pub uploaded: bool,
    pub sar: Rational,
    pub data: FrameData,
}

impl Frame {
    pub fn picture(&self) -> Option<&Picture> {
        match &self.data {
            FrameData::Picture(picture) => Some(picture),
            _ => None,
        }
    }

    pub fn audio(&self) -> Option<&Arc<AudioSamples>> {
        match &self.data {
            FrameData::Audio(samples) => Some(samples),
            _ => None,
        }
    }

    pub fn subtitle(&self) -> Option<&SubtitleUnit> {
        match &self.data {
            FrameData::Subtitle(sub) => Some(sub),
            _ => None,
        }
    }
}

struct Ring {
    slots: Vec<Option<Frame>>,
    rindex: usize,
    windex: usize,
    size: usize,
    rindex_shown: bool,
}

impl Ring {
    fn remaining(&self) -> usize {
        self.size - self.rindex_shown as usize
    }
}

/// Frame queue
pub struct FrameQueue {
    ring: Mutex<Ring>,
    cond: Condvar,
    capacity: usize,
    keep_last: bool,
    link: Arc<QueueStatus>,
}

/// Reserved write position returned by [`FrameQueue::peek_writable`].
///
/// Holds the queue lock until [`WriteSlot::push`] or drop.
pub struct WriteSlot<'a> {
    queue: &'a FrameQueue,
    ring: MutexGuard<'a, Ring>,
}

impl WriteSlot<'_> {
    /// Store `frame` at the write index and publish it.
    pub fn push(mut self, frame: Frame) {
        let windex = self.ring.windex;
        self.ring.slots[windex] = Some(frame);
        self.ring.windex = (windex + 1) % self.queue.capacity;
        self.ring.size += 1;
        self.queue.cond.notify_one();
    }
}

/// Upper bound on any frame queue capacity.
pub const FRAME_QUEUE_MAX: usize = 16;

impl FrameQueue {
    /// Create a queue bound to the abort/serial `link` of its packet queue.
    pub fn new(link: Arc<QueueStatus>, capacity: usize, keep_last: bool) -> Self {
        let capacity = capacity.clamp(1, FRAME_QUEUE_MAX);
        Self {
            ring: Mutex::new(Ring {
                slots: vec![None; capacity],
                rindex: 0,
                windex: 0,
                size: 0,
                rindex_shown: false,
            }),
            cond: Condvar::new(),
            capacity,
            keep_last,
            link,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Wait for a free slot. `None` once the packet queue is aborted.
    pub fn peek_writable(&self) -> Option<WriteSlot<'_>> {
        let mut ring = self.ring.lock();
        while ring.size >= self.capacity && !self.link.is_aborted() {
            self.cond.wait(&mut ring);
        }
        if self.link.is_aborted() {
            return None;
        }
        Some(WriteSlot { queue: self, ring })
    }

    /// Wait for an undisplayed frame. `None` once aborted.
    pub fn peek_readable(&self) -> Option<Frame> {
        let mut ring = self.ring.lock();
        while ring.remaining() == 0 && !self.link.is_aborted() {
            self.cond.wait(&mut ring);
        }
        if self.link.is_aborted() {
            return None;
        }
        ring.slots[(ring.rindex + ring.rindex_shown as usize) % self.capacity].clone()
    }

    /// Like [`FrameQueue::peek_readable`] but gives up after `timeout`.
    pub fn peek_readable_timeout(&self, timeout: Duration) -> Option<Frame> {
        let mut ring = self.ring.lock();
        if ring.remaining() == 0 && !self.link.is_aborted() {
            // A single bounded wait: a spurious wakeup only shortens it.
            self.cond.wait_for(&mut ring, timeout);
        }
        if self.link.is_aborted() || ring.remaining() == 0 {
            return None;
        }
        ring.slots[(ring.rindex + ring.rindex_shown as usize) % self.capacity].clone()
    }

    /// Next frame not yet shown.
    pub fn peek(&self) -> Option<Frame> {
        let ring = self.ring.lock();
        if ring.remaining() == 0 {
            return None;
        }
        ring.slots[(ring.rindex + ring.rindex_shown as usize) % self.capacity].clone()
    }

    /// The frame after [`FrameQueue::peek`].
    pub fn peek_next(&self) -> Option<Frame> {
        let ring = self.ring.lock();
        if ring.remaining() < 2 {
            return None;
        }
        ring.slots[(ring.rindex + ring.rindex_shown as usize + 1) % self.capacity].clone()
    }

    /// Frame at the read index, shown or not.
    pub fn peek_last(&self) -> Option<Frame> {
        let ring = self.ring.lock();
        ring.slots[ring.rindex].clone()
    }

    /// Advance past the current frame.
    ///
    /// On a keep-last queue the first call only marks the frame as shown; the
    /// slot is released on the following call.
    pub fn next(&self) {
        let mut ring = self.ring.lock();
        if self.keep_last && !ring.rindex_shown {
            ring.rindex_shown = true;
            return;
        }
        if ring.size == 0 {
            return;
        }
        let rindex = ring.rindex;
        ring.slots[rindex] = None;
        ring.rindex = (rindex + 1) % self.capacity;
        ring.size -= 1;
        if ring.size == 0 {
            // Nothing is left to count as shown.
            ring.rindex_shown = false;
        }
        self.cond.notify_one();
    }

    /// Undisplayed frame count.
    pub fn nb_remaining(&self) -> usize {
        self.ring.lock().remaining()
    }

    /// Whether the frame at the read index has been shown.
    pub fn is_last_shown(&self) -> bool {
        self.ring.lock().rindex_shown
    }

    /// Byte position of the last shown frame if it belongs to the live serial.
    pub fn last_pos(&self) -> i64 {
        let ring = self.ring.lock();
        match &ring.slots[ring.rindex] {
            Some(frame) if ring.rindex_shown && frame.serial == self.link.serial() => frame.pos,
            _ => -1,
        }
    }

    /// Flag the frame at the read index as handed to the output.
    pub fn mark_last_uploaded(&self) {
        let mut ring = self.ring.lock();
        let rindex = ring.rindex;
        if let Some(frame) = ring.slots[rindex].as_mut() {
            frame.uploaded = true;
        }
    }

    /// Wake every waiter so it can observe an abort.
    pub fn signal(&self) {
        let _ring = self.ring.lock();
        self.cond.notify_all();
    }
}
