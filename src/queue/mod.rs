//! Packet and frame queues connecting the read thread, the decoders and the
//! output loops.
//!
//! A [`PacketQueue`] publishes its abort flag and serial through a shared
//! [`QueueStatus`]. Frame queues and clocks hold that handle instead of the
//! packet queue itself.

pub mod frame_queue;
pub mod packet_queue;

pub use frame_queue::{Frame, FrameData, FrameQueue, WriteSlot};
pub use packet_queue::{PacketQueue, QueuedPacket};

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

/// Returned by blocking queue operations once abort was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("queue aborted")]
pub struct QueueAborted;

/// Abort flag and serial of one packet queue.
///
/// Written only while the owning queue's lock is held; readable anywhere.
#[derive(Debug)]
pub struct QueueStatus {
    abort: AtomicBool,
    serial: AtomicI32,
}

impl QueueStatus {
    pub(crate) fn new() -> Self {
        Self {
            abort: AtomicBool::new(true),
            serial: AtomicI32::new(0),
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.load(Ordering::Acquire)
    }

    pub fn serial(&self) -> i32 {
        self.serial.load(Ordering::Acquire)
    }

    pub(crate) fn set_aborted(&self, aborted: bool) {
        self.abort.store(aborted, Ordering::Release);
    }

    pub(crate) fn bump_serial(&self) -> i32 {
        self.serial.fetch_add(1, Ordering::AcqRel) + 1
    }
}
