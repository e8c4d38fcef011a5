//! Thread-safe FIFO of compressed packets for one stream.
//!
//! Every flush bumps the serial; packets carry the serial current at `put`
//! time so consumers can tell stale generations apart after a seek.

use std::collections::VecDeque;
use std::mem;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::demux::Packet;
use crate::queue::{QueueAborted, QueueStatus};

/// A packet together with the queue serial it was queued under.
#[derive(Debug, Clone)]
pub struct QueuedPacket {
    pub packet: Packet,
    pub serial: i32,
}

#[derive(Debug, Default)]
struct PacketList {
    packets: VecDeque<QueuedPacket>,
    size: usize,
    duration: i64,
}

/// Packet queue
pub struct PacketQueue {
    list: Mutex<PacketList>,
    cond: Condvar,
    status: Arc<QueueStatus>,
}

impl PacketQueue {
    /// Create an aborted queue; call [`PacketQueue::start`] before use.
    pub fn new() -> Self {
        Self {
            list: Mutex::new(PacketList::default()),
            cond: Condvar::new(),
            status: Arc::new(QueueStatus::new()),
        }
    }

    /// Shared abort/serial handle for frame queues and clocks.
    pub fn status(&self) -> Arc<QueueStatus> {
        Arc::clone(&self.status)
    }

    /// Append `packet` under the current serial and wake one waiter.
    pub fn put(&self, packet: Packet) -> Result<(), QueueAborted> {
        let mut list = self.list.lock();
        if self.status.is_aborted() {
            return Err(QueueAborted);
        }
        list.size += packet.size() + mem::size_of::<QueuedPacket>();
        list.duration += packet.duration;
        list.packets.push_back(QueuedPacket {
            packet,
            serial: self.status.serial(),
        });
        self.cond.notify_one();
        Ok(())
    }

    /// Queue the end-of-stream marker for `stream_index`.
    pub fn put_null(&self, stream_index: usize) -> Result<(), QueueAborted> {
        self.put(Packet::null(stream_index))
    }

    /// Pop the oldest packet.
    ///
    /// With `block` set, waits while the queue is empty. Returns `Ok(None)`
    /// only for a non-blocking call on an empty queue.
    pub fn get(&self, block: bool) -> Result<Option<QueuedPacket>, QueueAborted> {
        let mut list = self.list.lock();
        loop {
            if self.status.is_aborted() {
                return Err(QueueAborted);
            }
            if let Some(queued) = list.packets.pop_front() {
                list.size -= queued.packet.size() + mem::size_of::<QueuedPacket>();
                list.duration -= queued.packet.duration;
                return Ok(Some(queued));
            }
            if !block {
                return Ok(None);
            }
            self.cond.wait(&mut list);
        }
    }

    /// Drop every queued packet and start a new serial generation.
    pub fn flush(&self) {
        let mut list = self.list.lock();
        list.packets.clear();
        list.size = 0;
        list.duration = 0;
        self.status.bump_serial();
    }

    /// Clear the abort flag and start a new serial generation.
    pub fn start(&self) {
        let _list = self.list.lock();
        self.status.set_aborted(false);
        self.status.bump_serial();
    }

    /// Request abort and wake every waiter. Idempotent.
    pub fn abort(&self) {
        let _list = self.list.lock();
        self.status.set_aborted(true);
        self.cond.notify_all();
    }

    pub fn is_aborted(&self) -> bool {
        self.status.is_aborted()
    }

    pub fn serial(&self) -> i32 {
        self.status.serial()
    }

    pub fn nb_packets(&self) -> usize {
        self.list.lock().packets.len()
    }

    /// Queued bytes including per-entry bookkeeping.
    pub fn size(&self) -> usize {
        self.list.lock().size
    }

    /// Sum of queued packet durations in stream time base ticks.
    pub fn duration(&self) -> i64 {
        self.list.lock().duration
    }
}

impl Default for PacketQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn started() -> PacketQueue {
        let queue = PacketQueue::new();
        queue.start();
        queue
    }

    fn packet(n: u8) -> Packet {
        Packet::new(0, vec![n; n as usize + 1]).with_duration(10)
    }

    #[test]
    fn test_new_queue_rejects_put_until_started() {
        let queue = PacketQueue::new();
        assert_eq!(queue.put(packet(1)), Err(QueueAborted));
        queue.start();
        assert!(queue.put(packet(1)).is_ok());
    }

    #[test]
    fn test_fifo_order_and_accounting() {
        let queue = started();
        let entry = mem::size_of::<QueuedPacket>();
        for n in 0..5 {
            queue.put(packet(n)).unwrap();
        }
        assert_eq!(queue.nb_packets(), 5);
        assert_eq!(queue.size(), (1 + 2 + 3 + 4 + 5) + 5 * entry);
        assert_eq!(queue.duration(), 50);

        for n in 0..5 {
            let queued = queue.get(false).unwrap().unwrap();
            assert_eq!(queued.packet.data[0], n);
            assert_eq!(queue.nb_packets(), 4 - n as usize);
        }
        assert_eq!(queue.size(), 0);
        assert_eq!(queue.duration(), 0);
        assert!(queue.get(false).unwrap().is_none());
    }

    #[test]
    fn test_flush_bumps_serial_and_marks_old_packets_stale() {
        let queue = started();
        queue.put(packet(1)).unwrap();
        let before = queue.serial();
        queue.flush();
        assert_eq!(queue.serial(), before + 1);
        assert_eq!(queue.nb_packets(), 0);
        assert_eq!(queue.size(), 0);

        queue.put(packet(2)).unwrap();
        let queued = queue.get(false).unwrap().unwrap();
        assert_eq!(queued.serial, queue.serial());
    }

    #[test]
    fn test_packets_keep_their_put_serial() {
        let queue = started();
        let first = queue.serial();
        queue.put(packet(1)).unwrap();
        let queued = queue.get(false).unwrap().unwrap();
        assert_eq!(queued.serial, first);
    }

    #[test]
    fn test_blocking_get_wakes_on_put() {
        let queue = Arc::new(started());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.get(true))
        };
        thread::sleep(Duration::from_millis(20));
        queue.put(packet(7)).unwrap();
        let got = consumer.join().unwrap().unwrap().unwrap();
        assert_eq!(got.packet.data[0], 7);
    }

    #[test]
    fn test_abort_twice_wakes_all_waiters() {
        let queue = Arc::new(started());
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || queue.get(true))
            })
            .collect();
        thread::sleep(Duration::from_millis(20));
        queue.abort();
        queue.abort();
        for waiter in waiters {
            assert_eq!(waiter.join().unwrap().unwrap_err(), QueueAborted);
        }
        assert_eq!(queue.put(packet(1)), Err(QueueAborted));
    }
}
