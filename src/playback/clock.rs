//! Drift-tracking playback clocks.
//!
//! A clock stores the offset between its last anchored PTS and the wall time
//! of that anchor, and extrapolates from there at `speed`x real time. It
//! reads as NaN while its serial lags the serial of the packet queue it
//! follows, i.e. between a flush and the first frame of the new generation.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::time::{relative_now, Time};
use crate::queue::QueueStatus;

/// Clocks further apart than this are not corrected gradually.
pub const AV_NOSYNC_THRESHOLD: f64 = 10.0;

#[derive(Debug, Clone, Copy)]
struct ClockState {
    pts: Time,
    pts_drift: f64,
    last_updated: f64,
    speed: f64,
    serial: i32,
    paused: bool,
}

impl ClockState {
    fn value_at(&self, now: f64) -> Time {
        if self.paused {
            self.pts
        } else {
            self.pts_drift + now - (now - self.last_updated) * (1.0 - self.speed)
        }
    }

    fn anchor(&mut self, pts: Time, serial: i32, time: f64) {
        self.pts = pts;
        self.last_updated = time;
        self.pts_drift = pts - time;
        self.serial = serial;
    }
}

/// Playback clock
#[derive(Debug)]
pub struct Clock {
    state: Mutex<ClockState>,
    /// Packet queue whose serial this clock must match; `None` for the
    /// external clock, which follows its own serial.
    queue: Option<Arc<QueueStatus>>,
}

impl Clock {
    /// Clock following the serial of a packet queue.
    pub fn new(queue: Arc<QueueStatus>) -> Self {
        Self::with_queue(Some(queue))
    }

    /// Free-running clock that is never stale.
    pub fn external() -> Self {
        Self::with_queue(None)
    }

    fn with_queue(queue: Option<Arc<QueueStatus>>) -> Self {
        let mut state = ClockState {
            pts: f64::NAN,
            pts_drift: f64::NAN,
            last_updated: 0.0,
            speed: 1.0,
            serial: -1,
            paused: false,
        };
        state.anchor(f64::NAN, -1, relative_now());
        Self {
            state: Mutex::new(state),
            queue,
        }
    }

    /// Current value, NaN when stale.
    pub fn get(&self) -> Time {
        self.get_at(relative_now())
    }

    pub fn get_at(&self, now: f64) -> Time {
        let state = self.state.lock();
        if self.is_stale(&state) {
            return f64::NAN;
        }
        state.value_at(now)
    }

    fn is_stale(&self, state: &ClockState) -> bool {
        match &self.queue {
            Some(queue) => queue.serial() != state.serial,
            None => false,
        }
    }

    /// Anchor the clock to `pts` now.
    pub fn set(&self, pts: Time, serial: i32) {
        self.set_at(pts, serial, relative_now());
    }

    /// Anchor the clock to `pts` at wall time `time`.
    pub fn set_at(&self, pts: Time, serial: i32, time: f64) {
        self.state.lock().anchor(pts, serial, time);
    }

    /// Re-anchor at the current value, then change speed.
    pub fn set_speed(&self, speed: f64) {
        self.set_speed_at(speed, relative_now());
    }

    pub fn set_speed_at(&self, speed: f64, now: f64) {
        let mut state = self.state.lock();
        let current = if self.is_stale(&state) {
            f64::NAN
        } else {
            state.value_at(now)
        };
        let serial = state.serial;
        state.anchor(current, serial, now);
        state.speed = speed;
    }

    /// Snap to `slave` if this clock is unset or further than
    /// [`AV_NOSYNC_THRESHOLD`] away from it.
    pub fn sync_to_slave(&self, slave: &Clock) {
        self.sync_to_slave_at(slave, relative_now());
    }

    pub fn sync_to_slave_at(&self, slave: &Clock, now: f64) {
        let clock = self.get_at(now);
        let slave_clock = slave.get_at(now);
        if !slave_clock.is_nan()
            && (clock.is_nan() || (clock - slave_clock).abs() > AV_NOSYNC_THRESHOLD)
        {
            self.set_at(slave_clock, slave.serial(), now);
        }
    }

    pub fn speed(&self) -> f64 {
        self.state.lock().speed
    }

    pub fn serial(&self) -> i32 {
        self.state.lock().serial
    }

    /// Anchored PTS, without extrapolation.
    pub fn pts(&self) -> Time {
        self.state.lock().pts
    }

    /// Wall time of the last anchor.
    pub fn last_updated(&self) -> f64 {
        self.state.lock().last_updated
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    pub fn set_paused(&self, paused: bool) {
        self.state.lock().paused = paused;
    }
}
