//! Audio/video synchronization policy.
//!
//! Pure functions over clock readings: master clock selection, the video
//! display delay correction and the external clock speed control used for
//! live sources. The thresholds are empirically tuned and kept literal.

use serde::{Deserialize, Serialize};

/// Minimum correction threshold for the video delay, seconds.
pub const AV_SYNC_THRESHOLD_MIN: f64 = 0.04;
/// Maximum correction threshold for the video delay, seconds.
pub const AV_SYNC_THRESHOLD_MAX: f64 = 0.1;
/// Frames longer than this are stretched rather than duplicated.
pub const AV_SYNC_FRAMEDUP_THRESHOLD: f64 = 0.1;
pub use super::clock::AV_NOSYNC_THRESHOLD;

/// Live sources with fewer queued packets slow the external clock down.
pub const EXTERNAL_CLOCK_MIN_FRAMES: usize = 2;
/// Live sources with more queued packets speed the external clock up.
pub const EXTERNAL_CLOCK_MAX_FRAMES: usize = 10;
pub const EXTERNAL_CLOCK_SPEED_MIN: f64 = 0.900;
pub const EXTERNAL_CLOCK_SPEED_MAX: f64 = 1.010;
pub const EXTERNAL_CLOCK_SPEED_STEP: f64 = 0.001;

/// Polling period of the refresh loop, seconds.
pub const REFRESH_RATE: f64 = 0.01;

/// Frame duration sanity bound for sources with timestamp discontinuities.
pub const MAX_FRAME_DURATION_DISCONTINUOUS: f64 = 10.0;
pub const MAX_FRAME_DURATION: f64 = 3600.0;

/// Clock other streams synchronize to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncSource {
    #[default]
    Audio,
    Video,
    External,
}

impl SyncSource {
    /// Resolve the configured preference against the streams that exist.
    ///
    /// A missing preferred stream falls back to the external clock.
    pub fn resolve(self, has_video: bool, has_audio: bool) -> SyncSource {
        match self {
            SyncSource::Video if has_video => SyncSource::Video,
            SyncSource::Audio if has_audio => SyncSource::Audio,
            _ => SyncSource::External,
        }
    }
}

impl std::fmt::Display for SyncSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SyncSource::Audio => "audio",
            SyncSource::Video => "video",
            SyncSource::External => "external",
        };
        f.write_str(name)
    }
}

/// Correct the nominal display `delay` of the current picture given
/// `diff = video_clock - master_clock`.
///
/// When video is the master, callers pass `diff = NaN` and the delay is
/// returned unchanged.
pub fn compute_target_delay(delay: f64, diff: f64, max_frame_duration: f64) -> f64 {
    let sync_threshold = AV_SYNC_THRESHOLD_MIN.max(AV_SYNC_THRESHOLD_MAX.min(delay));
    if diff.is_nan() || diff.abs() >= max_frame_duration {
        return delay;
    }
    if diff <= -sync_threshold {
        (delay + diff).max(0.0)
    } else if diff >= sync_threshold && delay > AV_SYNC_FRAMEDUP_THRESHOLD {
        delay + diff
    } else if diff >= sync_threshold {
        2.0 * delay
    } else {
        delay
    }
}

/// Timing of a queued frame as seen by the duration estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTiming {
    pub pts: f64,
    pub duration: f64,
    pub serial: i32,
}

/// Display duration of `current` before `next` replaces it.
///
/// Uses the PTS delta when both frames share a serial and the delta is sane,
/// else the frame's own estimate.
pub fn frame_duration(current: FrameTiming, next: FrameTiming, max_frame_duration: f64) -> f64 {
    if current.serial != next.serial {
        return 0.0;
    }
    let duration = next.pts - current.pts;
    if duration.is_nan() || duration <= 0.0 || duration > max_frame_duration {
        current.duration
    } else {
        duration
    }
}

/// Next external clock speed for a live source given the smallest packet
/// count across its active audio and video streams (`None` when neither is
/// active).
pub fn external_clock_speed(current: f64, min_packets: Option<usize>) -> f64 {
    let min_packets = min_packets.unwrap_or(usize::MAX);
    if min_packets <= EXTERNAL_CLOCK_MIN_FRAMES {
        EXTERNAL_CLOCK_SPEED_MIN.max(current - EXTERNAL_CLOCK_SPEED_STEP)
    } else if min_packets > EXTERNAL_CLOCK_MAX_FRAMES {
        EXTERNAL_CLOCK_SPEED_MAX.min(current + EXTERNAL_CLOCK_SPEED_STEP)
    } else if current != 1.0 {
        current + EXTERNAL_CLOCK_SPEED_STEP * (1.0 - current) / (1.0 - current).abs()
    } else {
        current
    }
}
