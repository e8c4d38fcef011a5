//! Video refresh loop.
//!
//! Runs on the presentation thread. Each call decides whether the next
//! queued picture is due, drops pictures that are already too late, retires
//! expired subtitles and hands the current picture to the sink.

use tracing::{debug, trace};

use crate::core::time::relative_now;
use crate::core::MediaKind;
use crate::playback::state::PlayerState;
use crate::playback::sync::{
    compute_target_delay, frame_duration, FrameTiming, SyncSource, AV_SYNC_THRESHOLD_MAX,
};
use crate::queue::Frame;
use crate::render::VideoSink;

/// Minimum spacing of status lines, seconds.
const STATUS_INTERVAL: f64 = 0.03;

impl From<&Frame> for FrameTiming {
    fn from(frame: &Frame) -> Self {
        FrameTiming {
            pts: frame.pts,
            duration: frame.duration,
            serial: frame.serial,
        }
    }
}

/// Video refresh state owned by the presentation thread.
#[derive(Debug, Default)]
pub struct VideoRefresh {
    last_status: f64,
}

impl VideoRefresh {
    pub fn new() -> Self {
        Self::default()
    }

    /// One refresh cycle at the current time.
    pub fn refresh(&mut self, state: &PlayerState, sink: &mut dyn VideoSink, remaining: &mut f64) {
        self.refresh_at(state, sink, relative_now(), remaining);
    }

    /// One refresh cycle at wall time `now`.
    ///
    /// Lowers `remaining` to the time until the current picture expires.
    pub fn refresh_at(
        &mut self,
        state: &PlayerState,
        sink: &mut dyn VideoSink,
        now: f64,
        remaining: &mut f64,
    ) {
        if !state.is_paused()
            && state.master_sync_type() == SyncSource::External
            && state.source.realtime
        {
            state.check_external_clock_speed();
        }

        let video = state.channel(MediaKind::Video);
        if video.is_active() {
            self.advance(state, now, remaining);
            let force_refresh = state.control().force_refresh;
            if force_refresh && video.frames.is_last_shown() {
                display(state, sink);
            }
        }
        state.control().force_refresh = false;

        if state.config.show_status && now - self.last_status >= STATUS_INTERVAL {
            self.last_status = now;
            log_status(state, now);
        }
    }

    fn advance(&mut self, state: &PlayerState, now: f64, remaining: &mut f64) {
        let video = state.channel(MediaKind::Video);
        let max_frame_duration = state.source.max_frame_duration;
        loop {
            if video.frames.nb_remaining() == 0 {
                return;
            }
            let (Some(lastvp), Some(vp)) = (video.frames.peek_last(), video.frames.peek()) else {
                return;
            };
            if vp.serial != video.packets.serial() {
                video.frames.next();
                continue;
            }

            let mut control = state.control();
            if lastvp.serial != vp.serial {
                control.frame_timer = now;
            }
            if control.paused {
                return;
            }

            let last_duration = frame_duration((&lastvp).into(), (&vp).into(), max_frame_duration);
            let diff = if state.master_sync_type() == SyncSource::Video {
                f64::NAN
            } else {
                state.vidclk.get_at(now) - state.master_clock_at(now)
            };
            let delay = compute_target_delay(last_duration, diff, max_frame_duration);
            trace!(last_duration, delay, diff, "video delay");

            if now < control.frame_timer + delay {
                *remaining = remaining.min(control.frame_timer + delay - now);
                return;
            }

            control.frame_timer += delay;
            if delay > 0.0 && now - control.frame_timer > AV_SYNC_THRESHOLD_MAX {
                control.frame_timer = now;
            }

            if !vp.pts.is_nan() {
                state.vidclk.set_at(vp.pts, vp.serial, now);
                state.extclk.sync_to_slave_at(&state.vidclk, now);
            }

            if video.frames.nb_remaining() > 1 {
                if let Some(nextvp) = video.frames.peek_next() {
                    let duration = frame_duration((&vp).into(), (&nextvp).into(), max_frame_duration);
                    if !control.step
                        && state.framedrop_active()
                        && now > control.frame_timer + duration
                    {
                        drop(control);
                        state.count_late_drop();
                        trace!(pts = vp.pts, "late video frame dropped");
                        video.frames.next();
                        continue;
                    }
                }
            }

            retire_subtitles(state);

            video.frames.next();
            control.force_refresh = true;
            let step = control.step;
            let paused = control.paused;
            drop(control);
            if step && !paused {
                state.flip_pause_at(now);
            }
            return;
        }
    }
}

/// Drop subtitles whose window has passed or that a newer one replaces.
fn retire_subtitles(state: &PlayerState) {
    let subtitle = state.channel(MediaKind::Subtitle);
    if !subtitle.is_active() {
        return;
    }
    let video_pts = state.vidclk.pts();
    while subtitle.frames.nb_remaining() > 0 {
        let Some(sp) = subtitle.frames.peek() else {
            return;
        };
        let next = if subtitle.frames.nb_remaining() > 1 {
            subtitle.frames.peek_next()
        } else {
            None
        };
        let expired = sp.serial != subtitle.packets.serial()
            || video_pts > sp.pts + subtitle_end(&sp)
            || next.is_some_and(|next| video_pts > next.pts + subtitle_start(&next));
        if !expired {
            return;
        }
        subtitle.frames.next();
    }
}

fn subtitle_start(frame: &Frame) -> f64 {
    frame
        .subtitle()
        .map(|unit| unit.start_display_ms as f64 / 1000.0)
        .unwrap_or(0.0)
}

fn subtitle_end(frame: &Frame) -> f64 {
    frame
        .subtitle()
        .map(|unit| unit.end_display_ms as f64 / 1000.0)
        .unwrap_or(0.0)
}

fn display(state: &PlayerState, sink: &mut dyn VideoSink) {
    let video = state.channel(MediaKind::Video);
    let Some(picture) = video.frames.peek_last() else {
        return;
    };
    let subtitle = if state.channel(MediaKind::Subtitle).is_active() {
        state
            .channel(MediaKind::Subtitle)
            .frames
            .peek()
            .filter(|sp| picture.pts >= sp.pts + subtitle_start(sp))
    } else {
        None
    };
    sink.display(&picture, subtitle.as_ref());
    video.frames.mark_last_uploaded();
}

fn log_status(state: &PlayerState, now: f64) {
    let stats = state.stats_at(now);
    let label = match (
        state.channel(MediaKind::Audio).is_active(),
        state.channel(MediaKind::Video).is_active(),
    ) {
        (true, true) => "A-V",
        (false, true) => "M-V",
        (true, false) => "M-A",
        (false, false) => "   ",
    };
    debug!(
        "{:7.2} {}:{:7.3} fd={:4} aq={:5}KB vq={:5}KB sq={:5}B",
        stats.master_clock,
        label,
        stats.av_diff,
        stats.frame_drops_early + stats.frame_drops_late,
        stats.audio_queue_bytes / 1024,
        stats.video_queue_bytes / 1024,
        stats.subtitle_queue_bytes,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlayerConfig;
    use crate::core::time::Rational;
    use crate::decode::{Picture, StreamInfo, SubtitleUnit};
    use crate::playback::state::SourceInfo;
    use crate::queue::FrameData;
    use crossbeam::channel;
    use std::sync::Arc;

    #[derive(Default)]
    struct Recorder {
        shown: Vec<(f64, bool)>,
    }

    impl VideoSink for Recorder {
        fn display(&mut self, picture: &Frame, subtitle: Option<&Frame>) {
            self.shown.push((picture.pts, subtitle.is_some()));
        }
    }

    fn video_state(config: PlayerConfig) -> PlayerState {
        let (tx, _rx) = channel::unbounded();
        let state = PlayerState::new(config, SourceInfo::default(), tx);
        let video = state.channel(MediaKind::Video);
        video.activate(StreamInfo::video(0, Rational::new(1, 30), Some(Rational::new(30, 1))));
        video.packets.start();
        state
    }

    fn push_picture(state: &PlayerState, pts: f64) {
        let video = state.channel(MediaKind::Video);
        video.frames.peek_writable().unwrap().push(Frame {
            pts,
            duration: 1.0 / 30.0,
            serial: video.packets.serial(),
            data: FrameData::Picture(Arc::new(Picture::default())),
            ..Frame::default()
        });
    }

    #[test]
    fn test_waits_until_frame_is_due() {
        let state = video_state(PlayerConfig {
            sync: SyncSource::Video,
            ..PlayerConfig::default()
        });
        push_picture(&state, 0.0);
        push_picture(&state, 0.04);
        let mut sink = Recorder::default();
        let mut refresh = VideoRefresh::new();

        let mut remaining = 0.01;
        refresh.refresh_at(&state, &mut sink, 10.0, &mut remaining);
        assert_eq!(sink.shown, vec![(0.0, false)]);

        let mut remaining = 0.01;
        refresh.refresh_at(&state, &mut sink, 10.02, &mut remaining);
        assert_eq!(sink.shown.len(), 1);
        assert!((remaining - 0.01).abs() < 1e-9);

        let mut remaining = 0.01;
        refresh.refresh_at(&state, &mut sink, 10.035, &mut remaining);
        assert!((remaining - 0.005).abs() < 1e-9);

        let mut remaining = 0.01;
        refresh.refresh_at(&state, &mut sink, 10.041, &mut remaining);
        assert_eq!(sink.shown, vec![(0.0, false), (0.04, false)]);
        assert_eq!(state.frame_drops_late(), 0);
        assert!((state.vidclk.get_at(10.041) - 0.04).abs() < 1e-9);
    }

    #[test]
    fn test_stale_serial_frames_are_skipped() {
        let state = video_state(PlayerConfig::default());
        push_picture(&state, 0.0);
        state.channel(MediaKind::Video).packets.flush();
        push_picture(&state, 3.0);
        let mut sink = Recorder::default();
        let mut remaining = 0.01;
        VideoRefresh::new().refresh_at(&state, &mut sink, 1.0, &mut remaining);
        assert_eq!(sink.shown, vec![(3.0, false)]);
    }

    #[test]
    fn test_paused_shows_nothing_new() {
        let state = video_state(PlayerConfig::default());
        push_picture(&state, 0.0);
        state.toggle_pause_at(0.0);
        let mut sink = Recorder::default();
        let mut remaining = 0.01;
        VideoRefresh::new().refresh_at(&state, &mut sink, 1.0, &mut remaining);
        assert!(sink.shown.is_empty());
        assert_eq!(state.channel(MediaKind::Video).frames.nb_remaining(), 1);
    }

    #[test]
    fn test_step_shows_one_frame_then_pauses() {
        let state = video_state(PlayerConfig::default());
        push_picture(&state, 0.0);
        push_picture(&state, 0.033);
        state.toggle_pause_at(0.0);
        state.step_to_next_frame();
        let mut sink = Recorder::default();
        let mut remaining = 0.01;
        VideoRefresh::new().refresh_at(&state, &mut sink, 1.0, &mut remaining);
        assert_eq!(sink.shown.len(), 1);
        assert!(state.is_paused());
        assert!(state.control().step);

        state.toggle_pause_at(2.0);
        assert!(!state.control().step);
    }

    #[test]
    fn test_subtitle_overlay_and_retirement() {
        let state = video_state(PlayerConfig {
            sync: SyncSource::Video,
            ..PlayerConfig::default()
        });
        let subtitle = state.channel(MediaKind::Subtitle);
        subtitle.activate(StreamInfo::subtitle(2, Rational::MICROS));
        subtitle.packets.start();
        subtitle.frames.peek_writable().unwrap().push(Frame {
            pts: 0.0,
            serial: subtitle.packets.serial(),
            data: FrameData::Subtitle(Arc::new(SubtitleUnit {
                pts: Some(0),
                start_display_ms: 0,
                end_display_ms: 500,
                ..SubtitleUnit::default()
            })),
            ..Frame::default()
        });
        push_picture(&state, 0.0);
        push_picture(&state, 1.0);

        let mut sink = Recorder::default();
        let mut refresh = VideoRefresh::new();
        let mut remaining = 0.01;
        refresh.refresh_at(&state, &mut sink, 5.0, &mut remaining);
        assert_eq!(sink.shown, vec![(0.0, true)]);

        let mut remaining = 0.01;
        refresh.refresh_at(&state, &mut sink, 7.0, &mut remaining);
        assert_eq!(sink.shown.last(), Some(&(1.0, false)));
        assert_eq!(subtitle.frames.nb_remaining(), 0);
    }
}
