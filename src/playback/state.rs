//! Shared playback session state.
//!
//! One [`PlayerState`] is created per opened source and shared by the read
//! thread, the decode threads, the audio callback and the refresh loop. It
//! owns every queue and clock; threads hold an `Arc` to it and resolve their
//! stream's queues through [`PlayerState::channel`].

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use crossbeam::channel::Sender;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info};

use crate::config::PlayerConfig;
use crate::core::time::{relative_now, ticks_to_seconds, Rational, Time};
use crate::core::MediaKind;
use crate::decode::StreamInfo;
use crate::demux::Chapter;
use crate::playback::clock::Clock;
use crate::playback::engine::{PlayerEvent, QuitReason};
use crate::playback::sync::{external_clock_speed, SyncSource};
use crate::queue::{FrameQueue, PacketQueue};

/// Packets a stream needs before the read thread considers it buffered.
pub const MIN_FRAMES: usize = 25;
/// Full scale of the software mixer.
pub const MIX_MAX_VOLUME: i32 = 128;
/// Volume change per key press, in dB.
pub const VOLUME_STEP_DB: f64 = 0.75;

/// Packet queue, frame queue and decoder bookkeeping of one stream type.
pub struct StreamChannel {
    kind: MediaKind,
    pub packets: PacketQueue,
    pub frames: FrameQueue,
    /// Serial at which the decoder drained, 0 while decoding.
    finished: AtomicI32,
    stream: Mutex<Option<StreamInfo>>,
}

impl StreamChannel {
    fn new(kind: MediaKind) -> Self {
        let packets = PacketQueue::new();
        let frames = FrameQueue::new(
            packets.status(),
            kind.frame_queue_capacity(),
            kind.keeps_last_frame(),
        );
        Self {
            kind,
            packets,
            frames,
            finished: AtomicI32::new(0),
            stream: Mutex::new(None),
        }
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Stream currently routed to this channel.
    pub fn stream(&self) -> Option<StreamInfo> {
        self.stream.lock().clone()
    }

    pub fn time_base(&self) -> Rational {
        self.stream
            .lock()
            .as_ref()
            .map(|info| info.time_base)
            .unwrap_or_default()
    }

    pub fn is_active(&self) -> bool {
        self.stream.lock().is_some()
    }

    /// Route stream `info` to this channel.
    pub fn activate(&self, info: StreamInfo) {
        *self.stream.lock() = Some(info);
    }

    pub fn deactivate(&self) {
        *self.stream.lock() = None;
    }

    pub fn finished(&self) -> i32 {
        self.finished.load(Ordering::Acquire)
    }

    pub fn set_finished(&self, serial: i32) {
        self.finished.store(serial, Ordering::Release);
    }

    /// Whether the read thread may stop feeding this stream for now.
    pub fn has_enough_packets(&self) -> bool {
        let stream = self.stream.lock();
        let Some(info) = stream.as_ref() else {
            return true;
        };
        if self.packets.is_aborted() || info.attached_picture {
            return true;
        }
        let duration = self.packets.duration();
        self.packets.nb_packets() > MIN_FRAMES
            && (duration == 0 || ticks_to_seconds(duration, info.time_base) > 1.0)
    }

    /// Decoder drained and every frame consumed, or no stream at all.
    pub fn is_drained(&self) -> bool {
        !self.is_active()
            || (self.finished() == self.packets.serial() && self.frames.nb_remaining() == 0)
    }
}

/// Properties of the opened source that never change during playback.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceInfo {
    pub realtime: bool,
    /// Sanity bound for PTS deltas between consecutive pictures.
    pub max_frame_duration: f64,
    pub seek_by_bytes: bool,
    pub infinite_buffer: bool,
    /// Source start time in seconds.
    pub start_time: Option<f64>,
    pub bit_rate: Option<u64>,
    pub chapters: Vec<Chapter>,
}

impl Default for SourceInfo {
    fn default() -> Self {
        Self {
            realtime: false,
            max_frame_duration: crate::playback::sync::MAX_FRAME_DURATION,
            seek_by_bytes: false,
            infinite_buffer: false,
            start_time: None,
            bit_rate: None,
            chapters: Vec::new(),
        }
    }
}

/// A pending positional seek.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekRequest {
    /// Microseconds, or bytes for byte seeks.
    pub pos: i64,
    pub rel: i64,
    pub by_bytes: bool,
}

/// Mutable control flags shared by the refresh loop, the read thread and
/// user commands.
#[derive(Debug, Clone, Default)]
pub struct Control {
    pub paused: bool,
    /// Show one frame, then pause again.
    pub step: bool,
    pub force_refresh: bool,
    pub seek: Option<SeekRequest>,
    /// Target of the most recent seek, kept after it completes.
    pub last_seek_pos: i64,
    /// Wall time at which the current picture became due.
    pub frame_timer: f64,
    /// The demuxer rejected the last pause hint.
    pub read_pause_unsupported: bool,
    /// Re-queue attached pictures on the next read loop iteration.
    pub queue_attachments: bool,
}

/// Snapshot of playback statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerStats {
    pub master: SyncSource,
    pub master_clock: Time,
    pub audio_clock: Time,
    pub video_clock: Time,
    pub external_clock: Time,
    /// Audio minus video, or master minus the single stream clock.
    pub av_diff: f64,
    pub frame_drops_early: u64,
    pub frame_drops_late: u64,
    pub audio_queue_bytes: usize,
    pub video_queue_bytes: usize,
    pub subtitle_queue_bytes: usize,
    pub paused: bool,
}

/// Master playback state
pub struct PlayerState {
    pub config: PlayerConfig,
    pub source: SourceInfo,
    video: StreamChannel,
    audio: StreamChannel,
    subtitle: StreamChannel,
    pub vidclk: Clock,
    pub audclk: Clock,
    pub extclk: Clock,
    control: Mutex<Control>,
    continue_read: Condvar,
    continue_read_lock: Mutex<()>,
    abort: AtomicBool,
    frame_drops_early: AtomicU64,
    frame_drops_late: AtomicU64,
    audio_volume: AtomicI32,
    muted: AtomicBool,
    /// Byte offset of the read thread, -1 when unknown.
    read_position: AtomicI64,
    events: Sender<PlayerEvent>,
    quit_sent: AtomicBool,
}

impl PlayerState {
    pub fn new(config: PlayerConfig, source: SourceInfo, events: Sender<PlayerEvent>) -> Self {
        let video = StreamChannel::new(MediaKind::Video);
        let audio = StreamChannel::new(MediaKind::Audio);
        let subtitle = StreamChannel::new(MediaKind::Subtitle);
        let vidclk = Clock::new(video.packets.status());
        let audclk = Clock::new(audio.packets.status());
        let extclk = Clock::external();
        let volume = (MIX_MAX_VOLUME * config.volume as i32 / 100).clamp(0, MIX_MAX_VOLUME);
        Self {
            config,
            source,
            video,
            audio,
            subtitle,
            vidclk,
            audclk,
            extclk,
            control: Mutex::new(Control::default()),
            continue_read: Condvar::new(),
            continue_read_lock: Mutex::new(()),
            abort: AtomicBool::new(false),
            frame_drops_early: AtomicU64::new(0),
            frame_drops_late: AtomicU64::new(0),
            audio_volume: AtomicI32::new(volume),
            muted: AtomicBool::new(false),
            read_position: AtomicI64::new(-1),
            events,
            quit_sent: AtomicBool::new(false),
        }
    }

    pub fn channel(&self, kind: MediaKind) -> &StreamChannel {
        match kind {
            MediaKind::Video => &self.video,
            MediaKind::Audio => &self.audio,
            MediaKind::Subtitle => &self.subtitle,
        }
    }

    pub fn control(&self) -> parking_lot::MutexGuard<'_, Control> {
        self.control.lock()
    }

    pub fn master_sync_type(&self) -> SyncSource {
        self.config
            .sync
            .resolve(self.video.is_active(), self.audio.is_active())
    }

    pub fn master_clock(&self) -> Time {
        self.master_clock_at(relative_now())
    }

    pub fn master_clock_at(&self, now: f64) -> Time {
        match self.master_sync_type() {
            SyncSource::Video => self.vidclk.get_at(now),
            SyncSource::Audio => self.audclk.get_at(now),
            SyncSource::External => self.extclk.get_at(now),
        }
    }

    pub fn framedrop_active(&self) -> bool {
        self.config.framedrop_active(self.master_sync_type())
    }

    pub fn is_paused(&self) -> bool {
        self.control.lock().paused
    }

    /// User pause toggle. Cancels a pending frame step.
    pub fn toggle_pause(&self) {
        self.toggle_pause_at(relative_now());
    }

    pub fn toggle_pause_at(&self, now: f64) {
        self.flip_pause_at(now);
        self.control.lock().step = false;
    }

    /// Flip pause, carrying the frame timer and clocks across the pause.
    pub fn flip_pause_at(&self, now: f64) {
        let mut control = self.control.lock();
        if control.paused {
            control.frame_timer += now - self.vidclk.last_updated();
            if !control.read_pause_unsupported {
                self.vidclk.set_paused(false);
            }
            self.vidclk
                .set_at(self.vidclk.get_at(now), self.vidclk.serial(), now);
        }
        self.extclk
            .set_at(self.extclk.get_at(now), self.extclk.serial(), now);
        control.paused = !control.paused;
        let paused = control.paused;
        self.audclk.set_paused(paused);
        self.vidclk.set_paused(paused);
        self.extclk.set_paused(paused);
        debug!(paused, "pause toggled");
    }

    /// Unpause if needed and show exactly one more frame.
    pub fn step_to_next_frame(&self) {
        if self.is_paused() {
            self.flip_pause_at(relative_now());
        }
        self.control.lock().step = true;
    }

    /// Queue a seek unless one is already pending.
    pub fn request_seek(&self, pos: i64, rel: i64, by_bytes: bool) {
        {
            let mut control = self.control.lock();
            if control.seek.is_some() {
                return;
            }
            control.seek = Some(SeekRequest { pos, rel, by_bytes });
            control.last_seek_pos = pos;
        }
        debug!(pos, rel, by_bytes, "seek requested");
        self.wake_read_thread();
    }

    pub fn wake_read_thread(&self) {
        let _guard = self.continue_read_lock.lock();
        self.continue_read.notify_one();
    }

    /// Block the read thread for at most `timeout` or until woken.
    pub fn wait_for_read_wakeup(&self, timeout: Duration) {
        let mut guard = self.continue_read_lock.lock();
        self.continue_read.wait_for(&mut guard, timeout);
    }

    pub fn request_abort(&self) {
        self.abort.store(true, Ordering::Release);
        self.wake_read_thread();
    }

    pub fn abort_requested(&self) -> bool {
        self.abort.load(Ordering::Acquire)
    }

    pub fn count_early_drop(&self) {
        self.frame_drops_early.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count_late_drop(&self) {
        self.frame_drops_late.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_drops_early(&self) -> u64 {
        self.frame_drops_early.load(Ordering::Relaxed)
    }

    pub fn frame_drops_late(&self) -> u64 {
        self.frame_drops_late.load(Ordering::Relaxed)
    }

    /// Mixer volume, 0..=128.
    pub fn volume(&self) -> i32 {
        self.audio_volume.load(Ordering::Relaxed)
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    pub fn toggle_mute(&self) {
        self.muted.fetch_xor(true, Ordering::Relaxed);
    }

    /// Step the volume by `sign * step_db` decibels.
    ///
    /// A step too small to change the integer volume moves it by one unit.
    pub fn update_volume(&self, sign: i32, step_db: f64) {
        let current = self.volume();
        let level = if current > 0 {
            20.0 * (current as f64 / MIX_MAX_VOLUME as f64).log10()
        } else {
            -1000.0
        };
        let target = (MIX_MAX_VOLUME as f64 * 10f64.powf((level + sign as f64 * step_db) / 20.0))
            .round() as i32;
        let next = if target == current { current + sign } else { target };
        self.audio_volume
            .store(next.clamp(0, MIX_MAX_VOLUME), Ordering::Relaxed);
    }

    pub fn read_position(&self) -> i64 {
        self.read_position.load(Ordering::Relaxed)
    }

    pub(crate) fn set_read_position(&self, pos: i64) {
        self.read_position.store(pos, Ordering::Relaxed);
    }

    /// Nudge the external clock speed to keep live-source queues stable.
    pub fn check_external_clock_speed(&self) {
        let min_packets = [&self.video, &self.audio]
            .into_iter()
            .filter(|channel| channel.is_active())
            .map(|channel| channel.packets.nb_packets())
            .min();
        let speed = external_clock_speed(self.extclk.speed(), min_packets);
        if speed != self.extclk.speed() {
            self.extclk.set_speed(speed);
        }
    }

    /// Whether every packet queue together exceeds the byte ceiling or every
    /// active stream is buffered.
    pub fn queues_full(&self) -> bool {
        let total: usize = MediaKind::ALL
            .iter()
            .map(|kind| self.channel(*kind).packets.size())
            .sum();
        total > self.config.max_queue_bytes
            || MediaKind::ALL
                .iter()
                .all(|kind| self.channel(*kind).has_enough_packets())
    }

    /// Report the end of the session. Only the first call is delivered.
    pub fn signal_quit(&self, reason: QuitReason) {
        if self.quit_sent.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(?reason, "session finished");
        // The receiver may already be gone during shutdown.
        let _ = self.events.send(PlayerEvent::Quit(reason));
    }

    /// Report a non-fatal problem to the embedder.
    pub fn post_event(&self, event: PlayerEvent) {
        let _ = self.events.send(event);
    }

    pub fn stats(&self) -> PlayerStats {
        self.stats_at(relative_now())
    }

    pub fn stats_at(&self, now: f64) -> PlayerStats {
        let audio_clock = self.audclk.get_at(now);
        let video_clock = self.vidclk.get_at(now);
        let external_clock = self.extclk.get_at(now);
        let master_clock = self.master_clock_at(now);
        let av_diff = match (self.audio.is_active(), self.video.is_active()) {
            (true, true) => audio_clock - video_clock,
            (false, true) => master_clock - video_clock,
            (true, false) => master_clock - audio_clock,
            (false, false) => f64::NAN,
        };
        PlayerStats {
            master: self.master_sync_type(),
            master_clock,
            audio_clock,
            video_clock,
            external_clock,
            av_diff,
            frame_drops_early: self.frame_drops_early(),
            frame_drops_late: self.frame_drops_late(),
            audio_queue_bytes: self.audio.packets.size(),
            video_queue_bytes: self.video.packets.size(),
            subtitle_queue_bytes: self.subtitle.packets.size(),
            paused: self.is_paused(),
        }
    }
}
