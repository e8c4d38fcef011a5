//! Audio/video playback synchronization engine.
//!
//! A [`playback::Player`] pulls packets from a [`demux::Demuxer`], decodes
//! each stream on its own thread, plays audio through an
//! [`audio::AudioOutput`] and presents pictures on a [`render::VideoSink`]
//! in step with the selected master clock.

pub mod audio;
pub mod config;
pub mod core;
pub mod decode;
pub mod demux;
#[cfg(feature = "ffmpeg")]
pub mod media;
pub mod playback;
pub mod queue;
pub mod render;

pub use config::PlayerConfig;
pub use playback::{Player, PlayerCommand, PlayerError, PlayerEvent, QuitReason};
