//! Core types shared by every part of the engine.
//!
//! Time handling lives in [`time`]; [`MediaKind`] names the three stream
//! types the engine keeps in step.

pub mod time;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use time::{Rational, Time};

/// Stream type handled by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
    Subtitle,
}

impl MediaKind {
    pub const ALL: [MediaKind; 3] = [MediaKind::Video, MediaKind::Audio, MediaKind::Subtitle];

    /// Frame queue capacity for this stream type.
    pub fn frame_queue_capacity(self) -> usize {
        match self {
            MediaKind::Video => 3,
            MediaKind::Subtitle => 16,
            MediaKind::Audio => 9,
        }
    }

    /// Whether the frame queue keeps the last displayed frame readable.
    pub fn keeps_last_frame(self) -> bool {
        !matches!(self, MediaKind::Subtitle)
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
            MediaKind::Subtitle => "subtitle",
        };
        f.write_str(name)
    }
}
