//! Stream metadata reported by the demuxer.

use crate::core::time::Rational;
use crate::core::MediaKind;

/// Kind-specific codec parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamParams {
    Video {
        width: u32,
        height: u32,
        /// Frame rate estimate, used for the nominal frame duration.
        frame_rate: Option<Rational>,
        sample_aspect_ratio: Rational,
    },
    Audio {
        sample_rate: u32,
        channels: u16,
    },
    Subtitle,
}

/// Information about one stream of the source
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    pub index: usize,
    pub time_base: Rational,
    /// First timestamp in `time_base` ticks.
    pub start_time: Option<i64>,
    pub codec_name: String,
    /// Single still picture (cover art) rather than a moving video.
    pub attached_picture: bool,
    pub params: StreamParams,
}

impl StreamInfo {
    pub fn kind(&self) -> MediaKind {
        match self.params {
            StreamParams::Video { .. } => MediaKind::Video,
            StreamParams::Audio { .. } => MediaKind::Audio,
            StreamParams::Subtitle => MediaKind::Subtitle,
        }
    }

    /// Nominal duration of one video frame in seconds, 0.0 when unknown.
    pub fn frame_duration(&self) -> f64 {
        match self.params {
            StreamParams::Video {
                frame_rate: Some(rate),
                ..
            } if rate.is_valid() => rate.invert().to_f64(),
            _ => 0.0,
        }
    }

    pub fn video(index: usize, time_base: Rational, frame_rate: Option<Rational>) -> Self {
        Self {
            index,
            time_base,
            start_time: None,
            codec_name: String::new(),
            attached_picture: false,
            params: StreamParams::Video {
                width: 0,
                height: 0,
                frame_rate,
                sample_aspect_ratio: Rational::new(1, 1),
            },
        }
    }

    pub fn audio(index: usize, time_base: Rational, sample_rate: u32, channels: u16) -> Self {
        Self {
            index,
            time_base,
            start_time: None,
            codec_name: String::new(),
            attached_picture: false,
            params: StreamParams::Audio {
                sample_rate,
                channels,
            },
        }
    }

    pub fn subtitle(index: usize, time_base: Rational) -> Self {
        Self {
            index,
            time_base,
            start_time: None,
            codec_name: String::new(),
            attached_picture: false,
            params: StreamParams::Subtitle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_duration() {
        let info = StreamInfo::video(0, Rational::new(1, 90_000), Some(Rational::new(30, 1)));
        assert!((info.frame_duration() - 1.0 / 30.0).abs() < 1e-12);
        let unknown = StreamInfo::video(0, Rational::new(1, 90_000), None);
        assert_eq!(unknown.frame_duration(), 0.0);
        assert_eq!(StreamInfo::subtitle(2, Rational::MICROS).kind(), MediaKind::Subtitle);
    }
}
