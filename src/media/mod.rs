//! FFmpeg backed collaborators.

pub mod codec;
pub mod source;

pub use codec::FfmpegDecoder;
pub use source::FfmpegSource;

pub(crate) fn rational(value: ffmpeg_next::Rational) -> crate::core::time::Rational {
    crate::core::time::Rational::new(value.numerator(), value.denominator())
}

/// `None` for the FFmpeg "no timestamp" marker.
pub(crate) fn valid_ts(ts: i64) -> Option<i64> {
    (ts != ffmpeg_next::ffi::AV_NOPTS_VALUE).then_some(ts)
}
