pub mod decoder;
pub mod stream_info;

pub use decoder::{
    DecodeError, DecodeOutcome, Decoded, Decoder, Picture, RawFrame, RawFrameData, StreamDecoder,
    SubtitleRect, SubtitleUnit,
};
pub use stream_info::{StreamInfo, StreamParams};
