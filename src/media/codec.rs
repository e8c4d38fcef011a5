//! ffmpeg-next codecs behind the [`StreamDecoder`] contract.
//! Video pictures keep their native pixel format; audio is converted to
//! packed f32 by swresample at the source rate and layout.

use ffmpeg_next as ffmpeg;
use ffmpeg_next::codec::subtitle::{Rect, Subtitle};
use ffmpeg_next::ffi;
use ffmpeg_next::format::sample::Type as SampleLayout;
use ffmpeg_next::format::Sample;
use ffmpeg_next::software::resampling;
use ffmpeg_next::ChannelLayout;

use crate::audio::AudioSamples;
use crate::core::time::Rational;
use crate::decode::{
    DecodeError, Decoded, Picture, RawFrame, RawFrameData, StreamDecoder, SubtitleRect,
    SubtitleUnit,
};
use crate::demux::Packet;
use crate::media::{rational, valid_ts};

enum Codec {
    Video(ffmpeg::decoder::Video),
    Audio(ffmpeg::decoder::Audio, Option<resampling::Context>),
    Subtitle(ffmpeg::decoder::Subtitle),
}

const PACKED_F32: Sample = Sample::F32(SampleLayout::Packed);

/// An opened FFmpeg decoder for one stream
pub struct FfmpegDecoder {
    codec: Codec,
    time_base: Rational,
}

impl FfmpegDecoder {
    pub(crate) fn open(stream: &ffmpeg::format::stream::Stream) -> Result<Self, DecodeError> {
        let index = stream.index();
        let mut context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .map_err(|e| DecodeError::Fatal(format!("codec context for stream {index}: {e}")))?;
        // SAFETY: the context is exclusively owned and not yet opened.
        unsafe {
            (*context.as_mut_ptr()).pkt_timebase = stream.time_base().into();
        }
        let open_failed = |e: ffmpeg::Error| DecodeError::Fatal(format!("open stream {index}: {e}"));
        let codec = match stream.parameters().medium() {
            ffmpeg::media::Type::Video => Codec::Video(context.decoder().video().map_err(open_failed)?),
            ffmpeg::media::Type::Audio => {
                Codec::Audio(context.decoder().audio().map_err(open_failed)?, None)
            }
            ffmpeg::media::Type::Subtitle => {
                Codec::Subtitle(context.decoder().subtitle().map_err(open_failed)?)
            }
            _ => return Err(DecodeError::Unsupported(index)),
        };
        Ok(Self {
            codec,
            time_base: rational(stream.time_base()),
        })
    }
}

fn to_ffmpeg_packet(packet: &Packet) -> ffmpeg::Packet {
    let mut out = ffmpeg::Packet::copy(&packet.data);
    out.set_pts(packet.pts);
    out.set_dts(packet.dts);
    out.set_duration(packet.duration);
    out.set_position(packet.pos as isize);
    out
}

fn send_error(err: ffmpeg::Error) -> DecodeError {
    match err {
        ffmpeg::Error::Other { errno } if errno == ffmpeg::error::EAGAIN => DecodeError::Again,
        other => DecodeError::InvalidData(other.to_string()),
    }
}

fn receive_result(result: Result<(), ffmpeg::Error>) -> Result<Option<Decoded>, DecodeError> {
    match result {
        Ok(()) => Ok(None),
        Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {
            Ok(Some(Decoded::Again))
        }
        Err(ffmpeg::Error::Eof) => Ok(Some(Decoded::Eof)),
        Err(err) => Err(DecodeError::InvalidData(err.to_string())),
    }
}

fn picture_frame(frame: &ffmpeg::frame::Video, time_base: Rational) -> RawFrame {
    let planes = frame.planes();
    let format: ffi::AVPixelFormat = frame.format().into();
    let picture = Picture {
        width: frame.width(),
        height: frame.height(),
        format: format as i32,
        sample_aspect_ratio: rational(frame.aspect_ratio()),
        planes: (0..planes).map(|i| frame.data(i).to_vec()).collect(),
        strides: (0..planes).map(|i| frame.stride(i)).collect(),
    };
    // SAFETY: plain field reads on a frame we own.
    let (pkt_dts, pkt_pos) = unsafe {
        let raw = &*frame.as_ptr();
        (raw.pkt_dts, raw.pkt_pos)
    };
    RawFrame {
        pts: frame.pts(),
        pkt_dts: valid_ts(pkt_dts),
        best_effort_timestamp: frame.timestamp(),
        pos: pkt_pos,
        time_base,
        data: RawFrameData::Picture(picture),
    }
}

/// Channel layout of `frame`, guessed from the channel count when unset.
fn layout_of(frame: &ffmpeg::frame::Audio) -> ChannelLayout {
    let layout = frame.channel_layout();
    if layout.is_empty() {
        ChannelLayout::default(frame.channels() as i32)
    } else {
        layout
    }
}

/// Packed f32 converter for `frame`, rebuilt when its input format changes.
fn converter<'a>(
    slot: &'a mut Option<resampling::Context>,
    frame: &ffmpeg::frame::Audio,
) -> Result<&'a mut resampling::Context, DecodeError> {
    let layout = layout_of(frame);
    let stale = slot.as_ref().map_or(true, |context| {
        let input = context.input();
        input.format != frame.format()
            || input.rate != frame.rate()
            || input.channel_layout != layout
    });
    if stale {
        let context = resampling::Context::get(
            frame.format(),
            layout,
            frame.rate(),
            PACKED_F32,
            layout,
            frame.rate(),
        )
        .map_err(|e| DecodeError::InvalidData(format!("sample converter: {e}")))?;
        *slot = Some(context);
    }
    slot.as_mut()
        .ok_or_else(|| DecodeError::InvalidData("sample converter missing".into()))
}

fn packed_f32(bytes: &[u8], count: usize) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .take(count)
        .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

fn audio_frame(
    frame: &ffmpeg::frame::Audio,
    converter_slot: &mut Option<resampling::Context>,
    time_base: Rational,
) -> Result<RawFrame, DecodeError> {
    if frame.format() == Sample::None {
        return Err(DecodeError::InvalidData("audio frame without sample format".into()));
    }
    let channels = frame.channels() as usize;
    let data = if frame.format() == PACKED_F32 {
        packed_f32(frame.data(0), frame.samples() * channels)
    } else {
        let context = converter(converter_slot, frame)?;
        let mut output = ffmpeg::frame::Audio::empty();
        context
            .run(frame, &mut output)
            .map_err(|e| DecodeError::InvalidData(format!("sample conversion: {e}")))?;
        packed_f32(output.data(0), output.samples() * channels)
    };
    // SAFETY: plain field reads on a frame we own.
    let (pkt_dts, pkt_pos) = unsafe {
        let raw = &*frame.as_ptr();
        (raw.pkt_dts, raw.pkt_pos)
    };
    Ok(RawFrame {
        pts: frame.pts(),
        pkt_dts: valid_ts(pkt_dts),
        best_effort_timestamp: frame.timestamp(),
        pos: pkt_pos,
        time_base,
        data: RawFrameData::Audio(AudioSamples::new(frame.rate(), channels as u16, data)),
    })
}

fn subtitle_unit(subtitle: &Subtitle) -> SubtitleUnit {
    let rects: Vec<SubtitleRect> = subtitle
        .rects()
        .filter_map(|rect| match rect {
            Rect::Text(text) => Some(SubtitleRect::Text(text.get().to_owned())),
            Rect::Ass(ass) => Some(SubtitleRect::Ass(ass.get().to_owned())),
            Rect::Bitmap(bitmap) => {
                // SAFETY: the rect and its first plane live as long as `subtitle`.
                let data = unsafe {
                    let raw = &*bitmap.as_ptr();
                    let len = (raw.linesize[0].max(0) * raw.h.max(0)) as usize;
                    if raw.data[0].is_null() || len == 0 {
                        Vec::new()
                    } else {
                        std::slice::from_raw_parts(raw.data[0], len).to_vec()
                    }
                };
                Some(SubtitleRect::Bitmap {
                    x: bitmap.x() as i32,
                    y: bitmap.y() as i32,
                    width: bitmap.width(),
                    height: bitmap.height(),
                    data,
                })
            }
            Rect::None(_) => None,
        })
        .collect();
    let bitmap_only = rects
        .iter()
        .all(|rect| matches!(rect, SubtitleRect::Bitmap { .. }));
    SubtitleUnit {
        pts: subtitle.pts(),
        start_display_ms: subtitle.start(),
        end_display_ms: subtitle.end(),
        format: if bitmap_only { 0 } else { 1 },
        rects,
    }
}

impl StreamDecoder for FfmpegDecoder {
    fn send_packet(&mut self, packet: &Packet) -> Result<(), DecodeError> {
        let opened: &mut ffmpeg::decoder::Opened = match &mut self.codec {
            Codec::Video(decoder) => &mut **decoder,
            Codec::Audio(decoder, _) => &mut **decoder,
            Codec::Subtitle(_) => return Ok(()),
        };
        let result = if packet.is_null() {
            opened.send_eof()
        } else {
            opened.send_packet(&to_ffmpeg_packet(packet))
        };
        result.map_err(send_error)
    }

    fn receive_frame(&mut self) -> Result<Decoded, DecodeError> {
        let time_base = self.time_base;
        match &mut self.codec {
            Codec::Video(decoder) => {
                let mut frame = ffmpeg::frame::Video::empty();
                match receive_result(decoder.receive_frame(&mut frame))? {
                    Some(status) => Ok(status),
                    None => Ok(Decoded::Frame(picture_frame(&frame, time_base))),
                }
            }
            Codec::Audio(decoder, converter) => {
                let mut frame = ffmpeg::frame::Audio::empty();
                match receive_result(decoder.receive_frame(&mut frame))? {
                    Some(status) => Ok(status),
                    None => Ok(Decoded::Frame(audio_frame(&frame, converter, time_base)?)),
                }
            }
            Codec::Subtitle(_) => Ok(Decoded::Again),
        }
    }

    fn decode_subtitle(&mut self, packet: &Packet) -> Result<Option<SubtitleUnit>, DecodeError> {
        let Codec::Subtitle(decoder) = &mut self.codec else {
            return Ok(None);
        };
        let input = if packet.is_null() {
            let mut drain = ffmpeg::Packet::empty();
            drain.set_stream(packet.stream_index);
            drain
        } else {
            to_ffmpeg_packet(packet)
        };
        let mut subtitle = Subtitle::new();
        match decoder.decode(&input, &mut subtitle) {
            Ok(true) => Ok(Some(subtitle_unit(&subtitle))),
            Ok(false) => Ok(None),
            Err(err) => Err(DecodeError::InvalidData(err.to_string())),
        }
    }

    fn flush(&mut self) {
        match &mut self.codec {
            Codec::Video(decoder) => decoder.flush(),
            Codec::Audio(decoder, converter) => {
                decoder.flush();
                *converter = None;
            }
            Codec::Subtitle(decoder) => decoder.flush(),
        }
    }
}
