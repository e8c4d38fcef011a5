//! ffmpeg-next demuxer.
//! All unsafe FFmpeg code of the demux side is isolated in this module.

use std::path::Path;

use ffmpeg_next as ffmpeg;
use ffmpeg_next::ffi;
use ffmpeg_next::format::stream::Disposition;
use ffmpeg_next::media::Type;
use tracing::{debug, info};

use crate::core::time::Rational;
use crate::decode::{DecodeError, StreamDecoder, StreamInfo, StreamParams};
use crate::demux::{Chapter, DemuxError, Demuxer, Packet, SeekTarget};
use crate::media::codec::FfmpegDecoder;
use crate::media::{rational, valid_ts};

/// `whence` for a relative `avio_seek`.
const SEEK_CUR: i32 = 1;

/// A media file or URL opened with libavformat
pub struct FfmpegSource {
    input: ffmpeg::format::context::Input,
    url: String,
    streams: Vec<StreamInfo>,
    chapters: Vec<Chapter>,
}

impl FfmpegSource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DemuxError> {
        ffmpeg::init().map_err(|e| DemuxError::Io(format!("FFmpeg init failed: {e}")))?;
        let path = path.as_ref();
        let input = ffmpeg::format::input(&path)
            .map_err(|e| DemuxError::Io(format!("{}: {e}", path.display())))?;
        let streams: Vec<StreamInfo> = input.streams().filter_map(|s| stream_info(&s)).collect();
        let chapters = input
            .chapters()
            .map(|chapter| Chapter {
                start: chapter.start(),
                time_base: rational(chapter.time_base()),
            })
            .collect();
        info!(
            url = %path.display(),
            format = input.format().name(),
            streams = streams.len(),
            "source opened"
        );
        Ok(Self {
            input,
            url: path.display().to_string(),
            streams,
            chapters,
        })
    }

    fn format_name(&self) -> &str {
        self.input.format().name()
    }
}

fn stream_info(stream: &ffmpeg::format::stream::Stream) -> Option<StreamInfo> {
    let parameters = stream.parameters();
    // SAFETY: codec parameters are owned by the stream and outlive this call.
    let raw = unsafe { &*parameters.as_ptr() };
    let params = match parameters.medium() {
        Type::Video => {
            let avg = stream.avg_frame_rate();
            let rate = if avg.numerator() > 0 && avg.denominator() > 0 {
                avg
            } else {
                stream.rate()
            };
            StreamParams::Video {
                width: raw.width.max(0) as u32,
                height: raw.height.max(0) as u32,
                frame_rate: (rate.numerator() > 0 && rate.denominator() > 0)
                    .then(|| rational(rate)),
                sample_aspect_ratio: Rational::new(
                    raw.sample_aspect_ratio.num,
                    raw.sample_aspect_ratio.den,
                ),
            }
        }
        Type::Audio => StreamParams::Audio {
            sample_rate: raw.sample_rate.max(0) as u32,
            channels: raw.ch_layout.nb_channels.max(0) as u16,
        },
        Type::Subtitle => StreamParams::Subtitle,
        _ => return None,
    };
    Some(StreamInfo {
        index: stream.index(),
        time_base: rational(stream.time_base()),
        start_time: valid_ts(stream.start_time()),
        codec_name: parameters.id().name().to_string(),
        attached_picture: stream.disposition().contains(Disposition::ATTACHED_PIC),
        params,
    })
}

impl Demuxer for FfmpegSource {
    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn read_packet(&mut self) -> Result<Option<Packet>, DemuxError> {
        let mut packet = ffmpeg::Packet::empty();
        match packet.read(&mut self.input) {
            Ok(()) => Ok(Some(Packet {
                stream_index: packet.stream(),
                pts: packet.pts(),
                dts: packet.dts(),
                duration: packet.duration(),
                pos: packet.position() as i64,
                data: packet.data().map(<[u8]>::to_vec).unwrap_or_default(),
            })),
            Err(ffmpeg::Error::Eof) => Ok(None),
            Err(err) => {
                // SAFETY: pb is either null or owned by the open context.
                let io_error = unsafe {
                    let pb = (*self.input.as_ptr()).pb;
                    !pb.is_null() && (*pb).error != 0
                };
                if io_error {
                    Err(DemuxError::Io(err.to_string()))
                } else {
                    debug!("read error treated as end of stream: {}", err);
                    Ok(None)
                }
            }
        }
    }

    fn seek(&mut self, target: SeekTarget) -> Result<(), DemuxError> {
        let flags = if target.by_bytes {
            ffi::AVSEEK_FLAG_BYTE as i32
        } else {
            0
        };
        // SAFETY: the context is open for the lifetime of self.
        let ret = unsafe {
            ffi::avformat_seek_file(
                self.input.as_mut_ptr(),
                -1,
                target.min,
                target.target,
                target.max,
                flags,
            )
        };
        if ret < 0 {
            return Err(DemuxError::SeekFailed(ffmpeg::Error::from(ret).to_string()));
        }
        Ok(())
    }

    fn pause(&mut self) -> Result<(), DemuxError> {
        // SAFETY: the context is open for the lifetime of self.
        let ret = unsafe { ffi::av_read_pause(self.input.as_mut_ptr()) };
        if ret < 0 {
            return Err(DemuxError::Unsupported);
        }
        Ok(())
    }

    fn play(&mut self) -> Result<(), DemuxError> {
        // SAFETY: the context is open for the lifetime of self.
        let ret = unsafe { ffi::av_read_play(self.input.as_mut_ptr()) };
        if ret < 0 {
            return Err(DemuxError::Unsupported);
        }
        Ok(())
    }

    fn open_decoder(&self, index: usize) -> Result<Box<dyn StreamDecoder>, DecodeError> {
        let stream = self
            .input
            .stream(index)
            .ok_or(DecodeError::Unsupported(index))?;
        Ok(Box::new(FfmpegDecoder::open(&stream)?))
    }

    fn chapters(&self) -> &[Chapter] {
        &self.chapters
    }

    fn start_time(&self) -> Option<f64> {
        // SAFETY: plain field read on the open context.
        let start = unsafe { (*self.input.as_ptr()).start_time };
        valid_ts(start).map(|micros| micros as f64 / ffi::AV_TIME_BASE as f64)
    }

    fn bit_rate(&self) -> Option<u64> {
        let bit_rate = self.input.bit_rate();
        (bit_rate > 0).then_some(bit_rate as u64)
    }

    fn is_realtime(&self) -> bool {
        matches!(self.format_name(), "rtp" | "rtsp" | "sdp")
            || self.url.starts_with("rtp:")
            || self.url.starts_with("udp:")
    }

    fn has_discontinuous_timestamps(&self) -> bool {
        // SAFETY: iformat is set for every opened input.
        let flags = unsafe { (*(*self.input.as_ptr()).iformat).flags };
        flags & ffi::AVFMT_TS_DISCONT as i32 != 0
    }

    fn prefers_byte_seek(&self) -> bool {
        self.has_discontinuous_timestamps() && self.format_name() != "ogg"
    }

    fn byte_position(&self) -> Option<i64> {
        // SAFETY: pb is either null or owned by the open context.
        let pos = unsafe {
            let pb = (*self.input.as_ptr()).pb;
            if pb.is_null() {
                return None;
            }
            ffi::avio_seek(pb, 0, SEEK_CUR)
        };
        (pos >= 0).then_some(pos)
    }

    fn attached_picture(&self, index: usize) -> Option<Packet> {
        let stream = self.input.stream(index)?;
        if !stream.disposition().contains(Disposition::ATTACHED_PIC) {
            return None;
        }
        // SAFETY: attached_pic is owned by the stream and outlives this call.
        unsafe {
            let pic = &(*stream.as_ptr()).attached_pic;
            if pic.data.is_null() || pic.size <= 0 {
                return None;
            }
            Some(Packet {
                stream_index: index,
                pts: valid_ts(pic.pts),
                dts: valid_ts(pic.dts),
                duration: pic.duration,
                pos: pic.pos,
                data: std::slice::from_raw_parts(pic.data, pic.size as usize).to_vec(),
            })
        }
    }
}
