use std::ffi::CStr;

use ffmpeg_next::{Rational, filter, util::error};

use crate::{
    error::{ReaderError, Result},
    frame::{RawAudioFrame, RawFrame, RawVideoFrame},
    metadata::MediaType,
    stream::AvStream,
};

/// Properties of the frames entering a filter graph. A graph is only valid
/// for frames matching the properties it was built with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FilterInput {
    Audio {
        sample_fmt: i32,
        sample_rate: i32,
        channel_layout: String,
        time_base: Rational,
    },
    Video {
        pix_fmt: i32,
        width: i32,
        height: i32,
        time_base: Rational,
        pixel_aspect: Rational,
    },
}

impl FilterInput {
    pub fn from_stream(stream: &AvStream, time_base: Rational) -> Result<Self> {
        unsafe {
            let ptr = stream.parameters().as_ptr();
            if stream.is_audio() {
                Ok(FilterInput::Audio {
                    sample_fmt: (*ptr).format,
                    sample_rate: (*ptr).sample_rate,
                    channel_layout: describe_layout(&(*ptr).ch_layout),
                    time_base,
                })
            } else if stream.is_video() {
                Ok(FilterInput::Video {
                    pix_fmt: (*ptr).format,
                    width: (*ptr).width,
                    height: (*ptr).height,
                    time_base,
                    pixel_aspect: (*ptr).sample_aspect_ratio.into(),
                })
            } else {
                Err(ReaderError::invalid_argument(format!(
                    "only audio/video are supported, stream {} is {}",
                    stream.index(),
                    stream.media_type()
                )))
            }
        }
    }

    pub fn from_frame(frame: &RawFrame, time_base: Rational) -> Self {
        match frame {
            RawFrame::Audio(audio) => unsafe {
                let ptr = audio.as_audio().as_ptr();
                FilterInput::Audio {
                    sample_fmt: (*ptr).format,
                    sample_rate: (*ptr).sample_rate,
                    channel_layout: describe_layout(&(*ptr).ch_layout),
                    time_base,
                }
            },
            RawFrame::Video(video) => unsafe {
                let ptr = video.as_video().as_ptr();
                FilterInput::Video {
                    pix_fmt: (*ptr).format,
                    width: (*ptr).width,
                    height: (*ptr).height,
                    time_base,
                    pixel_aspect: (*ptr).sample_aspect_ratio.into(),
                }
            },
        }
    }

    pub fn media_type(&self) -> MediaType {
        match self {
            FilterInput::Audio { .. } => MediaType::Audio,
            FilterInput::Video { .. } => MediaType::Video,
        }
    }

    /// Arguments of the `abuffer` / `buffer` source filter.
    pub fn args(&self) -> String {
        match self {
            FilterInput::Audio {
                sample_fmt,
                sample_rate,
                channel_layout,
                time_base,
            } => format!(
                "time_base={}/{}:sample_rate={}:sample_fmt={}:channel_layout={}",
                time_base.numerator(),
                time_base.denominator(),
                sample_rate,
                sample_fmt,
                channel_layout
            ),
            FilterInput::Video {
                pix_fmt,
                width,
                height,
                time_base,
                pixel_aspect,
            } => format!(
                "video_size={}x{}:pix_fmt={}:time_base={}/{}:pixel_aspect={}/{}",
                width,
                height,
                pix_fmt,
                time_base.numerator(),
                time_base.denominator(),
                pixel_aspect.numerator(),
                pixel_aspect.denominator().max(1)
            ),
        }
    }
}

/// Default pass-through description for a media type.
pub fn default_description(media_type: MediaType) -> &'static str {
    match media_type {
        MediaType::Audio => "anull",
        _ => "null",
    }
}

fn describe_layout(layout: &ffmpeg_next::ffi::AVChannelLayout) -> String {
    let mut buf = [0 as std::os::raw::c_char; 128];
    let ret = unsafe {
        ffmpeg_next::ffi::av_channel_layout_describe(layout, buf.as_mut_ptr(), buf.len())
    };
    let described = if ret < 0 {
        None
    } else {
        unsafe { CStr::from_ptr(buf.as_ptr()) }
            .to_str()
            .ok()
            .map(str::to_string)
    };
    match described {
        // "2 channels" style descriptions cannot go into a filter argument list
        Some(name) if !name.contains(' ') => name,
        _ => format!("{}c", layout.nb_channels.max(1)),
    }
}

/// `in` (abuffer/buffer) -> description -> `out` (abuffersink/buffersink).
pub struct FilterGraph {
    graph: filter::Graph,
    input: FilterInput,
    description: String,
}

unsafe impl Send for FilterGraph {}

impl FilterGraph {
    pub fn new(input: FilterInput, description: &str) -> Result<Self> {
        let wrap = |source: ffmpeg_next::Error| ReaderError::Filter {
            description: description.to_string(),
            source,
        };

        let (src_name, sink_name) = match input.media_type() {
            MediaType::Audio => ("abuffer", "abuffersink"),
            _ => ("buffer", "buffersink"),
        };
        let src = filter::find(src_name).ok_or(ffmpeg_next::Error::FilterNotFound)?;
        let sink = filter::find(sink_name).ok_or(ffmpeg_next::Error::FilterNotFound)?;

        let mut graph = filter::Graph::new();
        graph.add(&src, "in", &input.args()).map_err(wrap)?;
        graph.add(&sink, "out", "").map_err(wrap)?;
        graph
            .output("in", 0)
            .and_then(|parser| parser.input("out", 0))
            .and_then(|parser| parser.parse(description))
            .map_err(wrap)?;
        graph.validate().map_err(wrap)?;

        Ok(Self {
            graph,
            input,
            description: description.to_string(),
        })
    }

    pub fn input(&self) -> &FilterInput {
        &self.input
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn add_frame(&mut self, frame: &RawFrame) -> Result<()> {
        let mut ctx = self
            .graph
            .get("in")
            .ok_or(ffmpeg_next::Error::FilterNotFound)?;
        match frame {
            RawFrame::Audio(audio) => ctx.source().add(audio.as_audio())?,
            RawFrame::Video(video) => ctx.source().add(video.as_video())?,
        }
        Ok(())
    }

    /// Signals end of input; remaining frames become available from `get_frame`.
    pub fn flush(&mut self) -> Result<()> {
        let mut ctx = self
            .graph
            .get("in")
            .ok_or(ffmpeg_next::Error::FilterNotFound)?;
        ctx.source().flush()?;
        Ok(())
    }

    /// Pulls one filtered frame; `Ok(None)` when the graph needs more input
    /// or is drained.
    pub fn get_frame(&mut self) -> Result<Option<RawFrame>> {
        let mut ctx = self
            .graph
            .get("out")
            .ok_or(ffmpeg_next::Error::FilterNotFound)?;
        let mut sink = ctx.sink();
        let ret = match self.input.media_type() {
            MediaType::Audio => {
                let mut frame = ffmpeg_next::frame::Audio::empty();
                sink.frame(&mut frame)
                    .map(|_| RawFrame::Audio(RawAudioFrame::from(frame)))
            }
            _ => {
                let mut frame = ffmpeg_next::frame::Video::empty();
                sink.frame(&mut frame)
                    .map(|_| RawFrame::Video(RawVideoFrame::from(frame)))
            }
        };
        match ret {
            Ok(frame) => Ok(Some(frame)),
            Err(ffmpeg_next::Error::Eof) => Ok(None),
            Err(ffmpeg_next::Error::Other { errno }) if errno == error::EAGAIN => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Time base of the frames coming out of the graph.
    pub fn output_time_base(&mut self) -> Rational {
        match self.graph.get("out") {
            Some(ctx) => unsafe {
                ffmpeg_next::ffi::av_buffersink_get_time_base(ctx.as_ptr()).into()
            },
            None => match &self.input {
                FilterInput::Audio { time_base, .. } | FilterInput::Video { time_base, .. } => {
                    *time_base
                }
            },
        }
    }
}
