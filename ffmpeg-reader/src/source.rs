use std::collections::{BTreeMap, BTreeSet};
use std::ffi::CString;
use std::path::Path;
use std::time::Duration;

use ffmpeg_next::Dictionary;

use crate::{
    error::{ReaderError, Result},
    metadata::{MediaType, StreamInfo, parse_metadata},
    packet::{RawPacket, SourcePacket},
    stream::AvStream,
};

/// FFmpeg-style key/value options (demuxer or decoder options).
pub type OptionDict = BTreeMap<String, String>;

pub(crate) fn to_dictionary(options: &OptionDict) -> Dictionary<'static> {
    let mut dict = Dictionary::new();
    for (key, value) in options {
        dict.set(key, value);
    }
    dict
}

pub enum ReadOutcome<P> {
    Packet(P),
    /// The source has nothing to hand out right now (live devices); try again later.
    Again,
    EndOfSource,
}

/// An open multiplexed input: sequential packet reads, source-wide seeking,
/// static per-stream metadata, and the set of streams whose packets are
/// requested. Packets of streams outside the requested set are never
/// returned by `read_packet`.
pub trait Source {
    type Packet: SourcePacket;

    fn num_streams(&self) -> usize;

    fn stream_info(&self, index: usize) -> Option<&StreamInfo>;

    /// Container-level metadata.
    fn metadata(&self) -> &BTreeMap<String, String>;

    fn best_stream(&self, media_type: MediaType) -> Option<usize> {
        (0..self.num_streams()).find(|&i| {
            self.stream_info(i)
                .is_some_and(|info| info.media_type == media_type)
        })
    }

    fn read_packet(&mut self) -> Result<ReadOutcome<Self::Packet>>;

    /// Seeks the whole source to the nearest keyframe at or before `position`.
    fn seek(&mut self, position: Duration) -> Result<()>;

    fn set_requested(&mut self, index: usize, requested: bool);

    fn is_requested(&self, index: usize) -> bool;
}

pub struct AvInput {
    inner: ffmpeg_next::format::context::Input,
    streams: Vec<AvStream>,
    metadata: BTreeMap<String, String>,
    requested: BTreeSet<usize>,
}

unsafe impl Send for AvInput {}

impl AvInput {
    /// Resolve input format by name (e.g. "x11grab", "v4l2") via FFmpeg's av_find_input_format.
    fn find_input_format(name: &str) -> Result<ffmpeg_next::format::format::Input> {
        let cname = CString::new(name)
            .map_err(|e| ReaderError::invalid_argument(format!("format name {:?}: {}", name, e)))?;
        let ptr = unsafe { ffmpeg_next::ffi::av_find_input_format(cname.as_ptr()) };
        if ptr.is_null() {
            return Err(ReaderError::invalid_argument(format!(
                "input format not found: {}",
                name
            )));
        }
        Ok(unsafe { ffmpeg_next::format::format::Input::wrap(ptr as *mut _) })
    }

    pub fn open(url: &str) -> Result<Self> {
        Self::open_with(url, None, &OptionDict::new())
    }

    pub fn open_with(url: &str, format: Option<&str>, options: &OptionDict) -> Result<Self> {
        use ffmpeg_next::format::format::Format;

        let path = Path::new(url);
        let input = match format {
            Some(fmt_name) => {
                let fmt = Self::find_input_format(fmt_name)?;
                let ctx =
                    ffmpeg_next::format::open_with(path, &Format::Input(fmt), to_dictionary(options))?;
                ctx.input()
            }
            None => ffmpeg_next::format::input_with_dictionary(path, to_dictionary(options))?,
        };

        let streams: Vec<AvStream> = input.streams().map(AvStream::from).collect();
        let metadata = parse_metadata(&input.metadata());

        let mut s = Self {
            inner: input,
            streams,
            metadata,
            requested: BTreeSet::new(),
        };
        for index in 0..s.streams.len() {
            s.apply_discard(index, true);
        }

        log::info!("opened input {} with {} streams", url, s.streams.len());
        for stream in &s.streams {
            log::debug!(
                "stream index: {}, type: {}, codec: {:?}, time_base: {}",
                stream.index(),
                stream.media_type(),
                stream.parameters().id(),
                stream.time_base()
            );
        }
        Ok(s)
    }

    pub fn streams(&self) -> &[AvStream] {
        &self.streams
    }

    pub fn stream(&self, index: usize) -> Option<&AvStream> {
        self.streams.get(index)
    }

    /// Whether the demuxer currently skips every packet of the stream.
    pub fn is_discarded(&self, index: usize) -> bool {
        self.inner.stream(index).is_some_and(|stream| unsafe {
            (*stream.as_ptr()).discard == ffmpeg_next::ffi::AVDiscard::AVDISCARD_ALL
        })
    }

    fn apply_discard(&mut self, index: usize, discard: bool) {
        use ffmpeg_next::ffi::AVDiscard;

        if let Some(mut stream) = self.inner.stream_mut(index) {
            unsafe {
                (*stream.as_mut_ptr()).discard = if discard {
                    AVDiscard::AVDISCARD_ALL
                } else {
                    AVDiscard::AVDISCARD_DEFAULT
                };
            }
        }
    }
}

impl Source for AvInput {
    type Packet = RawPacket;

    fn num_streams(&self) -> usize {
        self.streams.len()
    }

    fn stream_info(&self, index: usize) -> Option<&StreamInfo> {
        self.streams.get(index).map(|s| s.info())
    }

    fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    fn best_stream(&self, media_type: MediaType) -> Option<usize> {
        let ty = match media_type {
            MediaType::Audio => ffmpeg_next::media::Type::Audio,
            MediaType::Video => ffmpeg_next::media::Type::Video,
            MediaType::Subtitle => ffmpeg_next::media::Type::Subtitle,
            _ => return None,
        };
        self.inner.streams().best(ty).map(|s| s.index())
    }

    fn read_packet(&mut self) -> Result<ReadOutcome<RawPacket>> {
        let mut packet = ffmpeg_next::Packet::empty();
        match packet.read(&mut self.inner) {
            Ok(()) => {
                let time_base = self
                    .streams
                    .get(packet.stream())
                    .map(|s| s.time_base())
                    .unwrap_or_else(|| ffmpeg_next::Rational::new(1, 1));
                Ok(ReadOutcome::Packet((packet, time_base).into()))
            }
            Err(ffmpeg_next::Error::Eof) => Ok(ReadOutcome::EndOfSource),
            Err(ffmpeg_next::Error::Other { errno })
                if errno == ffmpeg_next::util::error::EAGAIN =>
            {
                Ok(ReadOutcome::Again)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn seek(&mut self, position: Duration) -> Result<()> {
        // AV_TIME_BASE units
        let ts = i64::try_from(position.as_micros())
            .map_err(|_| ReaderError::invalid_argument("seek position too large"))?;
        self.inner.seek(ts, ..ts)?;
        Ok(())
    }

    fn set_requested(&mut self, index: usize, requested: bool) {
        if index >= self.streams.len() {
            return;
        }
        let changed = if requested {
            self.requested.insert(index)
        } else {
            self.requested.remove(&index)
        };
        if changed {
            self.apply_discard(index, !requested);
        }
    }

    fn is_requested(&self, index: usize) -> bool {
        self.requested.contains(&index)
    }
}
