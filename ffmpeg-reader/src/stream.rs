use std::ffi::CStr;

use ffmpeg_next::{Rational, codec::Parameters, format::stream};

use crate::metadata::{MediaType, StreamInfo, parse_metadata};

unsafe impl Send for AvStream {}
unsafe impl Sync for AvStream {}

/// Codec parameters of one source stream, captured when the input is opened.
pub struct AvStream {
    index: usize,
    parameters: Parameters,
    time_base: Rational,
    rate: Rational,
    info: StreamInfo,
}

impl AvStream {
    pub fn index(&self) -> usize {
        self.index
    }
    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }
    pub fn time_base(&self) -> Rational {
        self.time_base
    }
    pub fn rate(&self) -> Rational {
        self.rate
    }
    pub fn info(&self) -> &StreamInfo {
        &self.info
    }
    pub fn media_type(&self) -> MediaType {
        self.info.media_type
    }

    pub fn is_video(&self) -> bool {
        self.parameters.medium() == ffmpeg_next::media::Type::Video
    }

    pub fn is_audio(&self) -> bool {
        self.parameters.medium() == ffmpeg_next::media::Type::Audio
    }

    /// Raw `AVCodecParameters.format`; -1 when the demuxer could not detect it.
    pub fn raw_format(&self) -> i32 {
        unsafe { (*self.parameters.as_ptr()).format }
    }

    pub fn width(&self) -> u32 {
        unsafe { (*self.parameters.as_ptr()).width.max(0) as u32 }
    }

    pub fn height(&self) -> u32 {
        unsafe { (*self.parameters.as_ptr()).height.max(0) as u32 }
    }

    pub fn sample_rate(&self) -> u32 {
        unsafe { (*self.parameters.as_ptr()).sample_rate.max(0) as u32 }
    }

    pub fn channels(&self) -> u32 {
        unsafe { (*self.parameters.as_ptr()).ch_layout.nb_channels.max(0) as u32 }
    }
}

impl From<stream::Stream<'_>> for AvStream {
    fn from(stream: stream::Stream<'_>) -> Self {
        let mut s = Self {
            index: stream.index(),
            parameters: stream.parameters(),
            time_base: stream.time_base(),
            rate: stream.rate(),
            info: StreamInfo::new(stream.index(), MediaType::Unknown),
        };
        let mut info = s.build_info();
        info.num_frames = stream.frames();
        info.metadata = parse_metadata(&stream.metadata());
        s.info = info;
        s
    }
}

impl AvStream {
    fn build_info(&self) -> StreamInfo {
        let media_type = MediaType::from(self.parameters.medium());
        let id = self.parameters.id();
        let mut info = StreamInfo::new(self.index, media_type);
        info.time_base = self.time_base;

        if id != ffmpeg_next::codec::Id::None {
            info.codec_name = Some(id.name().to_string());
            info.codec_long_name = codec_long_name(id);
        }

        unsafe {
            let ptr = self.parameters.as_ptr();
            info.bit_rate = (*ptr).bit_rate;
            info.bits_per_sample = (*ptr).bits_per_raw_sample;
        }

        match media_type {
            MediaType::Audio => {
                info.format = sample_format_name(self.raw_format());
                info.sample_rate = Some(self.sample_rate());
                info.channels = Some(self.channels());
            }
            MediaType::Video => {
                info.format = pixel_format_name(self.raw_format());
                info.width = Some(self.width());
                info.height = Some(self.height());
                if self.rate.denominator() != 0 {
                    info.frame_rate = Some(f64::from(self.rate));
                }
            }
            _ => {}
        }
        info
    }
}

impl Clone for AvStream {
    fn clone(&self) -> Self {
        Self {
            index: self.index,
            parameters: self.parameters.clone(),
            time_base: self.time_base,
            rate: self.rate,
            info: self.info.clone(),
        }
    }
}

fn codec_long_name(id: ffmpeg_next::codec::Id) -> Option<String> {
    unsafe {
        let desc = ffmpeg_next::ffi::avcodec_descriptor_get(id.into());
        if desc.is_null() || (*desc).long_name.is_null() {
            return None;
        }
        Some(CStr::from_ptr((*desc).long_name).to_string_lossy().into_owned())
    }
}

/// `name` must be null or a NUL-terminated static string from libavutil.
unsafe fn format_name(name: *const std::ffi::c_char) -> Option<String> {
    if name.is_null() {
        return None;
    }
    Some(unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned())
}

/// Name of a raw `AVSampleFormat` value; `None` outside the known range.
fn sample_format_name(format: i32) -> Option<String> {
    use ffmpeg_next::ffi::AVSampleFormat;
    if !(0..AVSampleFormat::AV_SAMPLE_FMT_NB as i32).contains(&format) {
        return None;
    }
    // in range, so a declared discriminant of the C enum
    let fmt: AVSampleFormat = unsafe { std::mem::transmute(format) };
    unsafe { format_name(ffmpeg_next::ffi::av_get_sample_fmt_name(fmt)) }
}

/// Name of a raw `AVPixelFormat` value; `None` outside the known range.
fn pixel_format_name(format: i32) -> Option<String> {
    use ffmpeg_next::ffi::AVPixelFormat;
    if !(0..AVPixelFormat::AV_PIX_FMT_NB as i32).contains(&format) {
        return None;
    }
    let fmt: AVPixelFormat = unsafe { std::mem::transmute(format) };
    unsafe { format_name(ffmpeg_next::ffi::av_get_pix_fmt_name(fmt)) }
}
