//! Static stream metadata (similar to ffprobe).

use std::collections::BTreeMap;
use std::fmt;

use ffmpeg_next::Rational;
use serde::{Serialize, Serializer};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Audio,
    Video,
    Subtitle,
    Data,
    Attachment,
    Unknown,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Audio => "audio",
            MediaType::Video => "video",
            MediaType::Subtitle => "subtitle",
            MediaType::Data => "data",
            MediaType::Attachment => "attachment",
            MediaType::Unknown => "unknown",
        }
    }

    /// Only audio and video streams can be decoded into chunks; everything
    /// else is discarded when the source is opened.
    pub fn is_decodable(&self) -> bool {
        matches!(self, MediaType::Audio | MediaType::Video)
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ffmpeg_next::media::Type> for MediaType {
    fn from(value: ffmpeg_next::media::Type) -> Self {
        use ffmpeg_next::media::Type;
        match value {
            Type::Audio => MediaType::Audio,
            Type::Video => MediaType::Video,
            Type::Subtitle => MediaType::Subtitle,
            Type::Data => MediaType::Data,
            Type::Attachment => MediaType::Attachment,
            Type::Unknown => MediaType::Unknown,
        }
    }
}

/// Per-stream info of the source, fixed for the lifetime of the open source.
#[derive(Debug, Clone, Serialize)]
pub struct StreamInfo {
    pub index: usize,
    pub media_type: MediaType,
    /// Codec short name, e.g. "h264", "aac"
    pub codec_name: Option<String>,
    pub codec_long_name: Option<String>,
    /// Sample format ("fltp") or pixel format ("yuv420p").
    /// None when the format could not be detected.
    pub format: Option<String>,
    /// bps; 0 if unknown.
    pub bit_rate: i64,
    /// 0 if unknown.
    pub num_frames: i64,
    pub bits_per_sample: i32,
    #[serde(serialize_with = "serialize_rational")]
    pub time_base: Rational,
    /// Audio only.
    pub sample_rate: Option<u32>,
    /// Audio only.
    pub channels: Option<u32>,
    /// Video only.
    pub width: Option<u32>,
    /// Video only.
    pub height: Option<u32>,
    /// Video only, frames per second.
    pub frame_rate: Option<f64>,
    pub metadata: BTreeMap<String, String>,
}

impl StreamInfo {
    pub fn new(index: usize, media_type: MediaType) -> Self {
        Self {
            index,
            media_type,
            codec_name: None,
            codec_long_name: None,
            format: None,
            bit_rate: 0,
            num_frames: 0,
            bits_per_sample: 0,
            time_base: Rational::new(0, 1),
            sample_rate: None,
            channels: None,
            width: None,
            height: None,
            frame_rate: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn audio(index: usize, format: &str, sample_rate: u32, channels: u32) -> Self {
        Self {
            format: Some(format.to_string()),
            time_base: Rational::new(1, sample_rate as i32),
            sample_rate: Some(sample_rate),
            channels: Some(channels),
            ..Self::new(index, MediaType::Audio)
        }
    }

    pub fn video(index: usize, format: &str, width: u32, height: u32, frame_rate: f64) -> Self {
        Self {
            format: Some(format.to_string()),
            time_base: Rational::new(1, 90_000),
            width: Some(width),
            height: Some(height),
            frame_rate: Some(frame_rate),
            ..Self::new(index, MediaType::Video)
        }
    }

    pub fn with_codec(mut self, name: &str) -> Self {
        self.codec_name = Some(name.to_string());
        self
    }

    pub fn is_audio(&self) -> bool {
        self.media_type == MediaType::Audio
    }

    pub fn is_video(&self) -> bool {
        self.media_type == MediaType::Video
    }

    pub fn format_detected(&self) -> bool {
        self.format.is_some()
    }
}

impl fmt::Display for StreamInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[STREAM]")?;
        writeln!(f, "index={}", self.index)?;
        writeln!(f, "codec_type={}", self.media_type)?;
        writeln!(
            f,
            "codec_name={}",
            self.codec_name.as_deref().unwrap_or("unknown")
        )?;
        writeln!(f, "format={}", self.format.as_deref().unwrap_or("N/A"))?;
        writeln!(
            f,
            "time_base={}/{}",
            self.time_base.numerator(),
            self.time_base.denominator()
        )?;
        writeln!(f, "bit_rate={}", self.bit_rate)?;
        if self.num_frames > 0 {
            writeln!(f, "nb_frames={}", self.num_frames)?;
        }
        if let Some(sr) = self.sample_rate {
            writeln!(f, "sample_rate={}", sr)?;
        }
        if let Some(c) = self.channels {
            writeln!(f, "channels={}", c)?;
        }
        if let Some(w) = self.width {
            writeln!(f, "width={}", w)?;
        }
        if let Some(h) = self.height {
            writeln!(f, "height={}", h)?;
        }
        if let Some(r) = self.frame_rate {
            writeln!(f, "frame_rate={:.3}", r)?;
        }
        for (key, value) in &self.metadata {
            writeln!(f, "TAG:{}={}", key, value)?;
        }
        write!(f, "[/STREAM]")
    }
}

/// Info about one active output stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputStreamInfo {
    pub source_index: usize,
    pub filter_description: String,
}

fn serialize_rational<S: Serializer>(value: &Rational, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format!("{}/{}", value.numerator(), value.denominator()))
}

/// Copies an FFmpeg dictionary into an ordered map.
pub(crate) fn parse_metadata(dict: &ffmpeg_next::DictionaryRef<'_>) -> BTreeMap<String, String> {
    dict.iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}
