//! Compute device selection and hardware-accelerated decoder discovery.

use std::fmt;
use std::str::FromStr;

use crate::error::ReaderError;

/// Where decoding happens. Chunks are always returned in host memory.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Device {
    #[default]
    Cpu,
    /// NVIDIA GPU by ordinal, decoded through the CUVID decoders.
    Cuda(u32),
}

impl Device {
    pub fn is_cpu(&self) -> bool {
        matches!(self, Device::Cpu)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(index) => write!(f, "cuda:{}", index),
        }
    }
}

/// Parses "cpu", "cuda" and "cuda:N".
impl FromStr for Device {
    type Err = ReaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            None if s == "cpu" => Ok(Device::Cpu),
            None if s == "cuda" => Ok(Device::Cuda(0)),
            Some(("cuda", index)) => index
                .parse()
                .map(Device::Cuda)
                .map_err(|_| ReaderError::UnsupportedDevice(s.to_string())),
            _ => Err(ReaderError::UnsupportedDevice(format!(
                "{} (only cuda is supported for hardware acceleration)",
                s
            ))),
        }
    }
}

/// Names of the CUVID decoders for a codec, in preference order.
pub fn cuda_decoder_names(codec_id: ffmpeg_next::codec::Id) -> &'static [&'static str] {
    match codec_id {
        ffmpeg_next::codec::Id::H264 => &["h264_cuvid"],
        ffmpeg_next::codec::Id::HEVC => &["hevc_cuvid"],
        ffmpeg_next::codec::Id::VP8 => &["vp8_cuvid"],
        ffmpeg_next::codec::Id::VP9 => &["vp9_cuvid"],
        ffmpeg_next::codec::Id::AV1 => &["av1_cuvid"],
        ffmpeg_next::codec::Id::MPEG2VIDEO => &["mpeg2_cuvid"],
        ffmpeg_next::codec::Id::MPEG4 => &["mpeg4_cuvid"],
        ffmpeg_next::codec::Id::MJPEG => &["mjpeg_cuvid"],
        ffmpeg_next::codec::Id::VC1 => &["vc1_cuvid"],
        _ => &[],
    }
}

/// Try to find a hardware decoder for the given codec on `device`.
/// Returns None for the CPU or when no suitable decoder is compiled in.
pub fn find_hw_decoder(
    codec_id: ffmpeg_next::codec::Id,
    device: Device,
) -> Option<ffmpeg_next::Codec> {
    let names = match device {
        Device::Cpu => return None,
        Device::Cuda(_) => cuda_decoder_names(codec_id),
    };

    for name in names {
        if let Some(codec) = ffmpeg_next::decoder::find_by_name(name) {
            log::info!("found hardware decoder: {}", name);
            return Some(codec);
        }
    }
    None
}
