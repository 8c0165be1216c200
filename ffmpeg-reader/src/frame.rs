use bytes::{Bytes, BytesMut};
use ffmpeg_next::Rational;

use crate::error::{ReaderError, Result};

pub enum RawFrame {
    Video(RawVideoFrame),
    Audio(RawAudioFrame),
}

pub struct RawAudioFrame {
    frame: ffmpeg_next::frame::Audio,
}

impl RawAudioFrame {
    pub fn pts(&self) -> Option<i64> {
        self.frame.pts()
    }

    pub fn samples(&self) -> usize {
        self.frame.samples()
    }

    pub fn rate(&self) -> u32 {
        self.frame.rate()
    }

    pub fn channels(&self) -> usize {
        unsafe { (*self.frame.as_ptr()).ch_layout.nb_channels.max(0) as usize }
    }

    pub fn format(&self) -> ffmpeg_next::format::Sample {
        self.frame.format()
    }

    pub fn as_audio(&self) -> &ffmpeg_next::frame::Audio {
        &self.frame
    }

    /// Samples interleaved across channels: `samples()` frames of
    /// `channels() * bytes_per_sample` bytes each. Planar input is
    /// interleaved on the way out.
    pub fn packed_bytes(&self) -> Bytes {
        let samples = self.samples();
        let channels = self.channels();
        let sample_size = self.format().bytes();
        let frame_size = channels * sample_size;

        if !self.frame.is_planar() || channels <= 1 {
            let len = samples * frame_size;
            return Bytes::copy_from_slice(&self.frame.data(0)[..len]);
        }

        let mut out = BytesMut::zeroed(samples * frame_size);
        for channel in 0..channels {
            let plane = self.plane(channel, samples * sample_size);
            for sample in 0..samples {
                let src = sample * sample_size;
                let dst = sample * frame_size + channel * sample_size;
                out[dst..dst + sample_size].copy_from_slice(&plane[src..src + sample_size]);
            }
        }
        out.freeze()
    }

    /// First `len` bytes of a channel plane. Planes past the eighth only
    /// exist in `extended_data`, so that is where every plane is read from.
    fn plane(&self, channel: usize, len: usize) -> &[u8] {
        unsafe {
            let ptr = self.frame.as_ptr();
            let plane = *(*ptr).extended_data.add(channel);
            std::slice::from_raw_parts(plane, len)
        }
    }
}

impl From<ffmpeg_next::frame::Audio> for RawAudioFrame {
    fn from(frame: ffmpeg_next::frame::Audio) -> Self {
        Self { frame }
    }
}

pub struct RawVideoFrame {
    frame: ffmpeg_next::frame::Video,
}

impl From<ffmpeg_next::frame::Video> for RawVideoFrame {
    fn from(frame: ffmpeg_next::frame::Video) -> Self {
        Self { frame }
    }
}

impl RawVideoFrame {
    pub fn width(&self) -> u32 {
        self.frame.width()
    }

    pub fn height(&self) -> u32 {
        self.frame.height()
    }

    pub fn format(&self) -> ffmpeg_next::format::Pixel {
        self.frame.format()
    }

    pub fn pts(&self) -> Option<i64> {
        self.frame.pts()
    }

    pub fn as_video(&self) -> &ffmpeg_next::frame::Video {
        &self.frame
    }

    /// All planes copied without line padding (`av_image_copy_to_buffer`
    /// with alignment 1).
    pub fn packed_bytes(&self) -> Result<Bytes> {
        let format: ffmpeg_next::ffi::AVPixelFormat = self.format().into();
        let width = self.width() as i32;
        let height = self.height() as i32;
        unsafe {
            let size = ffmpeg_next::ffi::av_image_get_buffer_size(format, width, height, 1);
            if size < 0 {
                return Err(ffmpeg_next::Error::from(size).into());
            }
            let mut out = BytesMut::zeroed(size as usize);
            let ptr = self.frame.as_ptr();
            let ret = ffmpeg_next::ffi::av_image_copy_to_buffer(
                out.as_mut_ptr(),
                size,
                (*ptr).data.as_ptr() as *const *const u8,
                (*ptr).linesize.as_ptr(),
                format,
                width,
                height,
                1,
            );
            if ret < 0 {
                return Err(ffmpeg_next::Error::from(ret).into());
            }
            Ok(out.freeze())
        }
    }
}

/// Converts a timestamp in `time_base` units to seconds.
pub fn pts_seconds(pts: Option<i64>, time_base: Rational) -> Option<f64> {
    if time_base.denominator() == 0 {
        return None;
    }
    pts.map(|pts| pts as f64 * f64::from(time_base))
}

/// Decoded frame bytes ready for a chunk buffer.
pub struct PackedFrames {
    pub data: Bytes,
    pub num_frames: usize,
    pub pts: Option<f64>,
    /// Seconds per frame when known.
    pub frame_duration: Option<f64>,
}

impl RawFrame {
    pub fn pack(&self, time_base: Rational) -> Result<PackedFrames> {
        match self {
            RawFrame::Audio(frame) => {
                let rate = frame.rate();
                if frame.channels() == 0 {
                    return Err(ReaderError::invalid_argument(
                        "audio frame without channels",
                    ));
                }
                Ok(PackedFrames {
                    data: frame.packed_bytes(),
                    num_frames: frame.samples(),
                    pts: pts_seconds(frame.pts(), time_base),
                    frame_duration: (rate > 0).then(|| 1.0 / rate as f64),
                })
            }
            RawFrame::Video(frame) => Ok(PackedFrames {
                data: frame.packed_bytes()?,
                num_frames: 1,
                pts: pts_seconds(frame.pts(), time_base),
                frame_duration: None,
            }),
        }
    }
}
