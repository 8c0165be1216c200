use ffmpeg_next::Rational;

use crate::{
    error::{ReaderError, Result},
    frame::{RawAudioFrame, RawFrame, RawVideoFrame},
    hw::{Device, find_hw_decoder},
    packet::RawPacket,
    processor::{DecoderConfig, Feed},
    source::to_dictionary,
    stream::AvStream,
};

enum DecoderType {
    Video(ffmpeg_next::codec::decoder::Video),
    Audio(ffmpeg_next::codec::decoder::Audio),
}

fn is_again(err: &ffmpeg_next::Error) -> bool {
    matches!(err, ffmpeg_next::Error::Other { errno } if *errno == ffmpeg_next::util::error::EAGAIN)
}

impl DecoderType {
    fn send_packet(&mut self, packet: &ffmpeg_next::Packet) -> Result<Feed> {
        let ret = match self {
            DecoderType::Video(video_decoder) => video_decoder.send_packet(packet),
            DecoderType::Audio(audio_decoder) => audio_decoder.send_packet(packet),
        };
        match ret {
            Ok(()) => Ok(Feed::Accepted),
            Err(err) if is_again(&err) => Ok(Feed::Again),
            Err(err) => Err(err.into()),
        }
    }

    fn send_eof(&mut self) -> Result<()> {
        let ret = match self {
            DecoderType::Video(video_decoder) => video_decoder.send_eof(),
            DecoderType::Audio(audio_decoder) => audio_decoder.send_eof(),
        };
        match ret {
            // already draining
            Ok(()) | Err(ffmpeg_next::Error::Eof) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn receive_frame(&mut self) -> Result<Option<RawFrame>> {
        match self {
            DecoderType::Video(video_decoder) => {
                let mut frame = ffmpeg_next::frame::Video::empty();
                match video_decoder.receive_frame(&mut frame) {
                    Ok(()) => Ok(Some(RawFrame::Video(RawVideoFrame::from(frame)))),
                    Err(ffmpeg_next::Error::Eof) => Ok(None),
                    Err(err) if is_again(&err) => Ok(None),
                    Err(err) => Err(err.into()),
                }
            }
            DecoderType::Audio(audio_decoder) => {
                let mut frame = ffmpeg_next::frame::Audio::empty();
                match audio_decoder.receive_frame(&mut frame) {
                    Ok(()) => Ok(Some(RawFrame::Audio(RawAudioFrame::from(frame)))),
                    Err(ffmpeg_next::Error::Eof) => Ok(None),
                    Err(err) if is_again(&err) => Ok(None),
                    Err(err) => Err(err.into()),
                }
            }
        }
    }

    fn flush(&mut self) {
        match self {
            DecoderType::Video(video_decoder) => video_decoder.flush(),
            DecoderType::Audio(audio_decoder) => audio_decoder.flush(),
        }
    }
}

/// Decode context of one source stream.
pub struct Decoder {
    stream: AvStream,
    inner: DecoderType,
    decoder_time_base: Rational,
    codec_name: String,
}

unsafe impl Send for Decoder {}

impl Decoder {
    pub fn new(stream: &AvStream, config: &DecoderConfig) -> Result<Self> {
        let codec = Self::find_codec(stream, config)?;
        let mut options = config.options.clone();
        if let Device::Cuda(index) = config.device {
            options
                .entry("gpu".to_string())
                .or_insert_with(|| index.to_string());
        }

        let mut decoder_ctx = ffmpeg_next::codec::Context::from_parameters(stream.parameters().clone())?;
        unsafe {
            (*decoder_ctx.as_mut_ptr()).time_base = stream.time_base().into();
        }
        let opened = decoder_ctx
            .decoder()
            .open_as_with(codec, to_dictionary(&options))?;

        let inner = if stream.is_video() {
            let video_decoder = opened.video()?;
            if video_decoder.width() == 0 || video_decoder.height() == 0 {
                return Err(ReaderError::UndetectedFormat(stream.index()));
            }
            DecoderType::Video(video_decoder)
        } else if stream.is_audio() {
            DecoderType::Audio(opened.audio()?)
        } else {
            return Err(ReaderError::invalid_argument(format!(
                "stream {} is neither audio nor video",
                stream.index()
            )));
        };

        let decoder_time_base = match &inner {
            DecoderType::Video(d) => d.time_base(),
            DecoderType::Audio(d) => d.time_base(),
        };
        let decoder_time_base = if decoder_time_base.numerator() == 0 {
            stream.time_base()
        } else {
            decoder_time_base
        };
        log::info!(
            "opened decoder {} for stream {} on {}",
            codec.name(),
            stream.index(),
            config.device
        );

        Ok(Self {
            stream: stream.clone(),
            inner,
            decoder_time_base,
            codec_name: codec.name().to_string(),
        })
    }

    fn find_codec(stream: &AvStream, config: &DecoderConfig) -> Result<ffmpeg_next::Codec> {
        if let Some(name) = &config.name {
            return ffmpeg_next::decoder::find_by_name(name)
                .ok_or_else(|| ReaderError::DecoderNotFound(name.clone()));
        }
        let id = stream.parameters().id();
        match config.device {
            Device::Cpu => ffmpeg_next::decoder::find(id)
                .ok_or_else(|| ReaderError::DecoderNotFound(format!("{:?}", id))),
            device => find_hw_decoder(id, device).ok_or_else(|| {
                ReaderError::UnsupportedDevice(format!("no {} decoder for {:?}", device, id))
            }),
        }
    }

    /// Sends one packet. On `Feed::Again` the packet was not consumed and may
    /// be sent again after the pending frames are received.
    pub fn send_packet(&mut self, packet: &mut RawPacket) -> Result<Feed> {
        let time_base = packet.time_base();
        if time_base != self.decoder_time_base {
            packet.get_mut().rescale_ts(time_base, self.decoder_time_base);
            packet.set_time_base(self.decoder_time_base);
        }
        self.inner.send_packet(packet.packet())
    }

    pub fn send_eof(&mut self) -> Result<()> {
        self.inner.send_eof()
    }

    pub fn receive_frame(&mut self) -> Result<Option<RawFrame>> {
        self.inner.receive_frame()
    }

    /// Drops everything buffered inside the decoder (used on seek).
    pub fn flush(&mut self) {
        self.inner.flush()
    }

    /// Time base of the decoded frames' timestamps.
    pub fn time_base(&self) -> Rational {
        self.decoder_time_base
    }

    pub fn stream(&self) -> &AvStream {
        &self.stream
    }

    pub fn codec_name(&self) -> &str {
        &self.codec_name
    }
}
