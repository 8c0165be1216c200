use std::collections::BTreeMap;

use crate::{
    buffer::Chunk,
    decoder::Decoder,
    error::{ReaderError, Result},
    filter::{FilterGraph, FilterInput, default_description},
    hw::Device,
    metadata::{MediaType, StreamInfo},
    packet::RawPacket,
    sink::Sink,
    source::{AvInput, OptionDict, Source},
};

/// Identifies one output pipeline on a stream processor. Opaque to the reader.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputKey(usize);

impl OutputKey {
    pub fn new(id: usize) -> Self {
        Self(id)
    }

    pub fn id(&self) -> usize {
        self.0
    }
}

/// Outcome of handing a packet (or end-of-stream) to a processor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Feed {
    Accepted,
    /// The decoder cannot take more input right now.
    Again,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DecoderConfig {
    /// Decoder to use instead of the default one for the codec, e.g. "h264_cuvid".
    pub name: Option<String>,
    pub options: OptionDict,
    pub device: Device,
}

impl DecoderConfig {
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn with_option(mut self, key: &str, value: &str) -> Self {
        self.options.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct OutputConfig {
    /// None: every pop returns all buffered frames.
    pub frames_per_chunk: Option<usize>,
    /// None: the buffer never drops frames.
    pub num_chunks: Option<usize>,
    /// FFmpeg filter description, e.g. "aresample=8000". None passes frames through.
    pub filter_description: Option<String>,
    pub decoder: DecoderConfig,
}

impl OutputConfig {
    pub fn new(frames_per_chunk: usize, num_chunks: usize) -> Self {
        Self {
            frames_per_chunk: Some(frames_per_chunk),
            num_chunks: Some(num_chunks),
            filter_description: None,
            decoder: DecoderConfig::default(),
        }
    }

    pub fn unchunked() -> Self {
        Self {
            frames_per_chunk: None,
            num_chunks: None,
            filter_description: None,
            decoder: DecoderConfig::default(),
        }
    }

    pub fn with_filter(mut self, description: &str) -> Self {
        self.filter_description = Some(description.to_string());
        self
    }

    pub fn with_decoder(mut self, decoder: DecoderConfig) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn filter_description_for(&self, media_type: MediaType) -> String {
        self.filter_description
            .clone()
            .unwrap_or_else(|| default_description(media_type).to_string())
    }

    /// Argument checks that do not need the source.
    pub fn validate(&self, media_type: MediaType) -> Result<()> {
        if self.frames_per_chunk == Some(0) {
            return Err(ReaderError::invalid_argument(
                "frames_per_chunk must be positive",
            ));
        }
        if self.num_chunks == Some(0) {
            return Err(ReaderError::invalid_argument("num_chunks must be positive"));
        }
        if self
            .filter_description
            .as_deref()
            .is_some_and(|d| d.trim().is_empty())
        {
            return Err(ReaderError::invalid_argument("filter description is empty"));
        }
        if self
            .decoder
            .name
            .as_deref()
            .is_some_and(|n| n.trim().is_empty())
        {
            return Err(ReaderError::invalid_argument("decoder name is empty"));
        }
        if media_type == MediaType::Audio && !self.decoder.device.is_cpu() {
            return Err(ReaderError::invalid_argument(format!(
                "audio streams are decoded on the cpu, got {}",
                self.decoder.device
            )));
        }
        Ok(())
    }
}

/// Decoder plus output pipelines of one source stream.
pub trait StreamProcessor {
    type Packet;

    fn add_output(&mut self, stream: &StreamInfo, config: &OutputConfig) -> Result<OutputKey>;

    /// Unknown keys are ignored.
    fn remove_output(&mut self, key: OutputKey);

    fn num_outputs(&self) -> usize;

    /// `None` drains the decoder and every pipeline.
    fn process_packet(&mut self, packet: Option<Self::Packet>) -> Result<Feed>;

    /// Discards all in-flight decode/filter state and buffered chunks.
    fn flush(&mut self);

    /// Every pipeline holds a full chunk or has been drained.
    fn is_ready(&self) -> bool;

    fn pop_chunk(&mut self, key: OutputKey) -> Option<Chunk>;

    fn filter_description(&self, key: OutputKey) -> Option<String>;
}

/// Builds the processor of a source stream the first time one of its
/// outputs is requested.
pub trait ProcessorFactory<S: Source> {
    type Processor: StreamProcessor<Packet = S::Packet>;

    fn create(&self, source: &S, index: usize, decoder: &DecoderConfig)
    -> Result<Self::Processor>;
}

pub struct AvStreamProcessor {
    decoder: Decoder,
    sinks: BTreeMap<OutputKey, Sink>,
    next_key: usize,
}

unsafe impl Send for AvStreamProcessor {}

impl AvStreamProcessor {
    pub fn new(decoder: Decoder) -> Self {
        Self {
            decoder,
            sinks: BTreeMap::new(),
            next_key: 0,
        }
    }

    pub fn decoder(&self) -> &Decoder {
        &self.decoder
    }

    fn receive_frames(&mut self) -> Result<()> {
        while let Some(frame) = self.decoder.receive_frame()? {
            for sink in self.sinks.values_mut() {
                sink.process_frame(&frame)?;
            }
        }
        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        self.decoder.send_eof()?;
        let mut ret = self.receive_frames();
        for (key, sink) in self.sinks.iter_mut() {
            if let Err(e) = sink.drain() {
                log::error!("drain output {} error: {}", key.id(), e);
                ret = Err(e);
            }
        }
        ret
    }
}

impl StreamProcessor for AvStreamProcessor {
    type Packet = RawPacket;

    fn add_output(&mut self, stream: &StreamInfo, config: &OutputConfig) -> Result<OutputKey> {
        let description = config.filter_description_for(stream.media_type);
        let time_base = self.decoder.time_base();
        let input = FilterInput::from_stream(self.decoder.stream(), time_base)?;
        let filter = FilterGraph::new(input, &description)?;
        let sink = Sink::new(filter, time_base, config.frames_per_chunk, config.num_chunks)?;

        let key = OutputKey::new(self.next_key);
        self.next_key += 1;
        self.sinks.insert(key, sink);
        Ok(key)
    }

    fn remove_output(&mut self, key: OutputKey) {
        self.sinks.remove(&key);
    }

    fn num_outputs(&self) -> usize {
        self.sinks.len()
    }

    fn process_packet(&mut self, packet: Option<RawPacket>) -> Result<Feed> {
        let Some(mut packet) = packet else {
            self.drain()?;
            return Ok(Feed::Accepted);
        };

        if self.decoder.send_packet(&mut packet)? == Feed::Again {
            // make room by receiving what the decoder holds, then retry once
            self.receive_frames()?;
            if self.decoder.send_packet(&mut packet)? == Feed::Again {
                return Ok(Feed::Again);
            }
        }
        self.receive_frames()?;
        Ok(Feed::Accepted)
    }

    fn flush(&mut self) {
        self.decoder.flush();
        for sink in self.sinks.values_mut() {
            sink.flush();
        }
    }

    fn is_ready(&self) -> bool {
        self.sinks.values().all(Sink::is_buffer_ready)
    }

    fn pop_chunk(&mut self, key: OutputKey) -> Option<Chunk> {
        self.sinks.get_mut(&key).and_then(Sink::pop_chunk)
    }

    fn filter_description(&self, key: OutputKey) -> Option<String> {
        self.sinks
            .get(&key)
            .map(|sink| sink.filter_description().to_string())
    }
}

/// Creates FFmpeg-backed processors for streams of an [`AvInput`].
#[derive(Clone, Copy, Debug, Default)]
pub struct AvProcessorFactory;

impl ProcessorFactory<AvInput> for AvProcessorFactory {
    type Processor = AvStreamProcessor;

    fn create(
        &self,
        source: &AvInput,
        index: usize,
        decoder: &DecoderConfig,
    ) -> Result<AvStreamProcessor> {
        let stream = source.stream(index).ok_or(ReaderError::SourceIndexOutOfRange {
            index,
            len: source.num_streams(),
        })?;
        Ok(AvStreamProcessor::new(Decoder::new(stream, decoder)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_config_validate() {
        assert!(OutputConfig::new(4, 2).validate(MediaType::Audio).is_ok());
        assert!(OutputConfig::unchunked().validate(MediaType::Video).is_ok());
        assert!(OutputConfig::new(0, 2).validate(MediaType::Audio).is_err());
        assert!(OutputConfig::new(4, 0).validate(MediaType::Audio).is_err());
        assert!(
            OutputConfig::new(4, 2)
                .with_filter(" ")
                .validate(MediaType::Audio)
                .is_err()
        );
        assert!(
            OutputConfig::new(4, 2)
                .with_decoder(DecoderConfig::default().with_name(""))
                .validate(MediaType::Video)
                .is_err()
        );
    }

    #[test]
    fn test_audio_on_cuda_is_rejected() {
        let config =
            OutputConfig::new(4, 2).with_decoder(DecoderConfig::default().with_device(Device::Cuda(0)));
        let err = config.validate(MediaType::Audio).err();
        assert!(matches!(err, Some(ReaderError::InvalidArgument(_))));
        assert!(config.validate(MediaType::Video).is_ok());
    }

    #[test]
    fn test_default_filter_description() {
        let config = OutputConfig::new(4, 2);
        assert_eq!(config.filter_description_for(MediaType::Audio), "anull");
        assert_eq!(config.filter_description_for(MediaType::Video), "null");
        let config = config.with_filter("aresample=8000");
        assert_eq!(config.filter_description_for(MediaType::Audio), "aresample=8000");
    }

    #[test]
    fn test_decoder_options() {
        let decoder = DecoderConfig::default()
            .with_name("h264")
            .with_option("threads", "2")
            .with_option("threads", "4");
        assert_eq!(decoder.name.as_deref(), Some("h264"));
        assert_eq!(decoder.options.len(), 1);
        assert_eq!(decoder.options.get("threads").map(String::as_str), Some("4"));
    }
}
