//! Multiplexes packets of one source into per-stream decode pipelines and
//! hands out fixed-size chunks.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::{
    buffer::Chunk,
    error::{ReaderError, Result},
    metadata::{MediaType, OutputStreamInfo, StreamInfo},
    packet::SourcePacket,
    processor::{AvProcessorFactory, Feed, OutputConfig, OutputKey, ProcessorFactory, StreamProcessor},
    source::{AvInput, OptionDict, ReadOutcome, Source},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReaderState {
    Reading,
    /// End of source reached, pipelines are being flushed.
    Draining,
    Done,
    Error,
}

impl ReaderState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReaderState::Reading => "reading",
            ReaderState::Draining => "draining",
            ReaderState::Done => "done",
            ReaderState::Error => "error",
        }
    }
}

/// Result of one advancement step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Advance {
    /// A packet was read; keep calling.
    Continue,
    /// Nothing could be consumed right now; call again later.
    Retry,
    /// The source is exhausted and every pipeline has been drained.
    Done,
}

/// Not safe for concurrent use: every operation takes `&mut self` or reads
/// tables that those operations mutate.
pub struct Reader<S: Source, F: ProcessorFactory<S>> {
    source: S,
    factory: F,
    processors: BTreeMap<usize, F::Processor>,
    // (source index, key) in registration order; the position is the output index
    outputs: Vec<(usize, OutputKey)>,
    state: ReaderState,
}

impl Reader<AvInput, AvProcessorFactory> {
    pub fn open(url: &str) -> Result<Self> {
        Ok(Self::new(AvInput::open(url)?, AvProcessorFactory))
    }

    pub fn open_with(url: &str, format: Option<&str>, options: &OptionDict) -> Result<Self> {
        Ok(Self::new(
            AvInput::open_with(url, format, options)?,
            AvProcessorFactory,
        ))
    }
}

impl<S: Source, F: ProcessorFactory<S>> Reader<S, F> {
    pub fn new(mut source: S, factory: F) -> Self {
        for index in 0..source.num_streams() {
            source.set_requested(index, false);
        }
        Self {
            source,
            factory,
            processors: BTreeMap::new(),
            outputs: Vec::new(),
            state: ReaderState::Reading,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    // ------------------------------------------------------------------
    // Query
    // ------------------------------------------------------------------

    pub fn num_src_streams(&self) -> usize {
        self.source.num_streams()
    }

    pub fn src_stream_info(&self, index: usize) -> Result<&StreamInfo> {
        self.source
            .stream_info(index)
            .ok_or(ReaderError::SourceIndexOutOfRange {
                index,
                len: self.source.num_streams(),
            })
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        self.source.metadata()
    }

    pub fn num_out_streams(&self) -> usize {
        self.outputs.len()
    }

    pub fn out_stream_info(&self, position: usize) -> Result<OutputStreamInfo> {
        let (source_index, key) = self.output_at(position)?;
        let filter_description = self
            .processors
            .get(&source_index)
            .and_then(|p| p.filter_description(key))
            .unwrap_or_default();
        Ok(OutputStreamInfo {
            source_index,
            filter_description,
        })
    }

    pub fn find_best_audio_stream(&self) -> Option<usize> {
        self.source.best_stream(MediaType::Audio)
    }

    pub fn find_best_video_stream(&self) -> Option<usize> {
        self.source.best_stream(MediaType::Video)
    }

    /// Whether a decode pipeline exists for the source stream.
    pub fn is_decoding(&self, index: usize) -> bool {
        self.processors.contains_key(&index)
    }

    /// Every output holds a full chunk or its stream has been drained.
    pub fn all_ready(&self) -> bool {
        self.processors.values().all(|p| p.is_ready())
    }

    fn output_at(&self, position: usize) -> Result<(usize, OutputKey)> {
        self.outputs
            .get(position)
            .copied()
            .ok_or(ReaderError::OutputIndexOutOfRange {
                index: position,
                len: self.outputs.len(),
            })
    }

    fn validate_src_stream_type(&self, index: usize, media_type: MediaType) -> Result<&StreamInfo> {
        let info = self.src_stream_info(index)?;
        if info.media_type != media_type {
            return Err(ReaderError::MediaTypeMismatch {
                index,
                expected: media_type,
                found: info.media_type,
            });
        }
        Ok(info)
    }

    // ------------------------------------------------------------------
    // Configure
    // ------------------------------------------------------------------

    /// Registers an output pipeline on source stream `index` and returns its
    /// output position. Fails without changing anything on invalid input.
    /// After end of source no pipeline would be drained again, so outputs can
    /// only be added once a seek has reset the reader.
    pub fn add_output(
        &mut self,
        index: usize,
        media_type: MediaType,
        config: &OutputConfig,
    ) -> Result<usize> {
        if self.state == ReaderState::Done {
            return Err(ReaderError::InvalidState(self.state.as_str()));
        }
        let info = self.validate_src_stream_type(index, media_type)?.clone();
        // file-like sources sometimes leave the codec undetected
        if !info.format_detected() {
            return Err(ReaderError::UndetectedFormat(index));
        }
        config.validate(media_type)?;

        let key = match self.processors.get_mut(&index) {
            Some(processor) => processor.add_output(&info, config)?,
            None => {
                let mut processor = self.factory.create(&self.source, index, &config.decoder)?;
                let key = processor.add_output(&info, config)?;
                self.processors.insert(index, processor);
                key
            }
        };
        self.source.set_requested(index, true);
        self.outputs.push((index, key));

        let position = self.outputs.len() - 1;
        log::info!(
            "output {} added: {} stream {}, frames_per_chunk {:?}, num_chunks {:?}, filter {:?}",
            position,
            media_type,
            index,
            config.frames_per_chunk,
            config.num_chunks,
            config.filter_description
        );
        Ok(position)
    }

    pub fn add_audio_stream(&mut self, index: usize, config: &OutputConfig) -> Result<usize> {
        self.add_output(index, MediaType::Audio, config)
    }

    pub fn add_video_stream(&mut self, index: usize, config: &OutputConfig) -> Result<usize> {
        self.add_output(index, MediaType::Video, config)
    }

    /// Removes the output at `position`; later outputs move down by one.
    /// The stream's decoder is released with its last output.
    pub fn remove_output(&mut self, position: usize) -> Result<()> {
        let (index, key) = self.output_at(position)?;
        if let Some(processor) = self.processors.get_mut(&index) {
            processor.remove_output(key);
        }
        self.outputs.remove(position);

        if !self.outputs.iter().any(|(i, _)| *i == index) {
            self.processors.remove(&index);
            self.source.set_requested(index, false);
            log::info!("stream {} released", index);
        }
        log::info!("output {} removed", position);
        Ok(())
    }

    /// Seeks to the keyframe at or before `timestamp` seconds and discards
    /// every partially decoded or buffered chunk.
    pub fn seek(&mut self, timestamp: f64) -> Result<()> {
        if !(timestamp >= 0.0) {
            return Err(ReaderError::invalid_argument(
                "timestamp must be non-negative",
            ));
        }
        let position = Duration::try_from_secs_f64(timestamp)
            .map_err(|e| ReaderError::invalid_argument(format!("timestamp {}: {}", timestamp, e)))?;

        self.source.seek(position)?;
        for processor in self.processors.values_mut() {
            processor.flush();
        }
        self.state = ReaderState::Reading;
        log::info!("seeked to {:.3}s", timestamp);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Stream
    // ------------------------------------------------------------------

    /// Reads and routes exactly one packet. At end of source every pipeline
    /// is drained and `Advance::Done` is returned.
    pub fn advance_once(&mut self) -> Result<Advance> {
        match self.state {
            ReaderState::Done => return Ok(Advance::Done),
            ReaderState::Error => return Err(ReaderError::InvalidState(self.state.as_str())),
            ReaderState::Reading | ReaderState::Draining => {}
        }

        let packet = match self.source.read_packet() {
            Ok(ReadOutcome::Packet(packet)) => packet,
            Ok(ReadOutcome::Again) => return Ok(Advance::Retry),
            Ok(ReadOutcome::EndOfSource) => return self.finish(),
            Err(e) => {
                self.state = ReaderState::Error;
                return Err(e);
            }
        };

        // not requested by any output
        let Some(processor) = self.processors.get_mut(&packet.stream_index()) else {
            return Ok(Advance::Continue);
        };
        match processor.process_packet(Some(packet)) {
            Ok(Feed::Accepted) => Ok(Advance::Continue),
            Ok(Feed::Again) => Ok(Advance::Retry),
            Err(e) => {
                self.state = ReaderState::Error;
                Err(e)
            }
        }
    }

    /// Like `advance_once`, but sleeps `backoff` and tries again while the
    /// result is `Advance::Retry`, until `timeout` elapses (`None`: forever).
    pub fn advance_blocking(
        &mut self,
        timeout: Option<Duration>,
        backoff: Duration,
    ) -> Result<Advance> {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        loop {
            let ret = self.advance_once()?;
            if ret != Advance::Retry {
                return Ok(ret);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Ok(ret);
            }
            std::thread::sleep(backoff);
        }
    }

    /// Sends end-of-stream to every pipeline. All of them are visited even
    /// after a failure; the last failure is returned.
    pub fn drain_all(&mut self) -> Result<()> {
        let mut ret = Ok(());
        for (index, processor) in self.processors.iter_mut() {
            if let Err(e) = processor.process_packet(None) {
                log::error!("drain stream {} error: {}", index, e);
                ret = Err(e);
            }
        }
        ret
    }

    /// Pops one chunk per output, in output order. `None` means nothing is
    /// buffered for that output.
    pub fn pop_all(&mut self) -> Vec<Option<Chunk>> {
        let mut chunks = Vec::with_capacity(self.outputs.len());
        for (index, key) in &self.outputs {
            chunks.push(
                self.processors
                    .get_mut(index)
                    .and_then(|p| p.pop_chunk(*key)),
            );
        }
        chunks
    }

    fn finish(&mut self) -> Result<Advance> {
        self.state = ReaderState::Draining;
        log::info!("end of source, draining {} streams", self.processors.len());
        match self.drain_all() {
            Ok(()) => {
                self.state = ReaderState::Done;
                Ok(Advance::Done)
            }
            Err(e) => {
                self.state = ReaderState::Error;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
#[path = "reader_test.rs"]
mod reader_test;

#[cfg(test)]
#[path = "reader_av_test.rs"]
mod reader_av_test;
