//! In-memory source and processor used by the reader and task tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use std::time::Duration;

use bytes::Bytes;

use crate::{
    buffer::{Chunk, ChunkBuffer},
    error::{ReaderError, Result},
    metadata::{MediaType, StreamInfo},
    packet::SourcePacket,
    processor::{DecoderConfig, Feed, OutputConfig, OutputKey, ProcessorFactory, StreamProcessor},
    reader::Reader,
    source::{ReadOutcome, Source},
};

/// Seconds covered by one fake frame.
pub const FRAME_DURATION: f64 = 0.1;

#[derive(Clone, Debug)]
pub struct FakePacket {
    pub stream: usize,
    pub pts: f64,
    /// One byte per frame.
    pub frames: Vec<u8>,
}

impl SourcePacket for FakePacket {
    fn stream_index(&self) -> usize {
        self.stream
    }
}

#[derive(Clone, Debug)]
pub enum Event {
    Packet(FakePacket),
    Again,
    Fail,
}

/// Replays a script of events. Discarded streams are skipped the way a
/// demuxer skips them, unless `ignore_discard` is set.
pub struct FakeSource {
    streams: Vec<StreamInfo>,
    metadata: BTreeMap<String, String>,
    script: Vec<Event>,
    cursor: usize,
    always_again: bool,
    honor_discard: bool,
    requested: BTreeSet<usize>,
    ever_requested: BTreeSet<usize>,
    delivered: BTreeMap<usize, usize>,
    reads: usize,
    seeks: Vec<Duration>,
}

impl FakeSource {
    pub fn new(streams: Vec<StreamInfo>) -> Self {
        let requested = (0..streams.len()).collect();
        Self {
            streams,
            metadata: BTreeMap::from([("title".to_string(), "fake".to_string())]),
            script: Vec::new(),
            cursor: 0,
            always_again: false,
            honor_discard: true,
            // demuxers start with every stream enabled
            requested,
            ever_requested: BTreeSet::new(),
            delivered: BTreeMap::new(),
            reads: 0,
            seeks: Vec::new(),
        }
    }

    pub fn with_events(mut self, events: Vec<Event>) -> Self {
        self.script = events;
        self
    }

    pub fn always_again(mut self) -> Self {
        self.always_again = true;
        self
    }

    pub fn ignore_discard(mut self) -> Self {
        self.honor_discard = false;
        self
    }

    pub fn ever_requested(&self, index: usize) -> bool {
        self.ever_requested.contains(&index)
    }

    pub fn delivered(&self, index: usize) -> usize {
        self.delivered.get(&index).copied().unwrap_or(0)
    }

    pub fn reads(&self) -> usize {
        self.reads
    }

    pub fn seeks(&self) -> &[Duration] {
        &self.seeks
    }
}

impl Source for FakeSource {
    type Packet = FakePacket;

    fn num_streams(&self) -> usize {
        self.streams.len()
    }

    fn stream_info(&self, index: usize) -> Option<&StreamInfo> {
        self.streams.get(index)
    }

    fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    fn read_packet(&mut self) -> Result<ReadOutcome<FakePacket>> {
        self.reads += 1;
        if self.always_again {
            return Ok(ReadOutcome::Again);
        }
        while let Some(event) = self.script.get(self.cursor).cloned() {
            self.cursor += 1;
            match event {
                Event::Again => return Ok(ReadOutcome::Again),
                Event::Fail => {
                    return Err(ReaderError::Io(std::io::Error::other("connection reset")));
                }
                Event::Packet(packet) => {
                    if self.honor_discard && !self.requested.contains(&packet.stream) {
                        continue;
                    }
                    *self.delivered.entry(packet.stream).or_insert(0) += 1;
                    return Ok(ReadOutcome::Packet(packet));
                }
            }
        }
        Ok(ReadOutcome::EndOfSource)
    }

    fn seek(&mut self, position: Duration) -> Result<()> {
        let target = position.as_secs_f64();
        self.cursor = self
            .script
            .iter()
            .position(|e| matches!(e, Event::Packet(p) if p.pts >= target))
            .unwrap_or(self.script.len());
        self.seeks.push(position);
        Ok(())
    }

    fn set_requested(&mut self, index: usize, requested: bool) {
        if requested {
            self.requested.insert(index);
            self.ever_requested.insert(index);
        } else {
            self.requested.remove(&index);
        }
    }

    fn is_requested(&self, index: usize) -> bool {
        self.requested.contains(&index)
    }
}

/// Copies packet bytes straight into chunk buffers, one frame per byte.
pub struct FakeProcessor {
    outputs: BTreeMap<OutputKey, (ChunkBuffer, String)>,
    next_key: usize,
    again: usize,
    fail_drain: bool,
    drains: Arc<AtomicUsize>,
}

impl StreamProcessor for FakeProcessor {
    type Packet = FakePacket;

    fn add_output(&mut self, stream: &StreamInfo, config: &OutputConfig) -> Result<OutputKey> {
        let description = config.filter_description_for(stream.media_type);
        if description == "invalid" {
            return Err(ReaderError::Filter {
                description,
                source: ffmpeg_next::Error::InvalidData,
            });
        }
        let buffer = ChunkBuffer::new(stream.media_type, config.frames_per_chunk, config.num_chunks)?;
        let key = OutputKey::new(self.next_key);
        self.next_key += 1;
        self.outputs.insert(key, (buffer, description));
        Ok(key)
    }

    fn remove_output(&mut self, key: OutputKey) {
        self.outputs.remove(&key);
    }

    fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    fn process_packet(&mut self, packet: Option<FakePacket>) -> Result<Feed> {
        let Some(packet) = packet else {
            self.drains.fetch_add(1, Ordering::SeqCst);
            for (buffer, _) in self.outputs.values_mut() {
                buffer.mark_exhausted();
            }
            if self.fail_drain {
                return Err(ReaderError::Other(anyhow::anyhow!("drain failed")));
            }
            return Ok(Feed::Accepted);
        };
        if self.again > 0 {
            self.again -= 1;
            return Ok(Feed::Again);
        }
        for (buffer, _) in self.outputs.values_mut() {
            buffer.push(
                Bytes::from(packet.frames.clone()),
                packet.frames.len(),
                Some(packet.pts),
                Some(FRAME_DURATION),
            )?;
        }
        Ok(Feed::Accepted)
    }

    fn flush(&mut self) {
        for (buffer, _) in self.outputs.values_mut() {
            buffer.flush();
        }
    }

    fn is_ready(&self) -> bool {
        self.outputs.values().all(|(buffer, _)| buffer.is_ready())
    }

    fn pop_chunk(&mut self, key: OutputKey) -> Option<Chunk> {
        self.outputs.get_mut(&key).and_then(|(buffer, _)| buffer.pop())
    }

    fn filter_description(&self, key: OutputKey) -> Option<String> {
        self.outputs.get(&key).map(|(_, d)| d.clone())
    }
}

#[derive(Clone, Default)]
pub struct FakeFactory {
    pub created: Arc<AtomicUsize>,
    pub drains: Arc<AtomicUsize>,
    /// Number of `Feed::Again` answers each new processor gives first.
    pub again: usize,
    pub fail_drain: BTreeSet<usize>,
}

impl ProcessorFactory<FakeSource> for FakeFactory {
    type Processor = FakeProcessor;

    fn create(
        &self,
        source: &FakeSource,
        index: usize,
        decoder: &DecoderConfig,
    ) -> Result<FakeProcessor> {
        if source.stream_info(index).is_none() {
            return Err(ReaderError::SourceIndexOutOfRange {
                index,
                len: source.num_streams(),
            });
        }
        if let Some(name) = decoder.name.as_deref() {
            return Err(ReaderError::DecoderNotFound(name.to_string()));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(FakeProcessor {
            outputs: BTreeMap::new(),
            next_key: 0,
            again: self.again,
            fail_drain: self.fail_drain.contains(&index),
            drains: self.drains.clone(),
        })
    }
}

pub type FakeReader = Reader<FakeSource, FakeFactory>;

/// Stream 0: 8 kHz mono audio, stream 1: 320x240 video, stream 2: audio
/// with an undetected sample format.
pub fn streams() -> Vec<StreamInfo> {
    let mut undetected = StreamInfo::new(2, MediaType::Audio).with_codec("aac");
    undetected.sample_rate = Some(44_100);
    vec![
        StreamInfo::audio(0, "s16", 8000, 1).with_codec("pcm_s16le"),
        StreamInfo::video(1, "yuv420p", 320, 240, 25.0).with_codec("h264"),
        undetected,
    ]
}

/// `num_frames` audio frames on stream 0 in packets of `per_packet` frames,
/// each followed by a video packet on stream 1. Frame bytes count up from 0.
pub fn interleaved(num_frames: usize, per_packet: usize) -> Vec<Event> {
    let mut events = Vec::new();
    let mut start = 0;
    while start < num_frames {
        let end = (start + per_packet).min(num_frames);
        let pts = start as f64 * FRAME_DURATION;
        events.push(Event::Packet(FakePacket {
            stream: 0,
            pts,
            frames: (start..end).map(|f| f as u8).collect(),
        }));
        events.push(Event::Packet(FakePacket {
            stream: 1,
            pts,
            frames: vec![0xff],
        }));
        start = end;
    }
    events
}

pub fn reader(source: FakeSource) -> FakeReader {
    Reader::new(source, FakeFactory::default())
}
