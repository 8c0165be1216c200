use ffmpeg_next::Rational;

use crate::{
    buffer::{Chunk, ChunkBuffer},
    error::Result,
    filter::{FilterGraph, FilterInput},
    frame::RawFrame,
    metadata::MediaType,
};

/// One output pipeline: decoded frames -> filter graph -> chunk buffer.
pub struct Sink {
    input_time_base: Rational,
    filter_description: String,
    filter: Option<FilterGraph>,
    buffer: ChunkBuffer,
}

unsafe impl Send for Sink {}

impl Sink {
    /// `filter` is built from the stream's codec parameters, which also
    /// validates the description up front.
    pub fn new(
        filter: FilterGraph,
        input_time_base: Rational,
        frames_per_chunk: Option<usize>,
        num_chunks: Option<usize>,
    ) -> Result<Self> {
        let media_type = filter.input().media_type();
        let buffer = ChunkBuffer::new(media_type, frames_per_chunk, num_chunks)?;
        Ok(Self {
            input_time_base,
            filter_description: filter.description().to_string(),
            filter: Some(filter),
            buffer,
        })
    }

    pub fn media_type(&self) -> MediaType {
        self.buffer.media_type()
    }

    pub fn filter_description(&self) -> &str {
        &self.filter_description
    }

    pub fn process_frame(&mut self, frame: &RawFrame) -> Result<()> {
        let input = FilterInput::from_frame(frame, self.input_time_base);
        let filter = match self.filter.take() {
            Some(filter) if filter.input() == &input => filter,
            previous => {
                if previous.is_some() {
                    log::debug!(
                        "frame properties changed, rebuilding filter graph {:?}",
                        self.filter_description
                    );
                }
                FilterGraph::new(input, &self.filter_description)?
            }
        };
        let filter = self.filter.insert(filter);
        filter.add_frame(frame)?;
        Self::pull(filter, &mut self.buffer)
    }

    /// End of input: flush the filter graph and mark the buffer exhausted.
    pub fn drain(&mut self) -> Result<()> {
        if self.buffer.is_exhausted() {
            return Ok(());
        }
        let ret = match self.filter.as_mut() {
            Some(filter) => filter
                .flush()
                .and_then(|_| Self::pull(filter, &mut self.buffer)),
            None => Ok(()),
        };
        self.buffer.mark_exhausted();
        ret
    }

    /// Drops buffered frames and in-flight filter state. The filter graph is
    /// rebuilt from the next frame.
    pub fn flush(&mut self) {
        self.filter = None;
        self.buffer.flush();
    }

    pub fn is_buffer_ready(&self) -> bool {
        self.buffer.is_ready()
    }

    pub fn pop_chunk(&mut self) -> Option<Chunk> {
        self.buffer.pop()
    }

    fn pull(filter: &mut FilterGraph, buffer: &mut ChunkBuffer) -> Result<()> {
        while let Some(frame) = filter.get_frame()? {
            let packed = frame.pack(filter.output_time_base())?;
            buffer.push(
                packed.data,
                packed.num_frames,
                packed.pts,
                packed.frame_duration,
            )?;
        }
        Ok(())
    }
}
