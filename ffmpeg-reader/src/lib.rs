/// Registers FFmpeg components (format, device, etc.). Call once at startup
/// before opening device inputs like v4l2 or alsa.
pub fn init() -> anyhow::Result<()> {
    ffmpeg_next::init().map_err(|e| anyhow::anyhow!("ffmpeg_next init: {}", e))
}

pub mod buffer;
pub mod decoder;
pub mod error;
pub mod filter;
pub mod frame;
pub mod hw;
pub mod metadata;
pub mod packet;
pub mod processor;
pub mod reader;
pub mod sink;
pub mod source;
pub mod stream;
pub mod task;

#[cfg(test)]
pub(crate) mod testing;

pub use buffer::Chunk;
pub use error::{ReaderError, Result};
pub use hw::Device;
pub use metadata::{MediaType, OutputStreamInfo, StreamInfo};
pub use processor::{DecoderConfig, OutputConfig};
pub use reader::{Advance, Reader, ReaderState};
pub use source::{AvInput, OptionDict, Source};
pub use task::{Batch, ChunkStream, ReaderTask, TaskOptions};

/// Reader over an FFmpeg-demuxed input.
pub type AvReader = Reader<AvInput, processor::AvProcessorFactory>;
