//! Fixed-size chunking of decoded frames.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};

use crate::{
    error::{ReaderError, Result},
    metadata::MediaType,
};

/// A run of decoded frames handed to the caller. Frames are packed back to
/// back, `frame_size` bytes each: interleaved samples for audio, one
/// tightly packed picture per frame for video.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    media_type: MediaType,
    num_frames: usize,
    frame_size: usize,
    pts: Option<f64>,
    data: Bytes,
}

impl Chunk {
    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn num_frames(&self) -> usize {
        self.num_frames
    }

    /// Bytes per frame.
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Presentation time of the first frame, in seconds.
    pub fn pts(&self) -> Option<f64> {
        self.pts
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn frame(&self, index: usize) -> Option<&[u8]> {
        if index >= self.num_frames {
            return None;
        }
        let start = index * self.frame_size;
        Some(&self.data[start..start + self.frame_size])
    }
}

struct Segment {
    pts: Option<f64>,
    /// Seconds per frame, known for audio (1 / sample rate).
    frame_duration: Option<f64>,
    num_frames: usize,
    data: Bytes,
}

/// Accumulates frames of one output pipeline until a chunk is complete.
///
/// With `frames_per_chunk == None` every pop returns everything buffered.
/// With `num_chunks == Some(n)` at most `frames_per_chunk * n` frames are
/// kept and the oldest are dropped beyond that.
pub struct ChunkBuffer {
    media_type: MediaType,
    frames_per_chunk: Option<usize>,
    num_chunks: Option<usize>,
    frame_size: Option<usize>,
    segments: VecDeque<Segment>,
    num_buffered_frames: usize,
    exhausted: bool,
}

impl ChunkBuffer {
    pub fn new(
        media_type: MediaType,
        frames_per_chunk: Option<usize>,
        num_chunks: Option<usize>,
    ) -> Result<Self> {
        if frames_per_chunk == Some(0) {
            return Err(ReaderError::invalid_argument(
                "frames_per_chunk must be positive",
            ));
        }
        if num_chunks == Some(0) {
            return Err(ReaderError::invalid_argument("num_chunks must be positive"));
        }
        Ok(Self {
            media_type,
            frames_per_chunk,
            num_chunks,
            frame_size: None,
            segments: VecDeque::new(),
            num_buffered_frames: 0,
            exhausted: false,
        })
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn frames_per_chunk(&self) -> Option<usize> {
        self.frames_per_chunk
    }

    pub fn num_buffered_frames(&self) -> usize {
        self.num_buffered_frames
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// A full chunk is buffered, or no more frames will arrive and whatever
    /// is left (possibly nothing) can be popped.
    pub fn is_ready(&self) -> bool {
        if self.exhausted {
            return true;
        }
        match self.frames_per_chunk {
            Some(frames) => self.num_buffered_frames >= frames,
            None => self.num_buffered_frames > 0,
        }
    }

    pub fn push(
        &mut self,
        data: Bytes,
        num_frames: usize,
        pts: Option<f64>,
        frame_duration: Option<f64>,
    ) -> Result<()> {
        if num_frames == 0 {
            return Ok(());
        }
        if data.len() % num_frames != 0 {
            return Err(ReaderError::invalid_argument(format!(
                "{} bytes do not split into {} frames",
                data.len(),
                num_frames
            )));
        }
        let frame_size = data.len() / num_frames;
        match self.frame_size {
            Some(size) if size != frame_size => {
                return Err(ReaderError::invalid_argument(format!(
                    "frame size changed from {} to {} bytes",
                    size, frame_size
                )));
            }
            _ => self.frame_size = Some(frame_size),
        }

        self.segments.push_back(Segment {
            pts,
            frame_duration,
            num_frames,
            data,
        });
        self.num_buffered_frames += num_frames;

        if let (Some(frames), Some(chunks)) = (self.frames_per_chunk, self.num_chunks) {
            let capacity = frames * chunks;
            if self.num_buffered_frames > capacity {
                let excess = self.num_buffered_frames - capacity;
                log::debug!("{} buffer full, dropping {} oldest frames", self.media_type, excess);
                self.take_front(excess);
            }
        }
        Ok(())
    }

    pub fn pop(&mut self) -> Option<Chunk> {
        if self.num_buffered_frames == 0 {
            return None;
        }
        let num_frames = self
            .frames_per_chunk
            .map_or(self.num_buffered_frames, |f| f.min(self.num_buffered_frames));
        let (pts, data) = self.take_front(num_frames);
        Some(Chunk {
            media_type: self.media_type,
            num_frames,
            frame_size: self.frame_size.unwrap_or(0),
            pts,
            data,
        })
    }

    /// No more frames will be pushed until the next flush.
    pub fn mark_exhausted(&mut self) {
        self.exhausted = true;
    }

    pub fn flush(&mut self) {
        self.segments.clear();
        self.num_buffered_frames = 0;
        self.frame_size = None;
        self.exhausted = false;
    }

    fn take_front(&mut self, mut num_frames: usize) -> (Option<f64>, Bytes) {
        let frame_size = self.frame_size.unwrap_or(0);
        let mut pts = None;
        let mut parts: Vec<Bytes> = Vec::new();

        while num_frames > 0 {
            let Some(segment) = self.segments.front_mut() else {
                break;
            };
            if parts.is_empty() {
                pts = segment.pts;
            }
            let taken = num_frames.min(segment.num_frames);
            if taken == segment.num_frames {
                if let Some(segment) = self.segments.pop_front() {
                    parts.push(segment.data);
                }
            } else {
                parts.push(segment.data.split_to(taken * frame_size));
                segment.num_frames -= taken;
                if let (Some(p), Some(d)) = (segment.pts, segment.frame_duration) {
                    segment.pts = Some(p + taken as f64 * d);
                }
            }
            num_frames -= taken;
            self.num_buffered_frames -= taken;
        }

        let data = if parts.len() == 1 {
            parts.pop().unwrap_or_default()
        } else {
            let mut buf = BytesMut::with_capacity(parts.iter().map(Bytes::len).sum());
            for part in parts {
                buf.extend_from_slice(&part);
            }
            buf.freeze()
        };
        (pts, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(values: &[u8]) -> Bytes {
        Bytes::copy_from_slice(values)
    }

    #[test]
    fn test_rejects_zero_sizes() {
        assert!(ChunkBuffer::new(MediaType::Audio, Some(0), None).is_err());
        assert!(ChunkBuffer::new(MediaType::Audio, Some(4), Some(0)).is_err());
        assert!(ChunkBuffer::new(MediaType::Audio, None, None).is_ok());
    }

    #[test]
    fn test_ready_after_full_chunk() -> anyhow::Result<()> {
        let mut buffer = ChunkBuffer::new(MediaType::Audio, Some(4), None)?;
        buffer.push(frames(&[1, 2, 3]), 3, Some(0.0), Some(0.25))?;
        assert!(!buffer.is_ready());
        buffer.push(frames(&[4, 5]), 2, Some(0.75), Some(0.25))?;
        assert!(buffer.is_ready());

        let chunk = buffer.pop().expect("chunk");
        assert_eq!(chunk.num_frames(), 4);
        assert_eq!(chunk.data().as_ref(), &[1, 2, 3, 4]);
        assert_eq!(chunk.pts(), Some(0.0));
        assert_eq!(buffer.num_buffered_frames(), 1);
        assert!(!buffer.is_ready());

        // partial remainder keeps its own timestamp
        let rest = buffer.pop().expect("partial chunk");
        assert_eq!(rest.data().as_ref(), &[5]);
        assert_eq!(rest.pts(), Some(1.0));
        assert!(buffer.pop().is_none());
        Ok(())
    }

    #[test]
    fn test_split_segment_advances_pts() -> anyhow::Result<()> {
        let mut buffer = ChunkBuffer::new(MediaType::Audio, Some(2), None)?;
        buffer.push(frames(&[1, 1, 2, 2, 3, 3]), 3, Some(10.0), Some(0.5))?;
        let first = buffer.pop().expect("chunk");
        assert_eq!(first.frame_size(), 2);
        assert_eq!(first.frame(1), Some(&[2u8, 2][..]));
        assert_eq!(first.frame(2), None);
        let second = buffer.pop().expect("chunk");
        assert_eq!(second.pts(), Some(11.0));
        assert_eq!(second.num_frames(), 1);
        Ok(())
    }

    #[test]
    fn test_drops_oldest_beyond_capacity() -> anyhow::Result<()> {
        let mut buffer = ChunkBuffer::new(MediaType::Video, Some(2), Some(2))?;
        for i in 0..6u8 {
            buffer.push(frames(&[i]), 1, Some(i as f64), None)?;
        }
        assert_eq!(buffer.num_buffered_frames(), 4);
        let chunk = buffer.pop().expect("chunk");
        assert_eq!(chunk.data().as_ref(), &[2, 3]);
        assert_eq!(chunk.pts(), Some(2.0));
        Ok(())
    }

    #[test]
    fn test_unchunked_pops_everything() -> anyhow::Result<()> {
        let mut buffer = ChunkBuffer::new(MediaType::Audio, None, None)?;
        assert!(!buffer.is_ready());
        buffer.push(frames(&[1, 2]), 2, None, None)?;
        buffer.push(frames(&[3]), 1, None, None)?;
        assert!(buffer.is_ready());
        let chunk = buffer.pop().expect("chunk");
        assert_eq!(chunk.num_frames(), 3);
        assert!(buffer.pop().is_none());
        Ok(())
    }

    #[test]
    fn test_exhausted_is_ready_until_flush() -> anyhow::Result<()> {
        let mut buffer = ChunkBuffer::new(MediaType::Audio, Some(4), None)?;
        buffer.push(frames(&[1]), 1, None, None)?;
        buffer.mark_exhausted();
        assert!(buffer.is_ready());
        assert_eq!(buffer.pop().map(|c| c.num_frames()), Some(1));
        assert!(buffer.is_ready());
        assert!(buffer.pop().is_none());

        buffer.flush();
        assert!(!buffer.is_exhausted());
        assert!(!buffer.is_ready());
        Ok(())
    }

    #[test]
    fn test_rejects_inconsistent_frame_size() -> anyhow::Result<()> {
        let mut buffer = ChunkBuffer::new(MediaType::Video, Some(2), None)?;
        assert!(buffer.push(frames(&[1, 2, 3]), 2, None, None).is_err());
        buffer.push(frames(&[1, 2]), 1, None, None)?;
        assert!(buffer.push(frames(&[1, 2, 3]), 1, None, None).is_err());
        Ok(())
    }
}
