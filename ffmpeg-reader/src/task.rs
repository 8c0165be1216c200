use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::{
    buffer::Chunk,
    error::Result,
    processor::ProcessorFactory,
    reader::{Advance, Reader},
    source::Source,
};

/// One chunk per output, in output order.
pub type Batch = Vec<Option<Chunk>>;

#[derive(Clone, Debug)]
pub struct TaskOptions {
    /// Upper bound of one blocking advance. Cancellation is checked in between.
    pub timeout: Option<Duration>,
    pub backoff: Duration,
    /// Batches buffered between the reader thread and the consumer.
    pub capacity: usize,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_millis(100)),
            backoff: Duration::from_millis(10),
            capacity: 16,
        }
    }
}

/// Drives a [`Reader`] on a blocking thread and forwards ready batches to a
/// [`ChunkStream`].
pub struct ReaderTask {
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

impl ReaderTask {
    pub fn spawn<S, F>(reader: Reader<S, F>, options: TaskOptions) -> (Self, ChunkStream)
    where
        S: Source + Send + 'static,
        F: ProcessorFactory<S> + Send + 'static,
        F::Processor: Send + 'static,
    {
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(options.capacity.max(1));

        let cancel_inner = cancel.clone();
        let handle =
            tokio::task::spawn_blocking(move || Self::run(reader, options, tx, cancel_inner));

        (
            Self { cancel, handle },
            ChunkStream {
                inner: ReceiverStream::new(rx),
            },
        )
    }

    fn run<S, F>(
        mut reader: Reader<S, F>,
        options: TaskOptions,
        tx: mpsc::Sender<Result<Batch>>,
        cancel: CancellationToken,
    ) where
        S: Source,
        F: ProcessorFactory<S>,
    {
        loop {
            if cancel.is_cancelled() {
                log::info!("reader task cancelled");
                return;
            }
            match reader.advance_blocking(options.timeout, options.backoff) {
                Ok(Advance::Done) => break,
                Ok(_) => {}
                Err(e) => {
                    log::error!("reader task error: {}", e);
                    let _ = tx.blocking_send(Err(e));
                    return;
                }
            }
            while reader.num_out_streams() > 0 && reader.all_ready() {
                if tx.blocking_send(Ok(reader.pop_all())).is_err() {
                    log::debug!("chunk stream dropped, stopping reader task");
                    return;
                }
            }
        }

        // drained: hand out what is left
        while !cancel.is_cancelled() {
            let batch = reader.pop_all();
            if batch.iter().all(Option::is_none) {
                break;
            }
            if tx.blocking_send(Ok(batch)).is_err() {
                return;
            }
        }
        log::info!("reader task finished");
    }

    /// Stops the task before its next advance. A read in flight is not
    /// interrupted.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub async fn join(self) -> anyhow::Result<()> {
        self.handle
            .await
            .map_err(|e| anyhow::anyhow!("reader task panicked: {}", e))
    }
}

/// Batches produced by a [`ReaderTask`]. Ends after the last batch, after
/// an error, or when the task is stopped.
pub struct ChunkStream {
    inner: ReceiverStream<Result<Batch>>,
}

impl Stream for ChunkStream {
    type Item = Result<Batch>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::ReaderError,
        processor::OutputConfig,
        testing::{Event, FakeSource, interleaved, reader, streams},
    };
    use futures::StreamExt;

    fn options() -> TaskOptions {
        TaskOptions {
            timeout: Some(Duration::from_millis(20)),
            backoff: Duration::from_millis(2),
            capacity: 2,
        }
    }

    #[tokio::test]
    async fn test_stream_yields_every_chunk() -> anyhow::Result<()> {
        let mut reader = reader(FakeSource::new(streams()).with_events(interleaved(8, 2)));
        reader.add_audio_stream(0, &OutputConfig::new(4, 2))?;

        let (task, stream) = ReaderTask::spawn(reader, options());
        let batches: Vec<Batch> = tokio::time::timeout(Duration::from_secs(5), stream.collect::<Vec<_>>())
            .await?
            .into_iter()
            .collect::<Result<_>>()?;
        task.join().await?;

        let chunks: Vec<Chunk> = batches.into_iter().flatten().flatten().collect();
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.num_frames() == 4));
        assert_eq!(chunks[1].data().as_ref(), &[4, 5, 6, 7]);
        Ok(())
    }

    #[tokio::test]
    async fn test_error_ends_stream() -> anyhow::Result<()> {
        let mut events = interleaved(2, 2);
        events.push(Event::Fail);
        let mut reader = reader(FakeSource::new(streams()).with_events(events));
        reader.add_audio_stream(0, &OutputConfig::new(2, 1))?;

        let (task, mut stream) = ReaderTask::spawn(reader, options());
        let first = stream.next().await;
        assert!(matches!(first, Some(Ok(ref batch)) if batch.len() == 1));
        let second = stream.next().await;
        assert!(matches!(second, Some(Err(ReaderError::Io(_)))));
        assert!(stream.next().await.is_none());
        task.join().await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_stop_ends_stream() -> anyhow::Result<()> {
        let mut reader = reader(FakeSource::new(streams()).always_again());
        reader.add_audio_stream(0, &OutputConfig::new(4, 2))?;

        let (task, mut stream) = ReaderTask::spawn(reader, options());
        task.stop();
        let next = tokio::time::timeout(Duration::from_secs(5), stream.next()).await?;
        assert!(next.is_none());
        tokio::time::timeout(Duration::from_secs(5), task.join()).await??;
        Ok(())
    }

    #[tokio::test]
    async fn test_dropped_stream_stops_task() -> anyhow::Result<()> {
        let mut reader = reader(FakeSource::new(streams()).with_events(interleaved(200, 2)));
        reader.add_audio_stream(0, &OutputConfig::new(2, 1))?;

        let (task, stream) = ReaderTask::spawn(reader, options());
        drop(stream);
        tokio::time::timeout(Duration::from_secs(5), task.join()).await??;
        Ok(())
    }
}
