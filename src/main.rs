use ffmpeg_reader::{
    AvReader, DecoderConfig, MediaType, OptionDict, OutputConfig, ReaderTask, TaskOptions,
};
use futures::StreamExt;
use serde::Serialize;

mod config;

fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .filter_module("ffmpeg_reader", log::LevelFilter::Debug)
        .init();
}

#[derive(Debug, Default, Serialize)]
struct OutputSummary {
    source_index: usize,
    media_type: Option<MediaType>,
    filter_description: String,
    chunks: usize,
    frames: usize,
    bytes: usize,
    first_pts: Option<f64>,
    last_pts: Option<f64>,
}

fn add_outputs(reader: &mut AvReader, config: &config::RunnerConfig) {
    let chunked = OutputConfig::new(config.frames_per_chunk(), config.num_chunks());

    if let Some(index) = reader.find_best_audio_stream() {
        let mut output = chunked.clone();
        output.filter_description = config.audio_filter().map(str::to_string);
        if let Err(e) = reader.add_audio_stream(index, &output) {
            log::warn!("skip audio stream {}: {}", index, e);
        }
    }
    if let Some(index) = reader.find_best_video_stream() {
        let mut output = chunked
            .clone()
            .with_decoder(DecoderConfig::default().with_device(config.video_device()));
        output.filter_description = config.video_filter().map(str::to_string);
        if let Err(e) = reader.add_video_stream(index, &output) {
            log::warn!("skip video stream {}: {}", index, e);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    ffmpeg_reader::init()?;
    let config = config::config();

    let mut args = std::env::args().skip(1);
    let url = args
        .next()
        .ok_or_else(|| anyhow::anyhow!("usage: stream-reader <url> [format]"))?;
    let format = args.next();

    let mut reader = AvReader::open_with(&url, format.as_deref(), &OptionDict::new())?;
    let streams = (0..reader.num_src_streams())
        .map(|i| reader.src_stream_info(i))
        .collect::<ffmpeg_reader::Result<Vec<_>>>()?;
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "url": url,
            "metadata": reader.metadata(),
            "streams": streams,
        }))?
    );

    add_outputs(&mut reader, config);
    if reader.num_out_streams() == 0 {
        anyhow::bail!("no decodable audio or video stream in {}", url);
    }
    let mut summaries = (0..reader.num_out_streams())
        .map(|i| {
            reader.out_stream_info(i).map(|info| OutputSummary {
                source_index: info.source_index,
                media_type: reader
                    .src_stream_info(info.source_index)
                    .ok()
                    .map(|s| s.media_type),
                filter_description: info.filter_description,
                ..OutputSummary::default()
            })
        })
        .collect::<ffmpeg_reader::Result<Vec<_>>>()?;

    let options = TaskOptions {
        timeout: config.timeout(),
        backoff: config.backoff(),
        ..TaskOptions::default()
    };
    let (task, mut stream) = ReaderTask::spawn(reader, options);

    let mut failure = None;
    loop {
        tokio::select! {
            next = stream.next() => match next {
                Some(Ok(batch)) => {
                    for (summary, chunk) in summaries.iter_mut().zip(batch) {
                        let Some(chunk) = chunk else { continue };
                        summary.chunks += 1;
                        summary.frames += chunk.num_frames();
                        summary.bytes += chunk.data().len();
                        summary.first_pts = summary.first_pts.or(chunk.pts());
                        summary.last_pts = chunk.pts().or(summary.last_pts);
                    }
                }
                Some(Err(e)) => {
                    log::error!("read {} failed: {}", url, e);
                    failure = Some(e);
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                log::info!("interrupted, stopping reader");
                task.stop();
            },
        }
    }
    task.join().await?;

    println!("{}", serde_json::to_string_pretty(&summaries)?);
    match failure {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}
