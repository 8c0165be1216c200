use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use ffmpeg_reader::Device;

pub struct RunnerConfig {
    frames_per_chunk: usize,
    num_chunks: usize,
    backoff: Duration,
    timeout: Option<Duration>,
    video_device: Device,
    audio_filter: Option<String>,
    video_filter: Option<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            frames_per_chunk: 1024,
            num_chunks: 4,
            backoff: Duration::from_millis(10),
            timeout: Some(Duration::from_millis(100)),
            video_device: Device::Cpu,
            audio_filter: None,
            video_filter: None,
        }
    }
}

impl RunnerConfig {
    /// Defaults overridden by `STREAM_READER_*` variables. Unparsable values
    /// are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(v) = parse(&lookup, "STREAM_READER_FRAMES_PER_CHUNK") {
            config.frames_per_chunk = v;
        }
        if let Some(v) = parse(&lookup, "STREAM_READER_NUM_CHUNKS") {
            config.num_chunks = v;
        }
        if let Some(v) = parse(&lookup, "STREAM_READER_BACKOFF_MS") {
            config.backoff = Duration::from_millis(v);
        }
        // negative: wait forever
        if let Some(v) = parse::<i64>(&lookup, "STREAM_READER_TIMEOUT_MS") {
            config.timeout = u64::try_from(v).ok().map(Duration::from_millis);
        }
        if let Some(v) = parse(&lookup, "STREAM_READER_DEVICE") {
            config.video_device = v;
        }
        config.audio_filter = lookup("STREAM_READER_AUDIO_FILTER").or(config.audio_filter);
        config.video_filter = lookup("STREAM_READER_VIDEO_FILTER").or(config.video_filter);
        config
    }

    pub fn frames_per_chunk(&self) -> usize {
        self.frames_per_chunk
    }

    pub fn num_chunks(&self) -> usize {
        self.num_chunks
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn video_device(&self) -> Device {
        self.video_device
    }

    pub fn audio_filter(&self) -> Option<&str> {
        self.audio_filter.as_deref()
    }

    pub fn video_filter(&self) -> Option<&str> {
        self.video_filter.as_deref()
    }
}

fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T::Err: std::fmt::Display,
{
    let value = lookup(key)?;
    match value.trim().parse() {
        Ok(v) => Some(v),
        Err(e) => {
            log::warn!("ignoring {}={:?}: {}", key, value, e);
            None
        }
    }
}

pub fn config() -> &'static RunnerConfig {
    static CONFIG: LazyLock<RunnerConfig> = LazyLock::new(RunnerConfig::from_env);
    &CONFIG
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RunnerConfig::from_lookup(lookup(&[]));
        assert_eq!(config.frames_per_chunk(), 1024);
        assert_eq!(config.num_chunks(), 4);
        assert_eq!(config.backoff(), Duration::from_millis(10));
        assert_eq!(config.video_device(), Device::Cpu);
        assert!(config.audio_filter().is_none());
    }

    #[test]
    fn test_overrides() {
        let config = RunnerConfig::from_lookup(lookup(&[
            ("STREAM_READER_FRAMES_PER_CHUNK", "4"),
            ("STREAM_READER_NUM_CHUNKS", "2"),
            ("STREAM_READER_BACKOFF_MS", "5"),
            ("STREAM_READER_TIMEOUT_MS", "-1"),
            ("STREAM_READER_DEVICE", "cuda:1"),
            ("STREAM_READER_AUDIO_FILTER", "aresample=16000"),
        ]));
        assert_eq!(config.frames_per_chunk(), 4);
        assert_eq!(config.num_chunks(), 2);
        assert_eq!(config.backoff(), Duration::from_millis(5));
        assert_eq!(config.timeout(), None);
        assert_eq!(config.video_device(), Device::Cuda(1));
        assert_eq!(config.audio_filter(), Some("aresample=16000"));
    }

    #[test]
    fn test_bad_values_are_ignored() {
        let config = RunnerConfig::from_lookup(lookup(&[
            ("STREAM_READER_NUM_CHUNKS", "many"),
            ("STREAM_READER_DEVICE", "tpu"),
        ]));
        assert_eq!(config.num_chunks(), 4);
        assert_eq!(config.video_device(), Device::Cpu);
    }
}
