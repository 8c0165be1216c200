use crate::metadata::MediaType;

#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    #[error("source stream index {index} out of range (source has {len} streams)")]
    SourceIndexOutOfRange { index: usize, len: usize },

    #[error("output stream index {index} out of range ({len} output streams)")]
    OutputIndexOutOfRange { index: usize, len: usize },

    #[error("stream {index} is not {expected} stream (found {found})")]
    MediaTypeMismatch {
        index: usize,
        expected: MediaType,
        found: MediaType,
    },

    #[error("failed to detect the format of source stream {0}")]
    UndetectedFormat(usize),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unsupported device: {0}")]
    UnsupportedDevice(String),

    #[error("decoder not found: {0}")]
    DecoderNotFound(String),

    #[error("failed to build filter graph {description:?}: {source}")]
    Filter {
        description: String,
        #[source]
        source: ffmpeg_next::Error,
    },

    #[error("reader is in {0} state")]
    InvalidState(&'static str),

    #[error(transparent)]
    Ffmpeg(#[from] ffmpeg_next::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ReaderError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Errors detected synchronously from the arguments of a call. These
    /// never leave partial state behind.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::SourceIndexOutOfRange { .. }
                | Self::OutputIndexOutOfRange { .. }
                | Self::MediaTypeMismatch { .. }
                | Self::UndetectedFormat(_)
                | Self::InvalidArgument(_)
                | Self::UnsupportedDevice(_)
                | Self::DecoderNotFound(_)
                | Self::Filter { .. }
        )
    }

    pub fn is_index_error(&self) -> bool {
        matches!(
            self,
            Self::SourceIndexOutOfRange { .. } | Self::OutputIndexOutOfRange { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ReaderError>;
