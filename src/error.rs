use std::path::PathBuf;

use thiserror::Error;

/// Failures raised while evaluating a single video or setting up a batch.
///
/// Everything except [`QualityError::BatchIo`] is scoped to one video: the batch driver logs it and
/// moves on to the next file.
#[derive(Error, Debug)]
pub enum QualityError {
    #[error("Unable to open video {path:?}: {reason}")]
    VideoOpen { path: PathBuf, reason: String },

    #[error("Video produced no decodable frames")]
    NoFrames,

    #[error("Pairwise comparison needs at least two frames, found {found}")]
    InsufficientFrames { found: usize },

    #[error("Frame of {width}x{height} is smaller than the {window}x{window} comparison window")]
    FrameTooSmall {
        width: usize,
        height: usize,
        window: usize,
    },

    #[error("Frame size changed from {previous:?} to {current:?}")]
    FrameSizeMismatch {
        previous: (usize, usize),
        current: (usize, usize),
    },

    #[error("Unable to decode frame: {0}")]
    Decode(String),

    #[error("External quality scorer failed: {0}")]
    Inference(String),

    #[error("Batch I/O failure on {path:?}: {source}")]
    BatchIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl QualityError {
    /// Stable name of the error category, used in log output.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::VideoOpen { .. } => "VideoOpenError",
            Self::NoFrames => "NoFramesError",
            Self::InsufficientFrames { .. } => "InsufficientFramesError",
            Self::FrameTooSmall { .. } => "FrameTooSmallError",
            Self::FrameSizeMismatch { .. } => "FrameSizeMismatchError",
            Self::Decode(_) => "DecodeError",
            Self::Inference(_) => "InferenceError",
            Self::BatchIo { .. } => "BatchIOError",
        }
    }

    pub fn video_open(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::VideoOpen {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn batch_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::BatchIo {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, QualityError>;
