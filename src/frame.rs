use std::path::Path;

use crate::error::{QualityError, Result};
use crate::ffmpeg::FfmpegDecoder;
use crate::quality::Metric;
use crate::y4mdecoder::Y4mDecoder;

/// A single 8-bit luminance plane with tightly packed rows.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LumaFrame {
    width: usize,
    height: usize,
    data: Vec<u8>,
}

impl LumaFrame {
    pub fn new(width: usize, height: usize, data: Vec<u8>) -> Result<Self> {
        if data.len() != width * height {
            return Err(QualityError::Decode(format!(
                "Expected {} luma samples for {width}x{height}, got {}",
                width * height,
                data.len()
            )));
        }

        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Copies a plane whose rows are `stride` bytes apart.
    pub fn from_strided(width: usize, height: usize, stride: usize, plane: &[u8]) -> Result<Self> {
        let mut data = Vec::with_capacity(width * height);

        for row in 0..height {
            let start = row * stride;
            let line = plane.get(start..start + width).ok_or_else(|| {
                QualityError::Decode(format!("Luma plane too short at row {row}"))
            })?;
            data.extend_from_slice(line);
        }

        Self::new(width, height, data)
    }

    #[must_use]
    pub fn filled(width: usize, height: usize, value: u8) -> Self {
        Self {
            width,
            height,
            data: vec![value; width * height],
        }
    }

    #[must_use]
    pub const fn width(&self) -> usize {
        self.width
    }

    #[must_use]
    pub const fn height(&self) -> usize {
        self.height
    }

    #[must_use]
    pub const fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn row(&self, y: usize) -> &[u8] {
        self.data
            .get(y * self.width..(y + 1) * self.width)
            .unwrap_or_default()
    }
}

/// A per-video statistic fed one frame at a time.
///
/// `previous` is the frame decoded immediately before `current`, if any. Analyzers that only look
/// at single frames ignore it.
pub trait FrameAnalyzer: Send {
    fn metric(&self) -> Metric;

    fn push(&mut self, previous: Option<&LumaFrame>, current: &LumaFrame) -> Result<()>;

    fn finish(&self) -> Result<f64>;
}

/// Runs one analyzer over its own pass of a frame sequence.
pub fn analyze<A, I>(analyzer: &mut A, frames: I) -> Result<f64>
where
    A: FrameAnalyzer + ?Sized,
    I: IntoIterator<Item = Result<LumaFrame>>,
{
    let mut previous: Option<LumaFrame> = None;

    for frame in frames {
        let frame = frame?;
        analyzer.push(previous.as_ref(), &frame)?;
        previous = Some(frame);
    }

    analyzer.finish()
}

/// Arithmetic mean accumulated without keeping the samples.
#[derive(Copy, Clone, Debug, Default)]
pub struct RunningMean {
    sum: f64,
    count: usize,
}

impl RunningMean {
    pub fn add(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    #[must_use]
    pub const fn count(&self) -> usize {
        self.count
    }

    #[allow(clippy::as_conversions)]
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

/// Lazy sequence of luminance frames from one video file.
///
/// The underlying demuxer and decoder are released when the value is dropped, whether or not the
/// sequence was exhausted.
pub enum Decoder {
    Ffmpeg(FfmpegDecoder),
    Y4m(Y4mDecoder),
}

impl Decoder {
    /// Opens `path`, picking the YUV4MPEG reader for `.y4m` files and FFmpeg for everything else.
    pub fn open(path: &Path) -> Result<Self> {
        let is_y4m = path
            .extension()
            .and_then(|extension| extension.to_str())
            .is_some_and(|extension| extension.eq_ignore_ascii_case("y4m"));

        if is_y4m {
            Ok(Self::Y4m(Y4mDecoder::open(path)?))
        } else {
            Ok(Self::Ffmpeg(FfmpegDecoder::open(path)?))
        }
    }
}

impl Iterator for Decoder {
    type Item = Result<LumaFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Self::Ffmpeg(decoder) => decoder.next(),
            Self::Y4m(decoder) => decoder.next(),
        }
    }
}
