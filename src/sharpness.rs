use crate::error::{QualityError, Result};
use crate::frame::{FrameAnalyzer, LumaFrame, RunningMean};
use crate::quality::Metric;

/// Mirrors an out-of-range index back into `0..length` without repeating the edge sample.
const fn reflect_101(index: isize, length: usize) -> usize {
    if length <= 1 {
        return 0;
    }

    #[allow(clippy::as_conversions)]
    #[allow(clippy::cast_possible_wrap)]
    #[allow(clippy::cast_sign_loss)]
    let reflected = if index < 0 {
        -index
    } else if index >= length as isize {
        2 * (length as isize) - 2 - index
    } else {
        index
    } as usize;

    reflected
}

/// Population variance of the 4-neighbour Laplacian response of a frame.
///
/// Borders are handled by reflecting around the edge pixel, so every pixel contributes one
/// response value.
#[allow(clippy::as_conversions)]
#[allow(clippy::cast_possible_wrap)]
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn laplacian_variance(frame: &LumaFrame) -> f64 {
    let (width, height) = frame.dimensions();
    let count = (width * height) as i128;

    if count == 0 {
        return 0.0;
    }

    let mut sum: i128 = 0;
    let mut sum_squares: i128 = 0;

    for y in 0..height {
        let row = frame.row(y);
        let up = frame.row(reflect_101(y as isize - 1, height));
        let down = frame.row(reflect_101(y as isize + 1, height));

        for x in 0..width {
            let left = reflect_101(x as isize - 1, width);
            let right = reflect_101(x as isize + 1, width);

            let sample = |line: &[u8], index: usize| i128::from(line.get(index).copied().unwrap_or(0));

            let response = sample(up, x) + sample(down, x) + sample(row, left) + sample(row, right)
                - 4 * sample(row, x);

            sum += response;
            sum_squares += response * response;
        }
    }

    (count * sum_squares - sum * sum) as f64 / (count * count) as f64
}

/// Mean Laplacian variance across all frames of a video.
#[derive(Default)]
pub struct SharpnessAnalyzer {
    mean: RunningMean,
}

impl FrameAnalyzer for SharpnessAnalyzer {
    fn metric(&self) -> Metric {
        Metric::Laplacian
    }

    fn push(&mut self, _previous: Option<&LumaFrame>, current: &LumaFrame) -> Result<()> {
        self.mean.add(laplacian_variance(current));
        Ok(())
    }

    fn finish(&self) -> Result<f64> {
        self.mean.mean().ok_or(QualityError::NoFrames)
    }
}
