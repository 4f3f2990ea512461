use std::marker::PhantomData;

use crate::error::{QualityError, Result};
use crate::frame::{FrameAnalyzer, LumaFrame, RunningMean};
use crate::quality::Metric;

pub const SSIM_WINDOW: usize = 7;

const DATA_RANGE: f64 = 255.0;
const K1: f64 = 0.01;
const K2: f64 = 0.03;

/// Summed-area tables for the window statistics of a frame pair.
struct WindowSums {
    stride: usize,
    x: Vec<u64>,
    y: Vec<u64>,
    xx: Vec<u64>,
    yy: Vec<u64>,
    xy: Vec<u64>,
}

impl WindowSums {
    fn new(previous: &LumaFrame, current: &LumaFrame) -> Self {
        let (width, height) = current.dimensions();
        let stride = width + 1;
        let size = stride * (height + 1);

        let mut sums = Self {
            stride,
            x: vec![0; size],
            y: vec![0; size],
            xx: vec![0; size],
            yy: vec![0; size],
            xy: vec![0; size],
        };

        for row in 0..height {
            let mut line = [0_u64; 5];

            for (column, (&a, &b)) in previous.row(row).iter().zip(current.row(row)).enumerate() {
                let (a, b) = (u64::from(a), u64::from(b));
                line[0] += a;
                line[1] += b;
                line[2] += a * a;
                line[3] += b * b;
                line[4] += a * b;

                let above = row * stride + column + 1;
                let here = above + stride;

                for (table, running) in sums.tables_mut().into_iter().zip(line) {
                    table[here] = table[above] + running;
                }
            }
        }

        sums
    }

    fn tables_mut(&mut self) -> [&mut Vec<u64>; 5] {
        [
            &mut self.x,
            &mut self.y,
            &mut self.xx,
            &mut self.yy,
            &mut self.xy,
        ]
    }

    fn window(&self, table: &[u64], top: usize, left: usize, size: usize) -> u64 {
        let bottom = (top + size) * self.stride;
        let top = top * self.stride;
        let right = left + size;

        table[bottom + right] + table[top + left] - table[bottom + left] - table[top + right]
    }
}

/// Mean structural similarity of two frames over every fully contained 7x7 window.
///
/// Uses uniform weights with sample covariance, `K1 = 0.01`, `K2 = 0.03` and an 8-bit data
/// range.
#[allow(clippy::as_conversions)]
#[allow(clippy::cast_precision_loss)]
#[allow(clippy::indexing_slicing)]
pub fn structural_similarity(previous: &LumaFrame, current: &LumaFrame) -> Result<f64> {
    check_dimensions(previous, current)?;

    let (width, height) = current.dimensions();

    if width < SSIM_WINDOW || height < SSIM_WINDOW {
        return Err(QualityError::FrameTooSmall {
            width,
            height,
            window: SSIM_WINDOW,
        });
    }

    let sums = WindowSums::new(previous, current);

    let samples = (SSIM_WINDOW * SSIM_WINDOW) as f64;
    let covariance_norm = samples / (samples - 1.0);
    let c1 = (K1 * DATA_RANGE).powi(2);
    let c2 = (K2 * DATA_RANGE).powi(2);

    let mut mean = RunningMean::default();

    for top in 0..=height - SSIM_WINDOW {
        for left in 0..=width - SSIM_WINDOW {
            let average = |table: &[u64]| sums.window(table, top, left, SSIM_WINDOW) as f64 / samples;

            let ux = average(&sums.x);
            let uy = average(&sums.y);
            let vx = covariance_norm * (average(&sums.xx) - ux * ux);
            let vy = covariance_norm * (average(&sums.yy) - uy * uy);
            let vxy = covariance_norm * (average(&sums.xy) - ux * uy);

            let numerator = (2.0 * ux * uy + c1) * (2.0 * vxy + c2);
            let denominator = (ux * ux + uy * uy + c1) * (vx + vy + c2);

            mean.add(numerator / denominator);
        }
    }

    mean.mean().ok_or(QualityError::FrameTooSmall {
        width,
        height,
        window: SSIM_WINDOW,
    })
}

/// Peak signal-to-noise ratio in dB between two frames, infinite when they are identical.
#[allow(clippy::as_conversions)]
#[allow(clippy::cast_precision_loss)]
pub fn peak_signal_to_noise_ratio(previous: &LumaFrame, current: &LumaFrame) -> Result<f64> {
    check_dimensions(previous, current)?;

    let squared_error: u64 = previous
        .data()
        .iter()
        .zip(current.data())
        .map(|(&a, &b)| u64::from(a.abs_diff(b)).pow(2))
        .sum();

    if squared_error == 0 {
        return Ok(f64::INFINITY);
    }

    let mse = squared_error as f64 / current.data().len() as f64;

    Ok(10.0 * (DATA_RANGE * DATA_RANGE / mse).log10())
}

fn check_dimensions(previous: &LumaFrame, current: &LumaFrame) -> Result<()> {
    if previous.dimensions() == current.dimensions() {
        Ok(())
    } else {
        Err(QualityError::FrameSizeMismatch {
            previous: previous.dimensions(),
            current: current.dimensions(),
        })
    }
}

/// A score comparing a frame with the one decoded just before it.
pub trait PairMetric {
    const METRIC: Metric;

    fn compare(previous: &LumaFrame, current: &LumaFrame) -> Result<f64>;
}

pub struct Ssim;

impl PairMetric for Ssim {
    const METRIC: Metric = Metric::StructuralSimilarity;

    fn compare(previous: &LumaFrame, current: &LumaFrame) -> Result<f64> {
        structural_similarity(previous, current)
    }
}

pub struct Psnr;

impl PairMetric for Psnr {
    const METRIC: Metric = Metric::PeakSignalToNoiseRatio;

    fn compare(previous: &LumaFrame, current: &LumaFrame) -> Result<f64> {
        peak_signal_to_noise_ratio(previous, current)
    }
}

/// Averages a [`PairMetric`] over every consecutive frame pair.
///
/// Fewer than two frames means there is nothing to average, which is reported as
/// [`QualityError::InsufficientFrames`] rather than a NaN mean. An infinite pair score makes the
/// mean infinite.
pub struct PairwiseAnalyzer<M> {
    frames: usize,
    mean: RunningMean,
    metric: PhantomData<fn() -> M>,
}

impl<M> Default for PairwiseAnalyzer<M> {
    fn default() -> Self {
        Self {
            frames: 0,
            mean: RunningMean::default(),
            metric: PhantomData,
        }
    }
}

pub type SsimAnalyzer = PairwiseAnalyzer<Ssim>;
pub type PsnrAnalyzer = PairwiseAnalyzer<Psnr>;

impl<M: PairMetric> FrameAnalyzer for PairwiseAnalyzer<M> {
    fn metric(&self) -> Metric {
        M::METRIC
    }

    fn push(&mut self, previous: Option<&LumaFrame>, current: &LumaFrame) -> Result<()> {
        self.frames += 1;

        if let Some(previous) = previous {
            self.mean.add(M::compare(previous, current)?);
        }

        Ok(())
    }

    fn finish(&self) -> Result<f64> {
        if self.frames < 2 {
            return Err(QualityError::InsufficientFrames { found: self.frames });
        }

        self.mean
            .mean()
            .ok_or(QualityError::InsufficientFrames { found: self.frames })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::analyze;
    use crate::quality::{classify, Quality, SIMILARITY_THRESHOLD, SNR_THRESHOLD_DB};

    fn gradient(width: usize, height: usize) -> LumaFrame {
        let data = (0..height)
            .flat_map(|y| (0..width).map(move |x| u8::try_from((x * 13 + y * 7) % 256).unwrap()))
            .collect();
        LumaFrame::new(width, height, data).unwrap()
    }

    fn inverted(frame: &LumaFrame) -> LumaFrame {
        let data = frame.data().iter().map(|value| 255 - value).collect();
        LumaFrame::new(frame.width(), frame.height(), data).unwrap()
    }

    #[test]
    fn identical_frames_are_structurally_identical() {
        let frame = gradient(32, 24);
        assert!((structural_similarity(&frame, &frame).unwrap() - 1.0).abs() < 1e-12);

        let black = LumaFrame::filled(16, 16, 0);
        assert!((structural_similarity(&black, &black).unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn inverted_structure_is_negative() {
        let frame = gradient(32, 24);
        let score = structural_similarity(&frame, &inverted(&frame)).unwrap();
        assert!(score < 0.0);
        assert!(score >= -1.0);
    }

    #[test]
    fn ssim_needs_a_full_window() {
        let frame = LumaFrame::filled(6, 20, 0);
        assert!(matches!(
            structural_similarity(&frame, &frame),
            Err(QualityError::FrameTooSmall { window: 7, .. })
        ));
    }

    #[test]
    fn flat_frame_offset() {
        // Constant frames only differ in luminance: (2 * 10 * 20 + c1) / (10^2 + 20^2 + c1).
        let score =
            structural_similarity(&LumaFrame::filled(8, 8, 10), &LumaFrame::filled(8, 8, 20))
                .unwrap();
        let c1 = (K1 * DATA_RANGE).powi(2);
        let expected = (400.0 + c1) / (500.0 + c1);
        assert!((score - expected).abs() < 1e-12);
    }

    #[test]
    fn identical_frames_have_infinite_psnr() {
        let frame = gradient(8, 8);
        assert_eq!(
            peak_signal_to_noise_ratio(&frame, &frame).unwrap(),
            f64::INFINITY
        );
    }

    #[test]
    fn psnr_of_known_error() {
        // Every sample off by one gives an MSE of 1 and 20 * log10(255) dB.
        let score =
            peak_signal_to_noise_ratio(&LumaFrame::filled(4, 4, 100), &LumaFrame::filled(4, 4, 101))
                .unwrap();
        assert!((score - 20.0 * 255.0_f64.log10()).abs() < 1e-9);
    }

    #[test]
    fn psnr_does_not_wrap_around() {
        // 0 - 255 must be a full-scale error, not a small 8-bit remainder.
        let score =
            peak_signal_to_noise_ratio(&LumaFrame::filled(4, 4, 0), &LumaFrame::filled(4, 4, 255))
                .unwrap();
        assert!(score.abs() < 1e-9);
    }

    #[test]
    fn mismatched_frames_are_rejected() {
        assert!(matches!(
            peak_signal_to_noise_ratio(&LumaFrame::filled(4, 4, 0), &LumaFrame::filled(4, 5, 0)),
            Err(QualityError::FrameSizeMismatch { .. })
        ));
    }

    #[test]
    fn identical_video_is_clear() {
        for count in [2, 3, 10] {
            let frame = gradient(16, 16);
            let frames = || (0..count).map(|_| Ok(frame.clone()));

            let ssim = analyze(&mut SsimAnalyzer::default(), frames()).unwrap();
            let psnr = analyze(&mut PsnrAnalyzer::default(), frames()).unwrap();

            assert!((ssim - 1.0).abs() < 1e-12);
            assert_eq!(psnr, f64::INFINITY);
            assert_eq!(classify(ssim, SIMILARITY_THRESHOLD), Quality::Clear);
            assert_eq!(classify(psnr, SNR_THRESHOLD_DB), Quality::Clear);
        }
    }

    #[test]
    fn alternating_video_is_blur() {
        let first = gradient(16, 16);
        let second = inverted(&first);
        let frames = (0..10).map(|index| {
            Ok(if index % 2 == 0 {
                first.clone()
            } else {
                second.clone()
            })
        });

        let psnr = analyze(&mut PsnrAnalyzer::default(), frames).unwrap();
        assert!(psnr.is_finite());
        assert_eq!(classify(psnr, SNR_THRESHOLD_DB), Quality::Blur);
    }

    #[test]
    fn single_frame_is_insufficient() {
        let frames = || vec![Ok(gradient(8, 8))];

        assert!(matches!(
            analyze(&mut SsimAnalyzer::default(), frames()),
            Err(QualityError::InsufficientFrames { found: 1 })
        ));
        assert!(matches!(
            analyze(&mut PsnrAnalyzer::default(), frames()),
            Err(QualityError::InsufficientFrames { found: 1 })
        ));
    }

    #[test]
    fn no_frames_is_insufficient() {
        let frames: Vec<Result<LumaFrame>> = vec![];
        assert!(matches!(
            analyze(&mut PsnrAnalyzer::default(), frames),
            Err(QualityError::InsufficientFrames { found: 0 })
        ));
    }
}
