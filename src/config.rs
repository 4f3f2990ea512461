use std::ffi::OsString;
use std::num::NonZeroUsize;
use std::path::PathBuf;

use clap::Parser;

use crate::quality::{Thresholds, SHARPNESS_THRESHOLD, SIMILARITY_THRESHOLD, SNR_THRESHOLD_DB};

#[derive(Clone, Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Number of decode workers (0 uses every available core)
    #[arg(short, long, value_parser = clap::value_parser!(usize), default_value_t = 0)]
    pub workers: usize,

    /// Recognized video file extension; may be repeated
    #[arg(short, long = "extension", value_name = "EXT", default_values_t = vec!["mp4".to_owned()])]
    pub extensions: Vec<String>,

    /// External learned-quality scorer; receives the video path as its last argument
    #[arg(long, value_name = "PROGRAM")]
    pub scorer_command: Option<OsString>,

    /// Extra argument passed to the scorer before the video path; may be repeated
    #[arg(long = "scorer-arg", value_name = "ARG", allow_hyphen_values = true)]
    pub scorer_args: Vec<OsString>,

    /// Maximum number of scorer invocations running at once
    #[arg(long, value_parser = clap::value_parser!(usize), default_value_t = 1)]
    pub scorer_jobs: usize,

    /// Skip a video when the scorer fails instead of omitting its score
    #[arg(long)]
    pub scorer_required: bool,

    /// Mean Laplacian variance above which a video is clear
    #[arg(long, default_value_t = SHARPNESS_THRESHOLD)]
    pub sharpness_threshold: f64,

    /// Mean SSIM between consecutive frames above which a video is clear
    #[arg(long, default_value_t = SIMILARITY_THRESHOLD)]
    pub similarity_threshold: f64,

    /// Mean PSNR (dB) between consecutive frames above which a video is clear
    #[arg(long, default_value_t = SNR_THRESHOLD_DB)]
    pub snr_threshold: f64,

    /// Number of videos the acquisition step reported as downloaded
    #[arg(long, value_name = "COUNT")]
    pub expected_count: Option<usize>,

    /// Print a per-metric summary table after the batch
    #[arg(long)]
    pub summary: bool,

    /// Directory containing the downloaded videos
    pub input_directory: PathBuf,

    /// Output JSON report
    pub output: PathBuf,
}

impl Config {
    #[must_use]
    pub const fn thresholds(&self) -> Thresholds {
        Thresholds {
            sharpness: self.sharpness_threshold,
            similarity: self.similarity_threshold,
            snr_db: self.snr_threshold,
        }
    }

    #[must_use]
    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            std::thread::available_parallelism().map_or(1, NonZeroUsize::get)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::parse_from(["video-quality-eval", "videos", "report.json"]);

        assert_eq!(config.extensions, ["mp4"]);
        assert_eq!(config.thresholds(), Thresholds::default());
        assert!(config.worker_count() >= 1);
        assert!(config.scorer_command.is_none());
        assert!(!config.scorer_required);
        assert_eq!(config.scorer_jobs, 1);
    }

    #[test]
    fn overrides() {
        let config = Config::parse_from([
            "video-quality-eval",
            "-w",
            "3",
            "-e",
            "mp4",
            "-e",
            "mkv",
            "--scorer-command",
            "python3",
            "--scorer-arg",
            "infer.py",
            "--scorer-arg",
            "--quiet",
            "--scorer-required",
            "--snr-threshold",
            "35",
            "videos",
            "report.json",
        ]);

        assert_eq!(config.worker_count(), 3);
        assert_eq!(config.extensions, ["mp4", "mkv"]);
        assert_eq!(config.scorer_args, ["infer.py", "--quiet"]);
        assert!(config.scorer_required);
        assert!((config.thresholds().snr_db - 35.0).abs() < f64::EPSILON);
    }
}
