use serde::{Deserialize, Serialize};

pub const SHARPNESS_THRESHOLD: f64 = 100.0;
pub const SIMILARITY_THRESHOLD: f64 = 0.75;
pub const SNR_THRESHOLD_DB: f64 = 30.0;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Quality {
    Clear,
    Blur,
}

impl std::fmt::Display for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Clear => write!(f, "Clear"),
            Self::Blur => write!(f, "Blur"),
        }
    }
}

/// Metrics reported per video, in report order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Metric {
    Laplacian,
    StructuralSimilarity,
    PeakSignalToNoiseRatio,
    SimpleVqa,
}

impl Metric {
    pub const ALL: [Self; 4] = [
        Self::Laplacian,
        Self::StructuralSimilarity,
        Self::PeakSignalToNoiseRatio,
        Self::SimpleVqa,
    ];

    /// Key used for the metric in the JSON report.
    #[must_use]
    pub const fn key(&self) -> &'static str {
        match self {
            Self::Laplacian => "laplacian",
            Self::StructuralSimilarity => "structural_similarity",
            Self::PeakSignalToNoiseRatio => "peak_signal_to_noise_ratio",
            Self::SimpleVqa => "simple_VQA",
        }
    }

    #[must_use]
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|metric| metric.key() == key)
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Laplacian => write!(f, "Laplacian"),
            Self::StructuralSimilarity => write!(f, "SSIM"),
            Self::PeakSignalToNoiseRatio => write!(f, "PSNR"),
            Self::SimpleVqa => write!(f, "VQA"),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Thresholds {
    pub sharpness: f64,
    pub similarity: f64,
    pub snr_db: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            sharpness: SHARPNESS_THRESHOLD,
            similarity: SIMILARITY_THRESHOLD,
            snr_db: SNR_THRESHOLD_DB,
        }
    }
}

impl Thresholds {
    /// Threshold owned by a metric. The learned score is never classified.
    #[must_use]
    pub const fn for_metric(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::Laplacian => Some(self.sharpness),
            Metric::StructuralSimilarity => Some(self.similarity),
            Metric::PeakSignalToNoiseRatio => Some(self.snr_db),
            Metric::SimpleVqa => None,
        }
    }
}

/// Strictly greater than the threshold is clear. NaN never is.
#[must_use]
pub fn classify(score: f64, threshold: f64) -> Quality {
    if score > threshold {
        Quality::Clear
    } else {
        Quality::Blur
    }
}
