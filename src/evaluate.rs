use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::batch::VideoAsset;
use crate::error::Result;
use crate::frame::{Decoder, FrameAnalyzer, LumaFrame};
use crate::quality::{classify, Metric, Thresholds};
use crate::report::{MetricResult, QualityReport};
use crate::scorer::QualityScorer;
use crate::sharpness::SharpnessAnalyzer;
use crate::similarity::{PsnrAnalyzer, SsimAnalyzer};

/// The frame-based analyzers every report contains.
#[must_use]
pub fn frame_analyzers() -> Vec<Box<dyn FrameAnalyzer>> {
    vec![
        Box::new(SharpnessAnalyzer::default()),
        Box::new(SsimAnalyzer::default()),
        Box::new(PsnrAnalyzer::default()),
    ]
}

/// Feeds one decode pass to several analyzers at once.
///
/// Only the previous frame is kept for pairwise analyzers, so memory stays at two frames no
/// matter how long the video is. The first analyzer error aborts the pass.
pub fn evaluate_frames<I>(
    frames: I,
    analyzers: &mut [Box<dyn FrameAnalyzer>],
) -> Result<BTreeMap<Metric, f64>>
where
    I: IntoIterator<Item = Result<LumaFrame>>,
{
    let mut previous: Option<LumaFrame> = None;

    for frame in frames {
        let frame = frame?;

        for analyzer in analyzers.iter_mut() {
            analyzer.push(previous.as_ref(), &frame)?;
        }

        previous = Some(frame);
    }

    analyzers
        .iter()
        .map(|analyzer| Ok((analyzer.metric(), analyzer.finish()?)))
        .collect()
}

/// Builds the [`QualityReport`] for a single video.
pub struct Evaluator {
    thresholds: Thresholds,
    scorer: Option<Box<dyn QualityScorer>>,
    scorer_required: bool,
}

impl Evaluator {
    #[must_use]
    pub const fn new(thresholds: Thresholds) -> Self {
        Self {
            thresholds,
            scorer: None,
            scorer_required: false,
        }
    }

    /// Adds the learned score. When `required` is false a scorer failure only drops that metric.
    #[must_use]
    pub fn with_scorer(mut self, scorer: Box<dyn QualityScorer>, required: bool) -> Self {
        self.scorer = Some(scorer);
        self.scorer_required = required;
        self
    }

    /// Decodes the video once and produces a complete report, or the first error encountered.
    pub fn evaluate(&self, asset: &VideoAsset) -> Result<QualityReport> {
        let frames = Decoder::open(asset.path())?;
        let scores = evaluate_frames(frames, &mut frame_analyzers())?;

        let mut metrics: BTreeMap<Metric, MetricResult> = scores
            .into_iter()
            .map(|(metric, score)| {
                let result = self.thresholds.for_metric(metric).map_or_else(
                    || MetricResult::raw(score),
                    |threshold| MetricResult::classified(score, classify(score, threshold)),
                );

                (metric, result)
            })
            .collect();

        if let Some(scorer) = &self.scorer {
            match scorer.score(asset.path()) {
                Ok(score) => {
                    metrics.insert(Metric::SimpleVqa, MetricResult::raw(score));
                }
                Err(err) if !self.scorer_required => {
                    warn!(
                        "Omitting {} for {}: {} ({err})",
                        Metric::SimpleVqa,
                        asset.name(),
                        err.kind()
                    );
                }
                Err(err) => return Err(err),
            }
        }

        debug!("Evaluated {}: {metrics:?}", asset.name());

        Ok(QualityReport::new(asset.name().to_owned(), metrics))
    }
}
