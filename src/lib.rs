use anyhow::{anyhow, Context};
use tracing::{info, warn};

pub mod batch;
pub mod config;
pub mod error;
pub mod evaluate;
pub mod ffmpeg;
pub mod frame;
pub mod quality;
pub mod report;
pub mod scorer;
pub mod sharpness;
pub mod similarity;
pub mod util;
pub mod y4mdecoder;

use crate::batch::{BatchOutcome, CancelToken};
use crate::evaluate::Evaluator;
use crate::scorer::{CommandScorer, LimitedScorer};

pub fn run(config: &config::Config) -> anyhow::Result<()> {
    run_with_cancel(config, &CancelToken::default())?;

    Ok(())
}

/// Evaluates every video in the input directory and writes the batch report.
///
/// Setup problems (unreadable input directory, unwritable output) fail before any video is
/// decoded. A cancelled batch is never persisted.
pub fn run_with_cancel(
    config: &config::Config,
    cancel: &CancelToken,
) -> anyhow::Result<BatchOutcome> {
    let assets = batch::scan_directory(&config.input_directory, &config.extensions)
        .with_context(|| format!("Unable to scan input directory {:?}", config.input_directory))?;

    report::prepare_output(&config.output)
        .with_context(|| format!("Unable to prepare report output {:?}", config.output))?;

    if let Some(expected) = config.expected_count {
        if expected != assets.len() {
            warn!(
                "Acquisition reported {expected} videos but {} were found in {:?}",
                assets.len(),
                config.input_directory
            );
        }
    }

    info!(
        "Found {} videos in {:?}",
        assets.len(),
        config.input_directory
    );

    let mut evaluator = Evaluator::new(config.thresholds());

    if let Some(program) = &config.scorer_command {
        let scorer = LimitedScorer::new(
            CommandScorer::new(program.clone(), config.scorer_args.clone()),
            config.scorer_jobs,
        );

        evaluator = evaluator.with_scorer(Box::new(scorer), config.scorer_required);
    }

    let outcome = batch::evaluate_all(assets, &evaluator, config.worker_count(), cancel)
        .context("Unable to evaluate videos")?;

    if outcome.cancelled {
        return Err(anyhow!(
            "Batch was cancelled; {:?} was not written",
            config.output
        ));
    }

    outcome
        .report
        .write(&config.output)
        .with_context(|| format!("Unable to write report {:?}", config.output))?;

    info!(
        "Wrote {} reports to {:?} ({} videos skipped)",
        outcome.report.reports().len(),
        config.output,
        outcome.failures.len()
    );

    if config.summary {
        util::print_summary(&outcome.report, outcome.failures.len());
    }

    Ok(outcome)
}
