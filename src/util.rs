use std::fmt::Write;
use std::time::Duration;

use anyhow::Context;
use indicatif::{HumanDuration, ProgressState, ProgressStyle};
use prettytable::{row, Table};
use statrs::statistics::{Data, Max, Min, OrderStatistics};
use tracing::{error, level_filters::LevelFilter};
use tracing_error::ErrorLayer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::quality::{Metric, Quality};
use crate::report::BatchReport;

#[allow(clippy::as_conversions)]
#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_precision_loss)]
#[allow(clippy::cast_sign_loss)]
pub fn create_progress_style(template: &str) -> anyhow::Result<ProgressStyle> {
    let progress_style = ProgressStyle::with_template(template)
        .with_context(|| format!("Unable to create progress bar style with template '{template}'"))?
        .with_key("smooth_eta", |s: &ProgressState, w: &mut dyn Write| {
            match (s.pos(), s.len()) {
                (pos, Some(len)) if pos > 0 => write!(
                    w,
                    "{:#}",
                    HumanDuration(Duration::from_millis(
                        (s.elapsed().as_millis() as f64 * (len as f64 - pos as f64) / pos as f64)
                            .round() as u64
                    ))
                ),
                _ => write!(w, "-"),
            }
            .unwrap_or_else(|err| {
                error!("Unexpected error while formatting smooth_eta in progress bar: {err}");
            });
        })
        .with_key("per_minute", |s: &ProgressState, w: &mut dyn Write| {
            match (s.pos(), s.elapsed().as_millis()) {
                (pos, elapsed_ms) if elapsed_ms > 0 => {
                    write!(w, "{:.1}", pos as f64 * 60_000_f64 / elapsed_ms as f64)
                }
                _ => write!(w, "-"),
            }
            .unwrap_or_else(|err| {
                error!("Unexpected error while formatting per_minute in progress bar: {err}");
            });
        });

    Ok(progress_style)
}

pub fn install_tracing() -> anyhow::Result<()> {
    ffmpeg::init().context("Unable to initialize FFmpeg")?;
    ffmpeg::util::log::set_level(ffmpeg::util::log::level::Level::Fatal);

    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(ErrorLayer::default())
        .with(fmt_layer.with_filter(env_filter))
        .try_init()
        .context("Unable to initialize global default subscriber")?;

    Ok(())
}

/// Per-metric distribution of scores across a batch.
///
/// Order statistics cover finite scores only; infinite PSNR values from static videos are counted
/// separately.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricSummary {
    pub metric: Metric,
    pub count: usize,
    pub non_finite: usize,
    pub range: Option<(f64, f64, f64)>,
    pub clear: Option<usize>,
}

#[must_use]
pub fn summarize(report: &BatchReport) -> Vec<MetricSummary> {
    Metric::ALL
        .into_iter()
        .filter_map(|metric| {
            let results: Vec<_> = report
                .reports()
                .iter()
                .filter_map(|video| video.get(metric))
                .collect();

            if results.is_empty() {
                return None;
            }

            let finite: Vec<f64> = results
                .iter()
                .map(|result| result.quality_score)
                .filter(|score| score.is_finite())
                .collect();

            let non_finite = results.len() - finite.len();

            let range = (!finite.is_empty()).then(|| {
                let mut data = Data::new(finite);
                (data.min(), data.percentile(50), data.max())
            });

            let classified = results.iter().any(|result| result.quality.is_some());

            Some(MetricSummary {
                metric,
                count: results.len(),
                non_finite,
                range,
                clear: classified.then(|| {
                    results
                        .iter()
                        .filter(|result| result.quality == Some(Quality::Clear))
                        .count()
                }),
            })
        })
        .collect()
}

#[allow(clippy::print_stdout)]
pub fn print_summary(report: &BatchReport, failed: usize) {
    let mut table = Table::new();
    table.set_titles(row![
        "Metric", "Videos", "Non-finite", "Minimum", "Median", "Maximum", "Clear"
    ]);

    for summary in summarize(report) {
        let [minimum, median, maximum] = summary.range.map_or_else(
            || ["-".to_owned(), "-".to_owned(), "-".to_owned()],
            |(minimum, median, maximum)| {
                [minimum, median, maximum].map(|value| format!("{value:.3}"))
            },
        );

        table.add_row(row![
            summary.metric,
            r->summary.count,
            r->summary.non_finite,
            r->minimum,
            r->median,
            r->maximum,
            r->summary
                .clear
                .map_or_else(|| "-".to_owned(), |clear| format!("{clear}/{}", summary.count)),
        ]);
    }

    println!();
    table.printstd();
    println!();
    println!("Reported: {}  Skipped: {failed}", report.reports().len());
}
