use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;

use anyhow::{anyhow, Context};
use crossbeam_queue::ArrayQueue;
use indicatif::ProgressBar;
use tracing::{info, warn};

use crate::error::{QualityError, Result};
use crate::evaluate::Evaluator;
use crate::report::{BatchReport, QualityReport};
use crate::util::create_progress_style;

/// A video file found in the input directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VideoAsset {
    path: PathBuf,
    name: String,
    index: usize,
}

impl VideoAsset {
    #[must_use]
    pub fn new(path: PathBuf, index: usize) -> Self {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        Self { path, name, index }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|extension| extension.to_str())
        .is_some_and(|extension| {
            extensions
                .iter()
                .any(|wanted| wanted.trim_start_matches('.').eq_ignore_ascii_case(extension))
        })
}

/// Lists the regular files directly inside `directory` with a recognized extension, sorted by
/// file name.
pub fn scan_directory(directory: &Path, extensions: &[String]) -> Result<Vec<VideoAsset>> {
    let entries = std::fs::read_dir(directory).map_err(|err| QualityError::batch_io(directory, err))?;

    let mut paths = vec![];

    for entry in entries {
        let path = entry
            .map_err(|err| QualityError::batch_io(directory, err))?
            .path();

        if path.is_file() && has_extension(&path, extensions) {
            paths.push(path);
        }
    }

    paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    Ok(paths
        .into_iter()
        .enumerate()
        .map(|(index, path)| VideoAsset::new(path, index))
        .collect())
}

/// Shared flag that stops a running batch from starting new videos.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct VideoFailure {
    pub name: String,
    pub error: QualityError,
}

#[derive(Debug)]
pub struct BatchOutcome {
    pub report: BatchReport,
    pub failures: Vec<VideoFailure>,
    pub cancelled: bool,
}

/// Evaluates every asset on a pool of `workers` threads.
///
/// Per-video errors are logged and collected in [`BatchOutcome::failures`]; they never abort the
/// batch. Reports come back in asset order regardless of completion order.
#[allow(clippy::too_many_lines)]
pub fn evaluate_all(
    assets: Vec<VideoAsset>,
    evaluator: &Evaluator,
    workers: usize,
    cancel: &CancelToken,
) -> anyhow::Result<BatchOutcome> {
    let total = assets.len();
    let workers = workers.clamp(1, total.max(1));

    let asset_queue: ArrayQueue<VideoAsset> = ArrayQueue::new(total.max(1));

    for asset in assets {
        if asset_queue.push(asset).is_err() {
            return Err(anyhow!("Video queue was unexpectedly full"));
        }
    }

    let progress_bar = ProgressBar::new(total.try_into().unwrap_or(u64::MAX));

    progress_bar.set_style(
        create_progress_style(
            "{spinner:.green} [{elapsed_precise}] Evaluating videos... [{wide_bar:.cyan/blue}] {human_pos:>4}/{human_len:>4} ({per_minute:>6}/min, ETA: {smooth_eta:>3}) {msg}"
        ).context("Unable to create evaluation progress bar style")?
    );

    let (result_tx, result_rx) = mpsc::channel::<(VideoAsset, Result<QualityReport>)>();

    let mut reports = BTreeMap::new();
    let mut failures = vec![];

    thread::scope(|scope| -> anyhow::Result<()> {
        let threads = (0..workers)
            .map(|_worker_index| {
                let result_tx = result_tx.clone();
                let asset_queue = &asset_queue;

                scope.spawn(move || -> anyhow::Result<()> {
                    while !cancel.is_cancelled() {
                        let Some(asset) = asset_queue.pop() else {
                            break;
                        };

                        info!("Evaluating video {}/{total}...", asset.index() + 1);

                        let result = evaluator.evaluate(&asset);

                        result_tx
                            .send((asset, result))
                            .context("Unable to send evaluation result to parent thread")?;
                    }

                    Ok(())
                })
            })
            .collect::<Vec<_>>();

        drop(result_tx);

        for (asset, result) in result_rx {
            progress_bar.set_message(format!("video {}/{total}", asset.index() + 1));
            progress_bar.inc(1);

            match result {
                Ok(report) => {
                    reports.insert(asset.index(), report);
                }
                Err(error) => {
                    warn!(
                        "Skipping video {}/{total} ({}): {} - {error}",
                        asset.index() + 1,
                        asset.name(),
                        error.kind()
                    );

                    failures.push(VideoFailure {
                        name: asset.name().to_owned(),
                        error,
                    });
                }
            }
        }

        for thread in threads {
            match thread.join() {
                Ok(result) => result.context("Evaluation worker failed")?,
                Err(error) => return Err(anyhow!("Evaluation worker panicked: {error:?}")),
            }
        }

        Ok(())
    })
    .context("Unable to execute evaluation workers")?;

    progress_bar.finish();

    let cancelled = cancel.is_cancelled() && !asset_queue.is_empty();

    if cancelled {
        warn!(
            "Batch cancelled with {} of {total} videos not started",
            asset_queue.len()
        );
    }

    Ok(BatchOutcome {
        report: BatchReport::new(reports.into_values().collect()),
        failures,
        cancelled,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::Thresholds;

    fn touch(directory: &Path, name: &str) {
        std::fs::write(directory.join(name), b"").unwrap();
    }

    #[test]
    fn scan_filters_and_sorts() {
        let directory = tempfile::tempdir().unwrap();
        for name in ["c.mp4", "a.MP4", "notes.txt", "b.mp4", "clip.mkv"] {
            touch(directory.path(), name);
        }
        std::fs::create_dir(directory.path().join("nested.mp4")).unwrap();
        std::fs::create_dir(directory.path().join("sub")).unwrap();
        touch(&directory.path().join("sub"), "d.mp4");

        let assets = scan_directory(directory.path(), &["mp4".to_owned()]).unwrap();
        let names: Vec<_> = assets.iter().map(VideoAsset::name).collect();

        assert_eq!(names, ["a.MP4", "b.mp4", "c.mp4"]);
        assert_eq!(
            assets.iter().map(VideoAsset::index).collect::<Vec<_>>(),
            [0, 1, 2]
        );
    }

    #[test]
    fn extensions_accept_a_leading_dot() {
        assert!(has_extension(Path::new("x.mkv"), &[".mkv".to_owned()]));
        assert!(!has_extension(Path::new("mkv"), &["mkv".to_owned()]));
    }

    #[test]
    fn missing_directory_is_fatal() {
        let directory = tempfile::tempdir().unwrap();
        let result = scan_directory(&directory.path().join("missing"), &["mp4".to_owned()]);
        assert!(matches!(result, Err(QualityError::BatchIo { .. })));
    }

    #[test]
    fn empty_batch() {
        let outcome = evaluate_all(
            vec![],
            &Evaluator::new(Thresholds::default()),
            4,
            &CancelToken::default(),
        )
        .unwrap();

        assert!(outcome.report.reports().is_empty());
        assert!(outcome.failures.is_empty());
        assert!(!outcome.cancelled);
    }

    #[test]
    fn cancelled_batch_starts_nothing() {
        let directory = tempfile::tempdir().unwrap();
        touch(directory.path(), "a.y4m");
        touch(directory.path(), "b.y4m");
        let assets = scan_directory(directory.path(), &["y4m".to_owned()]).unwrap();

        let cancel = CancelToken::default();
        cancel.cancel();

        let outcome =
            evaluate_all(assets, &Evaluator::new(Thresholds::default()), 2, &cancel).unwrap();

        assert!(outcome.cancelled);
        assert!(outcome.report.reports().is_empty());
        assert!(outcome.failures.is_empty());
    }

    #[test]
    fn unreadable_videos_are_isolated() {
        let directory = tempfile::tempdir().unwrap();
        touch(directory.path(), "a.y4m");
        touch(directory.path(), "b.y4m");
        let assets = scan_directory(directory.path(), &["y4m".to_owned()]).unwrap();

        let outcome = evaluate_all(
            assets,
            &Evaluator::new(Thresholds::default()),
            2,
            &CancelToken::default(),
        )
        .unwrap();

        assert!(outcome.report.reports().is_empty());
        assert_eq!(outcome.failures.len(), 2);
        assert!(outcome
            .failures
            .iter()
            .all(|failure| failure.error.kind() == "VideoOpenError"));
    }
}
