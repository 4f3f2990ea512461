use std::ffi::OsString;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::{Condvar, Mutex, PoisonError};

use tracing::debug;

use crate::error::{QualityError, Result};

/// Opaque learned perceptual-quality model: one score for a whole video.
pub trait QualityScorer: Send + Sync {
    fn score(&self, path: &Path) -> Result<f64>;
}

impl<S: QualityScorer + ?Sized> QualityScorer for Box<S> {
    fn score(&self, path: &Path) -> Result<f64> {
        (**self).score(path)
    }
}

/// Runs an external inference program and reads the score from its output.
///
/// The program receives the configured arguments followed by the video path and must print the
/// score as the last non-empty line of stdout.
pub struct CommandScorer {
    program: OsString,
    arguments: Vec<OsString>,
}

impl CommandScorer {
    pub fn new(program: impl Into<OsString>, arguments: Vec<OsString>) -> Self {
        Self {
            program: program.into(),
            arguments,
        }
    }
}

fn parse_score(stdout: &str) -> Result<f64> {
    let line = stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .ok_or_else(|| QualityError::Inference("Scorer produced no output".to_owned()))?;

    line.parse::<f64>()
        .map_err(|err| QualityError::Inference(format!("Unable to parse score {line:?}: {err}")))
}

impl QualityScorer for CommandScorer {
    fn score(&self, path: &Path) -> Result<f64> {
        debug!("Scoring {path:?} with {:?}", self.program);

        let child = Command::new(&self.program)
            .args(&self.arguments)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| {
                QualityError::Inference(format!("Unable to spawn {:?}: {err}", self.program))
            })?;

        let result = child.wait_with_output().map_err(|err| {
            QualityError::Inference(format!("Unable to wait for {:?}: {err}", self.program))
        })?;

        if !result.status.success() {
            return Err(QualityError::Inference(format!(
                "{:?} returned {} with the following output:\n{}",
                self.program,
                result.status,
                String::from_utf8_lossy(&result.stderr).trim()
            )));
        }

        parse_score(&String::from_utf8_lossy(&result.stdout))
    }
}

fn poisoned<T>(_err: PoisonError<T>) -> QualityError {
    QualityError::Inference("Scorer gate lock poisoned".to_owned())
}

/// Caps how many scorer invocations run at once, independently of the decode workers.
pub struct LimitedScorer<S> {
    inner: S,
    limit: usize,
    active: Mutex<usize>,
    released: Condvar,
}

impl<S: QualityScorer> LimitedScorer<S> {
    pub fn new(inner: S, limit: usize) -> Self {
        Self {
            inner,
            limit: limit.max(1),
            active: Mutex::new(0),
            released: Condvar::new(),
        }
    }

    fn acquire(&self) -> Result<Permit<'_>> {
        let mut active = self.active.lock().map_err(poisoned)?;

        while *active >= self.limit {
            active = self.released.wait(active).map_err(poisoned)?;
        }

        *active += 1;

        Ok(Permit {
            active: &self.active,
            released: &self.released,
        })
    }
}

/// One running scorer invocation; the slot is returned on drop, including during unwinding.
struct Permit<'a> {
    active: &'a Mutex<usize>,
    released: &'a Condvar,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        *active = active.saturating_sub(1);
        drop(active);

        self.released.notify_one();
    }
}

impl<S: QualityScorer> QualityScorer for LimitedScorer<S> {
    fn score(&self, path: &Path) -> Result<f64> {
        let _permit = self.acquire()?;
        self.inner.score(path)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    use super::*;

    struct SlowScorer {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    impl QualityScorer for SlowScorer {
        fn score(&self, _path: &Path) -> Result<f64> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(20));
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(0.5)
        }
    }

    #[test]
    fn parses_last_line() {
        assert!((parse_score("loading model\n0.8125\n\n").unwrap() - 0.8125).abs() < 1e-12);
        assert!(matches!(parse_score(""), Err(QualityError::Inference(_))));
        assert!(matches!(
            parse_score("done\n"),
            Err(QualityError::Inference(_))
        ));
    }

    #[test]
    fn limit_serializes_calls() {
        let scorer = LimitedScorer::new(
            SlowScorer {
                running: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            },
            1,
        );

        thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| scorer.score(Path::new("a.mp4")).unwrap());
            }
        });

        assert_eq!(scorer.inner.peak.load(Ordering::SeqCst), 1);
    }

    struct CrashingScorer;

    impl QualityScorer for CrashingScorer {
        fn score(&self, _path: &Path) -> Result<f64> {
            panic!("inference runtime aborted");
        }
    }

    #[test]
    fn panicking_scorer_frees_its_slot() {
        let scorer = LimitedScorer::new(CrashingScorer, 1);

        let outcome = thread::scope(|scope| {
            scope
                .spawn(|| scorer.score(Path::new("a.mp4")))
                .join()
        });

        assert!(outcome.is_err());
        assert_eq!(*scorer.active.lock().unwrap(), 0);
    }

    #[test]
    fn released_slot_admits_the_next_call() {
        let scorer = LimitedScorer::new(
            SlowScorer {
                running: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            },
            1,
        );

        assert!(scorer.score(Path::new("a.mp4")).is_ok());
        assert!(scorer.score(Path::new("b.mp4")).is_ok());
        assert_eq!(*scorer.active.lock().unwrap(), 0);
    }

    #[test]
    fn missing_program_is_an_inference_error() {
        let scorer = CommandScorer::new("/nonexistent/vqa-infer", vec![]);
        assert!(matches!(
            scorer.score(Path::new("a.mp4")),
            Err(QualityError::Inference(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn runs_external_program() {
        let scorer = CommandScorer::new("echo", vec!["0.42".into()]);
        // echo prints "0.42 a.mp4", which is not a number.
        assert!(scorer.score(Path::new("a.mp4")).is_err());

        let scorer = CommandScorer::new(
            "sh",
            vec!["-c".into(), "echo 0.42".into(), "scorer".into()],
        );
        assert!((scorer.score(Path::new("a.mp4")).unwrap() - 0.42).abs() < 1e-12);
    }
}
