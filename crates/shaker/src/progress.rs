//! Progress reporting, cooperative cancellation and non-fatal issues

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Receives textual progress. Calls may come from several worker threads;
/// implementations must behave as an append-only log.
pub trait ProgressSink: Sync {
    fn append_report(&self, text: &str);
    fn set_run_finished(&self);
}

/// Forwards progress to the `log` facade
#[derive(Copy, Clone, Debug, Default)]
pub struct LogSink;

impl ProgressSink for LogSink {
    fn append_report(&self, text: &str) {
        log::info!("{}", text);
    }

    fn set_run_finished(&self) {
        log::trace!("run finished");
    }
}

/// Keeps every report line in memory
#[derive(Debug, Default)]
pub struct ReportLog {
    lines: Mutex<Vec<String>>,
    finished: AtomicBool,
}

impl ReportLog {
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

impl ProgressSink for ReportLog {
    fn append_report(&self, text: &str) {
        let mut lines = self
            .lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        lines.push(text.to_string());
    }

    fn set_run_finished(&self) {
        self.finished.store(true, Ordering::Release);
    }
}

/// Shared cancellation flag, checked by the pipeline between stages and
/// between batches
#[derive(Clone, Debug, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Level {
    Spectrum,
    Peptide,
    Protein,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Spectrum => f.write_str("PSM"),
            Level::Peptide => f.write_str("peptide"),
            Level::Protein => f.write_str("protein"),
        }
    }
}

/// Conditions that degrade the results without stopping the run
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum Issue {
    InsufficientDecoyData {
        level: Level,
        key: String,
        decoys: u64,
        required: u64,
    },
    UnscorableMatches {
        level: Level,
        count: usize,
    },
    NonFiniteScores {
        level: Level,
        count: usize,
    },
    ThresholdUnachievable {
        level: Level,
        key: String,
        fdr: f64,
    },
    /// Persisted maps were grouped differently from the current preferences
    StratificationMismatch {
        level: Level,
        persisted: String,
        requested: String,
    },
}

fn describe_key(key: &str) -> String {
    match key.is_empty() {
        true => String::new(),
        false => format!(" [{}]", key),
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Issue::InsufficientDecoyData {
                level,
                key,
                decoys,
                required,
            } => write!(
                f,
                "{} map{}: {} decoy hits, {} required; probabilities fall back to the raw score",
                level,
                describe_key(key),
                decoys,
                required
            ),
            Issue::UnscorableMatches { level, count } => {
                write!(f, "{} {} matches without evidence were not scored", count, level)
            }
            Issue::NonFiniteScores { level, count } => {
                write!(f, "{} {} matches with a non-finite score were excluded", count, level)
            }
            Issue::ThresholdUnachievable { level, key, fdr } => write!(
                f,
                "{} map{}: no threshold reaches {}% FDR, nothing validated",
                level,
                describe_key(key),
                fdr * 100.0
            ),
            Issue::StratificationMismatch {
                level,
                persisted,
                requested,
            } => write!(
                f,
                "{} maps are grouped by `{}`, not `{}`; thresholds use the persisted grouping",
                level, persisted, requested
            ),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rayon::prelude::*;

    #[test]
    fn report_log_is_append_only() {
        let log = ReportLog::default();
        (0..100).into_par_iter().for_each(|i| {
            log.append_report(&format!("line {}", i));
        });
        let lines = log.lines();
        assert_eq!(lines.len(), 100);
        assert!(!log.is_finished());
        log.set_run_finished();
        assert!(log.is_finished());
    }

    #[test]
    fn stop_flag_is_shared() {
        let flag = StopFlag::default();
        let clone = flag.clone();
        assert!(!flag.is_stopped());
        clone.stop();
        assert!(flag.is_stopped());
    }

    #[test]
    fn issue_display() {
        let issue = Issue::ThresholdUnachievable {
            level: Level::Spectrum,
            key: "2".into(),
            fdr: 0.01,
        };
        assert_eq!(
            issue.to_string(),
            "PSM map [2]: no threshold reaches 1% FDR, nothing validated"
        );
    }
}
