use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// One finished pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub company: String,
    pub duration: Duration,
    pub tool_calls: usize,
    pub success: bool,
    pub finished_at: DateTime<Local>,
}

const DEFAULT_HISTORY: usize = 500;

/// In-process history of the most recent pipeline runs, shared by clones.
#[derive(Clone)]
pub struct PipelineMetrics {
    runs: Arc<Mutex<VecDeque<RunRecord>>>,
    capacity: usize,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_HISTORY)
    }
}

impl PipelineMetrics {
    /// Keep at most `capacity` runs; older ones are dropped first.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            runs: Arc::new(Mutex::new(VecDeque::new())),
            capacity: capacity.max(1),
        }
    }

    pub fn start_run(&self, company: impl Into<String>) -> RunGuard {
        RunGuard {
            start: Instant::now(),
            company: company.into(),
            tool_calls: 0,
            finished: false,
            metrics: self.clone(),
        }
    }

    pub fn runs(&self) -> Vec<RunRecord> {
        self.runs
            .lock()
            .map(|runs| runs.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn success_rate(&self) -> Option<f64> {
        let runs = self.runs();
        if runs.is_empty() {
            return None;
        }
        let ok = runs.iter().filter(|r| r.success).count();
        Some(ok as f64 * 100.0 / runs.len() as f64)
    }

    /// Mean wall-clock time of successful runs, in minutes.
    pub fn average_minutes(&self) -> Option<f64> {
        let durations: Vec<f64> = self
            .runs()
            .iter()
            .filter(|r| r.success)
            .map(|r| r.duration.as_secs_f64() / 60.0)
            .collect();
        if durations.is_empty() {
            None
        } else {
            Some(durations.iter().sum::<f64>() / durations.len() as f64)
        }
    }

    fn push(&self, record: RunRecord) {
        if let Ok(mut runs) = self.runs.lock() {
            if runs.len() >= self.capacity {
                runs.pop_front();
            }
            runs.push_back(record);
        }
    }
}

/// Records a run when finished. Dropping it unfinished records a failure.
pub struct RunGuard {
    start: Instant,
    company: String,
    tool_calls: usize,
    finished: bool,
    metrics: PipelineMetrics,
}

impl RunGuard {
    pub fn record_tool_calls(&mut self, count: usize) {
        self.tool_calls += count;
    }

    pub fn finish(mut self, success: bool) -> RunRecord {
        self.finished = true;
        let record = self.record(success);
        self.metrics.push(record.clone());
        record
    }

    fn record(&self, success: bool) -> RunRecord {
        RunRecord {
            company: self.company.clone(),
            duration: self.start.elapsed(),
            tool_calls: self.tool_calls,
            success,
            finished_at: Local::now(),
        }
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.metrics.push(self.record(false));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_success_rate_and_tool_calls() {
        let metrics = PipelineMetrics::default();
        assert_eq!(metrics.success_rate(), None);

        let mut run = metrics.start_run("Acme");
        run.record_tool_calls(3);
        let record = run.finish(true);
        assert_eq!(record.tool_calls, 3);

        drop(metrics.start_run("Globex"));

        let runs = metrics.runs();
        assert_eq!(runs.len(), 2);
        assert!(!runs[1].success);
        assert_eq!(metrics.success_rate(), Some(50.0));
        assert!(metrics.average_minutes().is_some());
    }

    #[test]
    fn history_is_bounded() {
        let metrics = PipelineMetrics::with_capacity(2);
        for company in ["a", "b", "c"] {
            metrics.start_run(company).finish(true);
        }

        let companies: Vec<String> = metrics.runs().into_iter().map(|r| r.company).collect();
        assert_eq!(companies, vec!["b", "c"]);
    }
}
