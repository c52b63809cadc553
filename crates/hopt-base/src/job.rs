use crate::constants::{CLUSTER_METRIC_FILE, CLUSTER_PARAM_FILE, CONCLUDED_WITHOUT_RESULTS_GRACE};
use crate::value::{Settings, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Orchestrator-assigned monotonic job id, stable for the run.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for JobId {
    fn from(v: u64) -> Self {
        JobId(v)
    }
}

/// The job lifecycle state machine. Terminal states are `Concluded` and
/// `Failed`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum JobStatus {
    Initial,
    Submitted,
    Running,
    ConcludedWithoutResults,
    Concluded,
    Failed,
    WaitingForResume,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Concluded | JobStatus::Failed)
    }
}

/// The status a `ClusterBackend` reports for a job it tracks.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ClusterStatus {
    Unknown,
    Queued,
    Running,
    CompletedOk,
    CompletedFail,
    /// The run script exited with code 3: checkpointed, awaiting automatic
    /// resubmission.
    Resume,
}

/// Every filesystem location a job's lifecycle touches.
#[derive(Clone, Debug)]
pub struct JobPaths {
    pub working_dir: PathBuf,
    pub script_path: PathBuf,
    pub jobs_dir: PathBuf,
    pub result_dir: PathBuf,
    /// Path the batch backend's run script redirects stderr to; `None` for
    /// backends (like the local pool) that capture stderr in memory instead.
    pub stderr_path: Option<PathBuf>,
}

impl JobPaths {
    pub fn metrics_csv(&self) -> PathBuf {
        self.working_dir.join(CLUSTER_METRIC_FILE)
    }

    pub fn param_choice_csv(&self) -> PathBuf {
        self.working_dir.join(CLUSTER_PARAM_FILE)
    }
}

/// Substrings that, if found in a job's stderr, indicate a permanent
/// (non-transient) failure rather than e.g. preemption, worth surfacing
/// once per signature rather than retrying indefinitely.
pub const NON_TRANSIENT_ERROR_SIGNATURES: &[&str] = &[
    "MemoryError",
    "OutOfMemoryError",
    "CUDA out of memory",
    "SyntaxError",
    "No such file or directory",
    "ModuleNotFoundError",
    "ImportError",
];

/// One candidate evaluation: identity, settings, filesystem paths, and the
/// full lifecycle state.
#[derive(Clone, Debug)]
pub struct Job {
    pub id: JobId,
    pub iteration: u64,
    pub settings: Settings,
    pub other_params: Arc<Settings>,
    pub paths: JobPaths,
    pub cluster_id: Option<String>,
    pub status: JobStatus,
    pub reported_metric_values: Vec<f64>,
    pub metrics: BTreeMap<String, f64>,
    pub submission_time: Option<DateTime<Utc>>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub results_used_for_update: bool,
    pub waiting_for_resume: bool,
    pub error_info: Option<String>,
    pub job_restarts: u32,
    concluded_without_results_since: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(
        id: JobId,
        iteration: u64,
        settings: Settings,
        other_params: Arc<Settings>,
        paths: JobPaths,
    ) -> Self {
        Job {
            id,
            iteration,
            settings,
            other_params,
            paths,
            cluster_id: None,
            status: JobStatus::Initial,
            reported_metric_values: Vec::new(),
            metrics: BTreeMap::new(),
            submission_time: None,
            start_time: None,
            end_time: None,
            results_used_for_update: false,
            waiting_for_resume: false,
            error_info: None,
            job_restarts: 0,
            concluded_without_results_since: None,
        }
    }

    pub fn mark_submitted(&mut self, cluster_id: String, now: DateTime<Utc>) {
        self.cluster_id = Some(cluster_id);
        self.status = JobStatus::Submitted;
        self.submission_time = Some(now);
        self.waiting_for_resume = false;
    }

    pub fn mark_running(&mut self, now: DateTime<Utc>) {
        if !self.status.is_terminal() {
            self.status = JobStatus::Running;
            self.start_time.get_or_insert(now);
        }
    }

    pub fn mark_concluded_without_results(&mut self, now: DateTime<Utc>) {
        if !self.status.is_terminal() {
            self.status = JobStatus::ConcludedWithoutResults;
            self.concluded_without_results_since = Some(now);
            self.end_time.get_or_insert(now);
        }
    }

    /// Declares `FAILED` if the grace window has elapsed since the job
    /// concluded without results becoming visible.
    pub fn expire_grace_window_if_elapsed(&mut self, now: DateTime<Utc>) {
        if self.status != JobStatus::ConcludedWithoutResults {
            return;
        }
        if let Some(since) = self.concluded_without_results_since {
            let elapsed = now - since;
            if elapsed
                >= chrono::Duration::from_std(CONCLUDED_WITHOUT_RESULTS_GRACE).unwrap()
            {
                self.mark_failed("metrics CSV did not appear within the grace window".to_string());
            }
        }
    }

    pub fn mark_concluded(&mut self, metrics: BTreeMap<String, f64>, now: DateTime<Utc>) {
        self.metrics = metrics;
        self.status = JobStatus::Concluded;
        self.concluded_without_results_since = None;
        self.end_time.get_or_insert(now);
    }

    pub fn mark_failed(&mut self, error_info: String) {
        self.error_info = Some(error_info);
        self.status = JobStatus::Failed;
        self.concluded_without_results_since = None;
    }

    pub fn mark_waiting_for_resume(&mut self) {
        self.waiting_for_resume = true;
        self.status = JobStatus::WaitingForResume;
        self.job_restarts += 1;
        // a resume starts a fresh attempt: intermediates are append-only
        // *within* one attempt.
        self.reported_metric_values.clear();
    }

    pub fn record_intermediate(&mut self, value: f64) {
        self.reported_metric_values.push(value);
    }

    /// Scans the job's error log for known non-transient patterns and
    /// transitions to `FAILED` if found.
    pub fn check_filesystem_for_errors(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        let Some(stderr_path) = self.paths.stderr_path.as_ref() else {
            return;
        };
        let Ok(contents) = std::fs::read_to_string(stderr_path) else {
            return;
        };
        if let Some(signature) = NON_TRANSIENT_ERROR_SIGNATURES
            .iter()
            .find(|sig| contents.contains(**sig))
        {
            self.mark_failed(format!("detected non-transient error signature: {signature}"));
        }
    }

    /// If the job's metrics CSV exists and is well-formed, populates
    /// `metrics` and transitions to `CONCLUDED`.
    ///
    /// Only authoritative once the job has been backend/wire-confirmed
    /// exited (`CONCLUDED_WITHOUT_RESULTS`): `save_metrics_params` on the
    /// worker side overwrites the same file on every call, including
    /// mid-run intermediate reports, so a merely `RUNNING` job whose
    /// metrics CSV happens to be readable has not necessarily concluded —
    /// treating it as final here would short-circuit the
    /// `reported_metric_values` accumulation the laggard killer depends on.
    pub fn try_load_results_from_filesystem(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != JobStatus::ConcludedWithoutResults {
            return self.status == JobStatus::Concluded;
        }
        match read_one_line_csv(&self.paths.metrics_csv()) {
            Some(row) => {
                let metrics: BTreeMap<String, f64> = row
                    .into_iter()
                    .filter_map(|(k, v)| v.parse::<f64>().ok().map(|v| (k, v)))
                    .collect();
                self.mark_concluded(metrics, now);
                true
            }
            None => false,
        }
    }

    /// Yields `(row, param_names, metric_names)` once `metrics` is
    /// populated, else `None`.
    #[allow(clippy::type_complexity)]
    pub fn get_results(&self) -> Option<(BTreeMap<String, Value>, Vec<String>, Vec<String>)> {
        if self.status != JobStatus::Concluded || self.metrics.is_empty() {
            return None;
        }
        let mut row: BTreeMap<String, Value> = BTreeMap::new();
        for (k, v) in &self.settings {
            row.insert(k.clone(), v.clone());
        }
        for (k, v) in &self.metrics {
            row.insert(k.clone(), Value::Float(*v));
        }
        let param_names = self.settings.keys().cloned().collect();
        let metric_names = self.metrics.keys().cloned().collect();
        Some((row, param_names, metric_names))
    }
}

/// Reads a two-line "header,header\nvalue,value" CSV as written by
/// `hopt-worker::save_metrics_params`. Returns `None` if the file is
/// missing, empty, or malformed (mismatched column counts) rather than
/// erroring: a partially-written file is exactly the race this function
/// exists to tolerate.
fn read_one_line_csv(path: &Path) -> Option<Vec<(String, String)>> {
    let contents = std::fs::read_to_string(path).ok()?;
    let mut lines = contents.lines();
    let header = lines.next()?;
    let values = lines.next()?;
    let header: Vec<&str> = header.split(',').collect();
    let values: Vec<&str> = values.split(',').collect();
    if header.is_empty() || header.len() != values.len() {
        return None;
    }
    Some(
        header
            .into_iter()
            .zip(values)
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    )
}
