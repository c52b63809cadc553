//! The cluster abstraction: one contract, two concrete implementations
//! (`BatchBackend`, `LocalBackend`).

use crate::hooks::SubmissionHook;
use anyhow::Result;
use hopt_base::job::{ClusterStatus, NON_TRANSIENT_ERROR_SIGNATURES};
use hopt_base::{Job, JobId, JobStatus};
use std::collections::BTreeMap;
use std::collections::BTreeSet;

/// The contract every cluster backend implements. Object-safe so the
/// control loop can hold a `Box<dyn ClusterBackend>` without knowing
/// whether it's talking to a batch scheduler or the local pool.
pub trait ClusterBackend {
    fn submit(&mut self, job: &mut Job) -> Result<String>;
    fn status(&self, job: &Job) -> ClusterStatus;
    fn stop(&mut self, cluster_id: &str);

    /// Advances any backend-internal bookkeeping that doesn't happen as a
    /// side effect of `submit`/`stop` — for the local pool, reaping exited
    /// children and launching newly-freed queue slots. The batch backend
    /// has no analogous internal state, so its default is a no-op. Called
    /// once per control-loop tick, before `status` is read for any job.
    fn poll(&mut self) {}

    fn register_submission_hook(&mut self, hook: Box<dyn SubmissionHook>);
    fn exec_pre_run_routines(&mut self) -> Result<()>;
    fn exec_post_run_routines(&mut self) -> Result<()>;
    fn close(&mut self);

    fn collect_stats_from_hooks(&self) -> BTreeMap<String, String>;

    /// Monotonic job id minter.
    fn inc_job_id(&mut self) -> JobId;

    /// Scans stderr of completed jobs for novel non-transient error
    /// signatures, logging each signature at most once per backend
    /// instance. A trait method (not a free function over a concrete
    /// backend type) so the control loop can drive it through a
    /// `Box<dyn ClusterBackend>` without knowing which backend it holds.
    /// Takes an iterator rather than `&mut [Job]` since the control loop
    /// keeps its job table in a `BTreeMap`, not a contiguous `Vec`.
    fn check_error_msgs(&mut self, jobs: &mut dyn Iterator<Item = &mut Job>);
}

/// Scans stderr of completed jobs for novel non-transient error
/// signatures, logging each signature at most once. Shared by both
/// backends since the behavior doesn't depend on how a job was submitted.
pub fn check_error_msgs(
    jobs: &mut dyn Iterator<Item = &mut Job>,
    seen_signatures: &mut BTreeSet<String>,
    log: &slog::Logger,
) {
    for job in jobs {
        job.check_filesystem_for_errors();
        if job.status != JobStatus::Failed {
            continue;
        }
        let Some(info) = &job.error_info else { continue };
        for signature in NON_TRANSIENT_ERROR_SIGNATURES {
            if info.contains(signature) && seen_signatures.insert((*signature).to_string()) {
                slog::warn!(log, "novel error signature observed"; "signature" => signature);
            }
        }
    }
}

/// Median remaining-time estimate across currently running jobs, used for
/// the progress display's ETA.
pub fn median_time_left(running: &[&Job], now: chrono::DateTime<chrono::Utc>) -> Option<chrono::Duration> {
    let mut elapsed: Vec<chrono::Duration> = running
        .iter()
        .filter_map(|job| job.start_time.map(|t| now - t))
        .collect();
    if elapsed.is_empty() {
        return None;
    }
    elapsed.sort();
    Some(elapsed[elapsed.len() / 2])
}

/// The best reported *intermediate* value across all running jobs,
/// independent of whatever the optimizer's own `full_df` has recorded.
pub fn get_best_seen_value_of_main_metric(running: &[&Job], minimize: bool) -> Option<f64> {
    running
        .iter()
        .filter_map(|job| job.reported_metric_values.last().copied())
        .fold(None, |acc, v| match acc {
            None => Some(v),
            Some(best) => Some(if minimize { best.min(v) } else { best.max(v) }),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hopt_base::JobPaths;
    use std::sync::Arc;

    fn job(id: u64) -> Job {
        Job::new(
            JobId(id),
            0,
            hopt_base::Settings::new(),
            Arc::new(hopt_base::Settings::new()),
            JobPaths {
                working_dir: format!("/tmp/{id}").into(),
                script_path: "/tmp/run.sh".into(),
                jobs_dir: "/tmp".into(),
                result_dir: "/tmp".into(),
                stderr_path: None,
            },
        )
    }

    #[test]
    fn median_time_left_is_none_for_no_running_jobs() {
        assert_eq!(median_time_left(&[], chrono::Utc::now()), None);
    }

    #[test]
    fn best_seen_value_respects_minimize() {
        let mut a = job(1);
        a.record_intermediate(0.5);
        let mut b = job(2);
        b.record_intermediate(0.1);
        let running = vec![&a, &b];
        assert_eq!(get_best_seen_value_of_main_metric(&running, true), Some(0.1));
        assert_eq!(get_best_seen_value_of_main_metric(&running, false), Some(0.5));
    }
}
