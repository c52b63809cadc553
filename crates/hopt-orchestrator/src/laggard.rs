//! The laggard killer: finalizes running jobs whose intermediate progress
//! ranks far worse than the cohort's final ranking. A successful job's
//! ranking input is `reported_metric_values ++ [metrics[metric_to_optimize]]`.

use hopt_base::{Job, JobId, JobStatus};
use std::collections::BTreeMap;

/// Returns the `(job_id, value_to_finalize_with)` pairs the control loop
/// should conclude-and-stop this tick. Pure function over borrowed state so
/// it's trivially testable without a `ClusterBackend`.
pub fn jobs_to_kill(
    jobs: &BTreeMap<JobId, Job>,
    metric_to_optimize: &str,
    minimize: bool,
    target_rank: f64,
    how_many_stds: f64,
) -> Vec<(JobId, f64)> {
    let intermediate_results: Vec<Vec<f64>> = jobs
        .values()
        .filter(|j| j.status == JobStatus::Concluded && !j.reported_metric_values.is_empty())
        .filter_map(|j| {
            let final_value = *j.metrics.get(metric_to_optimize)?;
            let mut seq = j.reported_metric_values.clone();
            seq.push(final_value);
            Some(seq)
        })
        .collect();

    if intermediate_results.is_empty() {
        return Vec::new();
    }

    let max_len = intermediate_results.iter().map(Vec::len).max().unwrap_or(0);
    let matrix: Vec<&Vec<f64>> = intermediate_results
        .iter()
        .filter(|r| r.len() == max_len)
        .collect();

    if matrix.len() < 5 {
        return Vec::new();
    }

    let sign = if minimize { 1.0 } else { -1.0 };

    // rank_deviations[j]: RMS deviation of column j's rank from the final
    // column's rank, across the N qualifying successful jobs.
    let mut rank_deviations = vec![0.0f64; max_len];
    let final_col: Vec<f64> = matrix.iter().map(|row| row[max_len - 1] * sign).collect();
    let final_ranks = dense_rank(&final_col);
    for j in 0..max_len {
        let col: Vec<f64> = matrix.iter().map(|row| row[j] * sign).collect();
        let ranks = dense_rank(&col);
        let sq_sum: f64 = ranks
            .iter()
            .zip(&final_ranks)
            .map(|(r, f)| (*r as f64 - *f as f64).powi(2))
            .sum();
        rank_deviations[j] = (sq_sum / ranks.len() as f64).sqrt();
    }

    let mut to_kill = Vec::new();
    for job in jobs.values() {
        if job.status != JobStatus::Running || job.reported_metric_values.is_empty() {
            continue;
        }
        if job.reported_metric_values.len() > max_len / 2 {
            // more than half the cohort's final run length in: never kill.
            continue;
        }
        let index = job.reported_metric_values.len() - 1;
        let value = *job.reported_metric_values.last().unwrap();

        let mut column: Vec<f64> = matrix.iter().map(|row| row[index] * sign).collect();
        column.push(value * sign);
        let ranks = dense_rank(&column);
        let rank_of_current = *ranks.last().unwrap() as f64;

        if rank_of_current - how_many_stds * rank_deviations[index] > target_rank {
            to_kill.push((job.id, value));
        }
    }
    to_kill
}

/// `np.argsort(np.argsort(values))`: the 0-indexed rank of each element
/// when sorted ascending, ties broken by original (stable) order.
fn dense_rank(values: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].partial_cmp(&values[b]).unwrap());
    let mut rank = vec![0usize; values.len()];
    for (r, idx) in order.into_iter().enumerate() {
        rank[idx] = r;
    }
    rank
}

#[cfg(test)]
mod tests {
    use super::*;
    use hopt_base::{JobPaths, Settings};
    use maplit::btreemap;
    use std::sync::Arc;

    fn paths(id: u64) -> JobPaths {
        JobPaths {
            working_dir: format!("/tmp/{id}").into(),
            script_path: "/tmp/run.sh".into(),
            jobs_dir: "/tmp".into(),
            result_dir: "/tmp".into(),
            stderr_path: None,
        }
    }

    fn concluded_job(id: u64, intermediates: Vec<f64>, final_value: f64) -> Job {
        let mut job = Job::new(JobId(id), 0, Settings::new(), Arc::new(Settings::new()), paths(id));
        job.reported_metric_values = intermediates;
        job.status = JobStatus::Concluded;
        job.metrics = btreemap! { "loss".to_string() => final_value };
        job
    }

    fn running_job(id: u64, intermediates: Vec<f64>) -> Job {
        let mut job = Job::new(JobId(id), 0, Settings::new(), Arc::new(Settings::new()), paths(id));
        job.reported_metric_values = intermediates;
        job.status = JobStatus::Running;
        job
    }

    #[test]
    fn no_op_floor_below_five_qualifying_successful_jobs() {
        let mut jobs = BTreeMap::new();
        for id in 0..3 {
            let j = concluded_job(id, vec![1.0, 2.0, 3.0], 4.0);
            jobs.insert(j.id, j);
        }
        let r = running_job(99, vec![100.0]);
        jobs.insert(r.id, r);

        let kills = jobs_to_kill(&jobs, "loss", true, 0.0, 2.0);
        assert!(kills.is_empty());
    }

    #[test]
    fn kills_a_clear_laggard() {
        let mut jobs = BTreeMap::new();
        // 10 successful jobs, all ranked low-to-high with consistent order.
        for id in 0..10 {
            let v = id as f64;
            let j = concluded_job(id, vec![v, v, v], v);
            jobs.insert(j.id, j);
        }
        // Running job reporting a value far worse (high, when minimizing)
        // than anything the cohort ever saw at this step.
        let r = running_job(99, vec![1000.0]);
        jobs.insert(r.id, r);

        let kills = jobs_to_kill(&jobs, "loss", true, 5.0, 1.0);
        assert_eq!(kills.len(), 1);
        assert_eq!(kills[0].0, JobId(99));
    }

    #[test]
    fn never_kills_a_job_past_half_the_cohort_length() {
        let mut jobs = BTreeMap::new();
        for id in 0..10 {
            let v = id as f64;
            let j = concluded_job(id, vec![v, v, v, v], v);
            jobs.insert(j.id, j);
        }
        // 3 of 4 intermediates reported: more than L/2 = 2, so never killed
        // even though its value is terrible.
        let r = running_job(99, vec![1.0, 1000.0, 1000.0]);
        jobs.insert(r.id, r);

        let kills = jobs_to_kill(&jobs, "loss", true, 0.0, 0.0);
        assert!(kills.is_empty());
    }
}
