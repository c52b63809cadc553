//! Persistence & reporting glue beyond what `Optimizer::save_data_and_self`
//! already covers: `report_data.json` (a JSON hook-statistics snapshot) and
//! the `best_jobs/` directory, kept in sync with the optimizer's current
//! top-k.

use anyhow::Result;
use hopt_optimizer::Optimizer;
use hopt_util::fs::Fs;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

pub fn write_report_data(fs: &Fs, path: &Path, stats: &BTreeMap<String, String>) -> Result<()> {
    fs.write(path, serde_json::to_string_pretty(stats)?)
}

/// Copies the optimizer's current best-`how_many` job working directories
/// into `best_jobs_dir`, keyed by the job's directory name, and deletes any
/// previously-copied entry that's no longer among the top-k. A `how_many`
/// of 0 clears `best_jobs_dir` entirely.
pub fn update_best_job_datadirs(
    fs: &Fs,
    optimizer: &dyn Optimizer,
    how_many: usize,
    best_jobs_dir: &Path,
) -> Result<()> {
    let current_best = optimizer.best_jobs_model_dirs(how_many);
    let keep: BTreeSet<String> = current_best
        .iter()
        .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .collect();

    for existing in fs.list_dirs(best_jobs_dir)? {
        let Some(name) = existing.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        if !keep.contains(&name) {
            fs.remove_dir_all(&existing)?;
        }
    }

    for model_dir in &current_best {
        if !fs.exists(model_dir) {
            continue;
        }
        let Some(name) = model_dir.file_name() else {
            continue;
        };
        let dest = best_jobs_dir.join(name);
        if !fs.exists(&dest) {
            fs.copy_dir_all(model_dir, &dest)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hopt_base::Job;
    use hopt_optimizer::{Distribution, DistributionOptimizer, ParamSpec};

    fn opt_with(dirs: &[(&Path, f64)]) -> (DistributionOptimizer, Vec<hopt_base::JobId>) {
        let search_space = vec![ParamSpec {
            name: "lr".to_string(),
            distribution: Distribution::Uniform { low: 0.0, high: 1.0 },
        }];
        let mut opt = DistributionOptimizer::new(search_space, "loss", true);
        let mut jobs = Vec::new();
        let mut ids = Vec::new();
        for (i, (dir, loss)) in dirs.iter().enumerate() {
            let id = hopt_base::JobId(i as u64);
            let mut job = Job::new(
                id,
                0,
                hopt_base::Settings::new(),
                std::sync::Arc::new(hopt_base::Settings::new()),
                hopt_base::JobPaths {
                    working_dir: dir.to_path_buf(),
                    script_path: "/tmp/run.sh".into(),
                    jobs_dir: "/tmp".into(),
                    result_dir: "/tmp".into(),
                    stderr_path: None,
                },
            );
            job.metrics.insert("loss".to_string(), *loss);
            jobs.push(job);
            ids.push(id);
        }
        opt.tell(&mut jobs.iter_mut());
        (opt, ids)
    }

    #[test]
    fn copies_the_current_best_and_prunes_stale_entries() {
        let dir = tempfile::tempdir().unwrap();
        let fs = Fs::new();
        let work_a = dir.path().join("0_0");
        let work_b = dir.path().join("0_1");
        fs.create_dir_all(&work_a).unwrap();
        fs.write(work_a.join("metrics.csv"), "loss\n0.1\n").unwrap();
        fs.create_dir_all(&work_b).unwrap();
        fs.write(work_b.join("metrics.csv"), "loss\n0.9\n").unwrap();

        let (opt, _ids) = opt_with(&[(&work_a, 0.1), (&work_b, 0.9)]);
        let best_jobs_dir = dir.path().join("best_jobs");
        fs.create_dir_all(&best_jobs_dir).unwrap();
        // a stale entry from a previous iteration that's no longer best.
        fs.create_dir_all(best_jobs_dir.join("stale")).unwrap();

        update_best_job_datadirs(&fs, &opt, 1, &best_jobs_dir).unwrap();

        assert!(best_jobs_dir.join("0_0").exists());
        assert!(!best_jobs_dir.join("stale").exists());
        assert!(!best_jobs_dir.join("0_1").exists());
    }

    #[test]
    fn report_data_json_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let fs = Fs::new();
        let path = dir.path().join("report_data.json");
        let mut stats = BTreeMap::new();
        stats.insert("git_commit".to_string(), "abc123".to_string());
        write_report_data(&fs, &path, &stats).unwrap();

        let read_back: BTreeMap<String, String> =
            serde_json::from_str(&fs.read_to_string(&path).unwrap()).unwrap();
        assert_eq!(read_back, stats);
    }
}
