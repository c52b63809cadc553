//! The local process-pool backend: a bounded worker pool over
//! `std::process::Command`, sized `min(max_cpus, host_cpu_count) /
//! cpus_per_job`, falling back to one concurrent slot.

use crate::backend::{check_error_msgs, ClusterBackend};
use crate::hooks::SubmissionHook;
use anyhow::{Context, Result};
use chrono::Utc;
use hopt_base::job::ClusterStatus;
use hopt_base::{Job, JobId};
use hopt_util::process::ExitCode;
use std::collections::BTreeMap;
use std::process::{Child, Command, Stdio};

/// Best-effort CPU pinning: `taskset` on Linux, a no-op everywhere else.
#[cfg(target_os = "linux")]
fn pin_command(mut cmd: Command, cpus: &[usize]) -> Command {
    if cpus.is_empty() {
        return cmd;
    }
    let cpu_list = cpus
        .iter()
        .map(usize::to_string)
        .collect::<Vec<_>>()
        .join(",");
    let mut pinned = Command::new("taskset");
    pinned.arg("--cpu-list").arg(cpu_list);
    pinned.arg(cmd.get_program());
    pinned.args(cmd.get_args());
    for (k, v) in cmd.get_envs() {
        if let Some(v) = v {
            pinned.env(k, v);
        }
    }
    cmd = pinned;
    cmd
}

#[cfg(not(target_os = "linux"))]
fn pin_command(cmd: Command, _cpus: &[usize]) -> Command {
    cmd
}

pub struct LocalBackend {
    jobs_dir: std::path::PathBuf,
    cpus_per_job: usize,
    concurrent_jobs: usize,
    environment_setup: Vec<String>,
    next_job_id: u64,
    next_cluster_id: u64,
    hooks: Vec<Box<dyn SubmissionHook>>,
    seen_signatures: std::collections::BTreeSet<String>,
    log: slog::Logger,
    // queued jobs waiting for a free slot, and jobs actively running.
    queue: Vec<(String, Job)>,
    running: BTreeMap<String, Child>,
    completed: BTreeMap<String, ClusterStatus>,
}

impl LocalBackend {
    pub fn new(jobs_dir: std::path::PathBuf, cpus_per_job: usize, max_cpus: usize, log: slog::Logger) -> Self {
        let host_cpus = num_cpus::get();
        let available = max_cpus.min(host_cpus).max(1);
        let concurrent_jobs = if cpus_per_job == 0 {
            1
        } else {
            (available / cpus_per_job).max(1)
        };
        LocalBackend {
            jobs_dir,
            cpus_per_job: cpus_per_job.max(1),
            concurrent_jobs,
            environment_setup: Vec::new(),
            next_job_id: 0,
            next_cluster_id: 0,
            hooks: Vec::new(),
            seen_signatures: std::collections::BTreeSet::new(),
            log,
            queue: Vec::new(),
            running: BTreeMap::new(),
            completed: BTreeMap::new(),
        }
    }

    /// Shell commands (e.g. `module load cuda`, `source venv/bin/activate`)
    /// run in the job's run script before the user command itself.
    pub fn with_environment_setup(mut self, environment_setup: Vec<String>) -> Self {
        self.environment_setup = environment_setup;
        self
    }

    fn run_script_path(&self, job: &Job) -> std::path::PathBuf {
        self.jobs_dir.join(format!("{}_{}.sh", job.iteration, job.id.0))
    }

    fn write_run_script(&self, job: &Job) -> Result<std::path::PathBuf> {
        std::fs::create_dir_all(&self.jobs_dir)
            .with_context(|| format!("creating jobs directory {}", self.jobs_dir.display()))?;
        let settings_json = serde_json::to_string(&job.settings)?;
        let path = self.run_script_path(job);
        let env_setup: String = self
            .environment_setup
            .iter()
            .map(|line| format!("{line}\n"))
            .collect();
        let contents = format!(
            "#!/bin/bash\n# {id}\n\n{env_setup}python3 {script} '{settings}'\n",
            id = job.id.0,
            script = job.paths.script_path.display(),
            settings = settings_json,
        );
        std::fs::write(&path, contents).with_context(|| format!("writing {}", path.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(&path)?.permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&path, perms)?;
        }
        Ok(path)
    }

    fn launch(&mut self, cluster_id: String, job: &Job) -> Result<()> {
        let script = self.write_run_script(job)?;
        let cpus: Vec<usize> = (0..self.cpus_per_job).collect();
        let mut cmd = Command::new("bash");
        cmd.arg(&script);
        let mut cmd = pin_command(cmd, &cpus);
        cmd.stdout(Stdio::null()).stderr(Stdio::piped());
        let child = cmd
            .spawn()
            .with_context(|| format!("spawning local job {}", script.display()))?;
        self.running.insert(cluster_id, child);
        Ok(())
    }

    /// Polls running children, moving any that have exited into
    /// `completed`, starting queued jobs into any slots that freed up.
    fn reap_and_fill(&mut self) {
        let finished: Vec<String> = self
            .running
            .iter_mut()
            .filter_map(|(id, child)| match child.try_wait() {
                Ok(Some(_)) => Some(id.clone()),
                _ => None,
            })
            .collect();
        for id in finished {
            if let Some(mut child) = self.running.remove(&id) {
                let status = match child.wait() {
                    Ok(status) if status.success() => ClusterStatus::CompletedOk,
                    Ok(status)
                        if status.code().map(ExitCode::from).is_some_and(ExitCode::is_resume) =>
                    {
                        ClusterStatus::Resume
                    }
                    Ok(_) => ClusterStatus::CompletedFail,
                    Err(_) => ClusterStatus::CompletedFail,
                };
                self.completed.insert(id, status);
            }
        }
        while self.running.len() < self.concurrent_jobs && !self.queue.is_empty() {
            let (cluster_id, job) = self.queue.remove(0);
            if self.launch(cluster_id.clone(), &job).is_err() {
                self.completed.insert(cluster_id, ClusterStatus::CompletedFail);
            }
        }
    }
}

impl ClusterBackend for LocalBackend {
    fn poll(&mut self) {
        self.reap_and_fill();
    }

    fn submit(&mut self, job: &mut Job) -> Result<String> {
        if let Some(existing) = &job.cluster_id {
            return Ok(existing.clone());
        }
        let cluster_id = format!("local-{}", self.next_cluster_id);
        self.next_cluster_id += 1;
        self.queue.push((cluster_id.clone(), job.clone()));
        job.mark_submitted(cluster_id.clone(), Utc::now());
        self.reap_and_fill();
        Ok(cluster_id)
    }

    fn status(&self, job: &Job) -> ClusterStatus {
        let Some(cluster_id) = &job.cluster_id else {
            return ClusterStatus::Unknown;
        };
        if let Some(status) = self.completed.get(cluster_id) {
            return *status;
        }
        if self.running.contains_key(cluster_id) {
            return ClusterStatus::Running;
        }
        if self.queue.iter().any(|(id, _)| id == cluster_id) {
            return ClusterStatus::Queued;
        }
        ClusterStatus::Unknown
    }

    fn stop(&mut self, cluster_id: &str) {
        if let Some(mut child) = self.running.remove(cluster_id) {
            let _ = child.kill();
        }
        self.queue.retain(|(id, _)| id != cluster_id);
    }

    fn register_submission_hook(&mut self, hook: Box<dyn SubmissionHook>) {
        self.hooks.push(hook);
    }

    fn exec_pre_run_routines(&mut self) -> Result<()> {
        std::fs::create_dir_all(&self.jobs_dir)
            .with_context(|| format!("creating jobs directory {}", self.jobs_dir.display()))?;
        let paths = hopt_base::JobPaths {
            working_dir: self.jobs_dir.clone(),
            script_path: self.jobs_dir.clone(),
            jobs_dir: self.jobs_dir.clone(),
            result_dir: self.jobs_dir.clone(),
            stderr_path: None,
        };
        for hook in &mut self.hooks {
            hook.run(&paths)?;
        }
        Ok(())
    }

    fn exec_post_run_routines(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) {
        let ids: Vec<String> = self.running.keys().cloned().collect();
        for id in ids {
            self.stop(&id);
        }
        self.queue.clear();
    }

    fn collect_stats_from_hooks(&self) -> BTreeMap<String, String> {
        let mut stats = BTreeMap::new();
        for hook in &self.hooks {
            stats.extend(hook.collect_stats());
        }
        stats
    }

    fn inc_job_id(&mut self) -> JobId {
        let id = JobId(self.next_job_id);
        self.next_job_id += 1;
        id
    }

    fn check_error_msgs(&mut self, jobs: &mut dyn Iterator<Item = &mut Job>) {
        check_error_msgs(jobs, &mut self.seen_signatures, &self.log);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hopt_base::{JobPaths, JobStatus, Settings};
    use std::sync::Arc;

    fn test_job(dir: &std::path::Path, id: u64) -> Job {
        Job::new(
            JobId(id),
            0,
            Settings::new(),
            Arc::new(Settings::new()),
            JobPaths {
                working_dir: dir.join(id.to_string()),
                script_path: dir.join("run_user_script.py"),
                jobs_dir: dir.to_path_buf(),
                result_dir: dir.to_path_buf(),
                stderr_path: None,
            },
        )
    }

    #[test]
    fn concurrent_jobs_falls_back_to_one_when_cpus_per_job_exceeds_available() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path().to_path_buf(), 1000, 1, slog::Logger::root(slog::Discard, slog::o!()));
        assert_eq!(backend.concurrent_jobs, 1);
    }

    #[test]
    fn submit_is_idempotent_on_existing_cluster_id() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = LocalBackend::new(dir.path().to_path_buf(), 1, 1, slog::Logger::root(slog::Discard, slog::o!()));
        let mut job = test_job(dir.path(), 1);
        let id1 = backend.submit(&mut job).unwrap();
        let id2 = backend.submit(&mut job).unwrap();
        assert_eq!(id1, id2);
        assert_eq!(job.status, JobStatus::Submitted);
    }

    #[test]
    fn environment_setup_lines_precede_the_user_command() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path().to_path_buf(), 1, 1, slog::Logger::root(slog::Discard, slog::o!()))
            .with_environment_setup(vec!["source venv/bin/activate".to_string()]);
        let job = test_job(dir.path(), 1);
        let script = backend.write_run_script(&job).unwrap();
        let contents = std::fs::read_to_string(script).unwrap();
        let setup_line = contents.find("source venv/bin/activate").unwrap();
        let command_line = contents.find("python3").unwrap();
        assert!(setup_line < command_line);
    }

    #[test]
    fn inc_job_id_is_monotonic() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = LocalBackend::new(dir.path().to_path_buf(), 1, 1, slog::Logger::root(slog::Discard, slog::o!()));
        assert_eq!(backend.inc_job_id(), JobId(0));
        assert_eq!(backend.inc_job_id(), JobId(1));
    }
}
