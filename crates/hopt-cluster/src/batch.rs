//! The batch-scheduler backend: a two-file submission protocol (a run
//! script plus a job spec file), with the actual submit/status commands
//! kept configurable so tests can point them at a stub scheduler script
//! instead of a real `condor_submit`.

use crate::backend::{check_error_msgs, get_best_seen_value_of_main_metric, median_time_left, ClusterBackend};
use crate::hooks::SubmissionHook;
use anyhow::{Context, Result};
use chrono::Utc;
use hopt_base::job::ClusterStatus;
use hopt_base::{Job, JobId};
use hopt_util::process::ExitCode;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::process::Command;

/// Resource directives translated into the job spec file's
/// `request_cpus`/`request_gpus`/`request_memory` lines.
#[derive(Clone, Debug)]
pub struct BatchRequirements {
    pub cpus: u32,
    pub gpus: u32,
    pub mem_mb: u64,
    pub requirements_line: String,
    pub concurrent_line: String,
    pub extra_submission_lines: String,
}

/// The command used to submit a job spec file; `{spec_file}` is replaced
/// with its path. Defaults to a `condor_submit`-shaped invocation.
#[derive(Clone, Debug)]
pub struct SubmitCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for SubmitCommand {
    fn default() -> Self {
        SubmitCommand {
            program: "condor_submit".to_string(),
            args: vec!["{spec_file}".to_string()],
        }
    }
}

pub struct BatchBackend {
    jobs_dir: PathBuf,
    opt_procedure_name: String,
    requirements: BatchRequirements,
    submit_command: SubmitCommand,
    remove_jobs_dir: bool,
    environment_setup: Vec<String>,
    connection_info: (String, u16),
    next_job_id: u64,
    hooks: Vec<Box<dyn SubmissionHook>>,
    seen_signatures: BTreeSet<String>,
    log: slog::Logger,
    tracked: BTreeMap<String, ClusterStatus>,
    /// Where each tracked job's run script writes its exit code, so `poll`
    /// can tell queued/running/completed/resume apart without a real
    /// scheduler status query.
    exitcode_paths: BTreeMap<String, PathBuf>,
}

impl BatchBackend {
    pub fn new(
        jobs_dir: PathBuf,
        opt_procedure_name: impl Into<String>,
        requirements: BatchRequirements,
        connection_info: (String, u16),
        log: slog::Logger,
    ) -> Self {
        BatchBackend {
            jobs_dir,
            opt_procedure_name: opt_procedure_name.into(),
            requirements,
            submit_command: SubmitCommand::default(),
            remove_jobs_dir: true,
            environment_setup: Vec::new(),
            connection_info,
            next_job_id: 0,
            hooks: Vec::new(),
            seen_signatures: BTreeSet::new(),
            log,
            tracked: BTreeMap::new(),
            exitcode_paths: BTreeMap::new(),
        }
    }

    pub fn with_submit_command(mut self, command: SubmitCommand) -> Self {
        self.submit_command = command;
        self
    }

    pub fn with_remove_jobs_dir(mut self, remove: bool) -> Self {
        self.remove_jobs_dir = remove;
        self
    }

    /// Shell commands (e.g. `module load cuda`, `source venv/bin/activate`)
    /// run in the run script before the user command itself.
    pub fn with_environment_setup(mut self, environment_setup: Vec<String>) -> Self {
        self.environment_setup = environment_setup;
        self
    }

    fn run_script_contents(&self, job: &Job) -> Result<String> {
        let settings_json = serde_json::to_string(&job.settings)?;
        let connection_json = serde_json::to_string(&self.connection_info)?;
        let cmd = format!(
            "python3 {} '{}' '{}'",
            job.paths.script_path.display(),
            connection_json,
            settings_json
        );
        let env_setup: String = self
            .environment_setup
            .iter()
            .map(|line| format!("{line}\n"))
            .collect();
        Ok(format!(
            "#!/bin/bash\n# Submission ID {id}\n\n{env_setup}{cmd}\nrc=$?\n\
             echo $rc > {exitcode_file}\n\
             if [[ $rc == 0 ]]; then\n    rm -f {run_script}\n    rm -f {spec_file}\n\
             elif [[ $rc == 3 ]]; then\n    echo \"exit with code 3 for resume\"\n    exit 3\n\
             elif [[ $rc == 1 ]]; then\n    exit 1\nfi\n",
            id = job.id.0,
            cmd = cmd,
            exitcode_file = self.exitcode_path(job).display(),
            run_script = self.run_script_path(job).display(),
            spec_file = self.job_spec_path(job).display(),
        ))
    }

    fn job_spec_contents(&self, job: &Job) -> String {
        let r = &self.requirements;
        format!(
            "# Submission ID {id}\n\
             JobBatchName={name}\n\
             executable = {run_script}\n\n\
             error = {run_script}.err\n\
             output = {run_script}.out\n\
             log = {run_script}.log\n\n\
             request_cpus={cpus}\n\
             request_gpus={gpus}\n\
             request_memory={mem}\n\n\
             {requirements_line}\n\n\
             on_exit_hold = (ExitCode =?= 3)\n\
             on_exit_hold_reason = \"Checkpointed, will resume\"\n\
             on_exit_hold_subcode = 2\n\
             periodic_release = ( (JobStatus =?= 5) && (HoldReasonCode =?= 3) && (HoldReasonSubCode =?= 2) )\n\n\
             getenv=True\n\n\
             {concurrent_line}\n\n\
             {extra_submission_lines}\n\n\
             queue\n",
            id = job.id.0,
            name = self.opt_procedure_name,
            run_script = self.run_script_path(job).display(),
            cpus = r.cpus,
            gpus = r.gpus,
            mem = r.mem_mb,
            requirements_line = r.requirements_line,
            concurrent_line = r.concurrent_line,
            extra_submission_lines = r.extra_submission_lines,
        )
    }

    fn run_script_path(&self, job: &Job) -> PathBuf {
        self.jobs_dir.join(format!("{}_{}.sh", job.iteration, job.id.0))
    }

    fn job_spec_path(&self, job: &Job) -> PathBuf {
        self.jobs_dir.join(format!("{}_{}.spec", job.iteration, job.id.0))
    }

    /// File the run script writes its own exit code into; `poll` reads this
    /// to distinguish queued/running/completed/resume in the absence of a
    /// real scheduler status query (driving a live HTCondor/Slurm status
    /// command is out of scope for a file-based submission backend).
    fn exitcode_path(&self, job: &Job) -> PathBuf {
        self.jobs_dir.join(format!("{}_{}.exitcode", job.iteration, job.id.0))
    }
}

impl ClusterBackend for BatchBackend {
    fn submit(&mut self, job: &mut Job) -> Result<String> {
        if let Some(existing) = &job.cluster_id {
            return Ok(existing.clone());
        }
        std::fs::create_dir_all(&self.jobs_dir)
            .with_context(|| format!("creating jobs directory {}", self.jobs_dir.display()))?;

        let run_script = self.run_script_path(job);
        std::fs::write(&run_script, self.run_script_contents(job)?)
            .with_context(|| format!("writing {}", run_script.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(&run_script)?.permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&run_script, perms)?;
        }

        let spec_file = self.job_spec_path(job);
        std::fs::write(&spec_file, self.job_spec_contents(job))
            .with_context(|| format!("writing {}", spec_file.display()))?;

        let program = &self.submit_command.program;
        let args: Vec<String> = self
            .submit_command
            .args
            .iter()
            .map(|a| a.replace("{spec_file}", &spec_file.to_string_lossy()))
            .collect();
        let output = Command::new(program)
            .args(&args)
            .output()
            .with_context(|| format!("running submit command {program}"))?;
        if !output.status.success() {
            anyhow::bail!(
                "submit command {program} failed: {}",
                String::from_utf8_lossy(&output.stderr)
            );
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let cluster_id = stdout
            .split_whitespace()
            .last()
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("batch-{}", job.id.0));

        let exitcode_path = self.exitcode_path(job);
        job.mark_submitted(cluster_id.clone(), Utc::now());
        self.tracked.insert(cluster_id.clone(), ClusterStatus::Queued);
        self.exitcode_paths.insert(cluster_id.clone(), exitcode_path);
        Ok(cluster_id)
    }

    fn status(&self, job: &Job) -> ClusterStatus {
        let Some(cluster_id) = &job.cluster_id else {
            return ClusterStatus::Unknown;
        };
        self.tracked.get(cluster_id).copied().unwrap_or(ClusterStatus::Unknown)
    }

    fn stop(&mut self, cluster_id: &str) {
        self.tracked.remove(cluster_id);
        self.exitcode_paths.remove(cluster_id);
    }

    /// File-based status reconciliation: a tracked job whose run script has
    /// started (its run script no longer exists, since a successful exit
    /// removes it, or its exitcode file exists) is reported
    /// `Running`/terminal; otherwise it stays `Queued`. Mirrors the local
    /// backend's `poll`, just reading filesystem markers instead of a
    /// subprocess future.
    fn poll(&mut self) {
        let resolved: Vec<(String, ClusterStatus)> = self
            .tracked
            .iter()
            .filter(|(_, status)| {
                !matches!(status, ClusterStatus::CompletedOk | ClusterStatus::CompletedFail)
            })
            .filter_map(|(cluster_id, status)| {
                let exitcode_path = self.exitcode_paths.get(cluster_id)?;
                match std::fs::read_to_string(exitcode_path) {
                    Ok(contents) => {
                        let next = match contents.trim().parse::<i32>().map(ExitCode::from) {
                            Ok(c) if c.is_success() => ClusterStatus::CompletedOk,
                            Ok(c) if c.is_resume() => ClusterStatus::Resume,
                            Ok(_) => ClusterStatus::CompletedFail,
                            Err(_) => return None,
                        };
                        Some((cluster_id.clone(), next))
                    }
                    Err(_) => {
                        // no exitcode file yet: the job has at least been
                        // handed to the scheduler, so report it running
                        // rather than merely queued.
                        if *status == ClusterStatus::Queued {
                            Some((cluster_id.clone(), ClusterStatus::Running))
                        } else {
                            None
                        }
                    }
                }
            })
            .collect();
        for (cluster_id, status) in resolved {
            self.tracked.insert(cluster_id, status);
        }
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
        if self.remove_jobs_dir {
            let _ = std::fs::remove_dir_all(&self.jobs_dir);
        }
        Ok(())
    }

    fn close(&mut self) {
        let ids: Vec<String> = self.tracked.keys().cloned().collect();
        for id in ids {
            self.stop(&id);
        }
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

/// Aggregation helpers the control loop calls directly against any
/// `&[Job]` slice; these don't depend on backend-internal state so they
/// stay free functions rather than trait methods (the job table lives in
/// the control loop, not the backend).
pub fn best_seen_value(running: &[&Job], minimize: bool) -> Option<f64> {
    get_best_seen_value_of_main_metric(running, minimize)
}

pub fn time_left(running: &[&Job]) -> Option<chrono::Duration> {
    median_time_left(running, Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hopt_base::{JobPaths, JobStatus, Settings};
    use std::sync::Arc;

    fn test_backend(dir: &std::path::Path) -> BatchBackend {
        BatchBackend::new(
            dir.to_path_buf(),
            "test-run",
            BatchRequirements {
                cpus: 1,
                gpus: 0,
                mem_mb: 1024,
                requirements_line: String::new(),
                concurrent_line: String::new(),
                extra_submission_lines: String::new(),
            },
            ("127.0.0.1".to_string(), 5000),
            slog::Logger::root(slog::Discard, slog::o!()),
        )
    }

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
    fn submit_writes_both_artifacts_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = test_backend(dir.path())
            .with_submit_command(SubmitCommand {
                program: "echo".to_string(),
                args: vec!["scheduler-id-123".to_string()],
            });
        let mut job = test_job(dir.path(), 1);

        let cluster_id = backend.submit(&mut job).unwrap();
        assert_eq!(cluster_id, "scheduler-id-123");
        assert_eq!(job.status, JobStatus::Submitted);
        assert!(backend.run_script_path(&job).exists());
        assert!(backend.job_spec_path(&job).exists());

        // second submit with cluster_id already set must be a no-op.
        let cluster_id_again = backend.submit(&mut job).unwrap();
        assert_eq!(cluster_id_again, "scheduler-id-123");
    }

    #[test]
    fn environment_setup_lines_precede_the_user_command() {
        let dir = tempfile::tempdir().unwrap();
        let backend = test_backend(dir.path())
            .with_environment_setup(vec!["module load cuda".to_string()]);
        let job = test_job(dir.path(), 5);
        let script = backend.run_script_contents(&job).unwrap();
        let setup_line = script.find("module load cuda").unwrap();
        let command_line = script.find("python3").unwrap();
        assert!(setup_line < command_line);
    }

    #[test]
    fn job_spec_embeds_resume_directives() {
        let dir = tempfile::tempdir().unwrap();
        let backend = test_backend(dir.path());
        let job = test_job(dir.path(), 2);
        let spec = backend.job_spec_contents(&job);
        assert!(spec.contains("on_exit_hold = (ExitCode =?= 3)"));
        assert!(spec.contains("periodic_release"));
    }

    #[test]
    fn inc_job_id_is_monotonic() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = test_backend(dir.path());
        assert_eq!(backend.inc_job_id(), JobId(0));
        assert_eq!(backend.inc_job_id(), JobId(1));
    }

    #[test]
    fn poll_reads_exitcode_file_and_reports_resume() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = test_backend(dir.path()).with_submit_command(SubmitCommand {
            program: "echo".to_string(),
            args: vec!["sched-7".to_string()],
        });
        let mut job = test_job(dir.path(), 3);
        backend.submit(&mut job).unwrap();

        backend.poll();
        assert_eq!(backend.status(&job), ClusterStatus::Running);

        std::fs::write(backend.exitcode_path(&job), "3\n").unwrap();
        backend.poll();
        assert_eq!(backend.status(&job), ClusterStatus::Resume);
    }

    #[test]
    fn poll_reports_completed_ok_on_zero_exitcode() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = test_backend(dir.path()).with_submit_command(SubmitCommand {
            program: "echo".to_string(),
            args: vec!["sched-8".to_string()],
        });
        let mut job = test_job(dir.path(), 4);
        backend.submit(&mut job).unwrap();
        std::fs::write(backend.exitcode_path(&job), "0\n").unwrap();
        backend.poll();
        assert_eq!(backend.status(&job), ClusterStatus::CompletedOk);
    }
}
