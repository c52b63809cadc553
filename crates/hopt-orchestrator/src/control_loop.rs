//! The control loop: the tick sequence, the laggard killer, failure-budget
//! enforcement, and checkpoint/resume glue. Drives the grid-search and
//! iterative (distribution/cross-entropy) optimizer flows as two entry
//! points over one shared machinery.

use crate::comm_server::{CommServer, Inbound};
use crate::laggard::jobs_to_kill;
use crate::report::{update_best_job_datadirs, write_report_data};
use anyhow::Result;
use chrono::{DateTime, Utc};
use hopt_base::constants::{
    BEST_JOBS_DIR, FAILURE_BUDGET_SLACK, LOOP_SLEEP_INTERVAL, REPORT_DATA_FILE,
    WORKING_DIRECTORIES_DIR,
};
use hopt_base::job::ClusterStatus;
use hopt_base::{HoptError, Job, JobId, JobPaths, JobStatus, Settings, WireMessage};
use hopt_cluster::ClusterBackend;
use hopt_optimizer::Optimizer;
use hopt_util::fs::Fs;
use hopt_util::root::{markers, RootBuf};
use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Parameters controlling the laggard killer.
#[derive(Clone, Debug)]
pub struct EarlyKilling {
    pub target_rank: f64,
    pub how_many_stds: f64,
}

/// Everything the loop needs besides the backend/optimizer/comm server
/// objects themselves — the flattened subset of `LaunchConfig` the tick
/// sequence actually consults.
pub struct ControlLoopConfig {
    pub result_dir: RootBuf<markers::ResultDir>,
    pub script_path: PathBuf,
    pub run_local: bool,
    pub metric_to_optimize: String,
    pub minimize: bool,
    pub number_of_samples: Option<u64>,
    pub n_jobs_per_iteration: u64,
    pub num_best_jobs_whose_data_is_kept: usize,
    pub early_killing: Option<EarlyKilling>,
    pub fixed_params: Arc<Settings>,
}

impl ControlLoopConfig {
    fn working_directories_dir(&self) -> PathBuf {
        self.result_dir.join(WORKING_DIRECTORIES_DIR)
    }

    fn best_jobs_dir(&self) -> PathBuf {
        self.result_dir.join(BEST_JOBS_DIR)
    }
}

/// Non-blocking keyboard control: a background thread reads lines from
/// stdin and forwards `pause`/`resume`/`abort`; anything else is ignored.
/// No curses-style status display — no terminal progress bars.
pub struct KeyboardCommands {
    receiver: Receiver<String>,
    _handle: JoinHandle<()>,
}

impl KeyboardCommands {
    pub fn start() -> Self {
        let (tx, rx) = mpsc::channel();
        let handle = std::thread::spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines().map_while(std::result::Result::ok) {
                if tx.send(line.trim().to_ascii_lowercase()).is_err() {
                    break;
                }
            }
        });
        KeyboardCommands {
            receiver: rx,
            _handle: handle,
        }
    }

    fn drain(&self) -> Vec<String> {
        let mut out = Vec::new();
        loop {
            match self.receiver.try_recv() {
                Ok(line) => out.push(line),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        out
    }
}

pub struct ControlLoop {
    jobs: BTreeMap<JobId, Job>,
    backend: Box<dyn ClusterBackend>,
    optimizer: Box<dyn Optimizer + Send>,
    comm_server: CommServer,
    keyboard: KeyboardCommands,
    log: slog::Logger,
    fs: Fs,
    config: ControlLoopConfig,
    iteration_offset: u64,
    paused: bool,
    shutdown: Option<Arc<std::sync::atomic::AtomicBool>>,
}

impl ControlLoop {
    pub fn new(
        backend: Box<dyn ClusterBackend>,
        optimizer: Box<dyn Optimizer + Send>,
        comm_server: CommServer,
        log: slog::Logger,
        config: ControlLoopConfig,
    ) -> Self {
        let iteration_offset = optimizer.iteration();
        ControlLoop {
            jobs: BTreeMap::new(),
            backend,
            optimizer,
            comm_server,
            keyboard: KeyboardCommands::start(),
            log,
            fs: Fs::new(),
            config,
            iteration_offset,
            paused: false,
            shutdown: None,
        }
    }

    /// Registers a flag the binary's SIGINT handler sets: each tick checks
    /// it and, if set, breaks out of the loop and runs the same final
    /// checkpoint/report/close sequence as reaching `number_of_samples`.
    pub fn with_shutdown_flag(mut self, flag: Arc<std::sync::atomic::AtomicBool>) -> Self {
        self.shutdown = Some(flag);
        self
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .is_some_and(|f| f.load(std::sync::atomic::Ordering::Relaxed))
    }

    fn n_completed(&self) -> u64 {
        self.jobs.values().filter(|j| j.status.is_terminal()).count() as u64
    }

    fn n_successful(&self) -> u64 {
        self.jobs
            .values()
            .filter(|j| j.status == JobStatus::Concluded)
            .count() as u64
    }

    fn n_failed(&self) -> u64 {
        self.jobs
            .values()
            .filter(|j| j.status == JobStatus::Failed)
            .count() as u64
    }

    fn n_running(&self) -> u64 {
        self.jobs
            .values()
            .filter(|j| !j.status.is_terminal())
            .count() as u64
    }

    fn job_paths(&self, id: JobId, iteration: u64) -> JobPaths {
        let working_dir = self
            .config
            .working_directories_dir()
            .join(format!("{iteration}_{}", id.0));
        let stderr_path = if self.config.run_local {
            None
        } else {
            Some(
                self.config
                    .result_dir
                    .join("jobs")
                    .join(format!("{iteration}_{}.sh.err", id.0)),
            )
        };
        JobPaths {
            working_dir,
            script_path: self.config.script_path.clone(),
            jobs_dir: self.config.result_dir.join("jobs"),
            result_dir: self.config.result_dir.as_path_buf().clone(),
            stderr_path,
        }
    }

    fn submit_new_job(&mut self) -> Result<()> {
        let settings = self.optimizer.ask();
        let iteration = self.optimizer.iteration();
        let id = self.backend.inc_job_id();
        let paths = self.job_paths(id, iteration);
        let mut job = Job::new(id, iteration, settings, self.config.fixed_params.clone(), paths);
        self.backend.submit(&mut job)?;
        slog::info!(self.log, "submitted job"; "job_id" => id.0, "iteration" => iteration);
        self.jobs.insert(id, job);
        Ok(())
    }

    fn handle_message(&mut self, message: WireMessage, now: DateTime<Utc>) {
        let id = JobId(message.job_id());
        let Some(job) = self.jobs.get_mut(&id) else {
            slog::warn!(self.log, "protocol violation: unknown job id"; "job_id" => id.0);
            return;
        };
        match message {
            WireMessage::JobStarted { .. } => job.mark_running(now),
            WireMessage::JobSentResults { metrics, .. } => {
                if job.status == JobStatus::Running {
                    if let Some(value) = metrics.get(&self.config.metric_to_optimize) {
                        job.record_intermediate(*value);
                    }
                } else if job.status == JobStatus::ConcludedWithoutResults {
                    job.mark_concluded(metrics, now);
                }
            }
            WireMessage::ErrorEncountered { traceback, .. } => job.mark_failed(traceback),
            WireMessage::JobConcluded { .. } => job.mark_concluded_without_results(now),
        }
    }

    fn drain_comm_server(&mut self) {
        let now = Utc::now();
        for inbound in self.comm_server.drain() {
            match inbound {
                Inbound::Message(message) => self.handle_message(message, now),
                Inbound::Undecodable(e) => {
                    slog::warn!(self.log, "dropping undecodable datagram"; "error" => %e);
                }
            }
        }
    }

    /// Reconciles each non-terminal job against the backend's own
    /// reported status transitions.
    fn reconcile_backend_status(&mut self) {
        let now = Utc::now();
        for job in self.jobs.values_mut() {
            if job.status.is_terminal() {
                continue;
            }
            match self.backend.status(job) {
                ClusterStatus::Running => job.mark_running(now),
                ClusterStatus::CompletedOk => {
                    if job.status != JobStatus::Concluded {
                        job.mark_concluded_without_results(now);
                    }
                }
                ClusterStatus::CompletedFail => {
                    job.mark_failed("backend reported a non-zero, non-resume exit".to_string());
                }
                ClusterStatus::Resume => job.mark_waiting_for_resume(),
                ClusterStatus::Queued | ClusterStatus::Unknown => {}
            }
        }
    }

    /// Resubmits every job left `WAITING_FOR_RESUME` by the previous step.
    fn resubmit_waiting_for_resume(&mut self) -> Result<()> {
        let waiting: Vec<JobId> = self
            .jobs
            .iter()
            .filter(|(_, j)| j.status == JobStatus::WaitingForResume)
            .map(|(id, _)| *id)
            .collect();
        for id in waiting {
            if let Some(job) = self.jobs.get_mut(&id) {
                job.cluster_id = None;
                self.backend.submit(job)?;
            }
        }
        Ok(())
    }

    fn check_filesystem(&mut self) {
        let now = Utc::now();
        for job in self.jobs.values_mut() {
            if job.status.is_terminal() {
                continue;
            }
            job.try_load_results_from_filesystem(now);
            job.expire_grace_window_if_elapsed(now);
        }
        self.backend.check_error_msgs(&mut self.jobs.values_mut());
    }

    fn tell_optimizer(&mut self) {
        self.optimizer.tell(
            &mut self
                .jobs
                .values_mut()
                .filter(|j| j.status == JobStatus::Concluded && !j.results_used_for_update),
        );
    }

    fn maybe_run_post_iteration(&mut self) -> Result<()> {
        let threshold = self.n_completed() / self.config.n_jobs_per_iteration.max(1);
        if threshold <= self.optimizer.iteration() - self.iteration_offset {
            return Ok(());
        }
        self.fs.create_dir_all(&self.config.result_dir)?;
        self.optimizer.save_data_and_self(&self.config.result_dir)?;
        self.optimizer.advance_iteration();
        self.comm_server.clear_job_table();

        self.fs.create_dir_all(self.config.best_jobs_dir())?;
        update_best_job_datadirs(
            &self.fs,
            self.optimizer.as_ref(),
            self.config.num_best_jobs_whose_data_is_kept,
            &self.config.best_jobs_dir(),
        )?;

        let keep: std::collections::BTreeSet<PathBuf> = self
            .optimizer
            .best_jobs_model_dirs(self.config.num_best_jobs_whose_data_is_kept)
            .into_iter()
            .collect();
        for job in self.jobs.values() {
            if job.status.is_terminal() && !keep.contains(&job.paths.working_dir) {
                let _ = self.fs.remove_dir_all(&job.paths.working_dir);
            }
        }

        let stats = self.backend.collect_stats_from_hooks();
        write_report_data(
            &self.fs,
            &self.config.result_dir.join(REPORT_DATA_FILE),
            &stats,
        )?;
        Ok(())
    }

    fn enforce_failure_budget(&mut self) -> Result<()> {
        let failed = self.n_failed();
        let successful = self.n_successful();
        let running = self.n_running();
        if failed > successful + running + FAILURE_BUDGET_SLACK {
            self.backend.close();
            return Err(HoptError::TooManyFailures {
                failed,
                successful,
                running,
            }
            .into());
        }
        Ok(())
    }

    fn run_laggard_killer(&mut self) {
        let Some(early_killing) = self.config.early_killing.clone() else {
            return;
        };
        let to_kill = jobs_to_kill(
            &self.jobs,
            &self.config.metric_to_optimize,
            self.config.minimize,
            early_killing.target_rank,
            early_killing.how_many_stds,
        );
        let now = Utc::now();
        for (id, value) in to_kill {
            let Some(job) = self.jobs.get_mut(&id) else { continue };
            let Some(cluster_id) = job.cluster_id.clone() else { continue };
            let mut metrics = job.metrics.clone();
            metrics.insert(self.config.metric_to_optimize.clone(), value);
            job.mark_concluded(metrics, now);
            self.backend.stop(&cluster_id);
            slog::info!(self.log, "killed a laggard job"; "job_id" => id.0, "value" => value);
        }
    }

    fn poll_keyboard(&mut self) {
        for command in self.keyboard.drain() {
            match command.as_str() {
                "pause" => self.paused = true,
                "resume" => self.paused = false,
                _ => {}
            }
        }
    }

    /// One tick of the main loop: poll, reconcile, tell, submit, checkpoint,
    /// scan for errors, enforce the failure budget, then laggard-kill.
    fn tick(&mut self) -> Result<()> {
        self.poll_keyboard();
        self.backend.poll();
        self.drain_comm_server();
        self.reconcile_backend_status();
        self.resubmit_waiting_for_resume()?;
        self.tell_optimizer();

        if !self.paused
            && self.n_completed() + self.n_running() < self.config.number_of_samples.unwrap_or(u64::MAX)
            && self.jobs.len() as u64 - self.n_completed() < self.config.n_jobs_per_iteration
            && (self.jobs.len() as u64) < self.config.number_of_samples.unwrap_or(u64::MAX)
        {
            self.submit_new_job()?;
        }

        self.maybe_run_post_iteration()?;
        self.check_filesystem();
        self.enforce_failure_budget()?;
        if self.config.early_killing.is_some() {
            self.run_laggard_killer();
        }
        Ok(())
    }

    /// The iterative `hp_optimization` driver: ask/tell in a loop until
    /// `number_of_samples` jobs have concluded.
    pub fn run(&mut self) -> Result<()> {
        self.backend.exec_pre_run_routines()?;
        let target = self.config.number_of_samples.unwrap_or(u64::MAX);
        loop {
            if self.n_completed() >= target || self.shutdown_requested() {
                break;
            }
            self.tick()?;
            std::thread::sleep(LOOP_SLEEP_INTERVAL);
        }
        self.finish()
    }

    /// The grid-search driver: `ask_all` up front, submit up to a small
    /// bound of concurrently in-flight jobs, no `tell`/iteration logic —
    /// final results are collected via `job.get_results()` rather than fed
    /// back into an optimizer.
    pub fn run_grid_search(&mut self, max_in_flight: usize) -> Result<()> {
        self.backend.exec_pre_run_routines()?;
        let mut queue = self.optimizer.ask_all();
        loop {
            if self.shutdown_requested() {
                break;
            }
            self.poll_keyboard();
            self.backend.poll();
            self.drain_comm_server();
            self.reconcile_backend_status();
            self.resubmit_waiting_for_resume()?;

            while !self.paused && !queue.is_empty() && self.n_running() < max_in_flight as u64 {
                let settings = queue.remove(0);
                let iteration = self.optimizer.iteration();
                let id = self.backend.inc_job_id();
                let paths = self.job_paths(id, iteration);
                let mut job = Job::new(id, iteration, settings, self.config.fixed_params.clone(), paths);
                self.backend.submit(&mut job)?;
                self.jobs.insert(id, job);
            }

            self.check_filesystem();
            self.enforce_failure_budget()?;

            if queue.is_empty() && self.n_running() == 0 {
                break;
            }
            std::thread::sleep(LOOP_SLEEP_INTERVAL);
        }
        self.finish()
    }

    fn finish(&mut self) -> Result<()> {
        self.fs.create_dir_all(&self.config.result_dir)?;
        self.optimizer.save_data_and_self(&self.config.result_dir)?;
        self.fs.create_dir_all(self.config.best_jobs_dir())?;
        update_best_job_datadirs(
            &self.fs,
            self.optimizer.as_ref(),
            self.config.num_best_jobs_whose_data_is_kept,
            &self.config.best_jobs_dir(),
        )?;
        let stats = self.backend.collect_stats_from_hooks();
        write_report_data(
            &self.fs,
            &self.config.result_dir.join(REPORT_DATA_FILE),
            &stats,
        )?;
        self.backend.exec_post_run_routines()?;
        self.backend.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hopt_cluster::LocalBackend;
    use hopt_optimizer::{Distribution, DistributionOptimizer, ParamSpec};

    fn config(dir: &std::path::Path, samples: u64) -> ControlLoopConfig {
        ControlLoopConfig {
            result_dir: RootBuf::new(dir),
            script_path: dir.join("run_user_script.sh"),
            run_local: true,
            metric_to_optimize: "loss".to_string(),
            minimize: true,
            number_of_samples: Some(samples),
            n_jobs_per_iteration: samples,
            num_best_jobs_whose_data_is_kept: 1,
            early_killing: None,
            fixed_params: Arc::new(Settings::new()),
        }
    }

    #[test]
    fn failure_budget_aborts_after_enough_failures() {
        let dir = tempfile::tempdir().unwrap();
        let log = slog::Logger::root(slog::Discard, slog::o!());
        let backend = Box::new(LocalBackend::new(dir.path().join("jobs"), 1, 1, log.clone()));
        let optimizer: Box<dyn Optimizer + Send> = Box::new(DistributionOptimizer::new(
            vec![ParamSpec {
                name: "lr".to_string(),
                distribution: Distribution::Uniform { low: 0.0, high: 1.0 },
            }],
            "loss",
            true,
        ));
        let comm_server = CommServer::start().unwrap();
        let mut loop_ = ControlLoop::new(backend, optimizer, comm_server, log, config(dir.path(), 20));

        for id in 0..10 {
            let job = Job::new(
                JobId(id),
                0,
                Settings::new(),
                Arc::new(Settings::new()),
                loop_.job_paths(JobId(id), 0),
            );
            loop_.jobs.insert(JobId(id), job);
            loop_.jobs.get_mut(&JobId(id)).unwrap().mark_failed("boom".to_string());
        }

        let result = loop_.enforce_failure_budget();
        assert!(result.is_err());
    }

    #[test]
    fn tell_sets_results_used_for_update_flag() {
        let dir = tempfile::tempdir().unwrap();
        let log = slog::Logger::root(slog::Discard, slog::o!());
        let backend = Box::new(LocalBackend::new(dir.path().join("jobs"), 1, 1, log.clone()));
        let optimizer: Box<dyn Optimizer + Send> = Box::new(DistributionOptimizer::new(
            vec![ParamSpec {
                name: "lr".to_string(),
                distribution: Distribution::Uniform { low: 0.0, high: 1.0 },
            }],
            "loss",
            true,
        ));
        let comm_server = CommServer::start().unwrap();
        let mut loop_ = ControlLoop::new(backend, optimizer, comm_server, log, config(dir.path(), 1));

        let id = JobId(0);
        let paths = loop_.job_paths(id, 0);
        let mut job = Job::new(id, 0, Settings::new(), Arc::new(Settings::new()), paths);
        let mut metrics = BTreeMap::new();
        metrics.insert("loss".to_string(), 0.5);
        job.mark_concluded(metrics, Utc::now());
        loop_.jobs.insert(id, job);

        loop_.tell_optimizer();
        assert!(loop_.jobs[&id].results_used_for_update);
        assert_eq!(loop_.optimizer.full_df().len(), 1);

        loop_.tell_optimizer();
        assert_eq!(loop_.optimizer.full_df().len(), 1);
    }
}
