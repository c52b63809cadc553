//! The `hopt` binary: parses the CLI surface, bootstraps logging, builds
//! the configured backend/optimizer pair (with checkpoint-resume from a
//! prior `status.json` if one exists), and hands off to the control loop.

use anyhow::{Context, Result};
use clap::Parser;
use hopt_cluster::batch::BatchRequirements;
use hopt_cluster::{BatchBackend, ClusterBackend, GitCheckoutHook, LocalBackend};
use hopt_optimizer::{CrossEntropyOptimizer, DistributionOptimizer, GridSearchOptimizer, Optimizer};
use hopt_orchestrator::control_loop::{ControlLoop, ControlLoopConfig, EarlyKilling};
use hopt_orchestrator::launch_config::{LaunchConfig, OptimizerKind};
use hopt_orchestrator::CommServer;
use hopt_util::config::Cli;
use hopt_util::log::run_with_logger;
use std::io::Write;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

const DEFAULT_ELITE_FRACTION: f64 = 0.2;
const DEFAULT_SAMPLES_PER_REFIT: usize = 10;
const MAX_GRID_SEARCH_IN_FLIGHT: usize = 64;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut launch_config = LaunchConfig::load(&cli.config)?;
    if let Some(override_dir) = &cli.result_dir {
        launch_config.result_dir = override_dir.clone();
    }

    ensure_result_dir(&launch_config.result_dir, cli.yes)?;

    let log_path = launch_config
        .result_dir
        .join(hopt_base::constants::CLUSTER_RUN_LOG_FILE);
    run_with_logger(cli.log_level, &log_path, |log| run(&launch_config, log))
}

/// Defensive mode: refuses to silently overwrite a non-empty result
/// directory unless `--yes` was passed or the user confirms interactively.
fn ensure_result_dir(dir: &std::path::Path, assume_yes: bool) -> Result<()> {
    let fs = hopt_util::fs::Fs::new();
    if !fs.exists(dir) {
        return fs.create_dir_all(dir);
    }
    let non_empty = std::fs::read_dir(dir)
        .with_context(|| format!("reading {}", dir.display()))?
        .next()
        .is_some();
    if !non_empty || assume_yes {
        return Ok(());
    }
    print!(
        "result directory {} already exists and is non-empty; continue? [y/N] ",
        dir.display()
    );
    std::io::stdout().flush().ok();
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer).ok();
    if answer.trim().eq_ignore_ascii_case("y") {
        Ok(())
    } else {
        anyhow::bail!("aborted: result directory {} not confirmed", dir.display());
    }
}

fn run(config: &LaunchConfig, log: slog::Logger) -> Result<()> {
    let comm_server = CommServer::start().context("binding the UDP communication server")?;
    let connection_info = comm_server.connection_info();

    let script_path = config.result_dir.join(&config.script_relative_path);
    let search_space = config.search_space();
    let fixed_params: hopt_base::Settings = config.fixed_params.clone().into_iter().collect();

    let mut backend: Box<dyn ClusterBackend> = if config.run_local {
        Box::new(
            LocalBackend::new(
                config.result_dir.join("jobs"),
                config.cluster_requirements.cpus_per_job,
                config.cluster_requirements.max_cpus,
                log.clone(),
            )
            .with_environment_setup(config.environment_setup.clone()),
        )
    } else {
        Box::new(
            BatchBackend::new(
                config.result_dir.join("jobs"),
                config.optimization_procedure_name.clone(),
                BatchRequirements::from(&config.cluster_requirements),
                (connection_info.addr.ip().to_string(), connection_info.addr.port()),
                log.clone(),
            )
            .with_environment_setup(config.environment_setup.clone()),
        )
    };

    if let Some(git_params) = &config.git_params {
        if let Some(url) = &git_params.url {
            backend.register_submission_hook(Box::new(GitCheckoutHook::new(
                url.clone(),
                git_params.branch.clone(),
                git_params.commit.clone(),
            )));
        }
    }

    let checkpoint_path = config
        .result_dir
        .join(hopt_base::constants::STATUS_CHECKPOINT_FILE);

    let early_killing = if config.kill_bad_jobs_early {
        config
            .early_killing_params
            .as_ref()
            .map(|p| EarlyKilling {
                target_rank: p.target_rank,
                how_many_stds: p.how_many_stds,
            })
    } else {
        None
    };

    let control_loop_config = ControlLoopConfig {
        result_dir: hopt_util::root::RootBuf::new(config.result_dir.clone()),
        script_path,
        run_local: config.run_local,
        metric_to_optimize: config.metric_to_optimize.clone(),
        minimize: config.minimize,
        number_of_samples: config.samples,
        n_jobs_per_iteration: config.n_jobs_per_iteration,
        num_best_jobs_whose_data_is_kept: config.num_best_jobs_whose_data_is_kept,
        early_killing,
        fixed_params: Arc::new(fixed_params),
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, shutdown.clone())
        .context("installing the SIGINT handler")?;

    match config.optimizer_str {
        OptimizerKind::GridSearch => {
            let optimizer: Box<dyn Optimizer + Send> = Box::new(
                GridSearchOptimizer::try_load_from_pickle(
                    &checkpoint_path,
                    &search_space,
                    config.restarts,
                    config.metric_to_optimize.clone(),
                    config.minimize,
                )?
                .map(Ok)
                .unwrap_or_else(|| {
                    GridSearchOptimizer::new(
                        &search_space,
                        config.restarts,
                        config.metric_to_optimize.clone(),
                        config.minimize,
                    )
                })?,
            );
            let mut control_loop =
                ControlLoop::new(backend, optimizer, comm_server, log, control_loop_config)
                    .with_shutdown_flag(shutdown);
            control_loop.run_grid_search(MAX_GRID_SEARCH_IN_FLIGHT)
        }
        OptimizerKind::Distribution => {
            let optimizer: Box<dyn Optimizer + Send> = Box::new(
                DistributionOptimizer::try_load_from_pickle(
                    &checkpoint_path,
                    search_space.clone(),
                    config.metric_to_optimize.clone(),
                    config.minimize,
                )?
                .unwrap_or_else(|| {
                    DistributionOptimizer::new(
                        search_space,
                        config.metric_to_optimize.clone(),
                        config.minimize,
                    )
                }),
            );
            let mut control_loop =
                ControlLoop::new(backend, optimizer, comm_server, log, control_loop_config)
                    .with_shutdown_flag(shutdown);
            control_loop.run()
        }
        OptimizerKind::CemMetaoptimizer => {
            let optimizer: Box<dyn Optimizer + Send> = Box::new(
                CrossEntropyOptimizer::try_load_from_pickle(
                    &checkpoint_path,
                    search_space.clone(),
                    config.metric_to_optimize.clone(),
                    config.minimize,
                    DEFAULT_ELITE_FRACTION,
                    DEFAULT_SAMPLES_PER_REFIT,
                )?
                .unwrap_or_else(|| {
                    CrossEntropyOptimizer::new(
                        search_space,
                        config.metric_to_optimize.clone(),
                        config.minimize,
                        DEFAULT_ELITE_FRACTION,
                        DEFAULT_SAMPLES_PER_REFIT,
                    )
                }),
            );
            let mut control_loop =
                ControlLoop::new(backend, optimizer, comm_server, log, control_loop_config)
                    .with_shutdown_flag(shutdown);
            control_loop.run()
        }
    }
}
