//! The JSON launch config for the orchestrator's CLI surface, flattened
//! into one deserializable struct that a single JSON file populates
//! wholesale.

use hopt_base::Value;
use hopt_cluster::batch::BatchRequirements;
use hopt_optimizer::search_space::{Distribution, ParamSpec, SearchSpace};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    CemMetaoptimizer,
    Distribution,
    GridSearch,
}

#[derive(Clone, Debug, Deserialize)]
pub struct GitParams {
    pub url: Option<String>,
    pub branch: Option<String>,
    pub commit: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct EarlyKillingParams {
    pub target_rank: f64,
    pub how_many_stds: f64,
}

/// One entry of `hyperparam_list`/`distribution_list`: a parameter name
/// plus how its candidate values are drawn, as an `options`-bag.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "distribution", rename_all = "snake_case")]
pub enum DistributionSpec {
    Choice { options: Vec<Value> },
    Uniform { low: f64, high: f64 },
    LogUniform { low: f64, high: f64 },
    Normal { mean: f64, std: f64 },
    Constant { value: Value },
}

#[derive(Clone, Debug, Deserialize)]
pub struct HyperparamEntry {
    pub param: String,
    #[serde(flatten)]
    pub spec: DistributionSpec,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ClusterRequirements {
    #[serde(default = "default_cpus")]
    pub cpus: u32,
    #[serde(default)]
    pub gpus: u32,
    #[serde(default = "default_mem_mb")]
    pub mem_mb: u64,
    #[serde(default)]
    pub requirements_line: String,
    #[serde(default)]
    pub concurrent_line: String,
    #[serde(default)]
    pub extra_submission_lines: String,
    /// Local-backend-only: CPUs pinned per job.
    #[serde(default = "default_cpus_per_job")]
    pub cpus_per_job: usize,
    /// Local-backend-only: upper bound on host CPUs to use at all.
    #[serde(default = "default_max_cpus")]
    pub max_cpus: usize,
}

fn default_cpus() -> u32 {
    1
}
fn default_mem_mb() -> u64 {
    1024
}
fn default_cpus_per_job() -> usize {
    1
}
fn default_max_cpus() -> usize {
    usize::MAX
}

impl From<&ClusterRequirements> for BatchRequirements {
    fn from(r: &ClusterRequirements) -> Self {
        BatchRequirements {
            cpus: r.cpus,
            gpus: r.gpus,
            mem_mb: r.mem_mb,
            requirements_line: r.requirements_line.clone(),
            concurrent_line: r.concurrent_line.clone(),
            extra_submission_lines: r.extra_submission_lines.clone(),
        }
    }
}

/// The JSON launch config for the orchestrator's CLI surface.
#[derive(Clone, Debug, Deserialize)]
pub struct LaunchConfig {
    pub optimization_procedure_name: String,
    pub script_relative_path: PathBuf,
    pub result_dir: PathBuf,
    pub cluster_requirements: ClusterRequirements,
    #[serde(default)]
    pub hyperparam_list: Vec<HyperparamEntry>,
    #[serde(default)]
    pub fixed_params: BTreeMap<String, Value>,
    pub samples: Option<u64>,
    #[serde(default = "default_restarts")]
    pub restarts: usize,
    #[serde(default = "default_n_jobs_per_iteration")]
    pub n_jobs_per_iteration: u64,
    pub metric_to_optimize: String,
    #[serde(default)]
    pub minimize: bool,
    #[serde(default)]
    pub kill_bad_jobs_early: bool,
    pub early_killing_params: Option<EarlyKillingParams>,
    #[serde(default = "default_optimizer")]
    pub optimizer_str: OptimizerKind,
    #[serde(default)]
    pub run_local: bool,
    pub git_params: Option<GitParams>,
    #[serde(default)]
    pub environment_setup: Vec<String>,
    #[serde(default)]
    pub num_best_jobs_whose_data_is_kept: usize,
}

fn default_restarts() -> usize {
    1
}
fn default_n_jobs_per_iteration() -> u64 {
    1
}
fn default_optimizer() -> OptimizerKind {
    OptimizerKind::CemMetaoptimizer
}

impl LaunchConfig {
    pub fn load(path: &std::path::Path) -> anyhow::Result<LaunchConfig> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading launch config {}: {e}", path.display()))?;
        let config: LaunchConfig = serde_json::from_str(&text)
            .map_err(|e| anyhow::anyhow!("parsing launch config {}: {e}", path.display()))?;
        Ok(config)
    }

    pub fn search_space(&self) -> SearchSpace {
        self.hyperparam_list
            .iter()
            .map(|entry| ParamSpec {
                name: entry.param.clone(),
                distribution: match &entry.spec {
                    DistributionSpec::Choice { options } => Distribution::Choice(options.clone()),
                    DistributionSpec::Uniform { low, high } => Distribution::Uniform {
                        low: *low,
                        high: *high,
                    },
                    DistributionSpec::LogUniform { low, high } => Distribution::LogUniform {
                        low: *low,
                        high: *high,
                    },
                    DistributionSpec::Normal { mean, std } => Distribution::Normal {
                        mean: *mean,
                        std: *std,
                    },
                    DistributionSpec::Constant { value } => Distribution::Constant(value.clone()),
                },
            })
            .collect()
    }
}
