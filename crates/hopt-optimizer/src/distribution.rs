//! The plain random-search optimizer: every `ask` draws independently from
//! the search space's declared distributions. No adaptation, no state
//! beyond the results accumulated for reporting — the simplest possible
//! `Optimizer`.

use crate::csv::{write_all_data_csv, write_reduced_data_csv};
use crate::optimizer::Optimizer;
use crate::result_table::{ResultRow, ResultTable};
use crate::search_space::{Distribution, SearchSpace};
use anyhow::{Context, Result};
use hopt_base::constants::STATUS_CHECKPOINT_FILE;
use hopt_base::{Job, Settings, Value};
use rand::Rng;
use rand_distr::{Distribution as _, Normal};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Serialize, Deserialize)]
struct Checkpoint {
    iteration: u64,
    full_df: ResultTable,
}

pub struct DistributionOptimizer {
    search_space: SearchSpace,
    metric_to_optimize: String,
    minimize: bool,
    iteration: u64,
    full_df: ResultTable,
}

impl DistributionOptimizer {
    pub fn new(
        search_space: SearchSpace,
        metric_to_optimize: impl Into<String>,
        minimize: bool,
    ) -> Self {
        DistributionOptimizer {
            search_space,
            metric_to_optimize: metric_to_optimize.into(),
            minimize,
            iteration: 0,
            full_df: ResultTable::new(),
        }
    }

    pub fn try_load_from_pickle(
        path: &Path,
        search_space: SearchSpace,
        metric_to_optimize: impl Into<String>,
        minimize: bool,
    ) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents =
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let checkpoint: Checkpoint =
            serde_json::from_str(&contents).with_context(|| format!("parsing {}", path.display()))?;
        let mut fresh = Self::new(search_space, metric_to_optimize, minimize);
        fresh.iteration = checkpoint.iteration;
        fresh.full_df = checkpoint.full_df;
        Ok(Some(fresh))
    }
}

fn sample(distribution: &Distribution, rng: &mut impl Rng) -> Value {
    match distribution {
        Distribution::Constant(v) => v.clone(),
        Distribution::Choice(choices) => choices[rng.gen_range(0..choices.len())].clone(),
        Distribution::Uniform { low, high } => Value::Float(rng.gen_range(*low..=*high)),
        Distribution::LogUniform { low, high } => {
            let (log_low, log_high) = (low.max(1e-12).ln(), high.max(1e-12).ln());
            Value::Float(rng.gen_range(log_low..=log_high).exp())
        }
        Distribution::Normal { mean, std } => {
            Value::Float(Normal::new(*mean, *std).unwrap().sample(rng))
        }
    }
}

impl Optimizer for DistributionOptimizer {
    fn ask(&mut self) -> Settings {
        let mut rng = rand::thread_rng();
        self.search_space
            .iter()
            .map(|spec| (spec.name.clone(), sample(&spec.distribution, &mut rng)))
            .collect()
    }

    fn tell(&mut self, jobs: &mut dyn Iterator<Item = &mut Job>) {
        for job in jobs {
            if job.results_used_for_update {
                continue;
            }
            self.full_df.push(ResultRow {
                job_id: job.id.0,
                iteration: job.iteration,
                model_dir: job.paths.working_dir.clone(),
                settings: job.settings.clone(),
                metrics: job.metrics.clone(),
            });
            job.results_used_for_update = true;
        }
    }

    fn iteration(&self) -> u64 {
        self.iteration
    }

    fn advance_iteration(&mut self) {
        self.iteration += 1;
    }

    fn metric_to_optimize(&self) -> &str {
        &self.metric_to_optimize
    }

    fn minimize(&self) -> bool {
        self.minimize
    }

    fn full_df(&self) -> &ResultTable {
        &self.full_df
    }

    fn save_data_and_self(&self, dir: &Path) -> Result<()> {
        write_all_data_csv(&self.full_df, &dir.join(hopt_base::constants::FULL_DF_FILE))?;
        write_reduced_data_csv(
            &self.full_df,
            &self.metric_to_optimize,
            &dir.join(hopt_base::constants::REDUCED_DF_FILE),
        )?;
        let checkpoint = Checkpoint {
            iteration: self.iteration,
            full_df: self.full_df.clone(),
        };
        let path = dir.join(STATUS_CHECKPOINT_FILE);
        std::fs::write(&path, serde_json::to_string_pretty(&checkpoint)?)
            .with_context(|| format!("writing {}", path.display()))
    }
}
