//! A minimal cross-entropy-method metaoptimizer: the simplest faithful
//! implementation, not a research-grade CEM. A diagonal Gaussian per
//! numeric parameter, refit to the elite fraction of everything seen so far
//! after every batch of `samples_per_refit` new results; categorical
//! parameters are always resampled uniformly.

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
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
struct GaussianParams {
    mean: f64,
    std: f64,
}

#[derive(Serialize, Deserialize)]
struct Checkpoint {
    iteration: u64,
    gaussians: BTreeMap<String, GaussianParams>,
    full_df: ResultTable,
}

pub struct CrossEntropyOptimizer {
    search_space: SearchSpace,
    metric_to_optimize: String,
    minimize: bool,
    elite_fraction: f64,
    samples_per_refit: usize,
    iteration: u64,
    gaussians: BTreeMap<String, GaussianParams>,
    full_df: ResultTable,
    untold_since_refit: usize,
}

fn initial_gaussian(distribution: &Distribution) -> Option<GaussianParams> {
    match distribution {
        Distribution::Uniform { low, high } => Some(GaussianParams {
            mean: (low + high) / 2.0,
            std: ((high - low) / 4.0).max(1e-6),
        }),
        Distribution::LogUniform { low, high } => {
            let (log_low, log_high) = (low.max(1e-12).ln(), high.max(1e-12).ln());
            Some(GaussianParams {
                mean: (log_low + log_high) / 2.0,
                std: ((log_high - log_low) / 4.0).max(1e-6),
            })
        }
        Distribution::Normal { mean, std } => Some(GaussianParams {
            mean: *mean,
            std: std.max(1e-6),
        }),
        Distribution::Choice(_) | Distribution::Constant(_) => None,
    }
}

impl CrossEntropyOptimizer {
    pub fn new(
        search_space: SearchSpace,
        metric_to_optimize: impl Into<String>,
        minimize: bool,
        elite_fraction: f64,
        samples_per_refit: usize,
    ) -> Self {
        let gaussians = search_space
            .iter()
            .filter_map(|spec| {
                initial_gaussian(&spec.distribution).map(|g| (spec.name.clone(), g))
            })
            .collect();
        CrossEntropyOptimizer {
            search_space,
            metric_to_optimize: metric_to_optimize.into(),
            minimize,
            elite_fraction: elite_fraction.clamp(0.01, 1.0),
            samples_per_refit: samples_per_refit.max(1),
            iteration: 0,
            gaussians,
            full_df: ResultTable::new(),
            untold_since_refit: 0,
        }
    }

    pub fn try_load_from_pickle(
        path: &Path,
        search_space: SearchSpace,
        metric_to_optimize: impl Into<String>,
        minimize: bool,
        elite_fraction: f64,
        samples_per_refit: usize,
    ) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents =
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let checkpoint: Checkpoint =
            serde_json::from_str(&contents).with_context(|| format!("parsing {}", path.display()))?;
        let mut fresh = Self::new(
            search_space,
            metric_to_optimize,
            minimize,
            elite_fraction,
            samples_per_refit,
        );
        fresh.iteration = checkpoint.iteration;
        fresh.gaussians = checkpoint.gaussians;
        fresh.full_df = checkpoint.full_df;
        Ok(Some(fresh))
    }

    fn refit(&mut self) {
        if self.full_df.is_empty() {
            return;
        }
        let elite_count =
            ((self.full_df.len() as f64) * self.elite_fraction).ceil().max(1.0) as usize;
        let elites = self
            .full_df
            .top_k(&self.metric_to_optimize, self.minimize, elite_count);
        for spec in &self.search_space {
            let Distribution::Uniform { .. }
            | Distribution::LogUniform { .. }
            | Distribution::Normal { .. } = &spec.distribution
            else {
                continue;
            };
            let is_log = matches!(spec.distribution, Distribution::LogUniform { .. });
            let samples: Vec<f64> = elites
                .iter()
                .filter_map(|row| row.settings.get(&spec.name).and_then(Value::as_f64))
                .map(|v| if is_log { v.max(1e-12).ln() } else { v })
                .collect();
            if samples.is_empty() {
                continue;
            }
            let mean = samples.iter().sum::<f64>() / samples.len() as f64;
            let variance = if samples.len() > 1 {
                samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
                    / (samples.len() - 1) as f64
            } else {
                1e-6
            };
            self.gaussians.insert(
                spec.name.clone(),
                GaussianParams {
                    mean,
                    std: variance.sqrt().max(1e-6),
                },
            );
        }
    }
}

impl Optimizer for CrossEntropyOptimizer {
    fn ask(&mut self) -> Settings {
        let mut rng = rand::thread_rng();
        let mut settings = Settings::new();
        for spec in &self.search_space {
            let value = match &spec.distribution {
                Distribution::Constant(v) => v.clone(),
                Distribution::Choice(choices) => {
                    choices[rng.gen_range(0..choices.len())].clone()
                }
                Distribution::Uniform { .. } | Distribution::Normal { .. } => {
                    let g = self.gaussians[&spec.name];
                    let sample = Normal::new(g.mean, g.std).unwrap().sample(&mut rng);
                    Value::Float(sample)
                }
                Distribution::LogUniform { .. } => {
                    let g = self.gaussians[&spec.name];
                    let sample = Normal::new(g.mean, g.std).unwrap().sample(&mut rng);
                    Value::Float(sample.exp())
                }
            };
            settings.insert(spec.name.clone(), value);
        }
        settings
    }

    fn tell(&mut self, jobs: &mut dyn Iterator<Item = &mut Job>) {
        let mut newly_told = 0;
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
            newly_told += 1;
        }
        self.untold_since_refit += newly_told;
        if self.untold_since_refit >= self.samples_per_refit {
            self.refit();
            self.untold_since_refit = 0;
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
            gaussians: self.gaussians.clone(),
            full_df: self.full_df.clone(),
        };
        let path = dir.join(STATUS_CHECKPOINT_FILE);
        std::fs::write(&path, serde_json::to_string_pretty(&checkpoint)?)
            .with_context(|| format!("writing {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search_space::ParamSpec;
    use hopt_base::{JobId, JobPaths};
    use std::sync::Arc;

    fn search_space() -> SearchSpace {
        vec![ParamSpec {
            name: "lr".to_string(),
            distribution: Distribution::Uniform { low: 0.0, high: 1.0 },
        }]
    }

    fn make_job(id: u64, lr: f64, loss: f64) -> Job {
        let mut settings = Settings::new();
        settings.insert("lr".to_string(), Value::Float(lr));
        let mut job = Job::new(
            JobId(id),
            0,
            settings,
            Arc::new(Settings::new()),
            JobPaths {
                working_dir: format!("/tmp/{id}").into(),
                script_path: "/tmp/run.sh".into(),
                jobs_dir: "/tmp".into(),
                result_dir: "/tmp".into(),
                stderr_path: None,
            },
        );
        job.metrics.insert("loss".to_string(), loss);
        job
    }

    #[test]
    fn tell_is_idempotent_on_the_results_used_flag() {
        let mut opt =
            CrossEntropyOptimizer::new(search_space(), "loss", true, 0.2, 1);
        let mut jobs = vec![make_job(1, 0.5, 0.1)];
        opt.tell(&mut jobs.iter_mut());
        assert_eq!(opt.full_df().len(), 1);
        opt.tell(&mut jobs.iter_mut()); // already flagged, must not double-insert
        assert_eq!(opt.full_df().len(), 1);
    }

    #[test]
    fn refit_moves_gaussian_mean_toward_elites() {
        let mut opt =
            CrossEntropyOptimizer::new(search_space(), "loss", true, 0.5, 2);
        let mut jobs = vec![make_job(1, 0.9, 0.9), make_job(2, 0.1, 0.1)];
        opt.tell(&mut jobs.iter_mut());
        // elite (lowest loss) is job 2 at lr=0.1; mean should move down from 0.5.
        assert!(opt.gaussians["lr"].mean < 0.5);
    }

    #[test]
    fn checkpoint_round_trips_gaussian_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut opt =
            CrossEntropyOptimizer::new(search_space(), "loss", true, 0.5, 2);
        let mut jobs = vec![make_job(1, 0.9, 0.9), make_job(2, 0.1, 0.1)];
        opt.tell(&mut jobs.iter_mut());
        opt.advance_iteration();
        opt.save_data_and_self(dir.path()).unwrap();

        let reloaded = CrossEntropyOptimizer::try_load_from_pickle(
            &dir.path().join(hopt_base::constants::STATUS_CHECKPOINT_FILE),
            search_space(),
            "loss",
            true,
            0.5,
            2,
        )
        .unwrap()
        .unwrap();
        assert_eq!(reloaded.iteration(), 1);
        assert_eq!(reloaded.full_df().len(), 2);
    }
}
