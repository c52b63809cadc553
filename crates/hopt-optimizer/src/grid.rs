//! Grid-search enumerator: a restart-aware driver over the cartesian
//! product of a search space's choice/constant parameters. The enumeration
//! algorithm itself is intentionally simple.

use crate::csv::{write_all_data_csv, write_reduced_data_csv};
use crate::optimizer::Optimizer;
use crate::result_table::ResultTable;
use anyhow::{bail, Context, Result};
use hopt_base::constants::STATUS_CHECKPOINT_FILE;
use hopt_base::{Job, Settings, Value};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;

use crate::search_space::{Distribution, SearchSpace};

#[derive(Serialize, Deserialize)]
struct Checkpoint {
    iteration: u64,
    remaining: Vec<Settings>,
}

pub struct GridSearchOptimizer {
    metric_to_optimize: String,
    minimize: bool,
    iteration: u64,
    queue: VecDeque<Settings>,
    full_df: ResultTable,
}

fn cartesian_product(search_space: &SearchSpace) -> Result<Vec<Settings>> {
    let mut combos: Vec<Settings> = vec![Settings::new()];
    for spec in search_space {
        let choices: Vec<Value> = match &spec.distribution {
            Distribution::Choice(values) => values.clone(),
            Distribution::Constant(value) => vec![value.clone()],
            other => bail!(
                "grid search requires a Choice or Constant distribution for {:?}, got {:?}",
                spec.name,
                other
            ),
        };
        let mut next = Vec::with_capacity(combos.len() * choices.len());
        for combo in &combos {
            for choice in &choices {
                let mut extended = combo.clone();
                extended.insert(spec.name.clone(), choice.clone());
                next.push(extended);
            }
        }
        combos = next;
    }
    Ok(combos)
}

impl GridSearchOptimizer {
    pub fn new(
        search_space: &SearchSpace,
        restarts: usize,
        metric_to_optimize: impl Into<String>,
        minimize: bool,
    ) -> Result<Self> {
        let base = cartesian_product(search_space)?;
        let restarts = restarts.max(1);
        let mut queue = VecDeque::with_capacity(base.len() * restarts);
        for setting in &base {
            for _ in 0..restarts {
                queue.push_back(setting.clone());
            }
        }
        Ok(GridSearchOptimizer {
            metric_to_optimize: metric_to_optimize.into(),
            minimize,
            iteration: 0,
            queue,
            full_df: ResultTable::new(),
        })
    }

    pub fn try_load_from_pickle(
        path: &Path,
        search_space: &SearchSpace,
        restarts: usize,
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
        let mut fresh = Self::new(search_space, restarts, metric_to_optimize, minimize)?;
        fresh.iteration = checkpoint.iteration;
        fresh.queue = checkpoint.remaining.into();
        Ok(Some(fresh))
    }

    pub fn remaining(&self) -> usize {
        self.queue.len()
    }
}

impl Optimizer for GridSearchOptimizer {
    fn ask(&mut self) -> Settings {
        self.queue.pop_front().unwrap_or_default()
    }

    fn ask_all(&mut self) -> Vec<Settings> {
        let all: Vec<Settings> = self.queue.drain(..).collect();
        all
    }

    fn tell(&mut self, jobs: &mut dyn Iterator<Item = &mut Job>) {
        for job in jobs {
            if job.results_used_for_update {
                continue;
            }
            self.full_df.push(crate::result_table::ResultRow {
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
            remaining: self.queue.iter().cloned().collect(),
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

    fn search_space() -> SearchSpace {
        vec![
            ParamSpec {
                name: "lr".to_string(),
                distribution: Distribution::Choice(vec![Value::Float(0.1), Value::Float(0.01)]),
            },
            ParamSpec {
                name: "depth".to_string(),
                distribution: Distribution::Choice(vec![Value::Int(2), Value::Int(4)]),
            },
        ]
    }

    #[test]
    fn ask_all_enumerates_the_full_cartesian_product() {
        let mut opt = GridSearchOptimizer::new(&search_space(), 1, "loss", true).unwrap();
        let all = opt.ask_all();
        assert_eq!(all.len(), 4);
    }

    #[test]
    fn restarts_multiply_the_queue() {
        let mut opt = GridSearchOptimizer::new(&search_space(), 3, "loss", true).unwrap();
        assert_eq!(opt.remaining(), 12);
        let all = opt.ask_all();
        assert_eq!(all.len(), 12);
    }

    #[test]
    fn ask_drains_the_same_queue_as_ask_all() {
        let mut opt = GridSearchOptimizer::new(&search_space(), 1, "loss", true).unwrap();
        let mut drained = Vec::new();
        while opt.remaining() > 0 {
            drained.push(opt.ask());
        }
        assert_eq!(drained.len(), 4);
    }

    #[test]
    fn checkpoint_round_trips_remaining_queue() {
        let dir = tempfile::tempdir().unwrap();
        let mut opt = GridSearchOptimizer::new(&search_space(), 1, "loss", true).unwrap();
        opt.ask();
        opt.ask();
        opt.advance_iteration();
        opt.save_data_and_self(dir.path()).unwrap();

        let reloaded = GridSearchOptimizer::try_load_from_pickle(
            &dir.path().join(hopt_base::constants::STATUS_CHECKPOINT_FILE),
            &search_space(),
            1,
            "loss",
            true,
        )
        .unwrap()
        .unwrap();
        assert_eq!(reloaded.iteration(), 1);
        assert_eq!(reloaded.remaining(), 2);
    }
}
