//! A typed table of completed-job results: `Vec<ResultRow>` plus small
//! aggregation helpers, not a general dataframe library. Covers only what
//! the control loop itself needs — best-seen value, best-k model dirs,
//! mean/std for `reduced_data.csv`.

use hopt_base::Settings;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResultRow {
    pub job_id: u64,
    pub iteration: u64,
    pub model_dir: PathBuf,
    pub settings: Settings,
    pub metrics: BTreeMap<String, f64>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ResultTable {
    rows: Vec<ResultRow>,
}

impl ResultTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, row: ResultRow) {
        self.rows.push(row);
    }

    pub fn rows(&self) -> &[ResultRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The best value of `metric` seen so far, per `minimize`.
    pub fn best_value(&self, metric: &str, minimize: bool) -> Option<f64> {
        self.rows
            .iter()
            .filter_map(|r| r.metrics.get(metric).copied())
            .fold(None, |acc, v| match acc {
                None => Some(v),
                Some(best) => Some(if minimize { best.min(v) } else { best.max(v) }),
            })
    }

    /// Rows sorted best-first by `metric`, truncated to `how_many`.
    pub fn top_k(&self, metric: &str, minimize: bool, how_many: usize) -> Vec<&ResultRow> {
        let mut rows: Vec<&ResultRow> = self
            .rows
            .iter()
            .filter(|r| r.metrics.contains_key(metric))
            .collect();
        rows.sort_by(|a, b| {
            let va = a.metrics[metric];
            let vb = b.metrics[metric];
            if minimize {
                va.partial_cmp(&vb).unwrap()
            } else {
                vb.partial_cmp(&va).unwrap()
            }
        });
        rows.truncate(how_many);
        rows
    }

    /// Mean and sample standard deviation of `metric` across all rows that
    /// share identical `settings` — what `reduced_data.csv` reports per
    /// distinct setting.
    pub fn mean_std_by_settings(&self, metric: &str) -> Vec<(Settings, f64, f64, usize)> {
        let mut groups: Vec<(Settings, Vec<f64>)> = Vec::new();
        for row in &self.rows {
            let Some(&value) = row.metrics.get(metric) else {
                continue;
            };
            if let Some(group) = groups.iter_mut().find(|(s, _)| *s == row.settings) {
                group.1.push(value);
            } else {
                groups.push((row.settings.clone(), vec![value]));
            }
        }
        groups
            .into_iter()
            .map(|(settings, values)| {
                let n = values.len();
                let mean = values.iter().sum::<f64>() / n as f64;
                let variance = if n > 1 {
                    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64
                } else {
                    0.0
                };
                (settings, mean, variance.sqrt(), n)
            })
            .collect()
    }
}
