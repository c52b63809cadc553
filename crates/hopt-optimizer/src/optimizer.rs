use crate::result_table::ResultTable;
use hopt_base::{Job, Settings};
use std::path::{Path, PathBuf};

/// The ask/tell contract every optimizer implements. Object-safe so the
/// control loop can hold a `Box<dyn Optimizer + Send>` without knowing which
/// of the three provided implementations it got, realized here as a trait
/// object instead of a closed sum type since every method takes
/// `&self`/`&mut self`.
pub trait Optimizer {
    /// Produces one candidate point.
    fn ask(&mut self) -> Settings;

    /// Produces all candidates at once; meaningful only for grid-style
    /// optimizers. The default returns an empty vec, which the control
    /// loop's iterative (non-grid) driver never calls.
    fn ask_all(&mut self) -> Vec<Settings> {
        Vec::new()
    }

    /// Ingests newly concluded, successful jobs. Idempotent: a job whose
    /// `results_used_for_update` flag is already set is skipped; this
    /// method sets the flag on every job it actually ingests. Takes an
    /// iterator rather than `&mut [Job]` since the control loop keeps its
    /// job table in a `BTreeMap`, not a contiguous `Vec`.
    fn tell(&mut self, jobs: &mut dyn Iterator<Item = &mut Job>);

    fn iteration(&self) -> u64;
    fn advance_iteration(&mut self);

    fn metric_to_optimize(&self) -> &str;
    fn minimize(&self) -> bool;

    fn full_df(&self) -> &ResultTable;
    /// Best-so-far summary: `full_df` sorted best-first by the optimized
    /// metric.
    fn minimal_df(&self) -> ResultTable {
        let metric = self.metric_to_optimize().to_string();
        let minimize = self.minimize();
        let mut table = ResultTable::new();
        for row in self.full_df().top_k(&metric, minimize, self.full_df().len()) {
            table.push(row.clone());
        }
        table
    }

    fn best_jobs_model_dirs(&self, how_many: usize) -> Vec<PathBuf> {
        let metric = self.metric_to_optimize().to_string();
        let minimize = self.minimize();
        self.full_df()
            .top_k(&metric, minimize, how_many)
            .into_iter()
            .map(|r| r.model_dir.clone())
            .collect()
    }

    fn save_data_and_self(&self, dir: &Path) -> anyhow::Result<()>;
}
