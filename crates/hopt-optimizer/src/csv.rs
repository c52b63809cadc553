//! Writers for `all_data.csv` and `reduced_data.csv`: the raw per-job table
//! and a per-setting mean/std summary. No plotting or PDF output.

use crate::result_table::ResultTable;
use anyhow::{Context, Result};
use hopt_base::constants::STD_SUFFIX;
use std::collections::BTreeSet;
use std::path::Path;

/// One row per job: every parameter column, then every metric column.
pub fn write_all_data_csv(table: &ResultTable, path: &Path) -> Result<()> {
    let mut param_cols: BTreeSet<String> = BTreeSet::new();
    let mut metric_cols: BTreeSet<String> = BTreeSet::new();
    for row in table.rows() {
        param_cols.extend(row.settings.keys().cloned());
        metric_cols.extend(row.metrics.keys().cloned());
    }
    let mut out = String::new();
    let header: Vec<&str> = std::iter::once("job_id")
        .chain(param_cols.iter().map(String::as_str))
        .chain(metric_cols.iter().map(String::as_str))
        .collect();
    out.push_str(&header.join(","));
    out.push('\n');
    for row in table.rows() {
        let mut cells = vec![row.job_id.to_string()];
        for col in &param_cols {
            cells.push(
                row.settings
                    .get(col)
                    .map(|v| v.to_csv_cell())
                    .unwrap_or_default(),
            );
        }
        for col in &metric_cols {
            cells.push(
                row.metrics
                    .get(col)
                    .map(|v| v.to_string())
                    .unwrap_or_default(),
            );
        }
        out.push_str(&cells.join(","));
        out.push('\n');
    }
    std::fs::write(path, out).with_context(|| format!("writing {}", path.display()))
}

/// One row per distinct setting: mean and sample standard deviation of the
/// optimized metric, plus the sample count.
pub fn write_reduced_data_csv(table: &ResultTable, metric: &str, path: &Path) -> Result<()> {
    let grouped = table.mean_std_by_settings(metric);
    let mut param_cols: BTreeSet<String> = BTreeSet::new();
    for (settings, _, _, _) in &grouped {
        param_cols.extend(settings.keys().cloned());
    }
    let mut out = String::new();
    let std_col = format!("{metric}{STD_SUFFIX}");
    let header: Vec<&str> = param_cols
        .iter()
        .map(String::as_str)
        .chain([metric, std_col.as_str(), "n"])
        .collect();
    out.push_str(&header.join(","));
    out.push('\n');
    for (settings, mean, std, n) in &grouped {
        let mut cells: Vec<String> = param_cols
            .iter()
            .map(|col| settings.get(col).map(|v| v.to_csv_cell()).unwrap_or_default())
            .collect();
        cells.push(mean.to_string());
        cells.push(std.to_string());
        cells.push(n.to_string());
        out.push_str(&cells.join(","));
        out.push('\n');
    }
    std::fs::write(path, out).with_context(|| format!("writing {}", path.display()))
}
