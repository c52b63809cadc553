//! `save_metrics_params`: writes `settings.json`, `param_choice.csv` and
//! `metrics.csv` into the job's model directory and sends `JobSentResults`.

use crate::context::WorkerContext;
use crate::param_value::ParamValue;
use anyhow::{Context, Result};
use hopt_base::constants::{CLUSTER_METRIC_FILE, CLUSTER_PARAM_FILE, JSON_SETTINGS_FILE};
use hopt_base::WireMessage;
use std::collections::BTreeMap;
use std::net::UdpSocket;
use std::path::Path;

/// Writes the three per-job artifacts into `save_dir` and reports the
/// metrics to the communication server (a no-op if this process never
/// registered — local-debug runs still get the files on disk).
pub fn save_metrics_params(
    metrics: &BTreeMap<String, f64>,
    params: &ParamValue,
    save_dir: &Path,
) -> Result<()> {
    std::fs::create_dir_all(save_dir)
        .with_context(|| format!("creating model directory {}", save_dir.display()))?;

    let settings_json = serde_json::to_string_pretty(params)?;
    std::fs::write(save_dir.join(JSON_SETTINGS_FILE), settings_json)
        .with_context(|| format!("writing {JSON_SETTINGS_FILE}"))?;

    let mut flattened = BTreeMap::new();
    flatten(params, String::new(), &mut flattened);
    write_one_line_csv(&flattened, &save_dir.join(CLUSTER_PARAM_FILE))?;

    let mut metrics = metrics.clone();
    metrics.entry("time_elapsed".to_string()).or_insert_with(|| {
        WorkerContext::get()
            .map(|ctx| ctx.elapsed().num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0)
    });
    let metric_cells: BTreeMap<String, String> =
        metrics.iter().map(|(k, v)| (k.clone(), v.to_string())).collect();
    write_one_line_csv(&metric_cells, &save_dir.join(CLUSTER_METRIC_FILE))?;

    if let Some(ctx) = WorkerContext::get() {
        if let Ok(socket) = UdpSocket::bind("0.0.0.0:0") {
            let _ = hopt_util::net::send_wire_message(
                &socket,
                ctx.server_addr,
                &WireMessage::JobSentResults {
                    job_id: ctx.job_id,
                    metrics,
                },
            );
        }
    }

    Ok(())
}

/// `flatten_nested_string_dict`: dotted-path keys, matching
/// [`ParamValue::get_path`]'s own dot-separated addressing.
fn flatten(value: &ParamValue, prefix: String, out: &mut BTreeMap<String, String>) {
    match value {
        ParamValue::Map(map) => {
            for (k, v) in map {
                let key = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{prefix}.{k}")
                };
                flatten(v, key, out);
            }
        }
        ParamValue::Bool(b) => {
            out.insert(prefix, b.to_string());
        }
        ParamValue::Int(i) => {
            out.insert(prefix, i.to_string());
        }
        ParamValue::Float(f) => {
            out.insert(prefix, f.to_string());
        }
        ParamValue::Str(s) => {
            out.insert(prefix, s.clone());
        }
        ParamValue::Tuple(items) => {
            let joined = items
                .iter()
                .map(|item| {
                    let mut leaf = BTreeMap::new();
                    flatten(item, String::new(), &mut leaf);
                    leaf.into_values().collect::<Vec<_>>().join(";")
                })
                .collect::<Vec<_>>()
                .join(",");
            out.insert(prefix, joined);
        }
    }
}

fn write_one_line_csv(row: &BTreeMap<String, String>, path: &Path) -> Result<()> {
    let header = row.keys().cloned().collect::<Vec<_>>().join(",");
    let values = row.values().cloned().collect::<Vec<_>>().join(",");
    std::fs::write(path, format!("{header}\n{values}\n"))
        .with_context(|| format!("writing {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;

    #[test]
    fn writes_settings_params_and_metrics_files() {
        let dir = tempfile::tempdir().unwrap();
        let params = ParamValue::Map(btreemap! {
            "lr".to_string() => ParamValue::Float(0.1),
            "model".to_string() => ParamValue::Map(btreemap! {
                "depth".to_string() => ParamValue::Int(4),
            }),
        });
        let metrics = btreemap! { "loss".to_string() => 0.5 };
        save_metrics_params(&metrics, &params, dir.path()).unwrap();

        assert!(dir.path().join(JSON_SETTINGS_FILE).exists());
        let param_csv = std::fs::read_to_string(dir.path().join(CLUSTER_PARAM_FILE)).unwrap();
        assert!(param_csv.contains("model.depth"));
        let metric_csv = std::fs::read_to_string(dir.path().join(CLUSTER_METRIC_FILE)).unwrap();
        assert!(metric_csv.contains("loss"));
        assert!(metric_csv.contains("time_elapsed"));
    }

    #[test]
    fn flatten_dots_nested_keys() {
        let params = ParamValue::Map(btreemap! {
            "a".to_string() => ParamValue::Map(btreemap! {
                "b".to_string() => ParamValue::Int(1),
            }),
        });
        let mut out = BTreeMap::new();
        flatten(&params, String::new(), &mut out);
        assert_eq!(out.get("a.b"), Some(&"1".to_string()));
    }
}
