//! Startup-time registration: parsing `argv`, merging parameters, and
//! sending the `JobStarted` wire message.

use crate::context::WorkerContext;
use crate::param_value::ParamValue;
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use hopt_base::WireMessage;
use serde::Deserialize;
use std::net::{SocketAddr, UdpSocket};
use std::path::Path;

#[derive(Deserialize)]
struct ConnectionDetails {
    ip: String,
    port: u16,
    id: u64,
}

/// Parses `argv[1..]`, merges any supplied parameters over `default_params`,
/// resolves the `__timestamp__` token, and — if `argv[1]` carries
/// connection details — registers this process's `WorkerContext` and sends
/// `JobStarted`. Without connection details this runs in local-debug mode:
/// no registration, no wire traffic.
pub fn register(argv: &[String], default_params: &ParamValue) -> Result<ParamValue> {
    let mut rest = &argv[1..];

    if let Some(first) = rest.first() {
        if let Ok(conn) = serde_json::from_str::<ConnectionDetails>(first) {
            let addr: SocketAddr = format!("{}:{}", conn.ip, conn.port)
                .parse()
                .with_context(|| format!("parsing communication server address {}:{}", conn.ip, conn.port))?;
            WorkerContext::init(addr, conn.id, Utc::now())
                .map_err(|_| anyhow!("worker context already registered"))?;
            send_job_started(addr, conn.id)?;
            rest = &rest[1..];
        }
    }

    let cmd_params = match rest.first() {
        None => ParamValue::Map(Default::default()),
        Some(arg) => parse_param_source(arg)?,
    };

    let merged = ParamValue::merge_recursive(default_params, &cmd_params);
    let timestamp = Utc::now().format("%H:%M:%S-%d%b%y").to_string();
    Ok(merged.resolve_timestamp(&timestamp).resolve_references())
}

fn parse_param_source(arg: &str) -> Result<ParamValue> {
    let text = if Path::new(arg).is_file() {
        std::fs::read_to_string(arg).with_context(|| format!("reading param file {arg}"))?
    } else {
        arg.to_string()
    };
    let value: serde_json::Value =
        serde_json::from_str(&text).with_context(|| "parsing command-line parameters as JSON")?;
    Ok(ParamValue::from_json(&value))
}

fn send_job_started(addr: SocketAddr, job_id: u64) -> Result<()> {
    let socket = UdpSocket::bind("0.0.0.0:0").context("binding ephemeral registration socket")?;
    hopt_util::net::send_wire_message(&socket, addr, &WireMessage::JobStarted { job_id })
        .context("sending JobStarted")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;

    #[test]
    fn without_connection_details_runs_in_local_debug_mode() {
        let default_params = ParamValue::Map(btreemap! {
            "lr".to_string() => ParamValue::Float(0.1),
        });
        let argv = vec!["worker".to_string()];
        let merged = register(&argv, &default_params).unwrap();
        assert_eq!(merged.get_path("lr"), Some(&ParamValue::Float(0.1)));
    }

    #[test]
    fn literal_json_argument_overlays_default_params() {
        let default_params = ParamValue::Map(btreemap! {
            "lr".to_string() => ParamValue::Float(0.1),
        });
        let argv = vec!["worker".to_string(), r#"{"lr": 0.9}"#.to_string()];
        let merged = register(&argv, &default_params).unwrap();
        assert_eq!(merged.get_path("lr"), Some(&ParamValue::Float(0.9)));
    }

    #[test]
    fn resolves_cross_parameter_reference_in_merged_params() {
        let default_params = ParamValue::Map(btreemap! {
            "model".to_string() => ParamValue::Map(btreemap! {
                "lr".to_string() => ParamValue::Float(0.1),
            }),
            "run_name".to_string() => ParamValue::Str("lr-${model.lr}".to_string()),
        });
        let argv = vec!["worker".to_string()];
        let merged = register(&argv, &default_params).unwrap();
        assert_eq!(
            merged.get_path("run_name"),
            Some(&ParamValue::Str("lr-0.1".to_string()))
        );
    }

    #[test]
    fn resolves_timestamp_token_in_merged_params() {
        let default_params = ParamValue::Map(btreemap! {
            "model_dir".to_string() => ParamValue::Str("/runs/__timestamp__".to_string()),
        });
        let argv = vec!["worker".to_string()];
        let merged = register(&argv, &default_params).unwrap();
        let ParamValue::Str(model_dir) = merged.get_path("model_dir").unwrap() else {
            panic!("expected a string");
        };
        assert!(!model_dir.contains("__timestamp__"));
    }
}
