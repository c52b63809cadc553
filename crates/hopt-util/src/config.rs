//! CLI surface for the `hopt` binary. Only the launcher's own config path
//! and log-level knobs are in scope — parsing the user's job script's own
//! argv is the worker's concern ([`hopt_worker::register`]), not this
//! crate's.
//!
//! This uses `clap::Parser` directly: the orchestrator's only required
//! input is a JSON config file path, so there's no need for a
//! default-resolution pass over XDG base directories or similar.

use crate::log::LogLevel;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "hopt", about = "Hyperparameter-optimization job orchestrator")]
pub struct Cli {
    /// Path to the JSON launch config (`optimization_procedure_name`,
    /// `script_relative_path`, `cluster_requirements`, `hyperparam_list`,
    /// `fixed_params`, `samples`, ...).
    #[arg(value_name = "CONFIG_JSON")]
    pub config: PathBuf,

    /// Minimum log level to output.
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    pub log_level: LogLevel,

    /// Overrides the launch config's result directory.
    #[arg(long, value_name = "PATH")]
    pub result_dir: Option<PathBuf>,

    /// Skips the interactive "result directory already exists" confirmation
    /// prompt, answering as if the user had confirmed.
    #[arg(long)]
    pub yes: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_required_config_path() {
        let cli = Cli::parse_from(["hopt", "run.json"]);
        assert_eq!(cli.config, PathBuf::from("run.json"));
        assert_eq!(cli.log_level, LogLevel::Info);
        assert!(!cli.yes);
    }

    #[test]
    fn accepts_log_level_and_result_dir_overrides() {
        let cli = Cli::parse_from([
            "hopt",
            "run.json",
            "--log-level",
            "debug",
            "--result-dir",
            "/tmp/out",
            "--yes",
        ]);
        assert_eq!(cli.log_level, LogLevel::Debug);
        assert_eq!(cli.result_dir, Some(PathBuf::from("/tmp/out")));
        assert!(cli.yes);
    }
}
