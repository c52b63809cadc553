//! Submission hooks: run once before the first submission and contribute
//! aggregate statistics to the final report.

use anyhow::{Context, Result};
use hopt_base::job::JobPaths;
use std::collections::BTreeMap;
use std::process::Command;

pub trait SubmissionHook: Send {
    /// Runs once, before `exec_pre_run_routines` finishes.
    fn run(&mut self, paths: &JobPaths) -> Result<()>;

    /// A snapshot of whatever this hook wants reported in
    /// `report_data.json`.
    fn collect_stats(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }
}

/// Checks out a branch and/or a specific commit of a git working copy
/// before the run starts, and reports the resolved commit hash.
pub struct GitCheckoutHook {
    repo_path: std::path::PathBuf,
    branch: Option<String>,
    commit: Option<String>,
    resolved_commit: Option<String>,
}

impl GitCheckoutHook {
    pub fn new(
        repo_path: impl Into<std::path::PathBuf>,
        branch: Option<String>,
        commit: Option<String>,
    ) -> Self {
        GitCheckoutHook {
            repo_path: repo_path.into(),
            branch,
            commit,
            resolved_commit: None,
        }
    }

    fn checkout(&self, refname: &str) -> Result<()> {
        let status = Command::new("git")
            .arg("-C")
            .arg(&self.repo_path)
            .arg("checkout")
            .arg(refname)
            .status()
            .with_context(|| format!("running git checkout {refname}"))?;
        if !status.success() {
            anyhow::bail!("git checkout {refname} failed with {status}");
        }
        Ok(())
    }
}

impl SubmissionHook for GitCheckoutHook {
    fn run(&mut self, _paths: &JobPaths) -> Result<()> {
        if let Some(branch) = &self.branch {
            self.checkout(branch)?;
        }
        if let Some(commit) = &self.commit {
            self.checkout(commit)?;
        }
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.repo_path)
            .arg("rev-parse")
            .arg("HEAD")
            .output()
            .context("running git rev-parse HEAD")?;
        if output.status.success() {
            self.resolved_commit = Some(String::from_utf8_lossy(&output.stdout).trim().to_string());
        }
        Ok(())
    }

    fn collect_stats(&self) -> BTreeMap<String, String> {
        let mut stats = BTreeMap::new();
        if let Some(commit) = &self.resolved_commit {
            stats.insert("git_commit".to_string(), commit.clone());
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn git_checkout_hook_reports_nothing_before_run() {
        let hook = GitCheckoutHook::new("/tmp", None, None);
        assert!(hook.collect_stats().is_empty());
    }
}
