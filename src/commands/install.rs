//! `codeagent install --user <id> <packages...>`.

use anyhow::Result;
use colored::Colorize;
use std::time::Duration;

use super::{connect_registry, explain};
use crate::config::Config;
use crate::sandbox::{InstallReport, SandboxRef};

/// Installs packages into an existing sandbox, one status line each.
///
/// Fails only when nothing could be attempted or every package failed.
pub async fn run(
    config: &Config,
    user_id: &str,
    packages: &[String],
    timeout: Option<u64>,
) -> Result<()> {
    let registry = connect_registry(config).await?;
    let mut installer = registry.installer();
    if let Some(secs) = timeout {
        installer = installer.with_timeout(Duration::from_secs(secs));
    }
    let report = installer
        .install(&SandboxRef::for_user(user_id), packages)
        .await
        .map_err(|e| explain(e, user_id))?;

    print!("{}", format_report(&report));

    if !report.results().is_empty() && report.failures().count() == report.results().len() {
        anyhow::bail!("No package could be installed");
    }
    Ok(())
}

fn format_report(report: &InstallReport) -> String {
    let mut out = String::new();
    for result in report.results() {
        let line = result.to_string();
        if result.is_installed() {
            out.push_str(&line.green().to_string());
        } else {
            out.push_str(&line.red().to_string());
        }
        out.push('\n');
    }
    if report.all_installed() {
        out.push_str(&format!("{} all packages installed\n", "✓".green()));
    } else if report.is_partial_failure() {
        out.push_str(&format!(
            "{} {} of {} packages failed\n",
            "⚠".yellow(),
            report.failures().count(),
            report.results().len()
        ));
    }
    out
}
