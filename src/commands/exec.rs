//! `codeagent exec --user <id> <file>`: deposit a local program and run it.

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::Path;
use std::time::Duration;

use super::{connect_registry, explain};
use crate::config::Config;
use crate::sandbox::{ExecutionOutcome, OutcomeCategory, SandboxRef};

pub async fn run(
    config: &Config,
    user_id: &str,
    file: &Path,
    name: Option<&str>,
    timeout_secs: Option<u64>,
) -> Result<()> {
    let content =
        std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let dest = match name {
        Some(name) => name.to_string(),
        None => file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .with_context(|| format!("Cannot derive a program name from {}", file.display()))?,
    };

    let registry = connect_registry(config).await?;
    let sandbox = SandboxRef::for_user(user_id);

    registry
        .transfer()
        .deposit(&sandbox, &content, &dest)
        .await
        .map_err(|e| explain(e, user_id))?;

    let mut executor = registry.executor();
    if let Some(secs) = timeout_secs {
        executor = executor.with_timeout(Duration::from_secs(secs));
    }
    let outcome = executor.run(&sandbox, &dest).await;

    print!("{}", outcome.captured_output);
    eprintln!("{}", format_summary(&outcome));

    if outcome.succeeded {
        Ok(())
    } else {
        anyhow::bail!("{}", outcome.report(executor.limit()).lines().next().unwrap_or_default())
    }
}

fn format_summary(outcome: &ExecutionOutcome) -> String {
    let code = outcome
        .exit_code
        .map_or_else(|| "none".to_string(), |c| c.to_string());
    let category = match outcome.category {
        OutcomeCategory::Success => outcome.category.to_string().green().bold(),
        OutcomeCategory::RuntimeError | OutcomeCategory::TimedOut => {
            outcome.category.to_string().red().bold()
        }
        OutcomeCategory::SandboxMissing | OutcomeCategory::TransportError => {
            outcome.category.to_string().yellow().bold()
        }
    };
    format!("{} {} (exit code {})", "→".dimmed(), category, code)
}
