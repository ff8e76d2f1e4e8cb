//! `codeagent sandbox up|down|status`.

use anyhow::Result;
use colored::Colorize;

use super::connect_registry;
use crate::config::Config;
use crate::sandbox::{Provision, Provisioned, RemoveStatus, SandboxStatus};

/// Creates the user's sandbox, or reports the existing one.
pub async fn up(config: &Config, user_id: &str) -> Result<()> {
    let registry = connect_registry(config).await?;
    let provisioned = registry.ensure(user_id).await?;
    println!("{}", format_provisioned(&provisioned));
    Ok(())
}

/// Force-removes the user's sandbox.
pub async fn down(config: &Config, user_id: &str) -> Result<()> {
    let registry = connect_registry(config).await?;
    let status = registry.remove(user_id).await?;
    println!("{}", format_removed(&status));
    Ok(())
}

pub async fn status(config: &Config, user_id: &str) -> Result<()> {
    let registry = connect_registry(config).await?;
    let status = registry.status(user_id).await?;
    println!("{}", format_status(user_id, &status));
    Ok(())
}

fn format_provisioned(provisioned: &Provisioned) -> String {
    match provisioned.provision {
        Provision::Created => format!("{} {}", "✓".green().bold(), provisioned),
        Provision::AlreadyExists => format!("{} {}", "ℹ".blue(), provisioned),
    }
}

fn format_removed(status: &RemoveStatus) -> String {
    match status {
        RemoveStatus::Removed(_) => format!("{} {}", "✓".green().bold(), status),
        RemoveStatus::NotFound(_) => format!("{} {}", "⊘".yellow(), status),
    }
}

fn format_status(user_id: &str, status: &SandboxStatus) -> String {
    let short = |id: &str| id.chars().take(12).collect::<String>();
    match status {
        SandboxStatus::Running { id } => format!(
            "Sandbox for {}: {} ({})",
            user_id.cyan(),
            "running".green().bold(),
            short(id)
        ),
        SandboxStatus::Stopped { id } => format!(
            "Sandbox for {}: {} ({})",
            user_id.cyan(),
            "stopped".yellow(),
            short(id)
        ),
        SandboxStatus::Absent => format!("Sandbox for {}: {}", user_id.cyan(), "absent".red()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::SandboxRef;

    #[test]
    fn test_format_provisioned() {
        colored::control::set_override(false);
        let created = Provisioned {
            sandbox: SandboxRef::for_user("u1"),
            id: "abc".into(),
            provision: Provision::Created,
        };
        assert_eq!(format_provisioned(&created), "✓ Created container sandbox-u1");

        let existing = Provisioned {
            provision: Provision::AlreadyExists,
            ..created
        };
        assert_eq!(
            format_provisioned(&existing),
            "ℹ Container sandbox-u1 already exists"
        );
    }

    #[test]
    fn test_format_removed() {
        colored::control::set_override(false);
        assert_eq!(
            format_removed(&RemoveStatus::NotFound("sandbox-u1".into())),
            "⊘ Container sandbox-u1 not found"
        );
    }

    #[test]
    fn test_format_status_shortens_id() {
        colored::control::set_override(false);
        let status = SandboxStatus::Running {
            id: "0123456789abcdef0123".into(),
        };
        assert_eq!(
            format_status("u1", &status),
            "Sandbox for u1: running (0123456789ab)"
        );
        assert_eq!(
            format_status("u1", &SandboxStatus::Absent),
            "Sandbox for u1: absent"
        );
    }
}
