//! Write a starter `codeagent.toml` and `.env.example`.
//!
//! Pure logic takes closures for filesystem access so it can be tested
//! without touching disk.

use anyhow::{Context, Result};
use colored::Colorize;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::CONFIG_FILE;
use crate::templates;

// -----------------------------------------------------------------------------
// Public API
// -----------------------------------------------------------------------------

/// Runs the init command in the current directory.
pub(crate) fn run(force: bool) -> Result<()> {
    let cwd = std::env::current_dir().context("Failed to get current directory")?;

    info!("Initializing codeagent in {}", cwd.display());

    let files = init_files();
    let results = init_project(
        &files,
        force,
        |path| cwd.join(path).exists(),
        |path, content| {
            fs::write(cwd.join(path), content)
                .with_context(|| format!("Failed to write {}", path.display()))
        },
    )?;

    print!("{}", format_results(&results, &files));

    Ok(())
}

// -----------------------------------------------------------------------------
// Internal types
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
struct InitFile {
    path: PathBuf,
    content: &'static str,
    description: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteResult {
    Created,
    Overwritten,
    /// Already present and `--force` not given.
    Skipped,
}

// -----------------------------------------------------------------------------
// Helper functions
// -----------------------------------------------------------------------------

fn init_files() -> Vec<InitFile> {
    vec![
        InitFile {
            path: PathBuf::from(CONFIG_FILE),
            content: templates::CODEAGENT_TOML,
            description: "Sandbox, model and search settings",
        },
        InitFile {
            path: PathBuf::from(".env.example"),
            content: templates::ENV_EXAMPLE,
            description: "API keys to copy into .env",
        },
    ]
}

fn init_project<E, W>(
    files: &[InitFile],
    force: bool,
    exists: E,
    mut write_file: W,
) -> Result<Vec<(PathBuf, WriteResult)>>
where
    E: Fn(&Path) -> bool,
    W: FnMut(&Path, &str) -> Result<()>,
{
    let mut results = Vec::with_capacity(files.len());
    for file in files {
        let existed = exists(&file.path);
        let result = if existed && !force {
            WriteResult::Skipped
        } else {
            write_file(&file.path, file.content)?;
            if existed {
                WriteResult::Overwritten
            } else {
                WriteResult::Created
            }
        };
        results.push((file.path.clone(), result));
    }
    Ok(results)
}

fn format_results(results: &[(PathBuf, WriteResult)], files: &[InitFile]) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "\n{} codeagent initialized\n", "✓".green().bold());

    for (path, result) in results {
        let desc = files
            .iter()
            .find(|f| &f.path == path)
            .map_or("", |f| f.description);

        let _ = match result {
            WriteResult::Created => {
                writeln!(out, "  {} - {}", path.display().to_string().cyan(), desc)
            }
            WriteResult::Overwritten => {
                writeln!(out, "  {} {} (overwritten)", "↻".blue(), path.display())
            }
            WriteResult::Skipped => writeln!(
                out,
                "  {} {} (already exists, use --force to overwrite)",
                "⊘".yellow(),
                path.display()
            ),
        };
    }

    let _ = writeln!(out, "\n{}", "Next steps:".yellow().bold());
    let _ = writeln!(
        out,
        "  1. Copy {} to {} and add your API keys",
        ".env.example".cyan(),
        ".env".cyan()
    );
    let _ = writeln!(
        out,
        "  2. Run {} to create your sandbox",
        "codeagent sandbox up --user <id>".green()
    );
    let _ = writeln!(
        out,
        "  3. Run {} to generate and run code",
        "codeagent ask --user <id> \"...\"".green()
    );

    out
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------
