//! `codeagent tools`: print the tool schema offered to the model.

use anyhow::{Context, Result};

use crate::tools::tool_definitions;

pub fn run() -> Result<()> {
    let json = serde_json::to_string_pretty(&tool_definitions())
        .context("Failed to serialize tool definitions")?;
    println!("{json}");
    Ok(())
}
