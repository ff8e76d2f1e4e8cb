//! `codeagent ask --user <id> <request>`: run the repair loop end to end.

use anyhow::Result;
use colored::Colorize;
use std::sync::Arc;
use tracing::{info, warn};

use super::connect_registry;
use crate::agent::{ChatModel, CodeAgent, GroqModel};
use crate::config::Config;
use crate::search::{SearchError, SearchProvider, TavilySearch};
use crate::tools::ToolRouter;

pub async fn run(config: &Config, user_id: &str, request: &str, remove_after: bool) -> Result<()> {
    let model: Arc<dyn ChatModel> = Arc::new(GroqModel::from_env(&config.model)?);
    let search = search_provider(config)?;

    let registry = Arc::new(connect_registry(config).await?);
    let provisioned = registry.ensure(user_id).await?;
    info!("{}", provisioned);

    let router = ToolRouter::new(Arc::clone(&registry), search, provisioned.sandbox.clone());
    let agent = CodeAgent::new(model, router, config.model.max_steps);
    let result = agent.run(request).await;

    if remove_after {
        match registry.remove(user_id).await {
            Ok(status) => info!("{}", status),
            Err(e) => warn!("Failed to remove sandbox for {}: {}", user_id, e),
        }
    }

    let run = result?;
    println!("{}", run.answer);
    eprintln!(
        "{} {} model turns, {} tool calls",
        "→".dimmed(),
        run.steps,
        run.tools_called.len()
    );
    Ok(())
}

/// Search is optional: without a key the loop runs and search calls say so.
fn search_provider(config: &Config) -> Result<Option<Arc<dyn SearchProvider>>> {
    match TavilySearch::from_env(config.search.clone()) {
        Ok(search) => Ok(Some(Arc::new(search))),
        Err(SearchError::MissingApiKey) => {
            warn!("TAVILY_API_KEY is not set, knowledge search is disabled");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}
