//! `codeagent search <query>`.

use anyhow::Result;

use crate::config::Config;
use crate::search::{SearchProvider, TavilySearch};

pub async fn run(config: &Config, query: &str) -> Result<()> {
    let search = TavilySearch::from_env(config.search.clone())?;
    println!("{}", search.search(query).await?);
    Ok(())
}
