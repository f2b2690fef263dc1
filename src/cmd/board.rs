//! Board listing (`taskboard board`).

use anyhow::{Context, Result};
use taskboard::board::models::partition_columns;
use taskboard::config::Config;

pub async fn cmd_board(config: &Config, json: bool) -> Result<()> {
    let cache = taskboard::server::open_board(config).await?;
    let columns = partition_columns(&cache.tasks());
    cache.shutdown().await;

    if json {
        let out = serde_json::to_string_pretty(&columns).context("Failed to encode board")?;
        println!("{}", out);
        return Ok(());
    }

    for column in &columns {
        println!("{} ({})", column.title, column.tasks.len());
        for task in &column.tasks {
            let tags = task
                .tags
                .as_ref()
                .map(|t| format!(" [{}]", t.join(", ")))
                .unwrap_or_default();
            println!("  - {} ({}){}  {}", task.title, task.priority.as_str(), tags, task.id);
        }
    }
    Ok(())
}
