//! Activity log commands (`taskboard activity`).

use anyhow::{Context, Result};
use taskboard::board::ActivityRecorder;
use taskboard::config::Config;

use crate::ActivityCommands;

pub async fn cmd_activity(config: &Config, command: Option<ActivityCommands>) -> Result<()> {
    let cache = taskboard::server::open_board(config).await?;

    match command.unwrap_or(ActivityCommands::List {
        limit: 20,
        json: false,
    }) {
        ActivityCommands::List { limit, json } => {
            let items: Vec<_> = cache.activity().into_iter().take(limit).collect();
            if json {
                let out = serde_json::to_string_pretty(&items).context("Failed to encode activity")?;
                println!("{}", out);
            } else if items.is_empty() {
                println!("No activity yet.");
            } else {
                for item in &items {
                    let details = item
                        .details
                        .as_deref()
                        .map(|d| format!(" ({})", d))
                        .unwrap_or_default();
                    println!(
                        "{}  {}: {}{}",
                        item.timestamp.format("%Y-%m-%d %H:%M:%S"),
                        item.action,
                        item.task_title,
                        details
                    );
                }
            }
        }
        ActivityCommands::Clear => {
            ActivityRecorder::new(cache.clone())
                .clear()
                .wait()
                .await
                .context("Failed to clear activity")?;
            println!("Activity log cleared.");
        }
    }

    cache.shutdown().await;
    Ok(())
}
