//! Board server command (`taskboard serve`).

use anyhow::Result;
use taskboard::config::Config;

pub async fn cmd_serve(config: Config) -> Result<()> {
    tracing::info!(
        backend = ?config.store.backend,
        dev_mode = config.server.dev_mode,
        "starting task board"
    );
    taskboard::server::start_server(config).await
}
