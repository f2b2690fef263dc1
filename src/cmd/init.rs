//! Config scaffolding (`taskboard init`).

use std::path::Path;

use anyhow::{Context, Result, bail};
use taskboard::config::CONFIG_TEMPLATE;

pub fn cmd_init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, CONFIG_TEMPLATE)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Wrote {}", path.display());
    println!("Set GITHUB_WEBHOOK_SECRET and DEPLOY_WEBHOOK_SECRET to enable the webhook receivers.");
    Ok(())
}
