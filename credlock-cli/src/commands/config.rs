use std::path::Path;

use anyhow::{Context, Result};
use credlock::config::Settings;

pub fn execute(config: &Path) -> Result<()> {
    let mut settings = Settings::load_from(config)
        .with_context(|| format!("failed to load configuration from {}", config.display()))?;
    if let Some(database) = settings.database.as_mut() {
        database.url = database.redacted_url();
    }

    let rendered = toml::to_string_pretty(&settings).context("failed to render configuration")?;
    print!("{rendered}");
    Ok(())
}
