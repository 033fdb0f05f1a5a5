use anyhow::{Context, Result};
use std::path::Path;

use autocache::{AutoCacheConfig, UiNode};

pub fn init_logging(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let default_level = if verbose { "debug" } else { "info" };
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

/// Configuration from `path` (or the defaults), with command line overrides applied.
pub fn load_config(path: Option<&Path>, window_ms: Option<u64>) -> Result<AutoCacheConfig> {
    let mut config = match path {
        Some(path) => AutoCacheConfig::from_path(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => AutoCacheConfig::default(),
    };
    if let Some(window_ms) = window_ms {
        config.automation.window_ms = window_ms;
    }
    config.validate()?;
    Ok(config)
}

/// Read a UI tree description from YAML or JSON.
pub fn load_tree(path: &Path) -> Result<UiNode> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let node = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&raw)?,
        _ => serde_yaml::from_str(&raw)?,
    };
    Ok(node)
}
