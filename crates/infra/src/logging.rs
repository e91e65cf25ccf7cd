use anyhow::Result;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::AppConfig;

/// Transport crates log every frame at debug; keep them quiet unless asked.
const QUIET_DEPENDENCIES: [&str; 4] = [
    "tungstenite=warn",
    "tokio_tungstenite=warn",
    "surrealdb=warn",
    "rustls=warn",
];

pub fn init_tracing(config: &AppConfig) -> Result<()> {
    let filter = build_filter(&config.log_level);

    if config.is_production() {
        fmt()
            .with_env_filter(filter)
            .json()
            .with_target(false)
            .try_init()
            .map_err(anyhow::Error::msg)?;
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .try_init()
            .map_err(anyhow::Error::msg)?;
    }

    Ok(())
}

fn build_filter(log_level: &str) -> EnvFilter {
    let mut filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    for directive in QUIET_DEPENDENCIES {
        let target = directive.split('=').next().unwrap_or_default();
        if log_level.contains(target) {
            continue;
        }
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}
