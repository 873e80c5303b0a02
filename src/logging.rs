//! Tracing subscriber setup for the `kanban` binary.

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::KanbanConfig;

/// Builds the filter from a directive string such as `info` or
/// `kanban=debug,warn`.
pub fn env_filter(directives: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(directives)
        .with_context(|| format!("Invalid log filter '{}'", directives))
}

/// Installs the global subscriber. Logs go to stderr so command output on
/// stdout stays clean.
pub fn init(config: &KanbanConfig) -> Result<()> {
    let filter = env_filter(&config.log_filter())?;
    let registry = tracing_subscriber::registry().with(filter);
    if config.toml.logging.json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
            .context("Failed to install tracing subscriber")?;
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .context("Failed to install tracing subscriber")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_filter_accepts_levels_and_targets() {
        assert!(env_filter("info").is_ok());
        assert!(env_filter("kanban=debug,warn").is_ok());
    }

    #[test]
    fn test_env_filter_rejects_garbage() {
        let err = env_filter("kanban=loud").unwrap_err();
        assert!(err.to_string().contains("Invalid log filter"));
    }
}
