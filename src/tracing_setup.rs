use eyre::{Result, WrapErr};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LogConfig;

/// Initialize the global subscriber from bootstrap config. The
/// `RUST_LOG` environment variable overrides the configured level.
pub fn init_tracing(config: &LogConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| {
        EnvFilter::try_new(&config.level)
            .wrap_err_with(|| format!("invalid log level: {}", config.level))
    })?;

    if config.json {
        Registry::default()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_target(true),
            )
            .try_init()
            .wrap_err("failed to install tracing subscriber")?;
    } else {
        Registry::default()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
            .wrap_err("failed to install tracing subscriber")?;
    }

    Ok(())
}
