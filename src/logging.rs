use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::LoggingConfig;

/// Installs the global subscriber. `RUST_LOG` wins over the config file.
pub fn init(config: Option<&LoggingConfig>) {
    let level = config
        .and_then(|l| l.level.as_deref())
        .unwrap_or("info");
    let filters = config
        .and_then(|l| l.filters.as_deref())
        .unwrap_or("");

    // Songbird and serenity are chatty at debug.
    let filter_str = if filters.is_empty() {
        format!("{level},serenity=warn,songbird=warn")
    } else {
        format!("{level},serenity=warn,songbird=warn,{filters}")
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_str));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false))
        .init();
}
