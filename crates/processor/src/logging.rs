//! Tracing subscriber setup
//!
//! The library only emits `tracing` events. Applications embedding the engine
//! may install their own subscriber, or call [`init_tracing`] to get the
//! default fmt subscriber configured from [`LoggingConfig`].

use crate::config::{LogFormat, LoggingConfig};
use crate::error::{ProcessorError, Result};
use tracing_subscriber::EnvFilter;

/// Install a global fmt subscriber. `RUST_LOG` takes precedence over
/// `config.level`. Fails if a global subscriber is already set.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| ProcessorError::Configuration {
            source: Box::new(e),
        })?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = match config.format {
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };

    installed.map_err(|source| ProcessorError::Configuration { source })
}
