//! `tracing` subscriber setup.

use anyhow::{Context, Result, anyhow};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::config::{LogFormat, LoggingSection};

/// Filter directives in this variable override `logging.level`.
pub const LOG_ENV: &str = "ORGBOARD_LOG";
const LOG_FILE_PREFIX: &str = "orgboard.log";

fn resolve_filter(env_directives: Option<String>, default_level: &str) -> Result<EnvFilter> {
    match env_directives.filter(|d| !d.trim().is_empty()) {
        Some(directives) => EnvFilter::try_new(&directives)
            .with_context(|| format!("invalid {} directives '{}'", LOG_ENV, directives)),
        None => EnvFilter::try_new(default_level)
            .with_context(|| format!("invalid logging.level '{}'", default_level)),
    }
}

/// Install the global subscriber: stderr in the configured format, plus a
/// daily-rolling JSON file when `logging.dir` is set.
///
/// Keep the returned guard alive for the life of the process so buffered
/// file output is flushed.
pub fn init(config: &LoggingSection) -> Result<Option<WorkerGuard>> {
    let filter = resolve_filter(std::env::var(LOG_ENV).ok(), &config.level)?;

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    match config.format {
        LogFormat::Pretty => layers.push(fmt::layer().with_writer(std::io::stderr).boxed()),
        LogFormat::Json => layers.push(fmt::layer().json().with_writer(std::io::stderr).boxed()),
    }

    let guard = match &config.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            layers.push(fmt::layer().json().with_ansi(false).with_writer(writer).boxed());
            Some(guard)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|error| anyhow!("failed to initialize tracing subscriber: {error}"))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_directives_take_precedence() {
        let filter = resolve_filter(Some("orgboard=debug".into()), "warn").unwrap();
        assert!(filter.to_string().contains("orgboard=debug"));
    }

    #[test]
    fn test_blank_env_falls_back_to_config_level() {
        let filter = resolve_filter(Some("  ".into()), "warn").unwrap();
        assert_eq!(filter.to_string(), "warn");
        let filter = resolve_filter(None, "info").unwrap();
        assert_eq!(filter.to_string(), "info");
    }

    #[test]
    fn test_invalid_directives_are_errors() {
        assert!(resolve_filter(Some("orgboard=loud".into()), "info").is_err());
    }
}
