//! HTTP server command (`orgboard serve`).

use std::path::PathBuf;

use anyhow::Result;
use orgboard::config::AppConfig;
use orgboard::server::{self, ServerConfig};

/// CLI flags that take precedence over file and environment settings.
#[derive(Debug, Default)]
pub struct ServeOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub db_path: Option<PathBuf>,
    pub dev: bool,
}

fn resolve(config: &AppConfig, overrides: ServeOverrides) -> ServerConfig {
    let mut server = ServerConfig::from_app_config(config);
    if let Some(host) = overrides.host {
        server.host = host;
    }
    if let Some(port) = overrides.port {
        server.port = port;
    }
    if let Some(db_path) = overrides.db_path {
        server.db_path = db_path;
    }
    server.dev_mode |= overrides.dev;
    server
}

pub async fn cmd_serve(config: &AppConfig, overrides: ServeOverrides) -> Result<()> {
    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }
    let ai = server::summary_client(config)?;
    server::start_server(resolve(config, overrides), ai).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let config = AppConfig::default();
        let server = resolve(
            &config,
            ServeOverrides {
                port: Some(4000),
                db_path: Some(PathBuf::from("/tmp/o.db")),
                dev: true,
                ..Default::default()
            },
        );
        assert_eq!(server.port, 4000);
        assert_eq!(server.host, "127.0.0.1");
        assert_eq!(server.db_path, PathBuf::from("/tmp/o.db"));
        assert!(server.dev_mode);
    }

    #[test]
    fn test_no_flags_keeps_config() {
        let mut config = AppConfig::default();
        config.server.dev = true;
        let server = resolve(&config, ServeOverrides::default());
        assert_eq!(server.port, 8080);
        assert!(server.dev_mode);
    }
}
