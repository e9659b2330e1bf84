use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{Router, extract::DefaultBodyLimit, routing::get};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::analytics::{GeminiClient, SummaryClient};
use crate::api::{self, AppState};
use crate::config::AppConfig;
use crate::db::{AppDb, DbHandle};
use crate::events;

/// Body limit headroom above `media.max_upload_bytes`, so oversized
/// uploads reach the handler and get a descriptive error.
const BODY_LIMIT_SLACK: usize = 64 * 1024;

/// Runtime settings for the HTTP server, resolved from `AppConfig` and CLI
/// flags.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub media_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub dev_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_app_config(&AppConfig::default())
    }
}

impl ServerConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            host: config.server.host.clone(),
            port: config.server.port,
            db_path: config.database.path.clone(),
            media_dir: config.media.dir.clone(),
            max_upload_bytes: config.media.max_upload_bytes,
            dev_mode: config.server.dev,
        }
    }
}

/// Build the summary client when an API key is configured.
pub fn summary_client(config: &AppConfig) -> Result<Option<Arc<dyn SummaryClient>>> {
    let Some(api_key) = config.ai.api_key.as_deref().filter(|_| config.ai_enabled()) else {
        return Ok(None);
    };
    let mut client = GeminiClient::new(api_key, &config.ai.model, Duration::from_secs(config.ai.timeout_secs))?;
    if let Some(base_url) = &config.ai.base_url {
        client = client.with_base_url(base_url);
    }
    Ok(Some(Arc::new(client)))
}

/// Build the full application router: JSON API, HTML wiki view and the
/// WebSocket feed.
pub fn build_router(state: Arc<AppState>) -> Router {
    let body_limit = state.max_upload_bytes.saturating_add(BODY_LIMIT_SLACK);
    api::api_router()
        .route("/ws", get(events::ws_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Open the database, bind the listener and serve until Ctrl+C.
pub async fn start_server(config: ServerConfig, ai: Option<Arc<dyn SummaryClient>>) -> Result<()> {
    if let Some(parent) = config.db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    std::fs::create_dir_all(&config.media_dir)
        .with_context(|| format!("Failed to create media directory {}", config.media_dir.display()))?;

    let db = AppDb::new(&config.db_path).context("Failed to initialize database")?;
    let ai_enabled = ai.is_some();
    let state = Arc::new(AppState::new(
        DbHandle::new(db),
        ai,
        config.media_dir.clone(),
        config.max_upload_bytes,
    ));

    let mut app = build_router(state);
    if config.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(
        %local_addr,
        db = %config.db_path.display(),
        ai_enabled,
        dev = config.dev_mode,
        "orgboard listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_router() -> Router {
        let db = AppDb::new_in_memory().unwrap();
        let state = Arc::new(AppState::new(
            DbHandle::new(db),
            None,
            std::env::temp_dir(),
            1024,
        ));
        build_router(state)
    }

    #[tokio::test]
    async fn test_health_route_is_mounted() {
        let response = test_router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let response = test_router()
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_ws_requires_actor() {
        let response = test_router()
            .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_ne!(response.status(), StatusCode::OK);
        assert_ne!(response.status(), StatusCode::SWITCHING_PROTOCOLS);
    }

    #[test]
    fn test_server_config_from_app_config() {
        let mut app_config = AppConfig::default();
        app_config.server.port = 9090;
        app_config.server.dev = true;
        let config = ServerConfig::from_app_config(&app_config);
        assert_eq!(config.port, 9090);
        assert!(config.dev_mode);
        assert_eq!(config.host, "127.0.0.1");
    }

    #[test]
    fn test_summary_client_only_with_key() -> anyhow::Result<()> {
        let mut config = AppConfig::default();
        assert!(summary_client(&config)?.is_none());
        config.ai.api_key = Some("  ".into());
        assert!(summary_client(&config)?.is_none());
        config.ai.api_key = Some("key".into());
        assert!(summary_client(&config)?.is_some());
        Ok(())
    }
}
