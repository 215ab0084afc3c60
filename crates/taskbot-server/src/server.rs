use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use secrecy::SecretString;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use taskbot_auth::TokenIssuer;
use taskbot_store::{Database, TaskRepo, UserRepo};
use taskbot_telegram::WebhookDispatcher;

use crate::handlers;

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 5000,
            request_timeout_secs: 60,
        }
    }
}

/// Telegram wiring, present only when a bot token is configured.
#[derive(Clone)]
pub struct TelegramState {
    pub dispatcher: WebhookDispatcher,
    pub webhook_secret: Option<Arc<SecretString>>,
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub users: Arc<UserRepo>,
    pub tasks: Arc<TaskRepo>,
    pub tokens: Arc<TokenIssuer>,
    pub telegram: Option<TelegramState>,
}

impl AppState {
    pub fn new(db: Database, tokens: TokenIssuer, telegram: Option<TelegramState>) -> Self {
        Self {
            users: Arc::new(UserRepo::new(db.clone())),
            tasks: Arc::new(TaskRepo::new(db)),
            tokens: Arc::new(tokens),
            telegram,
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/auth/register", post(handlers::auth::register))
        .route("/api/auth/login", post(handlers::auth::login))
        .route("/api/auth/me", get(handlers::auth::me))
        .route(
            "/api/tasks",
            get(handlers::tasks::list).post(handlers::tasks::create),
        )
        .route(
            "/api/tasks/{id}",
            get(handlers::tasks::get)
                .put(handlers::tasks::update)
                .delete(handlers::tasks::delete),
        )
        .route("/api/telegram/webhook", post(handlers::telegram::webhook))
        .route("/api/telegram/set-webhook", post(handlers::telegram::set_webhook))
        .route("/api/telegram/delete-webhook", post(handlers::telegram::delete_webhook))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(request_timeout))
                .layer(CorsLayer::permissive()),
        )
}

/// Bind and start serving. Returns a handle to shut it down.
pub async fn start(config: ServerConfig, state: AppState) -> Result<ServerHandle, std::io::Error> {
    let router = build_router(state, Duration::from_secs(config.request_timeout_secs));
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    info!(host = %config.host, port = local_addr.port(), "taskbot server started");

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(async move { signal.cancelled().await })
            .await
        {
            error!(error = %e, "server terminated");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        shutdown,
        server,
    })
}

/// Handle returned by `start()`.
pub struct ServerHandle {
    pub port: u16,
    shutdown: CancellationToken,
    server: JoinHandle<()>,
}

impl ServerHandle {
    /// Stop accepting connections and wait for in-flight requests.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.server.await {
            error!(error = %e, "server task failed");
        }
        info!("taskbot server stopped");
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.users.count() {
        Ok(_) => (StatusCode::OK, Json(serde_json::json!({"status": "healthy"}))),
        Err(e) => {
            error!(error = %e, "health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({"status": "unhealthy"})),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::test_support::{body_json, Harness};

    #[tokio::test]
    async fn health_endpoint_reports_healthy() {
        let h = Harness::new();
        let resp = h
            .router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["status"], "healthy");
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let h = Harness::new();
        let resp = h
            .router()
            .oneshot(Request::builder().uri("/nonexistent").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn start_serves_over_tcp_and_shuts_down() {
        let h = Harness::new();
        let config = ServerConfig {
            port: 0,
            ..ServerConfig::default()
        };
        let handle = start(config, h.state.clone()).await.unwrap();
        assert_ne!(handle.port, 0);

        let url = format!("http://127.0.0.1:{}/health", handle.port);
        let body: serde_json::Value = reqwest::get(&url).await.unwrap().json().await.unwrap();
        assert_eq!(body["status"], "healthy");

        handle.shutdown().await;
        assert!(reqwest::get(&url).await.is_err());
    }
}
