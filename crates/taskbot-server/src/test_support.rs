use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Method, Request};
use axum::response::Response;
use axum::Router;
use secrecy::SecretString;
use tower::ServiceExt;

use taskbot_auth::TokenIssuer;
use taskbot_bridge::{BridgeConfig, ExecutionBridge};
use taskbot_store::Database;
use taskbot_telegram::{RecordingBotApi, TaskBot, WebhookDispatcher};

use crate::server::{build_router, AppState, TelegramState};

pub(crate) struct Harness {
    pub state: AppState,
    pub api: Arc<RecordingBotApi>,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(true, None)
    }

    pub fn with_webhook_secret(secret: &str) -> Self {
        Self::build(true, Some(secret))
    }

    pub fn without_telegram() -> Self {
        Self::build(false, None)
    }

    fn build(telegram: bool, secret: Option<&str>) -> Self {
        let db = Database::in_memory().unwrap();
        let api = Arc::new(RecordingBotApi::default());
        let tokens = TokenIssuer::new(&SecretString::from("test-secret-test-secret-test-secret".to_string()));

        let telegram = telegram.then(|| {
            let bot = Arc::new(TaskBot::new(api.clone(), db.clone()));
            let bridge = Arc::new(ExecutionBridge::new(
                BridgeConfig::default().with_timeout(Duration::from_secs(5)),
            ));
            TelegramState {
                dispatcher: WebhookDispatcher::new(bridge, bot),
                webhook_secret: secret.map(|s| Arc::new(SecretString::from(s.to_string()))),
            }
        });

        Self {
            state: AppState::new(db, tokens, telegram),
            api,
        }
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone(), Duration::from_secs(10))
    }

    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        self.router().oneshot(builder.body(body).unwrap()).await.unwrap()
    }

    /// Register an account and return a bearer token for it.
    pub async fn signup(&self, name: &str, email: &str, password: &str) -> String {
        let resp = self
            .send(
                Method::POST,
                "/api/auth/register",
                None,
                Some(serde_json::json!({"name": name, "email": email, "password": password})),
            )
            .await;
        assert_eq!(resp.status(), 201);

        let resp = self
            .send(
                Method::POST,
                "/api/auth/login",
                None,
                Some(serde_json::json!({"email": email, "password": password})),
            )
            .await;
        assert_eq!(resp.status(), 200);
        body_json(resp).await["token"].as_str().unwrap().to_string()
    }
}

pub(crate) async fn body_json(resp: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
