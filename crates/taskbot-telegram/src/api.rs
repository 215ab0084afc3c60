//! Bot API transport.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::BotError;
use crate::types::{ApiResponse, Message, SendMessage, SetWebhook, User};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The Bot API calls the bot makes.
#[async_trait]
pub trait BotApi: Send + Sync {
    async fn get_me(&self) -> Result<User, BotError>;

    async fn send_message(&self, message: SendMessage) -> Result<Message, BotError>;

    /// Register `url` as the webhook. Telegram echoes `secret_token` in the
    /// `X-Telegram-Bot-Api-Secret-Token` header of every delivery.
    async fn set_webhook(&self, url: &str, secret_token: Option<&str>) -> Result<bool, BotError>;

    async fn delete_webhook(&self) -> Result<bool, BotError>;
}

/// [`BotApi`] over HTTPS with `reqwest`.
pub struct HttpBotApi {
    client: reqwest::Client,
    base_url: String,
    token: SecretString,
}

impl std::fmt::Debug for HttpBotApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBotApi")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpBotApi {
    pub fn new(token: SecretString, base_url: &str) -> Result<Self, BotError> {
        // Pooled connections belong to the runtime that opened them, and the
        // bridge may replace its runtime, so keep no idle connections.
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .pool_max_idle_per_host(0)
            .build()
            .map_err(|e| BotError::Http(format!("build client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    async fn call<P, R>(&self, method: &str, params: &P) -> Result<R, BotError>
    where
        P: Serialize + Sync + ?Sized,
        R: DeserializeOwned + Send,
    {
        let url = format!("{}/bot{}/{method}", self.base_url, self.token.expose_secret());
        debug!(method, "bot api call");

        // `without_url` keeps the token out of error messages.
        let response = self
            .client
            .post(url)
            .json(params)
            .send()
            .await
            .map_err(|e| BotError::Http(e.without_url().to_string()))?;

        let status = response.status();
        let envelope: ApiResponse<R> = response.json().await.map_err(|e| {
            BotError::Http(format!("{method}: HTTP {status}: {}", e.without_url()))
        })?;

        if !envelope.ok {
            return Err(BotError::Api {
                code: envelope.error_code,
                description: envelope
                    .description
                    .unwrap_or_else(|| format!("{method} failed with HTTP {status}")),
            });
        }
        envelope.result.ok_or_else(|| BotError::Api {
            code: None,
            description: format!("{method}: response has no result"),
        })
    }
}

#[async_trait]
impl BotApi for HttpBotApi {
    async fn get_me(&self) -> Result<User, BotError> {
        self.call("getMe", &serde_json::json!({})).await
    }

    async fn send_message(&self, message: SendMessage) -> Result<Message, BotError> {
        self.call("sendMessage", &message).await
    }

    async fn set_webhook(&self, url: &str, secret_token: Option<&str>) -> Result<bool, BotError> {
        let ok = self
            .call("setWebhook", &SetWebhook { url, secret_token })
            .await?;
        info!(url, "webhook registered");
        Ok(ok)
    }

    async fn delete_webhook(&self) -> Result<bool, BotError> {
        let ok = self.call("deleteWebhook", &serde_json::json!({})).await?;
        info!("webhook deleted");
        Ok(ok)
    }
}
