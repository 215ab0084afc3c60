//! Blocking entry points for the HTTP layer.
//!
//! Each call runs one bot routine on the execution bridge and collapses the
//! outcome to a `bool`. Failures are logged with their bridge error kind and
//! the underlying cause; callers only see `false`.

use std::sync::Arc;

use tracing::{error, info_span, Instrument};

use taskbot_bridge::{BridgeError, ExecutionBridge};

use crate::bot::TaskBot;

#[derive(Clone)]
pub struct WebhookDispatcher {
    bridge: Arc<ExecutionBridge>,
    bot: Arc<TaskBot>,
}

impl WebhookDispatcher {
    pub fn new(bridge: Arc<ExecutionBridge>, bot: Arc<TaskBot>) -> Self {
        Self { bridge, bot }
    }

    pub fn bridge(&self) -> &Arc<ExecutionBridge> {
        &self.bridge
    }

    /// Handle one pushed update. Blocks the calling thread.
    pub fn dispatch_update(&self, payload: serde_json::Value) -> bool {
        let update_id = payload.get("update_id").and_then(serde_json::Value::as_i64);
        let bot = self.bot.clone();
        let span = info_span!("telegram_update", update_id);

        let outcome = self
            .bridge
            .submit_and_wait(move || async move { bot.handle_webhook(payload).instrument(span).await });
        report("webhook update", outcome, update_id)
    }

    /// Register the webhook URL. Blocks the calling thread.
    pub fn set_webhook(&self, url: &str, secret_token: Option<&str>) -> bool {
        let bot = self.bot.clone();
        let url = url.to_string();
        let secret_token = secret_token.map(str::to_string);

        let outcome = self.bridge.submit_and_wait(move || async move {
            bot.set_webhook(&url, secret_token.as_deref()).await
        });
        report("set webhook", outcome, None)
    }

    /// Remove the webhook registration. Blocks the calling thread.
    pub fn delete_webhook(&self) -> bool {
        let bot = self.bot.clone();
        let outcome = self
            .bridge
            .submit_and_wait(move || async move { bot.delete_webhook().await });
        report("delete webhook", outcome, None)
    }
}

fn report(operation: &str, outcome: Result<(), BridgeError>, update_id: Option<i64>) -> bool {
    match outcome {
        Ok(()) => true,
        Err(e) => {
            let cause = std::error::Error::source(&e)
                .map(ToString::to_string)
                .unwrap_or_else(|| e.to_string());
            error!(operation, update_id, kind = e.kind(), %cause, "telegram operation failed");
            false
        }
    }
}
