//! In-memory [`BotApi`] that records outgoing calls.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::api::BotApi;
use crate::error::BotError;
use crate::types::{Chat, Message, SendMessage, User};

pub struct RecordingBotApi {
    me: User,
    sent: Mutex<Vec<SendMessage>>,
    webhook: Mutex<Option<String>>,
    get_me_calls: AtomicUsize,
    fail_get_me: AtomicBool,
}

impl Default for RecordingBotApi {
    fn default() -> Self {
        Self::new("taskbot")
    }
}

impl RecordingBotApi {
    pub fn new(username: &str) -> Self {
        Self {
            me: User {
                id: 1,
                is_bot: true,
                first_name: "Taskbot".to_string(),
                username: Some(username.to_string()),
            },
            sent: Mutex::new(Vec::new()),
            webhook: Mutex::new(None),
            get_me_calls: AtomicUsize::new(0),
            fail_get_me: AtomicBool::new(false),
        }
    }

    /// Make `get_me` fail, as when the token is revoked.
    pub fn fail_get_me(&self, fail: bool) {
        self.fail_get_me.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SendMessage> {
        self.sent.lock().clone()
    }

    pub fn last_text(&self) -> Option<String> {
        self.sent.lock().last().map(|m| m.text.clone())
    }

    pub fn webhook(&self) -> Option<String> {
        self.webhook.lock().clone()
    }

    pub fn get_me_calls(&self) -> usize {
        self.get_me_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BotApi for RecordingBotApi {
    async fn get_me(&self) -> Result<User, BotError> {
        self.get_me_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_get_me.load(Ordering::SeqCst) {
            return Err(BotError::Api {
                code: Some(401),
                description: "Unauthorized".to_string(),
            });
        }
        Ok(self.me.clone())
    }

    async fn send_message(&self, message: SendMessage) -> Result<Message, BotError> {
        let reply = Message {
            message_id: self.sent.lock().len() as i64 + 1,
            from: Some(self.me.clone()),
            chat: Chat {
                id: message.chat_id,
                kind: "private".to_string(),
            },
            date: 0,
            text: Some(message.text.clone()),
        };
        self.sent.lock().push(message);
        Ok(reply)
    }

    async fn set_webhook(&self, url: &str, _secret_token: Option<&str>) -> Result<bool, BotError> {
        *self.webhook.lock() = Some(url.to_string());
        Ok(true)
    }

    async fn delete_webhook(&self) -> Result<bool, BotError> {
        *self.webhook.lock() = None;
        Ok(true)
    }
}
