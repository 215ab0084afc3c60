//! Telegram front-end: Bot API client, command handlers and the webhook
//! dispatcher that runs them on the execution bridge.

pub mod api;
pub mod bot;
pub mod dispatcher;
pub mod error;
pub mod mock;
pub mod types;

pub use api::{BotApi, HttpBotApi};
pub use bot::TaskBot;
pub use dispatcher::WebhookDispatcher;
pub use error::BotError;
pub use mock::RecordingBotApi;
pub use types::{Chat, Message, ParseMode, SendMessage, Update, User};
