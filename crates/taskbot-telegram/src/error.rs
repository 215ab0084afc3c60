use taskbot_auth::AuthError;
use taskbot_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Bot API error: {description}")]
    Api {
        code: Option<i64>,
        description: String,
    },

    #[error("invalid update payload: {0}")]
    InvalidUpdate(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("internal error: {0}")]
    Internal(String),
}
