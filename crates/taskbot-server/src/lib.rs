pub mod error;
pub mod extract;
pub mod handlers;
pub mod server;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::ApiError;
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle, TelegramState};
