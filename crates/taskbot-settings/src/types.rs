//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so a partial
//! JSON file only needs to name the fields it changes.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Development-only signing key. [`TaskbotSettings::validate`] rejects it
/// when the server binds a non-loopback address.
pub const DEV_JWT_SECRET: &str = "taskbot-dev-secret-change-me";

/// Root settings type.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskbotSettings {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub auth: AuthSettings,
    pub telegram: TelegramSettings,
    pub bridge: BridgeSettings,
    pub logging: LoggingSettings,
}

impl TaskbotSettings {
    /// Reject combinations that would leave the server insecure or unusable.
    pub fn validate(&self) -> crate::Result<()> {
        if self.auth.jwt_secret.is_empty() {
            return Err(crate::SettingsError::InvalidValue("auth.jwtSecret is empty".into()));
        }
        let exposed = !matches!(self.server.host.as_str(), "127.0.0.1" | "localhost" | "::1");
        if self.auth.jwt_secret == DEV_JWT_SECRET && exposed {
            return Err(crate::SettingsError::InvalidValue(format!(
                "auth.jwtSecret must be changed before binding {}",
                self.server.host
            )));
        }
        if self.bridge.timeout_ms == 0 {
            return Err(crate::SettingsError::InvalidValue("bridge.timeoutMs must be > 0".into()));
        }
        Ok(())
    }
}

/// HTTP listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` picks a free port).
    pub port: u16,
    /// Per-request timeout applied by the HTTP layer, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            request_timeout_secs: 60,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseSettings {
    /// SQLite file path. Relative paths resolve against `~/.taskbot`.
    pub path: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: "taskbot.db".to_string(),
        }
    }
}

impl DatabaseSettings {
    pub fn resolved_path(&self) -> PathBuf {
        let path = PathBuf::from(&self.path);
        if path.is_absolute() {
            path
        } else {
            crate::loader::taskbot_dir().join(path)
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// HMAC key for HS256 access tokens.
    pub jwt_secret: String,
    /// Access token lifetime in seconds.
    pub token_ttl_secs: u64,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_secret: DEV_JWT_SECRET.to_string(),
            token_ttl_secs: 24 * 60 * 60,
        }
    }
}

/// Telegram bot front-end. The bot is disabled while `bot_token` is unset.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TelegramSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bot_token: Option<String>,
    /// Bot API base URL, overridable for tests and self-hosted API servers.
    pub api_base_url: String,
    /// Expected `X-Telegram-Bot-Api-Secret-Token` header on webhook calls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_secret: Option<String>,
}

impl Default for TelegramSettings {
    fn default() -> Self {
        Self {
            bot_token: None,
            api_base_url: "https://api.telegram.org".to_string(),
            webhook_secret: None,
        }
    }
}

impl TelegramSettings {
    pub fn enabled(&self) -> bool {
        self.bot_token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

/// Execution bridge settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeSettings {
    /// How long a caller waits for a submitted work item, in milliseconds.
    pub timeout_ms: u64,
    /// Cancel the work item when the caller gives up waiting.
    pub cancel_on_timeout: bool,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            cancel_on_timeout: true,
        }
    }
}

impl BridgeSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level (`trace`..`error`). `RUST_LOG` takes precedence.
    pub level: String,
    /// Persist warn+ events to SQLite.
    pub log_to_sqlite: bool,
    /// Log database path. Relative paths resolve against `~/.taskbot`.
    pub log_db_path: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_to_sqlite: true,
            log_db_path: "taskbot-logs.db".to_string(),
        }
    }
}

impl LoggingSettings {
    pub fn resolved_log_db_path(&self) -> PathBuf {
        let path = PathBuf::from(&self.log_db_path);
        if path.is_absolute() {
            path
        } else {
            crate::loader::taskbot_dir().join(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = TaskbotSettings::default();
        assert_eq!(s.server.port, 5000);
        assert_eq!(s.server.host, "127.0.0.1");
        assert_eq!(s.bridge.timeout(), Duration::from_secs(30));
        assert!(s.bridge.cancel_on_timeout);
        assert_eq!(s.auth.token_ttl_secs, 86_400);
        assert!(!s.telegram.enabled());
    }

    #[test]
    fn camel_case_wire_format() {
        let json = serde_json::to_value(TaskbotSettings::default()).unwrap();
        assert_eq!(json["bridge"]["timeoutMs"], 30_000);
        assert_eq!(json["auth"]["tokenTtlSecs"], 86_400);
        assert!(json["telegram"].get("botToken").is_none());
    }

    #[test]
    fn empty_token_means_disabled() {
        let t = TelegramSettings {
            bot_token: Some(String::new()),
            ..Default::default()
        };
        assert!(!t.enabled());
    }

    #[test]
    fn validate_accepts_loopback_dev_secret() {
        assert!(TaskbotSettings::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_exposed_dev_secret() {
        let mut s = TaskbotSettings::default();
        s.server.host = "0.0.0.0".into();
        assert!(s.validate().is_err());
        s.auth.jwt_secret = "a-real-secret".into();
        assert!(s.validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_timeout() {
        let mut s = TaskbotSettings::default();
        s.bridge.timeout_ms = 0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn absolute_db_path_kept() {
        let d = DatabaseSettings {
            path: "/var/lib/taskbot/db.sqlite".into(),
        };
        assert_eq!(d.resolved_path(), PathBuf::from("/var/lib/taskbot/db.sqlite"));
    }
}
