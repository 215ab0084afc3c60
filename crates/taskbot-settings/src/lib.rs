//! # taskbot-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`TaskbotSettings::default()`]
//! 2. **User file**: `~/.taskbot/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `TASKBOT_*` and `TELEGRAM_BOT_TOKEN`
//!
//! The loaded value is owned by the binary's startup routine and handed to
//! each subsystem; there is no process-wide cache.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
