//! # taskbot
//!
//! Task-management server binary: REST API, Telegram webhook front-end and
//! database maintenance commands.

#![deny(unsafe_code)]

mod seed;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use secrecy::SecretString;
use tracing::{info, warn};

use taskbot_auth::TokenIssuer;
use taskbot_bridge::{BridgeConfig, ExecutionBridge, TimeoutPolicy};
use taskbot_server::{AppState, ServerConfig, TelegramState};
use taskbot_settings::TaskbotSettings;
use taskbot_store::Database;
use taskbot_telegram::{HttpBotApi, TaskBot, WebhookDispatcher};
use taskbot_telemetry::{init_telemetry, IncidentFilter, IncidentLog, TelemetryConfig};

use crate::seed::SeedOutcome;

#[derive(Parser, Debug)]
#[command(name = "taskbot", about = "Task manager API and Telegram bot")]
struct Cli {
    /// Settings file (defaults to `~/.taskbot/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server.
    Serve,
    /// Create tables and seed demo data.
    InitDb {
        /// Drop all data first.
        #[arg(long)]
        reset: bool,
    },
    /// Register the Telegram webhook URL.
    SetWebhook { url: String },
    /// Remove the Telegram webhook registration.
    DeleteWebhook,
    /// Print recorded warnings and errors as JSON lines, newest first.
    Logs {
        /// Only incidents for this user id.
        #[arg(long)]
        user: Option<String>,
        /// Only incidents for this Telegram update id.
        #[arg(long)]
        update: Option<i64>,
        /// Skip warnings.
        #[arg(long)]
        errors: bool,
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.settings {
        Some(path) => taskbot_settings::load_settings_from_path(path),
        None => taskbot_settings::load_settings(),
    }
    .context("loading settings")?;
    settings.validate().context("validating settings")?;

    let telemetry = init_telemetry(TelemetryConfig {
        persist_incidents: settings.logging.log_to_sqlite,
        incident_db_path: settings.logging.resolved_log_db_path(),
        ..TelemetryConfig::with_level_str(&settings.logging.level)
    });

    match cli.command {
        Command::Serve => serve(settings).await,
        Command::InitDb { reset } => init_db(&settings, reset),
        Command::SetWebhook { url } => {
            register_webhook(&settings, WebhookAction::Set(url)).await
        }
        Command::DeleteWebhook => register_webhook(&settings, WebhookAction::Delete).await,
        Command::Logs {
            user,
            update,
            errors,
            limit,
        } => {
            let log = telemetry
                .incidents()
                .context("incident log is disabled (logging.logToSqlite) or could not be opened")?;
            let filter = IncidentFilter {
                errors_only: errors,
                user_id: user,
                update_id: update,
                limit,
            };
            print_incidents(log, &filter, &mut std::io::stdout().lock())
        }
    }
}

fn print_incidents(log: &IncidentLog, filter: &IncidentFilter, out: &mut impl Write) -> Result<()> {
    for incident in log.recent(filter).context("querying incident log")? {
        writeln!(out, "{}", serde_json::to_string(&incident)?)?;
    }
    Ok(())
}

fn open_database(settings: &TaskbotSettings) -> Result<Database> {
    let path = settings.database.resolved_path();
    ensure_parent_dir(&path)?;
    let db = Database::open(&path).with_context(|| format!("opening {}", path.display()))?;
    info!(path = %path.display(), "database opened");
    Ok(db)
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

fn bridge_config(settings: &TaskbotSettings) -> BridgeConfig {
    let policy = if settings.bridge.cancel_on_timeout {
        TimeoutPolicy::Cancel
    } else {
        TimeoutPolicy::Detach
    };
    BridgeConfig::default()
        .with_timeout(settings.bridge.timeout())
        .with_policy(policy)
}

/// Bot, bridge and dispatcher, or `None` when no bot token is configured.
fn telegram_dispatcher(settings: &TaskbotSettings, db: &Database) -> Result<Option<WebhookDispatcher>> {
    let Some(token) = settings.telegram.bot_token.clone().filter(|_| settings.telegram.enabled()) else {
        return Ok(None);
    };

    let api = HttpBotApi::new(SecretString::from(token), &settings.telegram.api_base_url)
        .context("building Telegram client")?;
    let bot = Arc::new(TaskBot::new(Arc::new(api), db.clone()));
    let bridge = Arc::new(ExecutionBridge::new(bridge_config(settings)));
    Ok(Some(WebhookDispatcher::new(bridge, bot)))
}

async fn serve(settings: TaskbotSettings) -> Result<()> {
    let db = open_database(&settings)?;

    let tokens = TokenIssuer::new(&SecretString::from(settings.auth.jwt_secret.clone()))
        .with_ttl(Duration::from_secs(settings.auth.token_ttl_secs));

    let dispatcher = telegram_dispatcher(&settings, &db)?;
    if dispatcher.is_none() {
        warn!("no Telegram bot token configured, bot routes disabled");
    }
    let telegram = dispatcher.clone().map(|dispatcher| TelegramState {
        dispatcher,
        webhook_secret: settings
            .telegram
            .webhook_secret
            .clone()
            .map(|s| Arc::new(SecretString::from(s))),
    });

    let config = ServerConfig {
        host: settings.server.host.clone(),
        port: settings.server.port,
        request_timeout_secs: settings.server.request_timeout_secs,
    };
    let handle = taskbot_server::start(config, AppState::new(db, tokens, telegram))
        .await
        .context("starting server")?;
    info!(port = handle.port, "taskbot ready");

    tokio::signal::ctrl_c()
        .await
        .context("listening for ctrl-c")?;
    info!("shutting down");

    handle.shutdown().await;
    if let Some(dispatcher) = dispatcher {
        let bridge = dispatcher.bridge().clone();
        tokio::task::spawn_blocking(move || bridge.shutdown()).await?;
    }
    Ok(())
}

fn init_db(settings: &TaskbotSettings, reset: bool) -> Result<()> {
    let db = open_database(settings)?;
    if reset {
        db.reset().context("resetting database")?;
        info!("database reset");
    }

    match seed::seed(&db, chrono::Local::now().date_naive())? {
        SeedOutcome::Seeded { users, tasks } => {
            println!("Added {users} users and {tasks} tasks");
        }
        SeedOutcome::AlreadyPopulated => println!("Database already has data, skipping."),
    }
    Ok(())
}

enum WebhookAction {
    Set(String),
    Delete,
}

async fn register_webhook(settings: &TaskbotSettings, action: WebhookAction) -> Result<()> {
    let db = open_database(settings)?;
    let worker = telegram_dispatcher(settings, &db)?
        .context("telegram.botToken (or TELEGRAM_BOT_TOKEN) is not set")?;
    let secret = settings.telegram.webhook_secret.clone();

    let ok = tokio::task::spawn_blocking(move || {
        let ok = match action {
            WebhookAction::Set(url) => worker.set_webhook(&url, secret.as_deref()),
            WebhookAction::Delete => worker.delete_webhook(),
        };
        worker.bridge().shutdown();
        ok
    })
    .await?;

    anyhow::ensure!(ok, "Telegram rejected the webhook request, see logs");
    println!("ok");
    Ok(())
}
