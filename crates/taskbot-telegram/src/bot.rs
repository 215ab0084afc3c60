//! Chat command handling.
//!
//! Commands:
//! - `/start`, `/help`: usage text
//! - `/link email password`: attach the chat user to an account
//! - `/new text`: create a task, priority inferred from the text
//! - `/tasks`: list up to [`PENDING_LIMIT`] incomplete tasks
//!
//! Any other text longer than three characters from a linked user becomes a
//! task. Unknown commands and commands addressed to another bot are ignored.

use std::fmt::Write as _;
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use taskbot_core::infer_priority;
use taskbot_store::{Database, NewTask, TaskRepo, TaskRow, UserRepo, UserRow};

use crate::api::BotApi;
use crate::error::BotError;
use crate::types::{Message, SendMessage, Update, User};

/// Most tasks listed by `/tasks`.
pub const PENDING_LIMIT: u32 = 100;

const START_TEXT: &str = "Hi! I'm your task manager bot.\n\n\
First, link your account with: /link your@email.com password\n\
Then you can add tasks with: /new Buy groceries\n\
Type /help for more commands.";

const HELP_TEXT: &str = "Commands:\n\
/start - Start the bot\n\
/link email password - Link your account\n\
/new description - Add a new task\n\
/tasks - List your pending tasks\n\
/help - Show this help\n\n\
Tips:\n\
- Use words like 'urgent' or '!!!' for high priority\n\
- Use words like 'later' or 'maybe' for low priority";

const LINK_FIRST_COMMAND: &str = "Please link your account first: /link email password";
const LINK_FIRST_TEXT: &str = "Link your account first: /link email password";

/// A `/command` addressed to this bot.
#[derive(Debug, PartialEq, Eq)]
struct Command<'a> {
    name: &'a str,
    args: Vec<&'a str>,
}

/// Split `/name@bot arg1 arg2`. Returns `None` for plain text and for
/// commands addressed to a different bot.
fn parse_command<'a>(text: &'a str, bot_username: Option<&str>) -> Option<Command<'a>> {
    let mut words = text.split_whitespace();
    let head = words.next()?.strip_prefix('/')?;
    let (name, target) = match head.split_once('@') {
        Some((name, target)) => (name, Some(target)),
        None => (head, None),
    };
    if let (Some(target), Some(me)) = (target, bot_username) {
        if !target.eq_ignore_ascii_case(me) {
            return None;
        }
    }
    Some(Command {
        name,
        args: words.collect(),
    })
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
    out
}

fn render_pending(tasks: &[TaskRow]) -> String {
    let mut out = String::from("Your tasks:\n\n");
    for (i, task) in tasks.iter().enumerate() {
        let _ = write!(
            out,
            "{}. [{}] <b>{}</b>",
            i + 1,
            task.priority.as_str().to_uppercase(),
            escape_html(&task.title)
        );
        if let Some(description) = task.description.as_deref().filter(|d| !d.is_empty()) {
            let _ = write!(out, "\n   📝 {}", escape_html(description));
        }
        if let Some(due) = task.due_date {
            let _ = write!(out, "\n   📅 Due: {}", due.format("%Y-%m-%d"));
        }
        out.push_str("\n\n");
    }
    out
}

/// The bot's update handlers, backed by the task database.
pub struct TaskBot {
    api: Arc<dyn BotApi>,
    users: UserRepo,
    tasks: TaskRepo,
    me: OnceCell<User>,
}

impl TaskBot {
    pub fn new(api: Arc<dyn BotApi>, db: Database) -> Self {
        Self {
            api,
            users: UserRepo::new(db.clone()),
            tasks: TaskRepo::new(db),
            me: OnceCell::new(),
        }
    }

    /// Fetch the bot's own identity once. Later calls reuse it; a failed
    /// attempt is retried on the next call.
    pub async fn initialize(&self) -> Result<&User, BotError> {
        self.me
            .get_or_try_init(|| async {
                let me = self.api.get_me().await?;
                info!(bot_id = me.id, username = ?me.username, "bot initialized");
                Ok::<_, BotError>(me)
            })
            .await
    }

    /// Decode a raw webhook payload and handle it.
    pub async fn handle_webhook(&self, payload: serde_json::Value) -> Result<(), BotError> {
        self.initialize().await?;
        let update: Update = serde_json::from_value(payload)?;
        self.handle_update(&update).await
    }

    pub async fn set_webhook(&self, url: &str, secret_token: Option<&str>) -> Result<(), BotError> {
        self.initialize().await?;
        if !self.api.set_webhook(url, secret_token).await? {
            return Err(BotError::Api {
                code: None,
                description: "setWebhook returned false".to_string(),
            });
        }
        Ok(())
    }

    pub async fn delete_webhook(&self) -> Result<(), BotError> {
        self.initialize().await?;
        if !self.api.delete_webhook().await? {
            return Err(BotError::Api {
                code: None,
                description: "deleteWebhook returned false".to_string(),
            });
        }
        Ok(())
    }

    pub async fn handle_update(&self, update: &Update) -> Result<(), BotError> {
        let Some(message) = update.message() else {
            debug!(update_id = update.update_id, "update without message, ignoring");
            return Ok(());
        };
        let (Some(text), Some(from)) = (message.text.as_deref(), message.from.as_ref()) else {
            debug!(update_id = update.update_id, "non-text message, ignoring");
            return Ok(());
        };

        if !text.starts_with('/') {
            return self.on_text(message, from, text).await;
        }

        let username = self.initialize().await?.username.as_deref();
        let Some(command) = parse_command(text, username) else {
            debug!(update_id = update.update_id, "command for another bot, ignoring");
            return Ok(());
        };

        match command.name {
            "start" => self.reply(message, START_TEXT).await,
            "help" => self.reply(message, HELP_TEXT).await,
            "link" => self.on_link(message, from, &command.args).await,
            "new" => self.on_new(message, from, &command.args).await,
            "tasks" => self.on_tasks(message, from).await,
            other => {
                debug!(command = other, "unknown command, ignoring");
                Ok(())
            }
        }
    }

    async fn on_link(&self, message: &Message, from: &User, args: &[&str]) -> Result<(), BotError> {
        let [email, password] = args else {
            return self.reply(message, "Usage: /link email password").await;
        };

        let email = taskbot_auth::normalize_email(email);
        let Some(user) = self.users.find_by_email(&email)? else {
            return self.reply(message, "Invalid email or password.").await;
        };

        // Argon2 is CPU-bound; keep it off the event loop.
        let password = password.to_string();
        let phc = user.password_hash.clone();
        let valid = tokio::task::spawn_blocking(move || taskbot_auth::verify_password(&password, &phc))
            .await
            .map_err(|e| BotError::Internal(format!("password check: {e}")))?;
        if !valid {
            warn!(telegram_id = from.id, "telegram link rejected");
            return self.reply(message, "Invalid email or password.").await;
        }

        self.users.link_telegram(&user.id, from.id)?;
        info!(user_id = %user.id, telegram_id = from.id, "telegram account linked");
        self.reply(message, "Account linked! You can now add tasks.").await
    }

    async fn on_new(&self, message: &Message, from: &User, args: &[&str]) -> Result<(), BotError> {
        if args.is_empty() {
            return self.reply(message, "Usage: /new Your task description").await;
        }
        let Some(user) = self.linked_user(from)? else {
            return self.reply(message, LINK_FIRST_COMMAND).await;
        };
        self.add_task(message, &user, &args.join(" ")).await
    }

    async fn on_tasks(&self, message: &Message, from: &User) -> Result<(), BotError> {
        let Some(user) = self.linked_user(from)? else {
            return self.reply(message, LINK_FIRST_COMMAND).await;
        };

        let pending = self.tasks.list_pending(&user.id, PENDING_LIMIT)?;
        if pending.is_empty() {
            return self.reply(message, "No pending tasks!").await;
        }
        self.api
            .send_message(SendMessage::html(message.chat.id, render_pending(&pending)))
            .await?;
        Ok(())
    }

    async fn on_text(&self, message: &Message, from: &User, text: &str) -> Result<(), BotError> {
        let Some(user) = self.linked_user(from)? else {
            return self.reply(message, LINK_FIRST_TEXT).await;
        };
        if text.chars().count() > 3 {
            self.add_task(message, &user, text).await
        } else {
            self.reply(message, "Type /help for commands").await
        }
    }

    async fn add_task(&self, message: &Message, user: &UserRow, text: &str) -> Result<(), BotError> {
        let priority = infer_priority(text);
        let task = self.tasks.create(&user.id, NewTask::titled(text, priority))?;
        info!(user_id = %user.id, task_id = %task.id, %priority, "task added from telegram");
        self.reply(message, &format!("Task added: {text} (priority: {priority})"))
            .await
    }

    fn linked_user(&self, from: &User) -> Result<Option<UserRow>, BotError> {
        Ok(self.users.find_by_telegram_id(from.id)?)
    }

    async fn reply(&self, message: &Message, text: &str) -> Result<(), BotError> {
        self.api
            .send_message(SendMessage::plain(message.chat.id, text))
            .await?;
        Ok(())
    }
}
