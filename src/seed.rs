//! Demo accounts and tasks for a fresh database.

use anyhow::{Context, Result};
use chrono::{Days, NaiveDate};
use tracing::info;

use taskbot_auth::hash_password;
use taskbot_core::{Priority, TaskStatus};
use taskbot_store::{Database, NewTask, NewUser, TaskRepo, UserRepo};

const USERS: [(&str, &str, &str); 3] = [
    ("John Doe", "john@example.com", "password123"),
    ("Jane Smith", "jane@example.com", "securepass456"),
    ("Bob Johnson", "bob@example.com", "bobspassword789"),
];

/// Owner email, title, description, priority, completed, due offset in days.
const TASKS: [(&str, &str, &str, Priority, bool, i64); 5] = [
    ("john@example.com", "Setup project repo", "Init git and basic structure", Priority::High, false, 2),
    ("john@example.com", "Database design", "Create ERD and tables", Priority::Medium, false, 5),
    ("jane@example.com", "API docs", "Document endpoints", Priority::Medium, true, -1),
    ("jane@example.com", "Auth system", "User login/register", Priority::High, false, 7),
    ("john@example.com", "Unit tests", "Test coverage", Priority::Low, false, 10),
];

#[derive(Debug, PartialEq, Eq)]
pub enum SeedOutcome {
    Seeded { users: usize, tasks: usize },
    AlreadyPopulated,
}

/// Insert demo data unless any account already exists.
pub fn seed(db: &Database, today: NaiveDate) -> Result<SeedOutcome> {
    let users = UserRepo::new(db.clone());
    if users.count()? > 0 {
        info!("database already has data, skipping seed");
        return Ok(SeedOutcome::AlreadyPopulated);
    }

    for (name, email, password) in USERS {
        users
            .create(NewUser {
                name: name.to_string(),
                email: email.to_string(),
                password_hash: hash_password(password)?,
            })
            .with_context(|| format!("seeding user {email}"))?;
    }

    let tasks = TaskRepo::new(db.clone());
    for (email, title, description, priority, completed, offset) in TASKS {
        let owner = users
            .find_by_email(email)?
            .with_context(|| format!("seeded user {email} is missing"))?;
        tasks.create(
            &owner.id,
            NewTask {
                title: title.to_string(),
                description: Some(description.to_string()),
                status: TaskStatus::Todo,
                priority,
                completed,
                due_date: Some(shift(today, offset)),
                tags: Vec::new(),
            },
        )?;
    }

    info!(users = USERS.len(), tasks = TASKS.len(), "seeded demo data");
    Ok(SeedOutcome::Seeded {
        users: USERS.len(),
        tasks: TASKS.len(),
    })
}

fn shift(day: NaiveDate, offset: i64) -> NaiveDate {
    let days = Days::new(offset.unsigned_abs());
    let shifted = if offset >= 0 {
        day.checked_add_days(days)
    } else {
        day.checked_sub_days(days)
    };
    shifted.unwrap_or(day)
}
