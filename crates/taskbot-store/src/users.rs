use chrono::Utc;
use rusqlite::OptionalExtension;
use serde::Serialize;
use tracing::{info, instrument};

use taskbot_core::UserId;

use crate::database::Database;
use crate::error::{is_unique_violation, StoreError};
use crate::row_helpers;

const COLUMNS: &str = "id, name, email, password_hash, telegram_id, created_at";

#[derive(Clone, Debug, Serialize)]
pub struct UserRow {
    pub id: UserId,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub telegram_id: Option<i64>,
    pub created_at: String,
}

/// Insert payload. The password must already be hashed.
#[derive(Clone, Debug)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
}

pub struct UserRepo {
    db: Database,
}

impl UserRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a user. Fails with `Conflict` when the email is taken
    /// (compared case-insensitively).
    #[instrument(skip(self, new), fields(email = %new.email))]
    pub fn create(&self, new: NewUser) -> Result<UserRow, StoreError> {
        let id = UserId::new();
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, name, email, password_hash, telegram_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, NULL, ?5)",
                rusqlite::params![id.as_str(), new.name, new.email, new.password_hash, now],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::Conflict(format!("email {} already registered", new.email))
                } else {
                    StoreError::from(e)
                }
            })?;
            Ok(())
        })?;

        info!(user_id = %id, "user created");
        Ok(UserRow {
            id,
            name: new.name,
            email: new.email,
            password_hash: new.password_hash,
            telegram_id: None,
            created_at: now,
        })
    }

    #[instrument(skip(self), fields(user_id = %id))]
    pub fn get(&self, id: &UserId) -> Result<UserRow, StoreError> {
        self.find_one("id = ?1", id.as_str())?
            .ok_or_else(|| StoreError::NotFound(format!("user {id}")))
    }

    #[instrument(skip(self))]
    pub fn find_by_email(&self, email: &str) -> Result<Option<UserRow>, StoreError> {
        self.find_one("email = ?1", email)
    }

    #[instrument(skip(self))]
    pub fn find_by_telegram_id(&self, telegram_id: i64) -> Result<Option<UserRow>, StoreError> {
        self.find_one("telegram_id = ?1", telegram_id)
    }

    /// Attach a Telegram account to a user. A Telegram account maps to at
    /// most one user, so any previous owner loses the link.
    #[instrument(skip(self), fields(user_id = %id))]
    pub fn link_telegram(&self, id: &UserId, telegram_id: i64) -> Result<(), StoreError> {
        self.db.with_tx(|tx| {
            let released = tx.execute(
                "UPDATE users SET telegram_id = NULL WHERE telegram_id = ?1 AND id != ?2",
                rusqlite::params![telegram_id, id.as_str()],
            )?;
            if released > 0 {
                info!(telegram_id, "telegram account moved to another user");
            }
            let updated = tx.execute(
                "UPDATE users SET telegram_id = ?1 WHERE id = ?2",
                rusqlite::params![telegram_id, id.as_str()],
            )?;
            if updated == 0 {
                return Err(StoreError::NotFound(format!("user {id}")));
            }
            Ok(())
        })
    }

    pub fn count(&self) -> Result<u64, StoreError> {
        self.db.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
            Ok(n as u64)
        })
    }

    fn find_one(
        &self,
        predicate: &str,
        value: impl rusqlite::ToSql,
    ) -> Result<Option<UserRow>, StoreError> {
        self.db.with_conn(|conn| {
            let sql = format!("SELECT {COLUMNS} FROM users WHERE {predicate}");
            conn.query_row(&sql, [value], |row| Ok(map_row(row)))
                .optional()?
                .transpose()
        })
    }
}

fn map_row(row: &rusqlite::Row<'_>) -> Result<UserRow, StoreError> {
    Ok(UserRow {
        id: UserId::from_raw(row_helpers::get::<String>(row, 0, "users", "id")?),
        name: row_helpers::get(row, 1, "users", "name")?,
        email: row_helpers::get(row, 2, "users", "email")?,
        password_hash: row_helpers::get(row, 3, "users", "password_hash")?,
        telegram_id: row_helpers::get_opt(row, 4, "users", "telegram_id")?,
        created_at: row_helpers::get(row, 5, "users", "created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> UserRepo {
        UserRepo::new(Database::in_memory().unwrap())
    }

    fn new_user(email: &str) -> NewUser {
        NewUser {
            name: "Jane Smith".into(),
            email: email.into(),
            password_hash: "$argon2id$stub".into(),
        }
    }

    #[test]
    fn create_and_get() {
        let repo = repo();
        let user = repo.create(new_user("jane@example.com")).unwrap();
        assert!(user.id.as_str().starts_with("user_"));

        let fetched = repo.get(&user.id).unwrap();
        assert_eq!(fetched.email, "jane@example.com");
        assert_eq!(fetched.telegram_id, None);
    }

    #[test]
    fn get_missing_is_not_found() {
        let err = repo().get(&UserId::from_raw("user_missing")).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn duplicate_email_conflicts_case_insensitively() {
        let repo = repo();
        repo.create(new_user("jane@example.com")).unwrap();
        let err = repo.create(new_user("JANE@example.com")).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)), "got {err:?}");
        assert_eq!(repo.count().unwrap(), 1);
    }

    #[test]
    fn find_by_email() {
        let repo = repo();
        repo.create(new_user("bob@example.com")).unwrap();
        assert!(repo.find_by_email("bob@example.com").unwrap().is_some());
        assert!(repo.find_by_email("nobody@example.com").unwrap().is_none());
    }

    #[test]
    fn link_and_find_by_telegram_id() {
        let repo = repo();
        let user = repo.create(new_user("john@example.com")).unwrap();
        repo.link_telegram(&user.id, 4242).unwrap();

        let found = repo.find_by_telegram_id(4242).unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert!(repo.find_by_telegram_id(1).unwrap().is_none());
    }

    #[test]
    fn relinking_moves_telegram_account() {
        let repo = repo();
        let first = repo.create(new_user("a@example.com")).unwrap();
        let second = repo.create(new_user("b@example.com")).unwrap();

        repo.link_telegram(&first.id, 7).unwrap();
        repo.link_telegram(&second.id, 7).unwrap();

        assert_eq!(repo.find_by_telegram_id(7).unwrap().unwrap().id, second.id);
        assert_eq!(repo.get(&first.id).unwrap().telegram_id, None);
    }

    #[test]
    fn link_unknown_user_fails() {
        let err = repo()
            .link_telegram(&UserId::from_raw("user_missing"), 7)
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn password_hash_never_serialized() {
        let user = repo().create(new_user("x@example.com")).unwrap();
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["email"], "x@example.com");
    }
}
