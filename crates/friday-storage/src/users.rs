use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{decode_time, encode_time, Result, Storage, StorageError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub user_name: String,
    pub chat_id: i64,
    pub notifications_enabled: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub user_id: String,
    pub user_name: String,
    pub chat_id: i64,
    pub notifications_enabled: bool,
}

/// Partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub user_name: Option<String>,
    pub notifications_enabled: Option<bool>,
}

pub trait UserStore: Send {
    /// Fails with `Conflict` when the user id or the chat id is already registered.
    fn create_user(&mut self, user: &NewUser) -> Result<User>;

    fn get_user_by_id(&self, user_id: &str) -> Result<Option<User>>;

    fn get_user_by_chat_id(&self, chat_id: i64) -> Result<Option<User>>;

    fn update_user(&mut self, user_id: &str, update: &UserUpdate) -> Result<User>;

    fn get_users_with_notification_enabled(&self) -> Result<Vec<User>>;
}

const USER_COLUMNS: &str = "user_id, user_name, chat_id, noti, created_at";

struct UserRow {
    user_id: String,
    user_name: String,
    chat_id: i64,
    noti: bool,
    created_at: String,
}

impl UserRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            user_id: row.get(0)?,
            user_name: row.get(1)?,
            chat_id: row.get(2)?,
            noti: row.get(3)?,
            created_at: row.get(4)?,
        })
    }

    fn into_user(self) -> Result<User> {
        Ok(User {
            user_id: self.user_id,
            user_name: self.user_name,
            chat_id: self.chat_id,
            notifications_enabled: self.noti,
            created_at: decode_time(&self.created_at)?,
        })
    }
}

impl Storage {
    fn user_where(&self, clause: &str, param: &dyn rusqlite::ToSql) -> Result<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE {} LIMIT 1", USER_COLUMNS, clause);
        let row = self
            .conn
            .query_row(&sql, &[param], UserRow::from_row)
            .optional()?;
        row.map(UserRow::into_user).transpose()
    }
}

impl UserStore for Storage {
    fn create_user(&mut self, user: &NewUser) -> Result<User> {
        let existing: Option<String> = self
            .conn
            .query_row(
                "SELECT user_id FROM users WHERE user_id = ?1 OR chat_id = ?2 LIMIT 1",
                (&user.user_id, user.chat_id),
                |row| row.get(0),
            )
            .optional()?;
        if existing.is_some() {
            return Err(StorageError::Conflict(format!("user {}", user.user_id)));
        }

        let now = encode_time(&Utc::now());
        self.conn.execute(
            "INSERT INTO users (user_id, user_name, chat_id, noti, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            (
                &user.user_id,
                &user.user_name,
                user.chat_id,
                user.notifications_enabled,
                &now,
            ),
        )?;
        info!(user_id = %user.user_id, chat_id = user.chat_id, "User created");

        self.user_where("user_id = ?1", &user.user_id)?
            .ok_or_else(|| StorageError::NotFound(format!("user {}", user.user_id)))
    }

    fn get_user_by_id(&self, user_id: &str) -> Result<Option<User>> {
        self.user_where("user_id = ?1", &user_id)
    }

    fn get_user_by_chat_id(&self, chat_id: i64) -> Result<Option<User>> {
        self.user_where("chat_id = ?1", &chat_id)
    }

    fn update_user(&mut self, user_id: &str, update: &UserUpdate) -> Result<User> {
        let changed = self.conn.execute(
            "UPDATE users
             SET user_name = COALESCE(?1, user_name),
                 noti = COALESCE(?2, noti),
                 updated_at = ?3
             WHERE user_id = ?4",
            (
                &update.user_name,
                update.notifications_enabled,
                encode_time(&Utc::now()),
                user_id,
            ),
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("user {}", user_id)));
        }
        info!(user_id, "User updated");

        self.user_where("user_id = ?1", &user_id)?
            .ok_or_else(|| StorageError::NotFound(format!("user {}", user_id)))
    }

    fn get_users_with_notification_enabled(&self) -> Result<Vec<User>> {
        let sql = format!("SELECT {} FROM users WHERE noti = 1 ORDER BY id", USER_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], UserRow::from_row)?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?.into_user()?);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(user_id: &str, chat_id: i64) -> NewUser {
        NewUser {
            user_id: user_id.to_string(),
            user_name: format!("name-{}", user_id),
            chat_id,
            notifications_enabled: true,
        }
    }

    #[test]
    fn create_and_fetch_user() {
        let mut storage = Storage::in_memory().expect("storage");
        let created = storage.create_user(&new_user("42", 1042)).expect("create");
        assert_eq!(created.user_name, "name-42");

        let by_id = storage.get_user_by_id("42").expect("by id").expect("some");
        let by_chat = storage
            .get_user_by_chat_id(1042)
            .expect("by chat")
            .expect("some");
        assert_eq!(by_id, by_chat);
        assert!(storage.get_user_by_id("missing").expect("query").is_none());
    }

    #[test]
    fn duplicate_user_or_chat_is_conflict() {
        let mut storage = Storage::in_memory().expect("storage");
        storage.create_user(&new_user("42", 1042)).expect("create");

        assert!(matches!(
            storage.create_user(&new_user("42", 2000)),
            Err(StorageError::Conflict(_))
        ));
        assert!(matches!(
            storage.create_user(&new_user("43", 1042)),
            Err(StorageError::Conflict(_))
        ));
    }

    #[test]
    fn partial_update_only_touches_given_fields() {
        let mut storage = Storage::in_memory().expect("storage");
        storage.create_user(&new_user("1", 10)).expect("create");

        let updated = storage
            .update_user(
                "1",
                &UserUpdate {
                    notifications_enabled: Some(false),
                    ..Default::default()
                },
            )
            .expect("update");
        assert!(!updated.notifications_enabled);
        assert_eq!(updated.user_name, "name-1");
    }

    #[test]
    fn update_unknown_user_is_not_found() {
        let mut storage = Storage::in_memory().expect("storage");
        assert!(matches!(
            storage.update_user("nobody", &UserUpdate::default()),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn only_opted_in_users_are_subscribers() {
        let mut storage = Storage::in_memory().expect("storage");
        storage.create_user(&new_user("1", 10)).expect("create");
        storage.create_user(&new_user("2", 20)).expect("create");
        storage
            .update_user(
                "2",
                &UserUpdate {
                    notifications_enabled: Some(false),
                    ..Default::default()
                },
            )
            .expect("update");

        let subscribers = storage
            .get_users_with_notification_enabled()
            .expect("subscribers");
        assert_eq!(subscribers.len(), 1);
        assert_eq!(subscribers[0].chat_id, 10);
    }
}
