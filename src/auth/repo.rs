use sqlx::{FromRow, SqlitePool};
use thiserror::Error;
use time::OffsetDateTime;

/// User record as stored. Only [`PublicUser`](crate::auth::dto::PublicUser)
/// ever crosses the wire.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub password_hash: String,
    pub verified: bool,
    pub verification_token: Option<String>,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Error)]
pub enum InsertError {
    #[error("email already registered")]
    DuplicateEmail,
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

const USER_COLUMNS: &str =
    "id, name, email, phone, password_hash, verified, verification_token, created_at";

impl User {
    /// Insert a new user. The unique index on email is the authority on
    /// duplicates; a constraint violation surfaces as `DuplicateEmail` even
    /// when a pre-check raced.
    pub async fn create(
        db: &SqlitePool,
        name: &str,
        email: &str,
        phone: Option<&str>,
        password_hash: &str,
        verified: bool,
    ) -> Result<User, InsertError> {
        sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (name, email, phone, password_hash, verified, verification_token)
            VALUES (?, ?, ?, ?, ?, NULL)
            RETURNING {USER_COLUMNS}
            "#,
        ))
        .bind(name)
        .bind(email)
        .bind(phone)
        .bind(password_hash)
        .bind(verified)
        .fetch_one(db)
        .await
        .map_err(|e| {
            if matches!(&e, sqlx::Error::Database(db_err) if db_err.is_unique_violation()) {
                InsertError::DuplicateEmail
            } else {
                InsertError::Db(e)
            }
        })
    }

    pub async fn find_by_email(db: &SqlitePool, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = ?",
        ))
        .bind(email)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    pub async fn find_by_id(db: &SqlitePool, id: i64) -> anyhow::Result<Option<User>> {
        let user =
            sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
                .bind(id)
                .fetch_optional(db)
                .await?;
        Ok(user)
    }

    pub async fn find_by_verification_token(
        db: &SqlitePool,
        token: &str,
    ) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE verification_token = ?",
        ))
        .bind(token)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    pub async fn set_verification_token(
        db: &SqlitePool,
        id: i64,
        token: &str,
    ) -> anyhow::Result<()> {
        sqlx::query("UPDATE users SET verification_token = ? WHERE id = ?")
            .bind(token)
            .bind(id)
            .execute(db)
            .await?;
        Ok(())
    }

    /// Flips the record to verified and consumes the outstanding token in the
    /// same statement.
    pub async fn mark_verified(db: &SqlitePool, id: i64) -> anyhow::Result<()> {
        sqlx::query("UPDATE users SET verified = 1, verification_token = NULL WHERE id = ?")
            .bind(id)
            .execute(db)
            .await?;
        Ok(())
    }
}
