use std::collections::HashSet;
use std::str::FromStr;

use anyhow::Context;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    Row, SqlitePool,
};
use tracing::info;

pub async fn connect(database_url: &str) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .context("parse DATABASE_URL")?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect_with(options)
        .await
        .context("connect to database")?;
    Ok(pool)
}

/// Brings the users table up to the current revision without touching
/// existing rows. Columns added after the first release are created with
/// safe defaults when absent.
pub async fn migrate(db: &SqlitePool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            phone TEXT,
            password_hash TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(db)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_users_email ON users(email)")
        .execute(db)
        .await?;

    let columns: HashSet<String> = sqlx::query("PRAGMA table_info(users)")
        .fetch_all(db)
        .await?
        .iter()
        .map(|row| row.get::<String, _>("name"))
        .collect();

    if !columns.contains("verified") {
        sqlx::query("ALTER TABLE users ADD COLUMN verified INTEGER NOT NULL DEFAULT 0")
            .execute(db)
            .await?;
    }
    if !columns.contains("verification_token") {
        sqlx::query("ALTER TABLE users ADD COLUMN verification_token TEXT")
            .execute(db)
            .await?;
    }
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_users_vtoken ON users(verification_token)")
        .execute(db)
        .await?;

    info!("migration complete");
    Ok(())
}
