use std::sync::Arc;

use sqlx::SqlitePool;

use crate::config::AppConfig;
use crate::mailer::{self, Mailer};
use crate::db;

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Arc<AppConfig>,
    pub mailer: Arc<dyn Mailer>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);
        let db = db::connect(&config.database_url).await?;
        let mailer = mailer::from_config(config.smtp.as_ref())?;
        Ok(Self { db, config, mailer })
    }

    pub fn from_parts(db: SqlitePool, config: Arc<AppConfig>, mailer: Arc<dyn Mailer>) -> Self {
        Self { db, config, mailer }
    }

    /// In-memory state with the schema applied. Backs the handler tests and
    /// works as a throwaway store for local experiments.
    pub async fn ephemeral() -> anyhow::Result<Self> {
        use crate::config::JwtConfig;

        let db = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        db::migrate(&db).await?;

        let config = Arc::new(AppConfig {
            database_url: "sqlite::memory:".into(),
            jwt: JwtConfig {
                secret: "test-secret".into(),
                ttl_days: 7,
            },
            base_url: "http://localhost:4000".into(),
            client_url: "http://localhost:8081".into(),
            cors_origin: "*".into(),
            verify_on_register: true,
            smtp: None,
        });

        let mailer = Arc::new(mailer::LogMailer) as Arc<dyn Mailer>;
        Ok(Self { db, config, mailer })
    }
}
