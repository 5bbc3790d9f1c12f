use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub ttl_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_email: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt: JwtConfig,
    /// Public base URL of this service; verification links point here.
    pub base_url: String,
    /// Base URL of the client app; the verify endpoint redirects here.
    pub client_url: String,
    pub cors_origin: String,
    /// When true, accounts are marked verified at registration and no
    /// confirmation mail is needed. The send/consume flow still applies to
    /// accounts that exist unverified (e.g. rows predating the column).
    pub verify_on_register: bool,
    pub smtp: Option<SmtpConfig>,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:eventio.db".into());
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET").unwrap_or_else(|_| "dev_secret_change_me".into()),
            ttl_days: std::env::var("JWT_TTL_DAYS")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(7),
        };
        let base_url =
            std::env::var("APP_BASE_URL").unwrap_or_else(|_| "http://localhost:4000".into());
        let client_url =
            std::env::var("APP_CLIENT_URL").unwrap_or_else(|_| "http://localhost:8081".into());
        let cors_origin = std::env::var("CORS_ORIGIN").unwrap_or_else(|_| "*".into());
        let verify_on_register = std::env::var("VERIFY_ON_REGISTER")
            .ok()
            .and_then(|v| v.parse::<bool>().ok())
            .unwrap_or(true);

        // SMTP is optional; without it verification links are only logged.
        let smtp = match std::env::var("SMTP_HOST") {
            Ok(host) => Some(SmtpConfig {
                host,
                port: std::env::var("SMTP_PORT")
                    .ok()
                    .and_then(|v| v.parse::<u16>().ok())
                    .unwrap_or(587),
                username: std::env::var("SMTP_USERNAME").unwrap_or_default(),
                password: std::env::var("SMTP_PASSWORD").unwrap_or_default(),
                from_email: std::env::var("FROM_EMAIL")
                    .unwrap_or_else(|_| "no-reply@eventio.local".into()),
            }),
            Err(_) => None,
        };

        Ok(Self {
            database_url,
            jwt,
            base_url,
            client_url,
            cors_origin,
            verify_on_register,
            smtp,
        })
    }
}
