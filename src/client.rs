//! Typed client for the auth API, used by the application instead of
//! hand-rolled requests. Every non-2xx response is surfaced as a structured
//! error carrying the HTTP status and the parsed error body, so callers can
//! branch on specific failure kinds.

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::auth::dto::{
    AuthResponse, LoginRequest, MeResponse, OkBody, RegisterRequest, SendVerificationRequest,
};
use crate::error::ErrorBody;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    /// The server answered with an error body it meant to send.
    #[error("{} ({status})", .body.error)]
    Api { status: StatusCode, body: ErrorBody },
    /// The response body did not parse as the expected structure.
    #[error("request failed ({status})")]
    RequestFailed { status: StatusCode },
}

impl ClientError {
    /// Machine-readable error code, when the server sent one.
    pub fn error_code(&self) -> Option<&str> {
        match self {
            ClientError::Api { body, .. } => Some(&body.error),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct AuthClient {
    http: reqwest::Client,
    base_url: String,
}

impl AuthClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_http(reqwest::Client::new(), base_url)
    }

    pub fn with_http(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { http, base_url }
    }

    pub async fn register(
        &self,
        name: &str,
        email: &str,
        password: &str,
        phone: Option<&str>,
    ) -> Result<AuthResponse, ClientError> {
        let body = RegisterRequest {
            name: Some(name.to_owned()),
            email: Some(email.to_owned()),
            password: Some(password.to_owned()),
            phone: phone.map(str::to_owned),
        };
        self.execute(self.http.post(self.url("/auth/register")).json(&body))
            .await
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<AuthResponse, ClientError> {
        let body = LoginRequest {
            email: Some(email.to_owned()),
            password: Some(password.to_owned()),
        };
        self.execute(self.http.post(self.url("/auth/login")).json(&body))
            .await
    }

    pub async fn me(&self, token: &str) -> Result<MeResponse, ClientError> {
        self.execute(self.http.get(self.url("/me")).bearer_auth(token))
            .await
    }

    pub async fn send_verification(&self, email: &str) -> Result<OkBody, ClientError> {
        let body = SendVerificationRequest {
            email: Some(email.to_owned()),
        };
        self.execute(
            self.http
                .post(self.url("/auth/send-verification"))
                .json(&body),
        )
        .await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ClientError> {
        let response = request.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;
        if status.is_success() {
            serde_json::from_slice(&bytes).map_err(|_| ClientError::RequestFailed { status })
        } else {
            match serde_json::from_slice::<ErrorBody>(&bytes) {
                Ok(body) => Err(ClientError::Api { status, body }),
                Err(_) => Err(ClientError::RequestFailed { status }),
            }
        }
    }
}
