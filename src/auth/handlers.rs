use axum::{
    extract::{FromRef, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use tracing::{error, info, instrument, warn};

use crate::{
    auth::{
        dto::{
            AuthResponse, LoginRequest, MeResponse, OkBody, RegisterRequest,
            SendVerificationRequest, VerifyParams,
        },
        extractors::AuthUser,
        jwt::JwtKeys,
        password::{hash_password, verify_password},
        repo::{InsertError, User},
    },
    error::ApiError,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/send-verification", post(send_verification))
        .route("/auth/verify", get(verify))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(me))
}

/// Opaque single-use token embedded in verification links.
fn new_verification_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    Base64UrlUnpadded::encode_string(&bytes)
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    let (Some(name), Some(email), Some(password)) = (
        payload.name.filter(|v| !v.is_empty()),
        payload.email.filter(|v| !v.is_empty()),
        payload.password.filter(|v| !v.is_empty()),
    ) else {
        warn!("registration with missing fields");
        return Err(ApiError::MissingFields);
    };
    let phone = payload.phone.filter(|v| !v.is_empty());

    // The unique index still decides a race between this check and the insert.
    if User::find_by_email(&state.db, &email).await?.is_some() {
        warn!(%email, "email already registered");
        return Err(ApiError::EmailInUse);
    }

    let hash = hash_password(&password)?;
    let user = User::create(
        &state.db,
        &name,
        &email,
        phone.as_deref(),
        &hash,
        state.config.verify_on_register,
    )
    .await
    .map_err(|e| match e {
        InsertError::DuplicateEmail => {
            warn!(%email, "email already registered (lost insert race)");
            ApiError::EmailInUse
        }
        InsertError::Db(e) => ApiError::Database(e),
    })?;

    let keys = JwtKeys::from_ref(&state);
    let token = keys.sign(user.id, &user.email)?;

    info!(user_id = user.id, email = %user.email, "user registered");
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            user: user.into(),
            token,
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let (Some(email), Some(password)) = (
        payload.email.filter(|v| !v.is_empty()),
        payload.password.filter(|v| !v.is_empty()),
    ) else {
        warn!("login with missing fields");
        return Err(ApiError::MissingFields);
    };

    // Unknown email and wrong password answer identically so the endpoint
    // cannot be used to probe which addresses are registered.
    let Some(user) = User::find_by_email(&state.db, &email).await? else {
        warn!(%email, "login unknown email");
        return Err(ApiError::InvalidCredentials);
    };

    if !verify_password(&password, &user.password_hash)? {
        warn!(user_id = user.id, "login invalid password");
        return Err(ApiError::InvalidCredentials);
    }

    let keys = JwtKeys::from_ref(&state);
    let token = keys.sign(user.id, &user.email)?;

    info!(user_id = user.id, email = %user.email, "user logged in");
    Ok(Json(AuthResponse {
        user: user.into(),
        token,
    }))
}

#[instrument(skip(state))]
pub async fn me(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> Result<Json<MeResponse>, ApiError> {
    let user = User::find_by_id(&state.db, claims.sub)
        .await?
        .ok_or_else(|| {
            warn!(user_id = claims.sub, "token for vanished user");
            ApiError::NotFound
        })?;
    Ok(Json(MeResponse { user: user.into() }))
}

#[instrument(skip(state, payload))]
pub async fn send_verification(
    State(state): State<AppState>,
    Json(payload): Json<SendVerificationRequest>,
) -> Result<Json<OkBody>, ApiError> {
    let Some(email) = payload.email.filter(|v| !v.is_empty()) else {
        return Err(ApiError::MissingEmail);
    };
    let Some(user) = User::find_by_email(&state.db, &email).await? else {
        return Err(ApiError::NotFound);
    };
    if user.verified {
        return Ok(Json(OkBody { ok: true }));
    }

    // An outstanding token is reused so repeated requests keep pointing at
    // the same link until it is consumed.
    let token = match user.verification_token {
        Some(token) => token,
        None => {
            let token = new_verification_token();
            User::set_verification_token(&state.db, user.id, &token).await?;
            token
        }
    };

    let link = format!("{}/auth/verify?token={}", state.config.base_url, token);
    let mailer = state.mailer.clone();
    let to = user.email.clone();
    // Fire and forget: a dispatch failure never blocks the ok response.
    tokio::spawn(async move {
        if let Err(e) = mailer.send_verification(&to, &link).await {
            error!(error = %e, %to, "verification mail dispatch failed");
        }
    });

    Ok(Json(OkBody { ok: true }))
}

#[instrument(skip(state, params))]
pub async fn verify(
    State(state): State<AppState>,
    Query(params): Query<VerifyParams>,
) -> Result<Response, ApiError> {
    let Some(token) = params.token.filter(|v| !v.is_empty()) else {
        return Err(ApiError::VerificationTokenInvalid);
    };
    let Some(user) = User::find_by_verification_token(&state.db, &token).await? else {
        warn!("unknown or already consumed verification token");
        return Err(ApiError::VerificationTokenInvalid);
    };

    User::mark_verified(&state.db, user.id).await?;

    // Hand the client a fresh bearer token so the redirect can log the user
    // straight in.
    let keys = JwtKeys::from_ref(&state);
    let jwt = keys.sign(user.id, &user.email)?;
    info!(user_id = user.id, email = %user.email, "email verified");

    let location = format!("{}/auth-verified?token={}", state.config.client_url, jwt);
    Ok((StatusCode::FOUND, [(header::LOCATION, location)]).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::build_app;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::util::ServiceExt;

    async fn test_state() -> AppState {
        AppState::ephemeral().await.expect("ephemeral state")
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_with_auth(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn send(state: &AppState, request: Request<Body>) -> (StatusCode, Value) {
        let response = build_app(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    fn register_body(email: &str) -> Value {
        json!({ "name": "Ana", "email": email, "password": "Secret123" })
    }

    #[tokio::test]
    async fn register_returns_user_and_working_token() {
        let state = test_state().await;
        let (status, body) = send(
            &state,
            post_json(
                "/auth/register",
                json!({ "name": "Ana", "email": "ana@x.com", "password": "Secret123", "phone": "555-1234" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["user"]["email"], "ana@x.com");
        assert_eq!(body["user"]["name"], "Ana");
        assert_eq!(body["user"]["phone"], "555-1234");
        assert!(body["user"].get("password_hash").is_none());

        let token = body["token"].as_str().expect("token present");
        let claims = JwtKeys::from_ref(&state).verify(token).expect("valid jwt");
        assert_eq!(claims.email, "ana@x.com");
        assert_eq!(claims.sub, body["user"]["id"].as_i64().unwrap());
    }

    #[tokio::test]
    async fn register_rejects_duplicate_email() {
        let state = test_state().await;
        let (status, _) = send(&state, post_json("/auth/register", register_body("ana@x.com"))).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = send(
            &state,
            post_json(
                "/auth/register",
                json!({ "name": "Someone Else", "email": "ana@x.com", "password": "Other9999" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "email_in_use");
    }

    #[tokio::test]
    async fn register_requires_all_fields() {
        let state = test_state().await;
        for body in [
            json!({}),
            json!({ "name": "Ana", "email": "ana@x.com" }),
            json!({ "name": "", "email": "ana@x.com", "password": "Secret123" }),
        ] {
            let (status, body) = send(&state, post_json("/auth/register", body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["error"], "missing_fields");
        }
    }

    #[tokio::test]
    async fn login_does_not_reveal_which_credential_was_wrong() {
        let state = test_state().await;
        send(&state, post_json("/auth/register", register_body("ana@x.com"))).await;

        let (wrong_pw_status, wrong_pw_body) = send(
            &state,
            post_json("/auth/login", json!({ "email": "ana@x.com", "password": "wrong" })),
        )
        .await;
        let (unknown_status, unknown_body) = send(
            &state,
            post_json("/auth/login", json!({ "email": "ghost@x.com", "password": "wrong" })),
        )
        .await;

        assert_eq!(wrong_pw_status, StatusCode::UNAUTHORIZED);
        assert_eq!(unknown_status, wrong_pw_status);
        assert_eq!(wrong_pw_body, unknown_body);
        assert_eq!(wrong_pw_body["error"], "invalid_credentials");
    }

    #[tokio::test]
    async fn login_issues_token_that_resolves_via_me() {
        let state = test_state().await;
        send(&state, post_json("/auth/register", register_body("ana@x.com"))).await;

        let (status, body) = send(
            &state,
            post_json(
                "/auth/login",
                json!({ "email": "ana@x.com", "password": "Secret123" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let token = body["token"].as_str().expect("token present");

        let (status, body) = send(&state, get_with_auth("/me", Some(token))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["email"], "ana@x.com");
    }

    #[tokio::test]
    async fn me_rejects_missing_and_invalid_tokens() {
        let state = test_state().await;

        let (status, body) = send(&state, get_with_auth("/me", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "missing_token");

        let (status, body) = send(&state, get_with_auth("/me", Some("garbage"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "invalid_token");
    }

    #[tokio::test]
    async fn me_returns_not_found_when_user_row_is_gone() {
        let state = test_state().await;
        let (_, body) = send(&state, post_json("/auth/register", register_body("ana@x.com"))).await;
        let token = body["token"].as_str().unwrap().to_owned();

        sqlx::query("DELETE FROM users")
            .execute(&state.db)
            .await
            .unwrap();

        let (status, body) = send(&state, get_with_auth("/me", Some(&token))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");
    }

    #[tokio::test]
    async fn send_verification_validates_input() {
        let state = test_state().await;

        let (status, body) = send(&state, post_json("/auth/send-verification", json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "missing_email");

        let (status, body) = send(
            &state,
            post_json("/auth/send-verification", json!({ "email": "ghost@x.com" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");
    }

    #[tokio::test]
    async fn send_verification_is_a_noop_for_verified_accounts() {
        let state = test_state().await;
        send(&state, post_json("/auth/register", register_body("ana@x.com"))).await;

        let (status, body) = send(
            &state,
            post_json("/auth/send-verification", json!({ "email": "ana@x.com" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);

        let user = User::find_by_email(&state.db, "ana@x.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.verification_token, None);
    }

    #[tokio::test]
    async fn repeated_requests_reuse_the_outstanding_token() {
        let state = test_state().await;
        User::create(&state.db, "Bea", "bea@x.com", None, "hash", false)
            .await
            .unwrap();

        let (status, _) = send(
            &state,
            post_json("/auth/send-verification", json!({ "email": "bea@x.com" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let first = User::find_by_email(&state.db, "bea@x.com")
            .await
            .unwrap()
            .unwrap()
            .verification_token
            .expect("token persisted");

        send(
            &state,
            post_json("/auth/send-verification", json!({ "email": "bea@x.com" })),
        )
        .await;
        let second = User::find_by_email(&state.db, "bea@x.com")
            .await
            .unwrap()
            .unwrap()
            .verification_token
            .expect("token still present");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn verify_consumes_the_token_and_redirects_with_a_fresh_jwt() {
        let state = test_state().await;
        let user = User::create(&state.db, "Bea", "bea@x.com", None, "hash", false)
            .await
            .unwrap();
        send(
            &state,
            post_json("/auth/send-verification", json!({ "email": "bea@x.com" })),
        )
        .await;
        let token = User::find_by_email(&state.db, "bea@x.com")
            .await
            .unwrap()
            .unwrap()
            .verification_token
            .unwrap();

        let response = build_app(state.clone())
            .oneshot(get_with_auth(&format!("/auth/verify?token={token}"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        let location = response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .expect("redirect location");
        let prefix = format!("{}/auth-verified?token=", state.config.client_url);
        let jwt = location
            .strip_prefix(prefix.as_str())
            .expect("redirects to the client continuation");
        let claims = JwtKeys::from_ref(&state).verify(jwt).expect("fresh jwt");
        assert_eq!(claims.sub, user.id);

        let reloaded = User::find_by_id(&state.db, user.id).await.unwrap().unwrap();
        assert!(reloaded.verified);
        assert_eq!(reloaded.verification_token, None);

        // The consumed token is the only invalidation mechanism.
        let (status, body) = send(
            &state,
            get_with_auth(&format!("/auth/verify?token={token}"), None),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_or_expired_token");
    }

    #[tokio::test]
    async fn verify_rejects_missing_or_unknown_tokens() {
        let state = test_state().await;
        for uri in ["/auth/verify", "/auth/verify?token=", "/auth/verify?token=nope"] {
            let (status, body) = send(&state, get_with_auth(uri, None)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["error"], "invalid_or_expired_token");
        }
    }

    #[tokio::test]
    async fn registration_policy_can_leave_accounts_unverified() {
        let state = test_state().await;
        let mut config = (*state.config).clone();
        config.verify_on_register = false;
        let state = AppState::from_parts(state.db.clone(), Arc::new(config), state.mailer.clone());

        let (status, _) = send(&state, post_json("/auth/register", register_body("ana@x.com"))).await;
        assert_eq!(status, StatusCode::CREATED);

        let user = User::find_by_email(&state.db, "ana@x.com")
            .await
            .unwrap()
            .unwrap();
        assert!(!user.verified);

        // The confirmation flow is the path to verified for this policy.
        send(
            &state,
            post_json("/auth/send-verification", json!({ "email": "ana@x.com" })),
        )
        .await;
        let token = User::find_by_email(&state.db, "ana@x.com")
            .await
            .unwrap()
            .unwrap()
            .verification_token
            .expect("token issued");
        send(
            &state,
            get_with_auth(&format!("/auth/verify?token={token}"), None),
        )
        .await;
        let user = User::find_by_email(&state.db, "ana@x.com")
            .await
            .unwrap()
            .unwrap();
        assert!(user.verified);
    }
}
