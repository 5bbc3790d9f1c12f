use serde::{Deserialize, Serialize};

use crate::auth::repo::User;

/// Request body for registration. Fields are optional at the boundary so
/// absent and empty values both map to the same validation failure.
#[derive(Debug, Deserialize, Serialize, Default)]
pub struct RegisterRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub phone: Option<String>,
}

/// Request body for login.
#[derive(Debug, Deserialize, Serialize, Default)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

/// Request body for re-sending a verification link.
#[derive(Debug, Deserialize, Serialize, Default)]
pub struct SendVerificationRequest {
    pub email: Option<String>,
}

/// Query string of the verification-link endpoint.
#[derive(Debug, Deserialize)]
pub struct VerifyParams {
    pub token: Option<String>,
}

/// Public projection of a user record; never carries the password hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicUser {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

impl From<User> for PublicUser {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
            phone: user.phone,
        }
    }
}

/// Response returned after register and login.
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResponse {
    pub user: PublicUser,
    pub token: String,
}

/// Response of the who-am-I endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct MeResponse {
    pub user: PublicUser,
}

/// Plain acknowledgement body.
#[derive(Debug, Serialize, Deserialize)]
pub struct OkBody {
    pub ok: bool,
}
