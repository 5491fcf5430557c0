use serde::{Deserialize, Serialize};

use crate::store::{Role, User};

/// Request body for account creation.
#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(default = "default_role")]
    pub role: Role,
    pub phone: Option<String>,
    pub county: Option<String>,
    pub sub_county: Option<String>,
    pub ward: Option<String>,
    pub chw_account_id: Option<String>,
}

fn default_role() -> Role {
    Role::Chw
}

/// Request body for login.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Returned after signup or login. `User` never serializes its password hash
/// (the hash is not part of the struct at all).
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: User,
}
