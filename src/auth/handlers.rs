use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    Json,
};
use lazy_static::lazy_static;
use regex::Regex;
use time::OffsetDateTime;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::dto::{AuthResponse, LoginRequest, SignupRequest};
use super::jwt::JwtKeys;
use super::password::{hash_password, verify_password};
use super::CurrentUser;
use crate::error::ApiError;
use crate::state::AppState;
use crate::store::User;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

#[instrument(skip(state, payload))]
pub async fn signup(
    State(state): State<AppState>,
    Json(mut payload): Json<SignupRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    payload.email = payload.email.trim().to_lowercase();

    if payload.name.trim().len() < 2 {
        return Err(ApiError::Validation(
            "Name must be at least 2 characters".into(),
        ));
    }
    if !is_valid_email(&payload.email) {
        warn!(email = %payload.email, "invalid email");
        return Err(ApiError::Validation("Invalid email address".into()));
    }
    if payload.password.len() < 6 {
        return Err(ApiError::Validation(
            "Password must be at least 6 characters".into(),
        ));
    }

    let hash = hash_password(&payload.password)?;
    let now = OffsetDateTime::now_utc();
    let user = User {
        id: Uuid::new_v4(),
        name: payload.name.trim().to_string(),
        email: payload.email.clone(),
        role: payload.role,
        phone: payload.phone,
        county: payload.county,
        sub_county: payload.sub_county,
        ward: payload.ward,
        chw_account_id: payload.chw_account_id,
        created_at: now,
        updated_at: now,
    };

    let Some(user) = state.store.create_user(user, &hash).await? else {
        warn!(email = %payload.email, "email already registered");
        return Err(ApiError::Validation("Email already registered".into()));
    };

    let token = JwtKeys::from_ref(&state).sign(&user)?;
    info!(user_id = %user.id, role = %user.role, "user registered");
    Ok((StatusCode::CREATED, Json(AuthResponse { token, user })))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(mut payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    payload.email = payload.email.trim().to_lowercase();

    let Some((user, stored_hash)) = state.store.user_by_email(&payload.email).await? else {
        warn!(email = %payload.email, "login unknown email");
        return Err(ApiError::Authentication("Invalid credentials".into()));
    };

    if !verify_password(&payload.password, &stored_hash)? {
        warn!(email = %payload.email, user_id = %user.id, "login invalid password");
        return Err(ApiError::Authentication("Invalid credentials".into()));
    }

    let token = JwtKeys::from_ref(&state).sign(&user)?;
    info!(user_id = %user.id, role = %user.role, "user logged in");
    Ok(Json(AuthResponse { token, user }))
}

#[instrument(skip(state))]
pub async fn me(
    State(state): State<AppState>,
    caller: CurrentUser,
) -> Result<Json<User>, ApiError> {
    let user = state
        .store
        .user_by_id(caller.id)
        .await?
        .ok_or_else(|| ApiError::Authentication("User not found".into()))?;
    Ok(Json(user))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Role;

    #[test]
    fn email_validation() {
        assert!(is_valid_email("chw@afya.ke"));
        assert!(is_valid_email("a.b+c@sub.example.com"));
        assert!(!is_valid_email("not-an-email"));
        assert!(!is_valid_email("missing@tld"));
        assert!(!is_valid_email("two words@example.com"));
    }

    #[tokio::test]
    async fn signup_then_login_roundtrip() {
        let state = AppState::fake();
        let (status, Json(created)) = signup(
            State(state.clone()),
            Json(SignupRequest {
                name: "Akinyi Otieno".into(),
                email: "Akinyi@Afya.KE".into(),
                password: "demo123".into(),
                role: Role::Chw,
                phone: None,
                county: Some("Kisumu".into()),
                sub_county: None,
                ward: None,
                chw_account_id: None,
            }),
        )
        .await
        .expect("signup succeeds");
        assert_eq!(status, StatusCode::CREATED);
        // Email is normalized to lowercase.
        assert_eq!(created.user.email, "akinyi@afya.ke");

        let Json(resp) = login(
            State(state),
            Json(LoginRequest {
                email: "akinyi@afya.ke".into(),
                password: "demo123".into(),
            }),
        )
        .await
        .expect("login succeeds");
        assert_eq!(resp.user.id, created.user.id);
        assert!(!resp.token.is_empty());
    }

    #[tokio::test]
    async fn duplicate_signup_is_validation_error() {
        let state = AppState::fake();
        let request = || SignupRequest {
            name: "Mary Wekesa".into(),
            email: "mary@afya.ke".into(),
            password: "demo123".into(),
            role: Role::Supervisor,
            phone: None,
            county: None,
            sub_county: None,
            ward: None,
            chw_account_id: None,
        };
        signup(State(state.clone()), Json(request()))
            .await
            .expect("first signup");
        let err = signup(State(state), Json(request())).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn login_with_wrong_password_is_uniform_401() {
        let state = AppState::fake();
        signup(
            State(state.clone()),
            Json(SignupRequest {
                name: "Grace".into(),
                email: "grace@afya.ke".into(),
                password: "demo123".into(),
                role: Role::Admin,
                phone: None,
                county: None,
                sub_county: None,
                ward: None,
                chw_account_id: None,
            }),
        )
        .await
        .expect("signup");

        let wrong_password = login(
            State(state.clone()),
            Json(LoginRequest {
                email: "grace@afya.ke".into(),
                password: "nope".into(),
            }),
        )
        .await
        .unwrap_err();
        let unknown_email = login(
            State(state),
            Json(LoginRequest {
                email: "nobody@afya.ke".into(),
                password: "demo123".into(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(wrong_password.to_string(), "Invalid credentials");
        assert_eq!(unknown_email.to_string(), "Invalid credentials");
    }

    #[tokio::test]
    async fn short_password_rejected() {
        let state = AppState::fake();
        let err = signup(
            State(state),
            Json(SignupRequest {
                name: "Jo".into(),
                email: "jo@afya.ke".into(),
                password: "12345".into(),
                role: Role::Chw,
                phone: None,
                county: None,
                sub_county: None,
                ward: None,
                chw_account_id: None,
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }
}
