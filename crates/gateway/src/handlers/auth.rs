//! Login and session identity

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use medesk_common::{
    auth::{verify_password, AuthContext},
    db::{models::User, Repository},
    errors::{AppError, Result},
};

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,

    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    pub user: User,
}

pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>> {
    request.validate()?;

    let repo = Repository::new(state.db.clone());

    // Same error for unknown email and wrong password
    let user = repo
        .find_user_by_email(&request.email)
        .await?
        .filter(|u| verify_password(&request.password, &u.password_hash))
        .ok_or(AppError::InvalidCredentials)?;

    if !user.is_active {
        return Err(AppError::Forbidden {
            message: "account is disabled".to_string(),
        });
    }

    let token = state.jwt.generate_token(user.id, user.user_role())?;
    repo.record_login(user.id).await?;

    tracing::info!(user_id = %user.id, role = %user.role, "User logged in");

    Ok(Json(LoginResponse {
        token,
        token_type: "Bearer",
        expires_in: state.jwt.expiration_secs(),
        user,
    }))
}

pub async fn me(State(state): State<AppState>, auth: AuthContext) -> Result<Json<User>> {
    let repo = Repository::new(state.db.clone());

    repo.find_user_by_id(auth.user_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::UserNotFound { id: auth.user_id.to_string() })
}
