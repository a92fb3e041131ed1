//! Staff account handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use super::Pagination;
use crate::AppState;
use medesk_common::{
    auth::{hash_password, AuthContext},
    db::{models::{User, UserRole}, NewUser, Page, Repository, UserChanges},
    errors::{AppError, Result},
};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,

    #[validate(email)]
    pub email: String,

    #[validate(length(min = 8, max = 128))]
    pub password: String,

    pub role: UserRole,

    #[validate(length(max = 100))]
    pub specialty: Option<String>,

    #[validate(length(max = 50))]
    pub license_number: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateUserRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,

    pub role: Option<UserRole>,

    #[validate(length(max = 100))]
    pub specialty: Option<String>,

    pub is_active: Option<bool>,

    pub is_verified: Option<bool>,
}

pub async fn list_users(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Page<User>>> {
    auth.require_role(&[UserRole::Admin])?;

    let (page, per_page) = pagination.resolve();
    let repo = Repository::new(state.db.clone());

    Ok(Json(repo.list_users(page, per_page).await?))
}

pub async fn create_user(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(request): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<User>)> {
    auth.require_role(&[UserRole::Admin])?;
    request.validate()?;

    let repo = Repository::new(state.db.clone());
    let user = repo
        .create_user(NewUser {
            name: request.name,
            email: request.email,
            password_hash: hash_password(&request.password)?,
            role: request.role,
            specialty: request.specialty,
            license_number: request.license_number,
        })
        .await?;

    tracing::info!(user_id = %user.id, created_by = %auth.user_id, "User created");

    Ok((StatusCode::CREATED, Json(user)))
}

/// Staff may read their own record; admins may read anyone's
pub async fn get_user(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<Json<User>> {
    if auth.user_id != id {
        auth.require_role(&[UserRole::Admin])?;
    }

    let repo = Repository::new(state.db.clone());
    repo.find_user_by_id(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::UserNotFound { id: id.to_string() })
}

pub async fn update_user(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateUserRequest>,
) -> Result<Json<User>> {
    auth.require_role(&[UserRole::Admin])?;
    request.validate()?;

    let repo = Repository::new(state.db.clone());
    let user = repo
        .update_user(
            id,
            UserChanges {
                name: request.name,
                role: request.role,
                specialty: request.specialty,
                is_active: request.is_active,
                is_verified: request.is_verified,
            },
        )
        .await?;

    Ok(Json(user))
}
