//! Clinical note handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use medesk_common::{
    auth::AuthContext,
    db::{
        models::{Note, UserRole, NOTE_TYPES},
        NewNote, NoteChanges, Repository,
    },
    errors::{AppError, Result},
};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateNoteRequest {
    #[validate(length(min = 1, max = 300))]
    pub title: String,

    #[validate(length(min = 1, max = 100000))]
    pub content: String,

    pub note_type: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateNoteRequest {
    #[validate(length(min = 1, max = 300))]
    pub title: Option<String>,

    #[validate(length(min = 1, max = 100000))]
    pub content: Option<String>,

    pub note_type: Option<String>,
}

fn check_note_type(value: &str) -> Result<()> {
    if NOTE_TYPES.contains(&value) {
        Ok(())
    } else {
        Err(AppError::validation("note_type", format!("unknown note type {}", value)))
    }
}

pub async fn list_notes(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<Vec<Note>>> {
    auth.require_role(&[UserRole::Doctor, UserRole::Nurse])?;

    let repo = Repository::new(state.db.clone());
    if repo.find_patient_by_id(patient_id).await?.is_none() {
        return Err(AppError::PatientNotFound { id: patient_id.to_string() });
    }

    Ok(Json(repo.list_notes_for_patient(patient_id).await?))
}

pub async fn create_note(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(patient_id): Path<Uuid>,
    Json(request): Json<CreateNoteRequest>,
) -> Result<(StatusCode, Json<Note>)> {
    auth.require_role(&[UserRole::Doctor, UserRole::Nurse])?;
    request.validate()?;

    let note_type = request.note_type.unwrap_or_else(|| "consultation".to_string());
    check_note_type(&note_type)?;

    let repo = Repository::new(state.db.clone());
    let note = repo
        .create_note(NewNote {
            patient_id,
            user_id: auth.user_id,
            title: request.title,
            content: request.content,
            note_type,
        })
        .await?;

    tracing::info!(note_id = %note.id, patient_id = %patient_id, "Note created");

    Ok((StatusCode::CREATED, Json(note)))
}

/// Only the author (or an admin) may edit a note
pub async fn update_note(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateNoteRequest>,
) -> Result<Json<Note>> {
    request.validate()?;
    if let Some(ref note_type) = request.note_type {
        check_note_type(note_type)?;
    }

    let repo = Repository::new(state.db.clone());
    let existing = repo
        .find_note_by_id(id)
        .await?
        .ok_or_else(|| AppError::NoteNotFound { id: id.to_string() })?;

    if existing.user_id != auth.user_id {
        auth.require_role(&[UserRole::Admin])?;
    }

    let note = repo
        .update_note(
            id,
            NoteChanges {
                title: request.title,
                content: request.content,
                note_type: request.note_type,
            },
        )
        .await?;

    Ok(Json(note))
}

pub async fn delete_note(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    let repo = Repository::new(state.db.clone());
    let existing = repo
        .find_note_by_id(id)
        .await?
        .ok_or_else(|| AppError::NoteNotFound { id: id.to_string() })?;

    if existing.user_id != auth.user_id {
        auth.require_role(&[UserRole::Admin])?;
    }

    repo.soft_delete_note(id).await?;

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_type_check() {
        assert!(check_note_type("evolution").is_ok());
        assert!(check_note_type("gossip").is_err());
    }
}
