//! Patient document handlers
//!
//! Only metadata is handled here; file bytes live under the uploads
//! directory and are written by the upload client.

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
        models::{Document, ExtractionStatus, UserRole},
        NewDocument, Repository,
    },
    errors::{AppError, Result},
};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateDocumentRequest {
    #[validate(length(min = 1, max = 300))]
    pub title: String,

    #[validate(length(min = 1, max = 50))]
    pub category: String,

    #[validate(length(min = 1, max = 255))]
    pub file_name: String,

    #[validate(length(min = 1, max = 100))]
    pub mime_type: String,

    #[validate(range(min = 0))]
    pub file_size: i64,

    #[validate(length(min = 1, max = 1024))]
    pub storage_path: String,

    #[serde(default)]
    pub is_sensitive: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpdateExtractionRequest {
    pub status: ExtractionStatus,
    pub extracted_text: Option<String>,
}

/// Reject paths that could escape the uploads directory
fn check_storage_path(path: &str) -> Result<()> {
    if path.starts_with('/') || path.split(['/', '\\']).any(|part| part == "..") {
        return Err(AppError::validation(
            "storage_path",
            "storage path must be relative to the uploads directory",
        ));
    }
    Ok(())
}

pub async fn list_documents(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<Vec<Document>>> {
    let repo = Repository::new(state.db.clone());

    if repo.find_patient_by_id(patient_id).await?.is_none() {
        return Err(AppError::PatientNotFound { id: patient_id.to_string() });
    }

    Ok(Json(repo.list_documents_for_patient(patient_id).await?))
}

pub async fn create_document(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(patient_id): Path<Uuid>,
    Json(request): Json<CreateDocumentRequest>,
) -> Result<(StatusCode, Json<Document>)> {
    request.validate()?;
    check_storage_path(&request.storage_path)?;

    let repo = Repository::new(state.db.clone());
    let document = repo
        .create_document(NewDocument {
            patient_id,
            uploaded_by: auth.user_id,
            title: request.title,
            category: request.category,
            file_name: request.file_name,
            mime_type: request.mime_type,
            file_size: request.file_size,
            storage_path: request.storage_path,
            is_sensitive: request.is_sensitive,
        })
        .await?;

    tracing::info!(
        document_id = %document.id,
        patient_id = %patient_id,
        size = document.file_size,
        "Document registered"
    );

    Ok((StatusCode::CREATED, Json(document)))
}

pub async fn get_document(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<Json<Document>> {
    let repo = Repository::new(state.db.clone());
    let document = repo
        .find_document_by_id(id)
        .await?
        .ok_or_else(|| AppError::DocumentNotFound { id: id.to_string() })?;

    if document.is_sensitive {
        auth.require_role(&[UserRole::Doctor, UserRole::Nurse])?;
    }

    Ok(Json(document))
}

pub async fn update_extraction(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateExtractionRequest>,
) -> Result<Json<Document>> {
    if request.status == ExtractionStatus::Completed && request.extracted_text.is_none() {
        return Err(AppError::MissingField {
            field: "extracted_text".to_string(),
        });
    }

    let repo = Repository::new(state.db.clone());
    let document = repo
        .update_extraction(id, request.status, request.extracted_text)
        .await?;

    tracing::info!(document_id = %id, status = request.status.as_str(), "Extraction updated");

    Ok(Json(document))
}

pub async fn delete_document(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    auth.require_role(&[UserRole::Doctor, UserRole::Nurse])?;

    let repo = Repository::new(state.db.clone());
    if !repo.delete_document(id).await? {
        return Err(AppError::DocumentNotFound { id: id.to_string() });
    }

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_path_check() {
        assert!(check_storage_path("2024/03/exam.pdf").is_ok());
        assert!(check_storage_path("/etc/passwd").is_err());
        assert!(check_storage_path("../config/.env").is_err());
        assert!(check_storage_path("a\\..\\b").is_err());
    }
}
