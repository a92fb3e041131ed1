//! Patient record handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use super::Pagination;
use crate::AppState;
use medesk_common::{
    auth::AuthContext,
    db::{models::{Patient, UserRole}, NewPatient, Page, PatientChanges, Repository},
    domain::{is_valid_cpf, normalize_cpf},
    errors::{AppError, Result},
};

const BLOOD_TYPES: [&str; 8] = ["A+", "A-", "B+", "B-", "AB+", "AB-", "O+", "O-"];

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePatientRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,

    /// Formatted (`000.000.000-00`) or bare digits
    pub cpf: String,

    pub birth_date: Option<NaiveDate>,

    #[validate(length(max = 20))]
    pub gender: Option<String>,

    pub blood_type: Option<String>,

    #[validate(email)]
    pub email: Option<String>,

    #[validate(length(max = 30))]
    pub phone: Option<String>,

    #[serde(default)]
    pub allergies: Vec<String>,

    #[serde(default)]
    pub medications: Vec<String>,

    #[serde(default)]
    pub pre_existing_conditions: Vec<String>,

    #[serde(default)]
    pub privacy_consent: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdatePatientRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,

    pub birth_date: Option<NaiveDate>,

    #[validate(length(max = 20))]
    pub gender: Option<String>,

    pub blood_type: Option<String>,

    #[validate(email)]
    pub email: Option<String>,

    #[validate(length(max = 30))]
    pub phone: Option<String>,

    pub allergies: Option<Vec<String>>,

    pub medications: Option<Vec<String>>,

    pub pre_existing_conditions: Option<Vec<String>>,

    pub privacy_consent: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListPatientsQuery {
    pub search: Option<String>,

    pub page: Option<u64>,

    pub per_page: Option<u64>,
}

fn check_blood_type(value: Option<&str>) -> Result<()> {
    match value {
        Some(bt) if !BLOOD_TYPES.contains(&bt) => {
            Err(AppError::validation("blood_type", format!("unknown blood type {}", bt)))
        }
        _ => Ok(()),
    }
}

fn check_birth_date(value: Option<NaiveDate>) -> Result<()> {
    match value {
        Some(date) if date > chrono::Utc::now().date_naive() => {
            Err(AppError::validation("birth_date", "birth date is in the future"))
        }
        _ => Ok(()),
    }
}

/// Trim entries and drop blanks
fn clean_list(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

pub async fn list_patients(
    State(state): State<AppState>,
    _auth: AuthContext,
    Query(query): Query<ListPatientsQuery>,
) -> Result<Json<Page<Patient>>> {
    let (page, per_page) = Pagination {
        page: query.page,
        per_page: query.per_page,
    }
    .resolve();
    let repo = Repository::new(state.db.clone());

    Ok(Json(repo.list_patients(query.search.as_deref(), page, per_page).await?))
}

pub async fn create_patient(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(request): Json<CreatePatientRequest>,
) -> Result<(StatusCode, Json<Patient>)> {
    auth.require_role(&[UserRole::Doctor, UserRole::Nurse, UserRole::Assistant])?;
    request.validate()?;

    if !is_valid_cpf(&request.cpf) {
        return Err(AppError::validation("cpf", "invalid CPF"));
    }
    check_blood_type(request.blood_type.as_deref())?;
    check_birth_date(request.birth_date)?;

    let repo = Repository::new(state.db.clone());
    let patient = repo
        .create_patient(NewPatient {
            name: request.name.trim().to_string(),
            cpf: normalize_cpf(&request.cpf),
            birth_date: request.birth_date,
            gender: request.gender,
            blood_type: request.blood_type,
            email: request.email,
            phone: request.phone,
            allergies: clean_list(request.allergies),
            medications: clean_list(request.medications),
            pre_existing_conditions: clean_list(request.pre_existing_conditions),
            privacy_consent: request.privacy_consent,
        })
        .await?;

    tracing::info!(patient_id = %patient.id, created_by = %auth.user_id, "Patient created");

    Ok((StatusCode::CREATED, Json(patient)))
}

pub async fn get_patient(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<Json<Patient>> {
    let repo = Repository::new(state.db.clone());

    repo.find_patient_by_id(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::PatientNotFound { id: id.to_string() })
}

pub async fn update_patient(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdatePatientRequest>,
) -> Result<Json<Patient>> {
    auth.require_role(&[UserRole::Doctor, UserRole::Nurse, UserRole::Assistant])?;
    request.validate()?;
    check_blood_type(request.blood_type.as_deref())?;
    check_birth_date(request.birth_date)?;

    let repo = Repository::new(state.db.clone());
    let patient = repo
        .update_patient(
            id,
            PatientChanges {
                name: request.name.map(|n| n.trim().to_string()),
                birth_date: request.birth_date,
                gender: request.gender,
                blood_type: request.blood_type,
                email: request.email,
                phone: request.phone,
                allergies: request.allergies.map(clean_list),
                medications: request.medications.map(clean_list),
                pre_existing_conditions: request.pre_existing_conditions.map(clean_list),
                privacy_consent: request.privacy_consent,
            },
        )
        .await?;

    Ok(Json(patient))
}

/// Removes the patient along with their documents and notes
pub async fn delete_patient(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    auth.require_role(&[UserRole::Doctor])?;

    let repo = Repository::new(state.db.clone());
    if !repo.delete_patient(id).await? {
        return Err(AppError::PatientNotFound { id: id.to_string() });
    }

    tracing::info!(patient_id = %id, deleted_by = %auth.user_id, "Patient deleted");

    Ok(StatusCode::NO_CONTENT)
}
