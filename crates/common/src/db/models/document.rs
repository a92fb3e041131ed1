//! Patient document entity (uploaded files and their text extraction state)

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Text extraction pipeline state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    Pending,
    Completed,
    Failed,
}

impl From<String> for ExtractionStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "completed" => ExtractionStatus::Completed,
            "failed" => ExtractionStatus::Failed,
            _ => ExtractionStatus::Pending,
        }
    }
}

impl From<ExtractionStatus> for String {
    fn from(status: ExtractionStatus) -> Self {
        status.as_str().to_string()
    }
}

impl ExtractionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionStatus::Pending => "pending",
            ExtractionStatus::Completed => "completed",
            ExtractionStatus::Failed => "failed",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "documents")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub patient_id: Uuid,

    pub uploaded_by: Uuid,

    #[sea_orm(column_type = "Text")]
    pub title: String,

    #[sea_orm(column_type = "Text")]
    pub category: String,

    #[sea_orm(column_type = "Text")]
    pub file_name: String,

    #[sea_orm(column_type = "Text")]
    pub mime_type: String,

    pub file_size: i64,

    /// Path relative to the uploads directory
    #[sea_orm(column_type = "Text")]
    pub storage_path: String,

    #[sea_orm(column_type = "Text")]
    pub extraction_status: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub extracted_text: Option<String>,

    pub is_sensitive: bool,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    pub fn status(&self) -> ExtractionStatus {
        ExtractionStatus::from(self.extraction_status.clone())
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::patient::Entity",
        from = "Column::PatientId",
        to = "super::patient::Column::Id"
    )]
    Patient,

    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UploadedBy",
        to = "super::user::Column::Id"
    )]
    Uploader,
}

impl Related<super::patient::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Patient.def()
    }
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Uploader.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
