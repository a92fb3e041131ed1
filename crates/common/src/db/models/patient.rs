//! Patient entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "patients")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub name: String,

    /// Digits only, unique
    #[sea_orm(column_type = "Text", unique)]
    pub cpf: String,

    pub birth_date: Option<Date>,

    #[sea_orm(column_type = "Text", nullable)]
    pub gender: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub blood_type: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub email: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub phone: Option<String>,

    /// JSONB array of strings
    #[sea_orm(column_type = "JsonBinary")]
    pub allergies: Json,

    /// JSONB array of strings
    #[sea_orm(column_type = "JsonBinary")]
    pub medications: Json,

    /// JSONB array of strings
    #[sea_orm(column_type = "JsonBinary")]
    pub pre_existing_conditions: Json,

    pub privacy_consent: bool,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    pub fn allergy_list(&self) -> Vec<String> {
        string_list(&self.allergies)
    }

    pub fn medication_list(&self) -> Vec<String> {
        string_list(&self.medications)
    }

    pub fn condition_list(&self) -> Vec<String> {
        string_list(&self.pre_existing_conditions)
    }
}

/// Read a JSONB string array, skipping non-string members
pub fn string_list(value: &Json) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::document::Entity", on_delete = "Cascade")]
    Documents,

    #[sea_orm(has_many = "super::note::Entity", on_delete = "Cascade")]
    Notes,
}

impl Related<super::document::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Documents.def()
    }
}

impl Related<super::note::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Notes.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
