//! SeaORM entity models
//!
//! Database entities for MedDesk

mod user;
mod patient;
mod document;
mod note;

pub use user::{
    Entity as UserEntity,
    Model as User,
    ActiveModel as UserActiveModel,
    Column as UserColumn,
    UserRole,
};

pub use patient::{
    Entity as PatientEntity,
    Model as Patient,
    ActiveModel as PatientActiveModel,
    Column as PatientColumn,
    string_list,
};

pub use document::{
    Entity as DocumentEntity,
    Model as Document,
    ActiveModel as DocumentActiveModel,
    Column as DocumentColumn,
    ExtractionStatus,
};

pub use note::{
    Entity as NoteEntity,
    Model as Note,
    ActiveModel as NoteActiveModel,
    Column as NoteColumn,
    NOTE_TYPES,
};
