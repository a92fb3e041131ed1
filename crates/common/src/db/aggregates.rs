//! Aggregate query targets and result rows
//!
//! Every grouped/filtered aggregate goes through one of the closed enums in
//! this module, so the SQL fragments spliced into statements are static.

use serde::{Deserialize, Serialize};

/// Tables that carry `created_at` and participate in counts and trends
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackedTable {
    Patients,
    Documents,
    Notes,
    Users,
}

impl TrackedTable {
    pub const ALL: [TrackedTable; 4] = [
        TrackedTable::Patients,
        TrackedTable::Documents,
        TrackedTable::Notes,
        TrackedTable::Users,
    ];

    pub fn table(&self) -> &'static str {
        match self {
            TrackedTable::Patients => "patients",
            TrackedTable::Documents => "documents",
            TrackedTable::Notes => "notes",
            TrackedTable::Users => "users",
        }
    }

    /// Row filter applied to every count on this table
    pub(crate) fn live_filter(&self) -> &'static str {
        match self {
            TrackedTable::Notes => "deleted_at IS NULL",
            _ => "TRUE",
        }
    }
}

/// Columns that can be grouped and counted
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GroupKey {
    PatientGender,
    PatientBloodType,
    DocumentCategory,
    DocumentMimeType,
    DocumentExtractionStatus,
    NoteType,
    UserRole,
    UserSpecialty,
}

impl GroupKey {
    pub(crate) fn source(&self) -> (TrackedTable, &'static str) {
        match self {
            GroupKey::PatientGender => (TrackedTable::Patients, "gender"),
            GroupKey::PatientBloodType => (TrackedTable::Patients, "blood_type"),
            GroupKey::DocumentCategory => (TrackedTable::Documents, "category"),
            GroupKey::DocumentMimeType => (TrackedTable::Documents, "mime_type"),
            GroupKey::DocumentExtractionStatus => (TrackedTable::Documents, "extraction_status"),
            GroupKey::NoteType => (TrackedTable::Notes, "note_type"),
            GroupKey::UserRole => (TrackedTable::Users, "role"),
            GroupKey::UserSpecialty => (TrackedTable::Users, "specialty"),
        }
    }
}

/// Patient JSONB list columns
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ListKey {
    Allergies,
    Medications,
    Conditions,
}

impl ListKey {
    pub(crate) fn column(&self) -> &'static str {
        match self {
            ListKey::Allergies => "allergies",
            ListKey::Medications => "medications",
            ListKey::Conditions => "pre_existing_conditions",
        }
    }
}

/// Boolean columns whose true-count is reported
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlagKey {
    PatientPrivacyConsent,
    DocumentSensitive,
    UserActive,
    UserVerified,
}

impl FlagKey {
    pub(crate) fn source(&self) -> (TrackedTable, &'static str) {
        match self {
            FlagKey::PatientPrivacyConsent => (TrackedTable::Patients, "privacy_consent"),
            FlagKey::DocumentSensitive => (TrackedTable::Documents, "is_sensitive"),
            FlagKey::UserActive => (TrackedTable::Users, "is_active"),
            FlagKey::UserVerified => (TrackedTable::Users, "is_verified"),
        }
    }
}

/// One GROUP BY bucket; NULL values are reported as `"unknown"`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCount {
    pub key: String,
    pub count: u64,
}

impl CategoryCount {
    pub fn new(key: impl Into<String>, count: u64) -> Self {
        Self { key: key.into(), count }
    }
}

/// Count for `key` in a grouped result, 0 when absent
pub fn count_for(groups: &[CategoryCount], key: &str) -> u64 {
    groups
        .iter()
        .find(|g| g.key == key)
        .map(|g| g.count)
        .unwrap_or(0)
}

/// Document storage footprint
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SizeStats {
    pub total_bytes: i64,
    pub average_bytes: f64,
    pub max_bytes: i64,
}

/// Referential consistency counters
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityCounts {
    pub orphan_documents: u64,
    pub orphan_notes: u64,
    pub documents_missing_uploader: u64,
    pub notes_missing_author: u64,
    pub duplicate_cpfs: u64,
    pub malformed_cpfs: u64,
}

impl IntegrityCounts {
    pub fn total(&self) -> u64 {
        self.orphan_documents
            + self.orphan_notes
            + self.documents_missing_uploader
            + self.notes_missing_author
            + self.duplicate_cpfs
            + self.malformed_cpfs
    }

    pub fn is_clean(&self) -> bool {
        self.total() == 0
    }
}

/// Per-table statistics from `pg_stat_user_tables`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableStats {
    pub table: String,
    pub live_rows: i64,
    pub dead_rows: i64,
    pub seq_scans: i64,
    pub index_scans: i64,
    pub total_bytes: i64,
    pub last_vacuum: Option<String>,
    pub last_analyze: Option<String>,
}

impl TableStats {
    /// Dead tuples as a share of all tuples, in percent
    pub fn dead_ratio(&self) -> f64 {
        let all = self.live_rows + self.dead_rows;
        if all <= 0 {
            return 0.0;
        }
        self.dead_rows as f64 / all as f64 * 100.0
    }
}

/// Index never used since statistics were last reset
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnusedIndex {
    pub table: String,
    pub index: String,
    pub size_bytes: i64,
}
