//! Repository pattern for database operations
//!
//! Provides a clean interface for all data access operations
//! with proper error handling. CRUD goes through SeaORM entities,
//! aggregates through raw statements.

use crate::db::aggregates::*;
use crate::db::models::*;
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    DatabaseTransaction, DbBackend, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QueryResult, Set, Statement, TransactionTrait, TryGetable,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One page of a listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: UserRole,
    pub specialty: Option<String>,
    pub license_number: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub name: Option<String>,
    pub role: Option<UserRole>,
    pub specialty: Option<String>,
    pub is_active: Option<bool>,
    pub is_verified: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct NewPatient {
    pub name: String,
    /// Digits only
    pub cpf: String,
    pub birth_date: Option<NaiveDate>,
    pub gender: Option<String>,
    pub blood_type: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub allergies: Vec<String>,
    pub medications: Vec<String>,
    pub pre_existing_conditions: Vec<String>,
    pub privacy_consent: bool,
}

impl NewPatient {
    /// Insertable model with a fresh id and timestamps
    pub fn into_active_model(self) -> PatientActiveModel {
        let now = Utc::now();
        PatientActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(self.name),
            cpf: Set(self.cpf),
            birth_date: Set(self.birth_date),
            gender: Set(self.gender),
            blood_type: Set(self.blood_type),
            email: Set(self.email),
            phone: Set(self.phone),
            allergies: Set(serde_json::json!(self.allergies)),
            medications: Set(serde_json::json!(self.medications)),
            pre_existing_conditions: Set(serde_json::json!(self.pre_existing_conditions)),
            privacy_consent: Set(self.privacy_consent),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PatientChanges {
    pub name: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub gender: Option<String>,
    pub blood_type: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub allergies: Option<Vec<String>>,
    pub medications: Option<Vec<String>>,
    pub pre_existing_conditions: Option<Vec<String>>,
    pub privacy_consent: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct NewDocument {
    pub patient_id: Uuid,
    pub uploaded_by: Uuid,
    pub title: String,
    pub category: String,
    pub file_name: String,
    pub mime_type: String,
    pub file_size: i64,
    pub storage_path: String,
    pub is_sensitive: bool,
}

#[derive(Debug, Clone)]
pub struct NewNote {
    pub patient_id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub content: String,
    pub note_type: String,
}

#[derive(Debug, Clone, Default)]
pub struct NoteChanges {
    pub title: Option<String>,
    pub content: Option<String>,
    pub note_type: Option<String>,
}

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get the read connection
    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    /// Get the write connection
    fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }

    /// Underlying pool
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    // ========================================================================
    // Health Check
    // ========================================================================

    /// Ping the database
    pub async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }

    // ========================================================================
    // User Operations
    // ========================================================================

    pub async fn create_user(&self, new: NewUser) -> Result<User> {
        if self.find_user_by_email(&new.email).await?.is_some() {
            return Err(AppError::Duplicate {
                message: format!("email {} already registered", new.email),
            });
        }

        let now = Utc::now();
        let user = UserActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(new.name),
            email: Set(new.email.to_lowercase()),
            password_hash: Set(new.password_hash),
            role: Set(new.role.as_str().to_string()),
            specialty: Set(new.specialty),
            license_number: Set(new.license_number),
            is_verified: Set(false),
            is_active: Set(true),
            last_login: Set(None),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        user.insert(self.write_conn()).await.map_err(Into::into)
    }

    pub async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        UserEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Case-insensitive email lookup
    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        UserEntity::find()
            .filter(UserColumn::Email.eq(email.to_lowercase()))
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    pub async fn list_users(&self, page: u64, per_page: u64) -> Result<Page<User>> {
        let paginator = UserEntity::find()
            .order_by_asc(UserColumn::Name)
            .paginate(self.read_conn(), per_page);

        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page).await?;

        Ok(Page { items, total, page, per_page })
    }

    pub async fn update_user(&self, id: Uuid, changes: UserChanges) -> Result<User> {
        let mut user: UserActiveModel = self
            .find_user_by_id(id)
            .await?
            .ok_or_else(|| AppError::UserNotFound { id: id.to_string() })?
            .into();

        if let Some(name) = changes.name {
            user.name = Set(name);
        }
        if let Some(role) = changes.role {
            user.role = Set(role.as_str().to_string());
        }
        if let Some(specialty) = changes.specialty {
            user.specialty = Set(Some(specialty));
        }
        if let Some(active) = changes.is_active {
            user.is_active = Set(active);
        }
        if let Some(verified) = changes.is_verified {
            user.is_verified = Set(verified);
        }
        user.updated_at = Set(Utc::now().into());

        user.update(self.write_conn()).await.map_err(Into::into)
    }

    pub async fn record_login(&self, id: Uuid) -> Result<()> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "UPDATE users SET last_login = NOW() WHERE id = $1",
            vec![id.into()],
        );

        self.write_conn().execute(stmt).await?;
        Ok(())
    }

    // ========================================================================
    // Patient Operations
    // ========================================================================

    /// Create a patient; the CPF must already be normalised
    pub async fn create_patient(&self, new: NewPatient) -> Result<Patient> {
        if self.find_patient_by_cpf(&new.cpf).await?.is_some() {
            return Err(AppError::Duplicate {
                message: "a patient with this CPF already exists".to_string(),
            });
        }

        new.into_active_model()
            .insert(self.write_conn())
            .await
            .map_err(Into::into)
    }

    pub async fn find_patient_by_id(&self, id: Uuid) -> Result<Option<Patient>> {
        PatientEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    pub async fn find_patient_by_cpf(&self, cpf: &str) -> Result<Option<Patient>> {
        PatientEntity::find()
            .filter(PatientColumn::Cpf.eq(cpf))
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// List patients ordered by name, optionally filtered by a name/CPF fragment
    pub async fn list_patients(
        &self,
        search: Option<&str>,
        page: u64,
        per_page: u64,
    ) -> Result<Page<Patient>> {
        let mut query = PatientEntity::find();

        if let Some(term) = search.map(str::trim).filter(|t| !t.is_empty()) {
            let pattern = format!("%{}%", term.to_lowercase());
            let cpf_digits = crate::domain::normalize_cpf(term);
            query = if cpf_digits.is_empty() {
                query.filter(Expr::cust_with_values("LOWER(name) LIKE $1", [pattern]))
            } else {
                query.filter(Expr::cust_with_values(
                    "(LOWER(name) LIKE $1 OR cpf LIKE $2)",
                    [pattern, format!("%{}%", cpf_digits)],
                ))
            };
        }

        let paginator = query
            .order_by_asc(PatientColumn::Name)
            .paginate(self.read_conn(), per_page);

        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page).await?;

        Ok(Page { items, total, page, per_page })
    }

    pub async fn update_patient(&self, id: Uuid, changes: PatientChanges) -> Result<Patient> {
        let mut patient: PatientActiveModel = self
            .find_patient_by_id(id)
            .await?
            .ok_or_else(|| AppError::PatientNotFound { id: id.to_string() })?
            .into();

        if let Some(name) = changes.name {
            patient.name = Set(name);
        }
        if let Some(birth_date) = changes.birth_date {
            patient.birth_date = Set(Some(birth_date));
        }
        if let Some(gender) = changes.gender {
            patient.gender = Set(Some(gender));
        }
        if let Some(blood_type) = changes.blood_type {
            patient.blood_type = Set(Some(blood_type));
        }
        if let Some(email) = changes.email {
            patient.email = Set(Some(email));
        }
        if let Some(phone) = changes.phone {
            patient.phone = Set(Some(phone));
        }
        if let Some(allergies) = changes.allergies {
            patient.allergies = Set(serde_json::json!(allergies));
        }
        if let Some(medications) = changes.medications {
            patient.medications = Set(serde_json::json!(medications));
        }
        if let Some(conditions) = changes.pre_existing_conditions {
            patient.pre_existing_conditions = Set(serde_json::json!(conditions));
        }
        if let Some(consent) = changes.privacy_consent {
            patient.privacy_consent = Set(consent);
        }
        patient.updated_at = Set(Utc::now().into());

        patient.update(self.write_conn()).await.map_err(Into::into)
    }

    /// Delete a patient together with their documents and notes
    pub async fn delete_patient(&self, id: Uuid) -> Result<bool> {
        let txn = self.write_conn().begin().await?;

        DocumentEntity::delete_many()
            .filter(DocumentColumn::PatientId.eq(id))
            .exec(&txn)
            .await?;
        NoteEntity::delete_many()
            .filter(NoteColumn::PatientId.eq(id))
            .exec(&txn)
            .await?;
        let result = PatientEntity::delete_by_id(id).exec(&txn).await?;

        txn.commit().await?;
        Ok(result.rows_affected > 0)
    }

    // ========================================================================
    // Document Operations
    // ========================================================================

    /// Create a document record; the patient must exist
    pub async fn create_document(&self, new: NewDocument) -> Result<Document> {
        let txn = self.write_conn().begin().await?;
        lock_patient(&txn, new.patient_id).await?;

        let now = Utc::now();
        let document = DocumentActiveModel {
            id: Set(Uuid::new_v4()),
            patient_id: Set(new.patient_id),
            uploaded_by: Set(new.uploaded_by),
            title: Set(new.title),
            category: Set(new.category),
            file_name: Set(new.file_name),
            mime_type: Set(new.mime_type),
            file_size: Set(new.file_size),
            storage_path: Set(new.storage_path),
            extraction_status: Set(ExtractionStatus::Pending.into()),
            extracted_text: Set(None),
            is_sensitive: Set(new.is_sensitive),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        let document = document.insert(&txn).await?;
        txn.commit().await?;
        Ok(document)
    }

    pub async fn find_document_by_id(&self, id: Uuid) -> Result<Option<Document>> {
        DocumentEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    pub async fn list_documents_for_patient(&self, patient_id: Uuid) -> Result<Vec<Document>> {
        DocumentEntity::find()
            .filter(DocumentColumn::PatientId.eq(patient_id))
            .order_by_desc(DocumentColumn::CreatedAt)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Record the outcome of text extraction
    pub async fn update_extraction(
        &self,
        id: Uuid,
        status: ExtractionStatus,
        extracted_text: Option<String>,
    ) -> Result<Document> {
        let mut document: DocumentActiveModel = self
            .find_document_by_id(id)
            .await?
            .ok_or_else(|| AppError::DocumentNotFound { id: id.to_string() })?
            .into();

        document.extraction_status = Set(status.into());
        if extracted_text.is_some() {
            document.extracted_text = Set(extracted_text);
        }
        document.updated_at = Set(Utc::now().into());

        document.update(self.write_conn()).await.map_err(Into::into)
    }

    pub async fn delete_document(&self, id: Uuid) -> Result<bool> {
        let result = DocumentEntity::delete_by_id(id)
            .exec(self.write_conn())
            .await?;

        Ok(result.rows_affected > 0)
    }

    // ========================================================================
    // Note Operations
    // ========================================================================

    /// Create a note; the patient must exist
    pub async fn create_note(&self, new: NewNote) -> Result<Note> {
        let txn = self.write_conn().begin().await?;
        lock_patient(&txn, new.patient_id).await?;

        let now = Utc::now();
        let note = NoteActiveModel {
            id: Set(Uuid::new_v4()),
            patient_id: Set(new.patient_id),
            user_id: Set(new.user_id),
            title: Set(new.title),
            content: Set(new.content),
            note_type: Set(new.note_type),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
            deleted_at: Set(None),
        };

        let note = note.insert(&txn).await?;
        txn.commit().await?;
        Ok(note)
    }

    /// Find a note that has not been soft-deleted
    pub async fn find_note_by_id(&self, id: Uuid) -> Result<Option<Note>> {
        NoteEntity::find_by_id(id)
            .filter(NoteColumn::DeletedAt.is_null())
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    pub async fn list_notes_for_patient(&self, patient_id: Uuid) -> Result<Vec<Note>> {
        NoteEntity::find()
            .filter(NoteColumn::PatientId.eq(patient_id))
            .filter(NoteColumn::DeletedAt.is_null())
            .order_by_desc(NoteColumn::CreatedAt)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    pub async fn update_note(&self, id: Uuid, changes: NoteChanges) -> Result<Note> {
        let mut note: NoteActiveModel = self
            .find_note_by_id(id)
            .await?
            .ok_or_else(|| AppError::NoteNotFound { id: id.to_string() })?
            .into();

        if let Some(title) = changes.title {
            note.title = Set(title);
        }
        if let Some(content) = changes.content {
            note.content = Set(content);
        }
        if let Some(note_type) = changes.note_type {
            note.note_type = Set(note_type);
        }
        note.updated_at = Set(Utc::now().into());

        note.update(self.write_conn()).await.map_err(Into::into)
    }

    /// Mark a note deleted; returns false if it was missing or already deleted
    pub async fn soft_delete_note(&self, id: Uuid) -> Result<bool> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "UPDATE notes SET deleted_at = NOW() WHERE id = $1 AND deleted_at IS NULL",
            vec![id.into()],
        );

        let result = self.write_conn().execute(stmt).await?;
        Ok(result.rows_affected() > 0)
    }

    // ========================================================================
    // Aggregates
    // ========================================================================

    /// Row count of a table (soft-deleted notes excluded)
    pub async fn count_rows(&self, table: TrackedTable) -> Result<u64> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {}",
            table.table(),
            table.live_filter()
        );
        self.scalar_count(&sql, vec![]).await
    }

    /// Count of rows where a boolean column is true
    pub async fn count_flag(&self, flag: FlagKey) -> Result<u64> {
        let (table, column) = flag.source();
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {} AND {}",
            table.table(),
            table.live_filter(),
            column
        );
        self.scalar_count(&sql, vec![]).await
    }

    /// Rows created in `[from, to)`
    pub async fn count_created_between(
        &self,
        table: TrackedTable,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<u64> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {} AND created_at >= $1 AND created_at < $2",
            table.table(),
            table.live_filter()
        );
        self.scalar_count(&sql, vec![from.into(), to.into()]).await
    }

    /// GROUP BY counts, largest first
    pub async fn group_counts(&self, key: GroupKey) -> Result<Vec<CategoryCount>> {
        let (table, column) = key.source();
        let sql = format!(
            "SELECT COALESCE({col}::text, 'unknown') AS key, COUNT(*) AS count \
             FROM {table} WHERE {filter} \
             GROUP BY 1 ORDER BY 2 DESC, 1 ASC",
            col = column,
            table = table.table(),
            filter = table.live_filter()
        );
        self.category_rows(&sql, vec![]).await
    }

    /// Most frequent entries of a patient list column
    pub async fn list_frequencies(&self, key: ListKey, limit: u64) -> Result<Vec<CategoryCount>> {
        let sql = format!(
            "SELECT LOWER(TRIM(item)) AS key, COUNT(*) AS count \
             FROM patients, jsonb_array_elements_text(COALESCE({col}, '[]'::jsonb)) AS item \
             GROUP BY 1 ORDER BY 2 DESC, 1 ASC LIMIT $1",
            col = key.column()
        );
        self.category_rows(&sql, vec![(limit as i64).into()]).await
    }

    /// Patients with at least one entry in a list column
    pub async fn count_patients_with_list(&self, key: ListKey) -> Result<u64> {
        let sql = format!(
            "SELECT COUNT(*) FROM patients WHERE jsonb_array_length(COALESCE({}, '[]'::jsonb)) > 0",
            key.column()
        );
        self.scalar_count(&sql, vec![]).await
    }

    /// All non-null birth dates
    pub async fn patient_birth_dates(&self) -> Result<Vec<NaiveDate>> {
        let stmt = Statement::from_string(
            DbBackend::Postgres,
            "SELECT birth_date FROM patients WHERE birth_date IS NOT NULL",
        );

        self.read_conn()
            .query_all(stmt)
            .await?
            .iter()
            .map(|row| column::<NaiveDate>(row, 0))
            .collect()
    }

    /// Distinct patients with at least one live note
    pub async fn count_patients_with_notes(&self) -> Result<u64> {
        self.scalar_count(
            "SELECT COUNT(DISTINCT patient_id) FROM notes WHERE deleted_at IS NULL",
            vec![],
        )
        .await
    }

    /// Distinct patients with at least one document
    pub async fn count_patients_with_documents(&self) -> Result<u64> {
        self.scalar_count("SELECT COUNT(DISTINCT patient_id) FROM documents", vec![])
            .await
    }

    /// Average length in characters of live note contents
    pub async fn average_note_length(&self) -> Result<f64> {
        let stmt = Statement::from_string(
            DbBackend::Postgres,
            "SELECT COALESCE(AVG(LENGTH(content)), 0)::float8 FROM notes WHERE deleted_at IS NULL",
        );
        match self.read_conn().query_one(stmt).await? {
            Some(row) => column::<f64>(&row, 0),
            None => Ok(0.0),
        }
    }

    pub async fn document_size_stats(&self) -> Result<SizeStats> {
        let stmt = Statement::from_string(
            DbBackend::Postgres,
            "SELECT COALESCE(SUM(file_size), 0)::bigint, \
                    COALESCE(AVG(file_size), 0)::float8, \
                    COALESCE(MAX(file_size), 0)::bigint \
             FROM documents",
        );

        match self.read_conn().query_one(stmt).await? {
            Some(row) => Ok(SizeStats {
                total_bytes: column(&row, 0)?,
                average_bytes: column(&row, 1)?,
                max_bytes: column(&row, 2)?,
            }),
            None => Ok(SizeStats::default()),
        }
    }

    /// Users whose last login is at or after `since`
    pub async fn count_users_logged_in_since(&self, since: DateTime<Utc>) -> Result<u64> {
        self.scalar_count(
            "SELECT COUNT(*) FROM users WHERE last_login >= $1",
            vec![since.into()],
        )
        .await
    }

    // ========================================================================
    // Integrity and Maintenance
    // ========================================================================

    /// Referential consistency counters
    pub async fn integrity_counts(&self) -> Result<IntegrityCounts> {
        let (
            orphan_documents,
            orphan_notes,
            documents_missing_uploader,
            notes_missing_author,
            duplicate_cpfs,
            malformed_cpfs,
        ) = futures::try_join!(
            self.scalar_count(
                "SELECT COUNT(*) FROM documents d \
                 WHERE NOT EXISTS (SELECT 1 FROM patients p WHERE p.id = d.patient_id)",
                vec![],
            ),
            self.scalar_count(
                "SELECT COUNT(*) FROM notes n WHERE n.deleted_at IS NULL \
                 AND NOT EXISTS (SELECT 1 FROM patients p WHERE p.id = n.patient_id)",
                vec![],
            ),
            self.scalar_count(
                "SELECT COUNT(*) FROM documents d \
                 WHERE NOT EXISTS (SELECT 1 FROM users u WHERE u.id = d.uploaded_by)",
                vec![],
            ),
            self.scalar_count(
                "SELECT COUNT(*) FROM notes n WHERE n.deleted_at IS NULL \
                 AND NOT EXISTS (SELECT 1 FROM users u WHERE u.id = n.user_id)",
                vec![],
            ),
            self.scalar_count(
                "SELECT COUNT(*) FROM (SELECT regexp_replace(cpf, '[^0-9]', '', 'g') AS digits \
                 FROM patients GROUP BY 1 HAVING COUNT(*) > 1) dup",
                vec![],
            ),
            self.scalar_count(
                "SELECT COUNT(*) FROM patients WHERE cpf !~ '^[0-9]{11}$'",
                vec![],
            ),
        )?;

        Ok(IntegrityCounts {
            orphan_documents,
            orphan_notes,
            documents_missing_uploader,
            notes_missing_author,
            duplicate_cpfs,
            malformed_cpfs,
        })
    }

    /// Rewrite CPFs containing non-digit characters to digits only.
    ///
    /// Rows whose normalised CPF would collide with an existing one, or with
    /// another row normalised in the same pass, are left untouched and show
    /// up in the integrity check.
    pub async fn normalize_patient_cpfs(&self) -> Result<u64> {
        let stmt = Statement::from_string(
            DbBackend::Postgres,
            "UPDATE patients p \
             SET cpf = regexp_replace(p.cpf, '[^0-9]', '', 'g'), updated_at = NOW() \
             WHERE p.cpf ~ '[^0-9]' \
               AND NOT EXISTS ( \
                   SELECT 1 FROM patients o \
                   WHERE o.id <> p.id AND o.cpf = regexp_replace(p.cpf, '[^0-9]', '', 'g')) \
               AND ( \
                   SELECT COUNT(*) FROM patients q \
                   WHERE regexp_replace(q.cpf, '[^0-9]', '', 'g') = regexp_replace(p.cpf, '[^0-9]', '', 'g')) = 1",
        );

        let result = self.write_conn().execute(stmt).await?;
        Ok(result.rows_affected())
    }

    /// Replace JSON nulls (and non-arrays) in patient list columns with `[]`
    pub async fn fill_empty_patient_lists(&self) -> Result<u64> {
        let mut total = 0;
        for key in [ListKey::Allergies, ListKey::Medications, ListKey::Conditions] {
            let sql = format!(
                "UPDATE patients SET {col} = '[]'::jsonb, updated_at = NOW() \
                 WHERE {col} IS NULL OR jsonb_typeof({col}) <> 'array'",
                col = key.column()
            );
            let result = self
                .write_conn()
                .execute(Statement::from_string(DbBackend::Postgres, sql))
                .await?;
            total += result.rows_affected();
        }
        Ok(total)
    }

    /// Refresh planner statistics
    pub async fn analyze_tables(&self) -> Result<()> {
        for table in TrackedTable::ALL {
            self.write_conn()
                .execute_unprepared(&format!("ANALYZE {}", table.table()))
                .await?;
        }
        Ok(())
    }

    pub async fn table_stats(&self) -> Result<Vec<TableStats>> {
        let stmt = Statement::from_string(
            DbBackend::Postgres,
            "SELECT relname::text, n_live_tup, n_dead_tup, \
                    COALESCE(seq_scan, 0), COALESCE(idx_scan, 0), \
                    pg_total_relation_size(relid), \
                    GREATEST(last_vacuum, last_autovacuum)::text, \
                    GREATEST(last_analyze, last_autoanalyze)::text \
             FROM pg_stat_user_tables \
             WHERE schemaname = 'public' \
             ORDER BY pg_total_relation_size(relid) DESC",
        );

        self.read_conn()
            .query_all(stmt)
            .await?
            .iter()
            .map(|row| {
                Ok(TableStats {
                    table: column(row, 0)?,
                    live_rows: column(row, 1)?,
                    dead_rows: column(row, 2)?,
                    seq_scans: column(row, 3)?,
                    index_scans: column(row, 4)?,
                    total_bytes: column(row, 5)?,
                    last_vacuum: column(row, 6)?,
                    last_analyze: column(row, 7)?,
                })
            })
            .collect()
    }

    pub async fn unused_indexes(&self) -> Result<Vec<UnusedIndex>> {
        let stmt = Statement::from_string(
            DbBackend::Postgres,
            "SELECT s.relname::text, s.indexrelname::text, pg_relation_size(s.indexrelid) \
             FROM pg_stat_user_indexes s \
             JOIN pg_index i ON i.indexrelid = s.indexrelid \
             WHERE s.idx_scan = 0 AND NOT i.indisunique AND NOT i.indisprimary \
             ORDER BY 3 DESC",
        );

        self.read_conn()
            .query_all(stmt)
            .await?
            .iter()
            .map(|row| {
                Ok(UnusedIndex {
                    table: column(row, 0)?,
                    index: column(row, 1)?,
                    size_bytes: column(row, 2)?,
                })
            })
            .collect()
    }

    /// Size of the current database in bytes
    pub async fn database_size(&self) -> Result<i64> {
        let stmt = Statement::from_string(
            DbBackend::Postgres,
            "SELECT pg_database_size(current_database())",
        );
        match self.read_conn().query_one(stmt).await? {
            Some(row) => column::<i64>(&row, 0),
            None => Ok(0),
        }
    }

    /// Run an arbitrary read-only probe and return its row count
    pub async fn run_probe(&self, sql: &str) -> Result<usize> {
        let stmt = Statement::from_string(DbBackend::Postgres, sql);
        Ok(self.read_conn().query_all(stmt).await?.len())
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn scalar_count(&self, sql: &str, values: Vec<sea_orm::Value>) -> Result<u64> {
        let stmt = Statement::from_sql_and_values(DbBackend::Postgres, sql, values);
        let count = match self.read_conn().query_one(stmt).await? {
            Some(row) => column::<i64>(&row, 0)?,
            None => 0,
        };
        Ok(count.max(0) as u64)
    }

    async fn category_rows(
        &self,
        sql: &str,
        values: Vec<sea_orm::Value>,
    ) -> Result<Vec<CategoryCount>> {
        let stmt = Statement::from_sql_and_values(DbBackend::Postgres, sql, values);
        self.read_conn()
            .query_all(stmt)
            .await?
            .iter()
            .map(|row| {
                Ok(CategoryCount {
                    key: column(row, 0)?,
                    count: column::<i64>(row, 1)?.max(0) as u64,
                })
            })
            .collect()
    }
}

/// Key-share lock on the patient row so it cannot be deleted before the
/// transaction commits
async fn lock_patient(txn: &DatabaseTransaction, id: Uuid) -> Result<()> {
    let stmt = Statement::from_sql_and_values(
        DbBackend::Postgres,
        "SELECT 1 FROM patients WHERE id = $1 FOR KEY SHARE",
        vec![id.into()],
    );

    match txn.query_one(stmt).await? {
        Some(_) => Ok(()),
        None => Err(AppError::PatientNotFound { id: id.to_string() }),
    }
}

/// Decode column `index` of a raw row; NULL in a non-Option column is an error
fn column<T: TryGetable>(row: &QueryResult, index: usize) -> Result<T> {
    Ok(row.try_get_by_index::<T>(index)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::SqlxPostgresConnector;
    use sqlx::PgPool;

    fn repository(pool: &PgPool) -> Repository {
        Repository::new(DbPool {
            primary: SqlxPostgresConnector::from_sqlx_postgres_pool(pool.clone()),
            replica: None,
        })
    }

    async fn insert_patient(pool: &PgPool, name: &str, cpf: &str) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO patients (id, name, cpf) VALUES ($1, $2, $3)")
            .bind(id)
            .bind(name)
            .bind(cpf)
            .execute(pool)
            .await
            .unwrap();
        id
    }

    async fn insert_user(pool: &PgPool, email: &str) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO users (id, name, email, password_hash, role) \
             VALUES ($1, 'Dr. Costa', $2, 'x', 'doctor')",
        )
        .bind(id)
        .bind(email)
        .execute(pool)
        .await
        .unwrap();
        id
    }

    async fn insert_note(pool: &PgPool, patient_id: Uuid, user_id: Uuid, deleted: bool) {
        sqlx::query(
            "INSERT INTO notes (id, patient_id, user_id, title, content, deleted_at) \
             VALUES ($1, $2, $3, 'Follow-up', 'Stable', CASE WHEN $4 THEN NOW() END)",
        )
        .bind(Uuid::new_v4())
        .bind(patient_id)
        .bind(user_id)
        .bind(deleted)
        .execute(pool)
        .await
        .unwrap();
    }

    async fn cpf_of(pool: &PgPool, id: Uuid) -> String {
        sqlx::query_scalar("SELECT cpf FROM patients WHERE id = $1")
            .bind(id)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[sqlx::test(migrator = "crate::db::MIGRATOR")]
    #[ignore = "needs a PostgreSQL server at DATABASE_URL"]
    async fn test_normalize_leaves_colliding_cpfs_untouched(pool: PgPool) {
        let dotted = insert_patient(&pool, "Ana", "529.982.247-25").await;
        let dashed = insert_patient(&pool, "Bia", "529982247-25").await;
        let clean = insert_patient(&pool, "Caio", "111.444.777-35").await;
        let repo = repository(&pool);

        assert_eq!(repo.normalize_patient_cpfs().await.unwrap(), 1);
        assert_eq!(cpf_of(&pool, dotted).await, "529.982.247-25");
        assert_eq!(cpf_of(&pool, dashed).await, "529982247-25");
        assert_eq!(cpf_of(&pool, clean).await, "11144477735");

        let counts = repo.integrity_counts().await.unwrap();
        assert_eq!(counts.duplicate_cpfs, 1);
        assert_eq!(counts.malformed_cpfs, 2);
    }

    #[sqlx::test(migrator = "crate::db::MIGRATOR")]
    #[ignore = "needs a PostgreSQL server at DATABASE_URL"]
    async fn test_normalize_skips_cpf_already_stored_as_digits(pool: PgPool) {
        insert_patient(&pool, "Ana", "52998224725").await;
        let formatted = insert_patient(&pool, "Ana Maria", "529.982.247-25").await;
        let repo = repository(&pool);

        assert_eq!(repo.normalize_patient_cpfs().await.unwrap(), 0);
        assert_eq!(cpf_of(&pool, formatted).await, "529.982.247-25");
    }

    #[sqlx::test(migrator = "crate::db::MIGRATOR")]
    #[ignore = "needs a PostgreSQL server at DATABASE_URL"]
    async fn test_fill_empty_patient_lists(pool: PgPool) {
        let id = insert_patient(&pool, "Ana", "52998224725").await;
        sqlx::query(
            "UPDATE patients SET allergies = '\"penicillin\"'::jsonb, medications = '{}'::jsonb \
             WHERE id = $1",
        )
        .bind(id)
        .execute(&pool)
        .await
        .unwrap();
        let repo = repository(&pool);

        assert_eq!(repo.fill_empty_patient_lists().await.unwrap(), 2);
        assert_eq!(repo.fill_empty_patient_lists().await.unwrap(), 0);

        let allergies: serde_json::Value =
            sqlx::query_scalar("SELECT allergies FROM patients WHERE id = $1")
                .bind(id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(allergies, serde_json::json!([]));
    }

    #[sqlx::test(migrator = "crate::db::MIGRATOR")]
    #[ignore = "needs a PostgreSQL server at DATABASE_URL"]
    async fn test_integrity_counts_orphans(pool: PgPool) {
        let patient = insert_patient(&pool, "Ana", "52998224725").await;
        let doctor = insert_user(&pool, "costa@clinic.test").await;
        let missing = Uuid::new_v4();

        sqlx::query(
            "INSERT INTO documents (id, patient_id, uploaded_by, title, category, file_name, mime_type, storage_path) \
             VALUES ($1, $2, $3, 'Exam', 'lab', 'exam.pdf', 'application/pdf', 'uploads/exam.pdf')",
        )
        .bind(Uuid::new_v4())
        .bind(missing)
        .bind(doctor)
        .execute(&pool)
        .await
        .unwrap();
        insert_note(&pool, patient, missing, false).await;
        // soft-deleted rows are ignored
        insert_note(&pool, missing, doctor, true).await;

        let counts = repository(&pool).integrity_counts().await.unwrap();
        assert_eq!(counts.orphan_documents, 1);
        assert_eq!(counts.orphan_notes, 0);
        assert_eq!(counts.documents_missing_uploader, 0);
        assert_eq!(counts.notes_missing_author, 1);
        assert_eq!(counts.duplicate_cpfs, 0);
        assert_eq!(counts.malformed_cpfs, 0);
    }

    #[sqlx::test(migrator = "crate::db::MIGRATOR")]
    #[ignore = "needs a PostgreSQL server at DATABASE_URL"]
    async fn test_count_rows_excludes_deleted_notes(pool: PgPool) {
        let patient = insert_patient(&pool, "Ana", "52998224725").await;
        let doctor = insert_user(&pool, "costa@clinic.test").await;
        insert_note(&pool, patient, doctor, false).await;
        insert_note(&pool, patient, doctor, true).await;
        let repo = repository(&pool);

        assert_eq!(repo.count_rows(TrackedTable::Notes).await.unwrap(), 1);
        assert_eq!(repo.count_rows(TrackedTable::Patients).await.unwrap(), 1);
        assert_eq!(repo.count_patients_with_notes().await.unwrap(), 1);
    }

    #[sqlx::test(migrator = "crate::db::MIGRATOR")]
    #[ignore = "needs a PostgreSQL server at DATABASE_URL"]
    async fn test_create_note_requires_patient(pool: PgPool) {
        let patient = insert_patient(&pool, "Ana", "52998224725").await;
        let doctor = insert_user(&pool, "costa@clinic.test").await;
        let repo = repository(&pool);
        let note = |patient_id| NewNote {
            patient_id,
            user_id: doctor,
            title: "Consultation".into(),
            content: "Blood pressure normal".into(),
            note_type: "consultation".into(),
        };

        let err = repo.create_note(note(Uuid::new_v4())).await.unwrap_err();
        assert!(matches!(err, AppError::PatientNotFound { .. }));
        assert_eq!(repo.count_rows(TrackedTable::Notes).await.unwrap(), 0);

        let created = repo.create_note(note(patient)).await.unwrap();
        assert_eq!(created.patient_id, patient);
    }
}
