//! Aggregate statistics shared by the analysis and report pipelines
//!
//! [`StatsSource`] is the read-only seam between the pipelines and the
//! database. Collectors turn its raw counts into the section structs that
//! end up in the JSON/HTML/CSV artifacts. Independent queries inside a
//! collector are issued concurrently.

use crate::pipeline::PipelineContext;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use medesk_common::{
    db::{
        count_for, CategoryCount, FlagKey, GroupKey, ListKey, Repository, SizeStats,
        TrackedTable,
    },
    domain::{percent_change, percentage, round2, AgeDistribution, Trend},
    Result,
};
use serde::{Deserialize, Serialize};

/// Number of entries kept in "most common" lists
pub const TOP_LIST_LIMIT: u64 = 10;

/// Read-only aggregates the pipelines depend on
#[async_trait::async_trait]
pub trait StatsSource: Send + Sync {
    async fn count_rows(&self, table: TrackedTable) -> Result<u64>;

    async fn count_flag(&self, flag: FlagKey) -> Result<u64>;

    /// Rows created in `[from, to)`
    async fn count_created_between(
        &self,
        table: TrackedTable,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<u64>;

    async fn group_counts(&self, key: GroupKey) -> Result<Vec<CategoryCount>>;

    async fn list_frequencies(&self, key: ListKey, limit: u64) -> Result<Vec<CategoryCount>>;

    async fn count_patients_with_list(&self, key: ListKey) -> Result<u64>;

    async fn patient_birth_dates(&self) -> Result<Vec<NaiveDate>>;

    async fn count_patients_with_notes(&self) -> Result<u64>;

    async fn count_patients_with_documents(&self) -> Result<u64>;

    async fn average_note_length(&self) -> Result<f64>;

    async fn document_size_stats(&self) -> Result<SizeStats>;

    async fn count_users_logged_in_since(&self, since: DateTime<Utc>) -> Result<u64>;
}

#[async_trait::async_trait]
impl StatsSource for Repository {
    async fn count_rows(&self, table: TrackedTable) -> Result<u64> {
        Repository::count_rows(self, table).await
    }

    async fn count_flag(&self, flag: FlagKey) -> Result<u64> {
        Repository::count_flag(self, flag).await
    }

    async fn count_created_between(
        &self,
        table: TrackedTable,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<u64> {
        Repository::count_created_between(self, table, from, to).await
    }

    async fn group_counts(&self, key: GroupKey) -> Result<Vec<CategoryCount>> {
        Repository::group_counts(self, key).await
    }

    async fn list_frequencies(&self, key: ListKey, limit: u64) -> Result<Vec<CategoryCount>> {
        Repository::list_frequencies(self, key, limit).await
    }

    async fn count_patients_with_list(&self, key: ListKey) -> Result<u64> {
        Repository::count_patients_with_list(self, key).await
    }

    async fn patient_birth_dates(&self) -> Result<Vec<NaiveDate>> {
        Repository::patient_birth_dates(self).await
    }

    async fn count_patients_with_notes(&self) -> Result<u64> {
        Repository::count_patients_with_notes(self).await
    }

    async fn count_patients_with_documents(&self) -> Result<u64> {
        Repository::count_patients_with_documents(self).await
    }

    async fn average_note_length(&self) -> Result<f64> {
        Repository::average_note_length(self).await
    }

    async fn document_size_stats(&self) -> Result<SizeStats> {
        Repository::document_size_stats(self).await
    }

    async fn count_users_logged_in_since(&self, since: DateTime<Utc>) -> Result<u64> {
        Repository::count_users_logged_in_since(self, since).await
    }
}

// ============================================================================
// Sections
// ============================================================================

/// Headline totals; later sections take their denominators from here
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Overview {
    pub total_patients: u64,
    pub total_documents: u64,
    pub total_notes: u64,
    pub total_users: u64,
    pub active_users: u64,
    pub new_patients: u64,
    pub new_documents: u64,
    pub new_notes: u64,
    /// Length of the "new" window in days
    pub window_days: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientStats {
    pub total: u64,
    pub by_gender: Vec<CategoryCount>,
    pub by_blood_type: Vec<CategoryCount>,
    pub age_distribution: AgeDistribution,
    pub without_birth_date: u64,
    pub privacy_consent: u64,
    pub privacy_consent_rate: f64,
    pub with_allergies: u64,
    pub with_medications: u64,
    pub with_conditions: u64,
    pub top_allergies: Vec<CategoryCount>,
    pub top_medications: Vec<CategoryCount>,
    pub top_conditions: Vec<CategoryCount>,
    pub with_documents: u64,
    pub with_notes: u64,
    pub without_notes_rate: f64,
}

/// Extraction pipeline breakdown
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionBreakdown {
    pub pending: u64,
    pub completed: u64,
    pub failed: u64,
    /// Completed share of all documents, in percent
    pub success_rate: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentStats {
    pub total: u64,
    pub by_category: Vec<CategoryCount>,
    pub by_mime_type: Vec<CategoryCount>,
    pub extraction_status: ExtractionBreakdown,
    pub sensitive: u64,
    pub sensitive_rate: f64,
    pub size: SizeStats,
    pub average_per_patient: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NoteStats {
    pub total: u64,
    pub by_type: Vec<CategoryCount>,
    pub average_length: f64,
    pub patients_with_notes: u64,
    pub average_per_patient: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UserStats {
    pub total: u64,
    pub active: u64,
    pub inactive: u64,
    pub verified: u64,
    pub unverified: u64,
    pub by_role: Vec<CategoryCount>,
    pub by_specialty: Vec<CategoryCount>,
    /// Users that logged in during the last window
    pub recently_active: u64,
}

/// Activity in the last window against the window before it
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub recent: u64,
    pub older: u64,
    pub change_pct: Option<f64>,
    pub trend: Trend,
}

impl TrendPoint {
    pub fn new(recent: u64, older: u64) -> Self {
        Self {
            recent,
            older,
            change_pct: percent_change(recent, older).map(round2),
            trend: Trend::classify(recent, older),
        }
    }
}

impl Default for TrendPoint {
    fn default() -> Self {
        TrendPoint::new(0, 0)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrendStats {
    pub window_days: i64,
    pub patients: TrendPoint,
    pub documents: TrendPoint,
    pub notes: TrendPoint,
    pub users: TrendPoint,
}

/// One line of a rendered trend table
#[derive(Clone, Debug, Serialize)]
pub struct TrendRow<'a> {
    pub entity: &'static str,
    pub point: &'a TrendPoint,
}

impl TrendStats {
    pub fn rows(&self) -> Vec<TrendRow<'_>> {
        [
            ("patients", &self.patients),
            ("documents", &self.documents),
            ("notes", &self.notes),
            ("users", &self.users),
        ]
        .into_iter()
        .map(|(entity, point)| TrendRow { entity, point })
        .collect()
    }
}

// ============================================================================
// Collectors
// ============================================================================

pub async fn collect_overview(ctx: &PipelineContext<'_>) -> Result<Overview> {
    let src = ctx.source;
    let since = ctx.now - ctx.trend_window;

    let (patients, documents, notes, users, active) = futures::try_join!(
        src.count_rows(TrackedTable::Patients),
        src.count_rows(TrackedTable::Documents),
        src.count_rows(TrackedTable::Notes),
        src.count_rows(TrackedTable::Users),
        src.count_flag(FlagKey::UserActive),
    )?;

    let (new_patients, new_documents, new_notes) = futures::try_join!(
        src.count_created_between(TrackedTable::Patients, since, ctx.now),
        src.count_created_between(TrackedTable::Documents, since, ctx.now),
        src.count_created_between(TrackedTable::Notes, since, ctx.now),
    )?;

    Ok(Overview {
        total_patients: patients,
        total_documents: documents,
        total_notes: notes,
        total_users: users,
        active_users: active,
        new_patients,
        new_documents,
        new_notes,
        window_days: ctx.trend_window.num_days(),
    })
}

/// Patient demographics; `total_patients` comes from the overview
pub async fn collect_patients(ctx: &PipelineContext<'_>, total_patients: u64) -> Result<PatientStats> {
    let src = ctx.source;

    let (by_gender, by_blood_type, birth_dates, consent) = futures::try_join!(
        src.group_counts(GroupKey::PatientGender),
        src.group_counts(GroupKey::PatientBloodType),
        src.patient_birth_dates(),
        src.count_flag(FlagKey::PatientPrivacyConsent),
    )?;

    let (with_allergies, with_medications, with_conditions) = futures::try_join!(
        src.count_patients_with_list(ListKey::Allergies),
        src.count_patients_with_list(ListKey::Medications),
        src.count_patients_with_list(ListKey::Conditions),
    )?;

    let (top_allergies, top_medications, top_conditions) = futures::try_join!(
        src.list_frequencies(ListKey::Allergies, TOP_LIST_LIMIT),
        src.list_frequencies(ListKey::Medications, TOP_LIST_LIMIT),
        src.list_frequencies(ListKey::Conditions, TOP_LIST_LIMIT),
    )?;

    let (with_documents, with_notes) = futures::try_join!(
        src.count_patients_with_documents(),
        src.count_patients_with_notes(),
    )?;

    let age_distribution = AgeDistribution::from_birth_dates(&birth_dates, ctx.now.year());

    Ok(PatientStats {
        total: total_patients,
        by_gender,
        by_blood_type,
        without_birth_date: total_patients.saturating_sub(age_distribution.total()),
        age_distribution,
        privacy_consent: consent,
        privacy_consent_rate: percentage(consent, total_patients),
        with_allergies,
        with_medications,
        with_conditions,
        top_allergies,
        top_medications,
        top_conditions,
        with_documents,
        with_notes,
        without_notes_rate: percentage(total_patients.saturating_sub(with_notes), total_patients),
    })
}

pub async fn collect_documents(
    ctx: &PipelineContext<'_>,
    total_documents: u64,
    total_patients: u64,
) -> Result<DocumentStats> {
    let src = ctx.source;

    let (by_category, by_mime_type, by_status, sensitive, size) = futures::try_join!(
        src.group_counts(GroupKey::DocumentCategory),
        src.group_counts(GroupKey::DocumentMimeType),
        src.group_counts(GroupKey::DocumentExtractionStatus),
        src.count_flag(FlagKey::DocumentSensitive),
        src.document_size_stats(),
    )?;

    let completed = count_for(&by_status, "completed");

    Ok(DocumentStats {
        total: total_documents,
        by_category,
        by_mime_type,
        extraction_status: ExtractionBreakdown {
            pending: count_for(&by_status, "pending"),
            completed,
            failed: count_for(&by_status, "failed"),
            success_rate: percentage(completed, total_documents),
        },
        sensitive,
        sensitive_rate: percentage(sensitive, total_documents),
        size: SizeStats {
            average_bytes: round2(size.average_bytes),
            ..size
        },
        average_per_patient: ratio(total_documents, total_patients),
    })
}

pub async fn collect_notes(
    ctx: &PipelineContext<'_>,
    total_notes: u64,
    total_patients: u64,
) -> Result<NoteStats> {
    let src = ctx.source;

    let (by_type, average_length, patients_with_notes) = futures::try_join!(
        src.group_counts(GroupKey::NoteType),
        src.average_note_length(),
        src.count_patients_with_notes(),
    )?;

    Ok(NoteStats {
        total: total_notes,
        by_type,
        average_length: round2(average_length),
        patients_with_notes,
        average_per_patient: ratio(total_notes, total_patients),
    })
}

pub async fn collect_users(ctx: &PipelineContext<'_>, total_users: u64) -> Result<UserStats> {
    let src = ctx.source;
    let since = ctx.now - ctx.trend_window;

    let (active, verified, by_role, by_specialty, recently_active) = futures::try_join!(
        src.count_flag(FlagKey::UserActive),
        src.count_flag(FlagKey::UserVerified),
        src.group_counts(GroupKey::UserRole),
        src.group_counts(GroupKey::UserSpecialty),
        src.count_users_logged_in_since(since),
    )?;

    Ok(UserStats {
        total: total_users,
        active,
        inactive: total_users.saturating_sub(active),
        verified,
        unverified: total_users.saturating_sub(verified),
        by_role,
        by_specialty,
        recently_active,
    })
}

/// Compare the last window with the one before it, per table
pub async fn collect_trends(ctx: &PipelineContext<'_>) -> Result<TrendStats> {
    let (patients, documents, notes, users) = futures::try_join!(
        trend_for(ctx, TrackedTable::Patients),
        trend_for(ctx, TrackedTable::Documents),
        trend_for(ctx, TrackedTable::Notes),
        trend_for(ctx, TrackedTable::Users),
    )?;

    Ok(TrendStats {
        window_days: ctx.trend_window.num_days(),
        patients,
        documents,
        notes,
        users,
    })
}

async fn trend_for(ctx: &PipelineContext<'_>, table: TrackedTable) -> Result<TrendPoint> {
    let recent_start = ctx.now - ctx.trend_window;
    let older_start = recent_start - ctx.trend_window;

    let (recent, older) = futures::try_join!(
        ctx.source.count_created_between(table, recent_start, ctx.now),
        ctx.source.count_created_between(table, older_start, recent_start),
    )?;

    Ok(TrendPoint::new(recent, older))
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        round2(part as f64 / whole as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{fixed_now, FakeStats};

    #[tokio::test]
    async fn test_overview_totals() {
        let source = FakeStats::sample();
        let ctx = PipelineContext::new(&source, fixed_now(), 30);

        let overview = collect_overview(&ctx).await.unwrap();
        assert_eq!(overview.total_patients, 10);
        assert_eq!(overview.total_documents, 20);
        assert_eq!(overview.total_users, 5);
        assert_eq!(overview.window_days, 30);
    }

    #[tokio::test]
    async fn test_patient_age_buckets_partition() {
        let source = FakeStats::sample();
        let ctx = PipelineContext::new(&source, fixed_now(), 30);

        let stats = collect_patients(&ctx, 10).await.unwrap();
        let with_birth_date = source.birth_dates.len() as u64;

        assert_eq!(stats.age_distribution.total(), with_birth_date);
        assert_eq!(stats.without_birth_date, 10 - with_birth_date);
        assert_eq!(stats.privacy_consent_rate, 80.0);
        assert_eq!(stats.without_notes_rate, 40.0);
    }

    #[tokio::test]
    async fn test_document_extraction_breakdown() {
        let source = FakeStats::sample();
        let ctx = PipelineContext::new(&source, fixed_now(), 30);

        let stats = collect_documents(&ctx, 20, 10).await.unwrap();
        assert_eq!(stats.extraction_status.completed, 14);
        assert_eq!(stats.extraction_status.failed, 2);
        assert_eq!(stats.extraction_status.pending, 4);
        assert_eq!(stats.extraction_status.success_rate, 70.0);
        assert_eq!(stats.average_per_patient, 2.0);
    }

    #[tokio::test]
    async fn test_trend_windows() {
        let source = FakeStats::sample();
        let ctx = PipelineContext::new(&source, fixed_now(), 30);

        let trends = collect_trends(&ctx).await.unwrap();
        assert_eq!(trends.patients.recent, 2);
        assert_eq!(trends.patients.older, 4);
        assert_eq!(trends.patients.trend, Trend::DecreasingFast);
        assert_eq!(trends.patients.change_pct, Some(-50.0));
    }

    #[tokio::test]
    async fn test_collector_propagates_errors() {
        let source = FakeStats {
            fail: true,
            ..FakeStats::sample()
        };
        let ctx = PipelineContext::new(&source, fixed_now(), 30);

        assert!(collect_overview(&ctx).await.is_err());
    }

    #[test]
    fn test_trend_point_without_history() {
        let point = TrendPoint::new(3, 0);
        assert_eq!(point.change_pct, None);
        assert_eq!(point.trend, Trend::Increasing);
    }
}
