//! In-memory [`StatsSource`] for pipeline tests

use crate::stats::StatsSource;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use medesk_common::{
    db::{CategoryCount, FlagKey, GroupKey, ListKey, SizeStats, TrackedTable},
    AppError, Result,
};
use std::collections::HashMap;

/// Reference instant the sample data is laid out around
pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
}

#[derive(Clone, Debug, Default)]
pub struct FakeStats {
    pub rows: HashMap<TrackedTable, u64>,
    pub flags: HashMap<FlagKey, u64>,
    /// (recent window, older window) per table; the recent window ends at `now`
    pub created: HashMap<TrackedTable, (u64, u64)>,
    pub now: Option<DateTime<Utc>>,
    pub groups: HashMap<GroupKey, Vec<CategoryCount>>,
    pub lists: HashMap<ListKey, Vec<CategoryCount>>,
    pub birth_dates: Vec<NaiveDate>,
    pub patients_with_notes: u64,
    pub patients_with_documents: u64,
    pub average_note_length: f64,
    pub sizes: SizeStats,
    pub recently_logged_in: u64,
    /// Make every query fail
    pub fail: bool,
}

impl FakeStats {
    /// Small practice: 10 patients, 20 documents, 15 notes, 5 users
    pub fn sample() -> Self {
        let date = |y, m, d| NaiveDate::from_ymd_opt(y, m, d).unwrap();

        Self {
            rows: HashMap::from([
                (TrackedTable::Patients, 10),
                (TrackedTable::Documents, 20),
                (TrackedTable::Notes, 15),
                (TrackedTable::Users, 5),
            ]),
            flags: HashMap::from([
                (FlagKey::PatientPrivacyConsent, 8),
                (FlagKey::DocumentSensitive, 6),
                (FlagKey::UserActive, 4),
                (FlagKey::UserVerified, 5),
            ]),
            created: HashMap::from([
                (TrackedTable::Patients, (2, 4)),
                (TrackedTable::Documents, (6, 5)),
                (TrackedTable::Notes, (5, 5)),
                (TrackedTable::Users, (0, 0)),
            ]),
            now: Some(fixed_now()),
            groups: HashMap::from([
                (
                    GroupKey::DocumentExtractionStatus,
                    vec![
                        CategoryCount::new("completed", 14),
                        CategoryCount::new("pending", 4),
                        CategoryCount::new("failed", 2),
                    ],
                ),
                (
                    GroupKey::PatientGender,
                    vec![CategoryCount::new("female", 6), CategoryCount::new("male", 4)],
                ),
                (
                    GroupKey::UserRole,
                    vec![
                        CategoryCount::new("doctor", 2),
                        CategoryCount::new("nurse", 2),
                        CategoryCount::new("admin", 1),
                    ],
                ),
                (GroupKey::NoteType, vec![CategoryCount::new("consultation", 15)]),
            ]),
            lists: HashMap::from([(
                ListKey::Allergies,
                vec![CategoryCount::new("penicillin", 3), CategoryCount::new("latex", 1)],
            )]),
            birth_dates: vec![
                date(2010, 3, 1),  // 14
                date(1995, 7, 9),  // 29
                date(1980, 1, 20), // 44
                date(1970, 11, 2), // 54
                date(1959, 5, 5),  // 65
                date(1940, 8, 30), // 84
                date(1989, 2, 14), // 35
                date(2006, 12, 31), // 18
            ],
            patients_with_notes: 6,
            patients_with_documents: 7,
            average_note_length: 412.5,
            sizes: SizeStats {
                total_bytes: 2_000_000,
                average_bytes: 100_000.0,
                max_bytes: 750_000,
            },
            recently_logged_in: 3,
            fail: false,
        }
    }

    fn check(&self) -> Result<()> {
        if self.fail {
            Err(AppError::DatabaseConnection {
                message: "fake source unavailable".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait::async_trait]
impl StatsSource for FakeStats {
    async fn count_rows(&self, table: TrackedTable) -> Result<u64> {
        self.check()?;
        Ok(self.rows.get(&table).copied().unwrap_or(0))
    }

    async fn count_flag(&self, flag: FlagKey) -> Result<u64> {
        self.check()?;
        Ok(self.flags.get(&flag).copied().unwrap_or(0))
    }

    async fn count_created_between(
        &self,
        table: TrackedTable,
        _from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<u64> {
        self.check()?;
        let (recent, older) = self.created.get(&table).copied().unwrap_or((0, 0));
        Ok(if Some(to) == self.now { recent } else { older })
    }

    async fn group_counts(&self, key: GroupKey) -> Result<Vec<CategoryCount>> {
        self.check()?;
        Ok(self.groups.get(&key).cloned().unwrap_or_default())
    }

    async fn list_frequencies(&self, key: ListKey, limit: u64) -> Result<Vec<CategoryCount>> {
        self.check()?;
        let mut items = self.lists.get(&key).cloned().unwrap_or_default();
        items.truncate(limit as usize);
        Ok(items)
    }

    async fn count_patients_with_list(&self, key: ListKey) -> Result<u64> {
        self.check()?;
        Ok(self
            .lists
            .get(&key)
            .map(|items| items.iter().map(|c| c.count).sum())
            .unwrap_or(0))
    }

    async fn patient_birth_dates(&self) -> Result<Vec<NaiveDate>> {
        self.check()?;
        Ok(self.birth_dates.clone())
    }

    async fn count_patients_with_notes(&self) -> Result<u64> {
        self.check()?;
        Ok(self.patients_with_notes)
    }

    async fn count_patients_with_documents(&self) -> Result<u64> {
        self.check()?;
        Ok(self.patients_with_documents)
    }

    async fn average_note_length(&self) -> Result<f64> {
        self.check()?;
        Ok(self.average_note_length)
    }

    async fn document_size_stats(&self) -> Result<SizeStats> {
        self.check()?;
        Ok(self.sizes.clone())
    }

    async fn count_users_logged_in_since(&self, _since: DateTime<Utc>) -> Result<u64> {
        self.check()?;
        Ok(self.recently_logged_in)
    }
}
