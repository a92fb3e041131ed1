//! Live-database smoke checks (`selftest` binary)
//!
//! Every check runs even when an earlier one failed; the outcome is the
//! tally in [`TestResults`].

use medesk_common::{
    db::{models::PatientEntity, NewPatient, Repository, TrackedTable},
    domain::{is_valid_cpf, normalize_cpf},
    AppError, Result,
};
use sea_orm::{ActiveModelTrait, EntityTrait, TransactionTrait};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;
use validator::ValidateEmail;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TestResults {
    pub passed: u32,
    pub failed: u32,
    /// `name: error` for each failed check
    pub failures: Vec<String>,
}

impl TestResults {
    pub fn record(&mut self, name: &str, outcome: Result<()>) {
        match outcome {
            Ok(()) => {
                self.passed += 1;
                info!(check = name, "PASS");
            }
            Err(e) => {
                self.failed += 1;
                error!(check = name, error = %e, "FAIL");
                self.failures.push(format!("{}: {}", name, e));
            }
        }
    }

    pub fn total(&self) -> u32 {
        self.passed + self.failed
    }

    pub fn success_rate(&self) -> f64 {
        if self.total() == 0 {
            return 0.0;
        }
        self.passed as f64 / self.total() as f64 * 100.0
    }

    /// Error when at least one check failed
    pub fn into_result(self) -> Result<Self> {
        if self.failed == 0 {
            Ok(self)
        } else {
            Err(AppError::Internal {
                message: format!("{} of {} self-test check(s) failed", self.failed, self.total()),
            })
        }
    }
}

const CPF_CASES: &[(&str, bool)] = &[
    ("529.982.247-25", true),
    ("52998224725", true),
    ("111.444.777-35", true),
    ("529.982.247-24", false),
    ("000.000.000-00", false),
    ("123", false),
];

const EMAIL_CASES: &[(&str, bool)] = &[
    ("dr.silva@clinic.com.br", true),
    ("nurse+shift@example.org", true),
    ("no-at-sign.example.org", false),
    ("two@@example.org", false),
    ("", false),
];

pub async fn run(repo: &Repository) -> TestResults {
    let mut results = TestResults::default();

    results.record("database connectivity", repo.ping().await);
    results.record("entity counts", check_counts(repo).await);
    results.record("patient create/read/rollback", check_patient_transaction(repo).await);
    results.record("cpf validation", check_cases(CPF_CASES, is_valid_cpf));
    results.record("email validation", check_cases(EMAIL_CASES, |e| e.validate_email()));
    results.record("integrity queries", check_integrity(repo).await);

    info!(
        passed = results.passed,
        failed = results.failed,
        success_rate = format!("{:.1}%", results.success_rate()),
        "Self-test summary"
    );

    results
}

async fn check_counts(repo: &Repository) -> Result<()> {
    for table in TrackedTable::ALL {
        let count = repo.count_rows(table).await?;
        info!(table = table.table(), count, "Row count");
    }
    Ok(())
}

/// Insert and read back a throwaway patient inside a transaction that is
/// always rolled back
async fn check_patient_transaction(repo: &Repository) -> Result<()> {
    let txn = repo.pool().write().begin().await?;

    let probe = NewPatient {
        name: "Self-test Patient".to_string(),
        cpf: probe_cpf(Uuid::new_v4()),
        birth_date: None,
        gender: None,
        blood_type: None,
        email: None,
        phone: None,
        allergies: vec!["selftest".to_string()],
        medications: Vec::new(),
        pre_existing_conditions: Vec::new(),
        privacy_consent: true,
    };
    let expected_cpf = probe.cpf.clone();

    let inserted = probe.into_active_model().insert(&txn).await?;
    let found = PatientEntity::find_by_id(inserted.id).one(&txn).await?;
    txn.rollback().await?;

    match found {
        Some(patient) if patient.cpf == expected_cpf => Ok(()),
        Some(_) => Err(AppError::Internal {
            message: "patient read back with a different cpf".to_string(),
        }),
        None => Err(AppError::Internal {
            message: "inserted patient not visible inside its transaction".to_string(),
        }),
    }
}

async fn check_integrity(repo: &Repository) -> Result<()> {
    let counts = repo.integrity_counts().await?;
    if !counts.is_clean() {
        warn!(violations = counts.total(), "Integrity queries report violations");
    }
    Ok(())
}

fn check_cases<F>(cases: &[(&str, bool)], predicate: F) -> Result<()>
where
    F: Fn(&str) -> bool,
{
    let wrong: Vec<&str> = cases
        .iter()
        .filter(|(input, expected)| predicate(input) != *expected)
        .map(|(input, _)| *input)
        .collect();

    if wrong.is_empty() {
        Ok(())
    } else {
        Err(AppError::Internal {
            message: format!("misclassified: {}", wrong.join(", ")),
        })
    }
}

/// Valid CPF derived from the id, so concurrent runs do not collide
fn probe_cpf(seed: Uuid) -> String {
    let base: String = seed
        .as_bytes()
        .iter()
        .take(9)
        .map(|b| char::from(b'0' + b % 10))
        .collect();

    (0..100)
        .map(|suffix| format!("{}{:02}", base, suffix))
        .find(|candidate| is_valid_cpf(candidate))
        .map(|cpf| normalize_cpf(&cpf))
        .unwrap_or_else(|| "52998224725".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_results_tally_and_continue() {
        let mut results = TestResults::default();
        results.record("first", Ok(()));
        results.record("second", Err(AppError::Internal { message: "boom".into() }));
        results.record("third", Ok(()));

        assert_eq!(results.passed, 2);
        assert_eq!(results.failed, 1);
        assert_eq!(results.failures.len(), 1);
        assert!(results.failures[0].starts_with("second: "));
        assert!((results.success_rate() - 66.666).abs() < 0.01);
        assert!(results.into_result().is_err());
    }

    #[test]
    fn test_all_passed_is_ok() {
        let mut results = TestResults::default();
        results.record("only", Ok(()));
        assert!(results.into_result().is_ok());
        assert_eq!(TestResults::default().success_rate(), 0.0);
    }

    #[test]
    fn test_validation_cases_hold() {
        assert!(check_cases(CPF_CASES, is_valid_cpf).is_ok());
        assert!(check_cases(EMAIL_CASES, |e| e.validate_email()).is_ok());
    }

    #[test]
    fn test_check_cases_reports_misclassified_input() {
        let err = check_cases(&[("x", true)], |_| false).unwrap_err();
        assert!(err.to_string().contains("x"));
    }

    #[test]
    fn test_probe_cpf_is_valid_digits() {
        for _ in 0..20 {
            let cpf = probe_cpf(Uuid::new_v4());
            assert_eq!(cpf.len(), 11);
            assert!(is_valid_cpf(&cpf));
        }
    }
}
