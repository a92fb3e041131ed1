//! Schema migrations, data normalisation and integrity checks (`migrate` binary)

use crate::backup::BackupManager;
use chrono::{DateTime, Utc};
use clap::Subcommand;
use medesk_common::{
    config::AppConfig,
    db::{IntegrityCounts, Repository},
    AppError, Result,
};
use tracing::{error, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Subcommand)]
pub enum MigrateAction {
    /// Apply pending migrations and normalise patient rows
    #[command(alias = "up")]
    Migrate,
    /// Revert the most recently applied migration
    #[command(alias = "down")]
    Rollback,
    /// Take a full backup before schema work
    Backup,
    /// Report referential and CPF integrity violations
    Check,
}

impl MigrateAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrateAction::Migrate => "migrate",
            MigrateAction::Rollback => "rollback",
            MigrateAction::Backup => "backup",
            MigrateAction::Check => "check",
        }
    }
}

/// Rows touched by the post-migration data pass
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Normalisation {
    pub cpfs_rewritten: u64,
    pub lists_filled: u64,
}

/// Apply pending migrations, then normalise existing rows
pub async fn migrate(repo: &Repository) -> Result<(usize, Normalisation)> {
    let applied = repo.pool().run_migrations().await?;
    info!(applied, "Migrations applied");

    let normalisation = normalise(repo).await?;
    Ok((applied, normalisation))
}

/// Digits-only CPFs and `[]` for NULL patient list columns
pub async fn normalise(repo: &Repository) -> Result<Normalisation> {
    let cpfs_rewritten = repo.normalize_patient_cpfs().await?;
    let lists_filled = repo.fill_empty_patient_lists().await?;

    info!(cpfs_rewritten, lists_filled, "Patient data normalised");
    Ok(Normalisation {
        cpfs_rewritten,
        lists_filled,
    })
}

pub async fn rollback(repo: &Repository) -> Result<Option<i64>> {
    let reverted = repo.pool().rollback_latest().await?;
    match reverted {
        Some(version) => info!(version, "Rolled back migration"),
        None => warn!("No applied migration to roll back"),
    }
    Ok(reverted)
}

/// Run the integrity queries; any violation is an error
pub async fn check(repo: &Repository) -> Result<IntegrityCounts> {
    let counts = repo.integrity_counts().await?;
    evaluate_integrity(&counts)?;
    Ok(counts)
}

/// Log each non-zero counter and fail when the total is non-zero
pub fn evaluate_integrity(counts: &IntegrityCounts) -> Result<()> {
    for (name, value) in integrity_rows(counts) {
        if value > 0 {
            error!(check = name, violations = value, "Integrity violation");
        }
    }

    if counts.is_clean() {
        info!("Integrity check passed");
        Ok(())
    } else {
        Err(AppError::IntegrityViolation {
            violations: counts.total(),
        })
    }
}

pub fn integrity_rows(counts: &IntegrityCounts) -> [(&'static str, u64); 6] {
    [
        ("orphan_documents", counts.orphan_documents),
        ("orphan_notes", counts.orphan_notes),
        ("documents_missing_uploader", counts.documents_missing_uploader),
        ("notes_missing_author", counts.notes_missing_author),
        ("duplicate_cpfs", counts.duplicate_cpfs),
        ("malformed_cpfs", counts.malformed_cpfs),
    ]
}

pub async fn run(
    action: MigrateAction,
    repo: &Repository,
    config: &AppConfig,
    now: DateTime<Utc>,
) -> Result<()> {
    info!(action = action.as_str(), "Running migration action");

    match action {
        MigrateAction::Migrate => migrate(repo).await.map(|_| ()),
        MigrateAction::Rollback => rollback(repo).await.map(|_| ()),
        MigrateAction::Backup => BackupManager::with_pg_tools(config)
            .create_backup(now)
            .await
            .map(|_| ()),
        MigrateAction::Check => check(repo).await.map(|_| ()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_integrity_passes() {
        assert!(evaluate_integrity(&IntegrityCounts::default()).is_ok());
    }

    #[test]
    fn test_violations_fail_with_total() {
        let counts = IntegrityCounts {
            orphan_notes: 3,
            malformed_cpfs: 1,
            ..Default::default()
        };

        let err = evaluate_integrity(&counts).unwrap_err();
        assert!(matches!(err, AppError::IntegrityViolation { violations: 4 }));
    }

    #[test]
    fn test_integrity_rows_cover_every_counter() {
        let counts = IntegrityCounts {
            orphan_documents: 1,
            orphan_notes: 2,
            documents_missing_uploader: 3,
            notes_missing_author: 4,
            duplicate_cpfs: 5,
            malformed_cpfs: 6,
        };

        let sum: u64 = integrity_rows(&counts).iter().map(|(_, v)| v).sum();
        assert_eq!(sum, counts.total());
    }
}
