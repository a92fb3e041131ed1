//! Command lines of the admin binaries
//!
//! Every tool runs its default action when no subcommand is given.

use crate::migrate::MigrateAction;
use crate::optimize::OptimizeAction;
use crate::reports::ReportKind;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "analyze", version, about = "Statistics and recommendations written under the analysis directory")]
pub struct AnalyzeCli {}

#[derive(Debug, Parser)]
#[command(name = "reports", version, about = "Generate a JSON, HTML and text report")]
pub struct ReportsCli {
    #[command(subcommand)]
    pub kind: Option<ReportKind>,
}

impl ReportsCli {
    pub fn kind(&self) -> ReportKind {
        self.kind.unwrap_or(ReportKind::Full)
    }
}

#[derive(Debug, Parser)]
#[command(name = "optimize", version, about = "Inspect database health and query latency")]
pub struct OptimizeCli {
    #[command(subcommand)]
    pub action: Option<OptimizeAction>,
}

impl OptimizeCli {
    pub fn action(&self) -> OptimizeAction {
        self.action.unwrap_or(OptimizeAction::All)
    }
}

#[derive(Debug, Parser)]
#[command(name = "migrate", version, about = "Schema migrations, rollback and integrity checks")]
pub struct MigrateCli {
    #[command(subcommand)]
    pub action: Option<MigrateAction>,
}

impl MigrateCli {
    pub fn action(&self) -> MigrateAction {
        self.action.unwrap_or(MigrateAction::Migrate)
    }
}

#[derive(Debug, Parser)]
#[command(name = "backup", version, about = "Create, verify, restore and list backup archives")]
pub struct BackupCli {
    #[command(subcommand)]
    pub command: Option<BackupCommand>,
}

impl BackupCli {
    pub fn action(self) -> BackupCommand {
        self.command.unwrap_or(BackupCommand::Backup)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Subcommand)]
pub enum BackupCommand {
    /// Dump the database and copy uploads into a new archive
    #[command(alias = "create")]
    Backup,
    /// Replace the database and uploads with an archive's contents
    Restore {
        /// Path to a `.tar.gz` produced by `backup`
        archive: PathBuf,
    },
    /// Check an archive's files against its recorded checksums
    Verify {
        archive: PathBuf,
    },
    /// Archives in the backups directory, newest first
    List,
}

#[derive(Debug, Parser)]
#[command(name = "selftest", version, about = "Smoke checks against the configured database")]
pub struct SelftestCli {}
