//! Backup tool: `backup [backup|restore <archive>|verify <archive>|list]`

use chrono::Utc;
use clap::Parser;
use medesk_admin::{
    backup::BackupManager,
    bootstrap,
    cli::{BackupCli, BackupCommand},
    exit_code,
};
use medesk_common::AppError;
use std::process::ExitCode;
use tracing::info;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = BackupCli::parse();
    exit_code("backup", run(cli.action()).await)
}

async fn run(command: BackupCommand) -> Result<(), AppError> {
    let config = bootstrap("backup")?;
    let manager = BackupManager::with_pg_tools(&config);

    match command {
        BackupCommand::Backup => {
            let outcome = manager.create_backup(Utc::now()).await?;
            info!(archive = %outcome.archive.display(), bytes = outcome.archive_bytes, "Backup written");
        }
        BackupCommand::Restore { archive } => {
            let report = manager.restore_backup(&archive).await?;
            info!(backup = %report.name, files = report.file_count, "Restore finished");
        }
        BackupCommand::Verify { archive } => {
            let report = manager.verify_backup(&archive).await?;
            info!(backup = %report.name, files = report.file_count, "Checksums match");
        }
        BackupCommand::List => {
            let entries = manager.list_backups().await?;
            if entries.is_empty() {
                info!(dir = %manager.backups_dir().display(), "No backups found");
            }
            for entry in entries {
                info!(name = %entry.name, bytes = entry.bytes, modified = %entry.modified, "Backup");
            }
        }
    }

    Ok(())
}
