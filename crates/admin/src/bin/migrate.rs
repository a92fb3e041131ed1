//! Schema tool: `migrate [migrate|rollback|backup|check]`

use chrono::Utc;
use clap::Parser;
use medesk_admin::{
    bootstrap,
    cli::MigrateCli,
    exit_code,
    migrate::{self, MigrateAction},
    open_repository,
};
use medesk_common::AppError;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = MigrateCli::parse();
    exit_code("migrate", run(cli.action()).await)
}

async fn run(action: MigrateAction) -> Result<(), AppError> {
    let config = bootstrap("migrate")?;
    let repo = open_repository(&config).await?;
    migrate::run(action, &repo, &config, Utc::now()).await
}
