//! Report generator: `reports [full|patients|documents|activity]`

use chrono::Utc;
use clap::Parser;
use medesk_admin::{
    bootstrap,
    cli::ReportsCli,
    exit_code, open_repository,
    pipeline::PipelineContext,
    reports::{self, ReportKind},
};
use medesk_common::AppError;
use std::process::ExitCode;
use tracing::info;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = ReportsCli::parse();
    exit_code("reports", run(cli.kind()).await)
}

async fn run(kind: ReportKind) -> Result<(), AppError> {
    let config = bootstrap("reports")?;
    let repo = open_repository(&config).await?;
    let ctx = PipelineContext::new(&repo, Utc::now(), config.admin.trend_window_days);

    let (report, files) = reports::run(kind, &ctx, &config.admin).await?;

    for path in &files {
        info!(path = %path.display(), "Wrote report artifact");
    }
    info!(conclusions = report.conclusions.len(), "Report complete");
    Ok(())
}
