//! Data analysis: statistics, recommendations and analysis/ artifacts

use chrono::Utc;
use clap::Parser;
use medesk_admin::{
    analysis, bootstrap, cli::AnalyzeCli, exit_code, open_repository, pipeline::PipelineContext,
};
use medesk_common::AppError;
use std::process::ExitCode;
use tracing::info;

#[tokio::main]
async fn main() -> ExitCode {
    AnalyzeCli::parse();
    exit_code("analyze", run().await)
}

async fn run() -> Result<(), AppError> {
    let config = bootstrap("analyze")?;
    let repo = open_repository(&config).await?;
    let ctx = PipelineContext::new(&repo, Utc::now(), config.admin.trend_window_days);

    let (analysis, files) = analysis::run(&ctx, &config.admin).await?;

    info!(
        patients = analysis.summary.total_patients,
        documents = analysis.summary.total_documents,
        recommendations = analysis.recommendations.len(),
        files = files.len(),
        "Analysis complete"
    );
    Ok(())
}
