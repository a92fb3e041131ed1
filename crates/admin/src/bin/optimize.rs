//! Database and performance inspection: `optimize [database|performance|all]`

use chrono::Utc;
use clap::Parser;
use medesk_admin::{
    bootstrap,
    cli::OptimizeCli,
    exit_code, open_repository,
    optimize::{self, OptimizeAction},
};
use medesk_common::AppError;
use std::process::ExitCode;
use tracing::info;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = OptimizeCli::parse();
    exit_code("optimize", run(cli.action()).await)
}

async fn run(action: OptimizeAction) -> Result<(), AppError> {
    let config = bootstrap("optimize")?;
    let repo = open_repository(&config).await?;
    let (report, files) = optimize::run(action, &repo, &config, Utc::now()).await?;

    for rec in &report.recommendations {
        info!(priority = rec.priority.as_str(), target = %rec.target, "{}", rec.message);
    }
    info!(files = files.len(), "Optimization complete");
    Ok(())
}
