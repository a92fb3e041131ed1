//! Smoke checks against the configured database

use clap::Parser;
use medesk_admin::{bootstrap, cli::SelftestCli, exit_code, open_repository, selftest};
use medesk_common::AppError;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    SelftestCli::parse();
    exit_code("selftest", run().await)
}

async fn run() -> Result<(), AppError> {
    let config = bootstrap("selftest")?;
    let repo = open_repository(&config).await?;

    selftest::run(&repo).await.into_result().map(|_| ())
}
