//! MedDesk administrative tooling
//!
//! Library behind the `analyze`, `reports`, `optimize`, `backup`,
//! `migrate` and `selftest` binaries. Every tool gathers aggregate
//! statistics through [`stats::StatsSource`], fills one accumulator via
//! [`pipeline::run_steps`] and writes its artifacts with [`render`].

pub mod analysis;
pub mod backup;
pub mod cli;
pub mod files;
pub mod migrate;
pub mod optimize;
pub mod pipeline;
pub mod render;
pub mod reports;
pub mod selftest;
pub mod stats;

#[cfg(test)]
pub(crate) mod fixtures;

use medesk_common::{
    config::{AdminConfig, AppConfig},
    telemetry, AppError, DbPool, Repository,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

struct MetricsSink {
    handle: PrometheusHandle,
    textfile: Option<PathBuf>,
}

static METRICS: OnceLock<MetricsSink> = OnceLock::new();

/// Shared binary prologue: `.env`, logging, configuration, metrics recorder
pub fn bootstrap(tool: &str) -> Result<AppConfig, AppError> {
    dotenvy::dotenv().ok();
    telemetry::init_tracing("info");

    tracing::info!(tool, version = medesk_common::VERSION, "Starting MedDesk admin tool");

    let config = AppConfig::load().map_err(|e| {
        tracing::error!(error = %e, "Failed to load configuration");
        AppError::from(e)
    })?;

    install_metrics(&config.admin);
    Ok(config)
}

fn install_metrics(admin: &AdminConfig) {
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            medesk_common::metrics::register_metrics();
            let sink = MetricsSink {
                handle,
                textfile: admin.metrics_textfile.clone(),
            };
            if METRICS.set(sink).is_err() {
                tracing::warn!("Metrics recorder already installed");
            }
        }
        Err(e) => tracing::warn!(error = %e, "Failed to install metrics recorder"),
    }
}

/// Write everything recorded so far in Prometheus text format; `path` is
/// replaced by rename
pub fn write_metrics_textfile(handle: &PrometheusHandle, path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let staging = path.with_extension("prom.tmp");
    std::fs::write(&staging, handle.render())?;
    std::fs::rename(&staging, path)
}

fn flush_metrics(tool: &str) {
    let Some(sink) = METRICS.get() else {
        return;
    };

    match sink.textfile {
        Some(ref path) => match write_metrics_textfile(&sink.handle, path) {
            Ok(()) => tracing::info!(tool, path = %path.display(), "Metrics written"),
            Err(e) => tracing::warn!(tool, path = %path.display(), error = %e, "Failed to write metrics"),
        },
        None => tracing::debug!(tool, metrics = %sink.handle.render(), "Metrics snapshot"),
    }
}

/// Connect to the configured database
pub async fn open_repository(config: &AppConfig) -> Result<Repository, AppError> {
    let pool = DbPool::new(&config.database).await?;
    Ok(Repository::new(pool))
}

/// Log the outcome and map it to the process exit code
pub fn exit_code(tool: &str, result: Result<(), AppError>) -> std::process::ExitCode {
    flush_metrics(tool);

    match result {
        Ok(()) => {
            tracing::info!(tool, "Finished");
            std::process::ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(tool, error = %e, code = e.code().as_code(), "Failed");
            std::process::ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medesk_common::metrics::{record_backup, record_pipeline_run};

    #[test]
    fn test_textfile_holds_recorded_counters() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            record_backup("create", true, Some(2048));
            record_pipeline_run("analysis", false);
        });

        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("textfile/backup.prom");
        write_metrics_textfile(&handle, &path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("meddesk_backups_total{operation=\"create\",status=\"success\"} 1"));
        assert!(text.contains("meddesk_backup_size_bytes 2048"));
        assert!(text.contains("meddesk_pipeline_runs_total{pipeline=\"analysis\",status=\"error\"} 1"));
        assert!(!path.with_extension("prom.tmp").exists());
    }
}
