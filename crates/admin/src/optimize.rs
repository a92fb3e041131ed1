//! Database and performance inspection (`optimize` binary)
//!
//! `database` refreshes planner statistics and inspects table and index
//! usage; `performance` times a fixed set of probe queries and measures the
//! uploads directory. Findings become recommendations; nothing is changed
//! beyond `ANALYZE`.

use crate::analysis::Priority;
use crate::files::{directory_usage, DirectoryUsage};
use crate::render::{
    artifact_stem, format_bytes, page_context, write_artifacts, Artifact, HtmlRenderer,
};
use chrono::{DateTime, Utc};
use clap::Subcommand;
use medesk_common::{
    config::AppConfig,
    db::{Repository, TableStats, UnusedIndex},
    AppError, Result,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

pub const DEAD_TUPLE_RATIO_THRESHOLD: f64 = 20.0;
pub const SEQ_SCAN_MIN_ROWS: i64 = 1000;

/// Probe queries timed by the performance check
pub const PROBES: &[(&str, &str)] = &[
    ("count_patients", "SELECT COUNT(*) FROM patients"),
    (
        "patient_name_search",
        "SELECT id FROM patients WHERE LOWER(name) LIKE '%silva%' ORDER BY name LIMIT 50",
    ),
    (
        "recent_documents",
        "SELECT id FROM documents ORDER BY created_at DESC LIMIT 50",
    ),
    (
        "pending_extractions",
        "SELECT id FROM documents WHERE extraction_status = 'pending' LIMIT 100",
    ),
    (
        "notes_per_patient",
        "SELECT p.id, COUNT(n.id) FROM patients p \
         LEFT JOIN notes n ON n.patient_id = p.id AND n.deleted_at IS NULL \
         GROUP BY p.id LIMIT 100",
    ),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Subcommand)]
pub enum OptimizeAction {
    /// Refresh statistics and inspect tables and indexes
    Database,
    /// Time the probe queries and measure the uploads directory
    Performance,
    /// Both checks
    All,
}

/// Maintenance queries the optimizer needs
#[async_trait::async_trait]
pub trait MaintenanceSource: Send + Sync {
    async fn analyze_tables(&self) -> Result<()>;

    async fn table_stats(&self) -> Result<Vec<TableStats>>;

    async fn unused_indexes(&self) -> Result<Vec<UnusedIndex>>;

    async fn database_size(&self) -> Result<i64>;

    /// Execute a read-only query and return its row count
    async fn run_probe(&self, sql: &str) -> Result<usize>;
}

#[async_trait::async_trait]
impl MaintenanceSource for Repository {
    async fn analyze_tables(&self) -> Result<()> {
        Repository::analyze_tables(self).await
    }

    async fn table_stats(&self) -> Result<Vec<TableStats>> {
        Repository::table_stats(self).await
    }

    async fn unused_indexes(&self) -> Result<Vec<UnusedIndex>> {
        Repository::unused_indexes(self).await
    }

    async fn database_size(&self) -> Result<i64> {
        Repository::database_size(self).await
    }

    async fn run_probe(&self, sql: &str) -> Result<usize> {
        Repository::run_probe(self, sql).await
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DatabaseReport {
    pub size_bytes: i64,
    pub tables: Vec<TableStats>,
    pub unused_indexes: Vec<UnusedIndex>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub name: String,
    pub duration_ms: u64,
    pub rows: usize,
    pub slow: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub threshold_ms: u64,
    pub probes: Vec<ProbeResult>,
    pub uploads: DirectoryUsage,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OptimizationRecommendation {
    pub priority: Priority,
    pub target: String,
    pub message: String,
    /// Suggested statement or action; never executed automatically
    pub action: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OptimizationReport {
    pub generated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabaseReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub performance: Option<PerformanceReport>,
    pub recommendations: Vec<OptimizationRecommendation>,
}

pub async fn inspect_database(source: &dyn MaintenanceSource) -> Result<DatabaseReport> {
    info!("Refreshing planner statistics");
    source.analyze_tables().await?;

    let (size_bytes, tables, unused_indexes) = futures::try_join!(
        source.database_size(),
        source.table_stats(),
        source.unused_indexes(),
    )?;

    info!(tables = tables.len(), unused_indexes = unused_indexes.len(), "Database inspected");

    Ok(DatabaseReport {
        size_bytes,
        tables,
        unused_indexes,
    })
}

/// Time every probe, one at a time
pub async fn measure_performance(
    source: &dyn MaintenanceSource,
    threshold_ms: u64,
    uploads_dir: &Path,
) -> Result<PerformanceReport> {
    let mut probes = Vec::with_capacity(PROBES.len());

    for (name, sql) in PROBES {
        let started = Instant::now();
        let rows = source.run_probe(sql).await?;
        let duration_ms = started.elapsed().as_millis() as u64;
        let slow = duration_ms > threshold_ms;

        if slow {
            warn!(probe = name, duration_ms, threshold_ms, "Slow probe query");
        }
        probes.push(ProbeResult {
            name: name.to_string(),
            duration_ms,
            rows,
            slow,
        });
    }

    let dir = uploads_dir.to_path_buf();
    let uploads = tokio::task::spawn_blocking(move || directory_usage(&dir))
        .await
        .map_err(|e| AppError::Internal {
            message: format!("uploads scan panicked: {}", e),
        })??;

    Ok(PerformanceReport {
        threshold_ms,
        probes,
        uploads,
    })
}

/// Rules over the collected findings, highest priority first
pub fn recommend(
    database: Option<&DatabaseReport>,
    performance: Option<&PerformanceReport>,
) -> Vec<OptimizationRecommendation> {
    let mut out = Vec::new();

    if let Some(db) = database {
        for table in &db.tables {
            let dead_ratio = table.dead_ratio();
            if dead_ratio > DEAD_TUPLE_RATIO_THRESHOLD {
                out.push(OptimizationRecommendation {
                    priority: Priority::Medium,
                    target: table.table.clone(),
                    message: format!("{:.2}% of tuples in {} are dead", dead_ratio, table.table),
                    action: format!("VACUUM ANALYZE {};", table.table),
                });
            }

            if table.live_rows > SEQ_SCAN_MIN_ROWS && table.seq_scans > table.index_scans {
                out.push(OptimizationRecommendation {
                    priority: Priority::Medium,
                    target: table.table.clone(),
                    message: format!(
                        "{} is read mostly by sequential scans ({} seq vs {} index) with {} rows",
                        table.table, table.seq_scans, table.index_scans, table.live_rows
                    ),
                    action: format!("Add an index on the columns filtered in queries against {}", table.table),
                });
            }
        }

        for index in &db.unused_indexes {
            out.push(OptimizationRecommendation {
                priority: Priority::Low,
                target: index.table.clone(),
                message: format!(
                    "Index {} has never been used ({})",
                    index.index,
                    format_bytes(index.size_bytes)
                ),
                action: format!("Consider DROP INDEX {};", index.index),
            });
        }
    }

    if let Some(perf) = performance {
        for probe in perf.probes.iter().filter(|p| p.slow) {
            out.push(OptimizationRecommendation {
                priority: Priority::High,
                target: probe.name.clone(),
                message: format!(
                    "Probe {} took {} ms (threshold {} ms)",
                    probe.name, probe.duration_ms, perf.threshold_ms
                ),
                action: "Inspect the query plan with EXPLAIN ANALYZE".to_string(),
            });
        }
    }

    out.sort_by_key(|r| r.priority);
    out
}

pub async fn optimize(
    action: OptimizeAction,
    source: &dyn MaintenanceSource,
    config: &AppConfig,
    now: DateTime<Utc>,
) -> Result<OptimizationReport> {
    let database = match action {
        OptimizeAction::Database | OptimizeAction::All => Some(inspect_database(source).await?),
        OptimizeAction::Performance => None,
    };

    let performance = match action {
        OptimizeAction::Performance | OptimizeAction::All => Some(
            measure_performance(
                source,
                config.admin.slow_query_threshold_ms,
                &config.storage.uploads_dir,
            )
            .await?,
        ),
        OptimizeAction::Database => None,
    };

    let recommendations = recommend(database.as_ref(), performance.as_ref());

    Ok(OptimizationReport {
        generated_at: now,
        database,
        performance,
        recommendations,
    })
}

/// Inspect and write `optimization-<ts>.{json,html}`
pub async fn run(
    action: OptimizeAction,
    source: &dyn MaintenanceSource,
    config: &AppConfig,
    now: DateTime<Utc>,
) -> Result<(OptimizationReport, Vec<PathBuf>)> {
    let report = optimize(action, source, config, now).await?;

    let outputs = [Artifact::json(&report)?, Artifact::new("html", render_html(&report)?)];
    let stem = artifact_stem("optimization", report.generated_at);
    let written = write_artifacts(&config.admin.optimization_dir, &stem, &outputs).await?;

    info!(recommendations = report.recommendations.len(), "Optimization report written");

    Ok((report, written))
}

/// Table row for the HTML page, with the dead tuple ratio precomputed
#[derive(Serialize)]
struct TableView<'a> {
    #[serde(flatten)]
    stats: &'a TableStats,
    dead_ratio: f64,
}

fn render_html(report: &OptimizationReport) -> Result<String> {
    let mut context = page_context(
        report,
        "MedDesk Optimization Report",
        &format!("Generated at {}", report.generated_at.to_rfc3339()),
    )?;
    if let Some(ref db) = report.database {
        let tables: Vec<TableView<'_>> = db
            .tables
            .iter()
            .map(|stats| TableView { stats, dead_ratio: stats.dead_ratio() })
            .collect();
        context.insert("tables", &tables);
    }

    HtmlRenderer::new()?.render("optimization.html", &context)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::fixed_now;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn table(name: &str, live: i64, dead: i64, seq: i64, idx: i64) -> TableStats {
        TableStats {
            table: name.to_string(),
            live_rows: live,
            dead_rows: dead,
            seq_scans: seq,
            index_scans: idx,
            total_bytes: 8192,
            last_vacuum: None,
            last_analyze: None,
        }
    }

    #[derive(Default)]
    struct FakeMaintenance {
        analyzed: AtomicUsize,
        probes: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl MaintenanceSource for FakeMaintenance {
        async fn analyze_tables(&self) -> Result<()> {
            self.analyzed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn table_stats(&self) -> Result<Vec<TableStats>> {
            Ok(vec![table("notes", 5000, 2500, 900, 10), table("users", 12, 0, 40, 0)])
        }

        async fn unused_indexes(&self) -> Result<Vec<UnusedIndex>> {
            Ok(vec![UnusedIndex {
                table: "documents".into(),
                index: "idx_documents_created_at".into(),
                size_bytes: 16384,
            }])
        }

        async fn database_size(&self) -> Result<i64> {
            Ok(10 * 1024 * 1024)
        }

        async fn run_probe(&self, _sql: &str) -> Result<usize> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            Ok(3)
        }
    }

    #[test]
    fn test_dead_tuple_rule_is_strict() {
        let db = DatabaseReport {
            size_bytes: 0,
            tables: vec![table("patients", 80, 20, 0, 0), table("documents", 70, 30, 0, 0)],
            unused_indexes: vec![],
        };

        let recs = recommend(Some(&db), None);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].action, "VACUUM ANALYZE documents;");
    }

    #[test]
    fn test_seq_scan_rule_needs_large_table() {
        let db = DatabaseReport {
            size_bytes: 0,
            tables: vec![table("users", 1000, 0, 50, 1), table("patients", 1001, 0, 50, 1)],
            unused_indexes: vec![],
        };

        let recs = recommend(Some(&db), None);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].target, "patients");
    }

    #[test]
    fn test_slow_probe_is_high_priority() {
        let perf = PerformanceReport {
            threshold_ms: 500,
            probes: vec![
                ProbeResult { name: "fast".into(), duration_ms: 500, rows: 1, slow: false },
                ProbeResult { name: "slow".into(), duration_ms: 900, rows: 1, slow: true },
            ],
            uploads: DirectoryUsage::default(),
        };

        let recs = recommend(None, Some(&perf));
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].priority, Priority::High);
        assert_eq!(recs[0].target, "slow");
    }

    #[tokio::test]
    async fn test_full_run_writes_report() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.admin.optimization_dir = tmp.path().join("optimization");
        config.storage.uploads_dir = tmp.path().join("uploads");
        std::fs::create_dir_all(&config.storage.uploads_dir).unwrap();
        std::fs::write(config.storage.uploads_dir.join("exam.pdf"), b"%PDF-1.4").unwrap();

        let source = FakeMaintenance::default();
        let (report, written) = run(OptimizeAction::All, &source, &config, fixed_now()).await.unwrap();

        assert_eq!(source.analyzed.load(Ordering::SeqCst), 1);
        assert_eq!(source.probes.load(Ordering::SeqCst), PROBES.len());
        assert_eq!(written.len(), 2);

        let perf = report.performance.as_ref().unwrap();
        assert_eq!(perf.uploads.files, 1);
        assert_eq!(perf.uploads.bytes, 8);

        // notes: 33% dead and seq-scan heavy; one unused index
        let targets: Vec<&str> = report.recommendations.iter().map(|r| r.target.as_str()).collect();
        assert_eq!(targets.iter().filter(|t| **t == "notes").count(), 2);
        assert!(targets.contains(&"documents"));

        let reloaded: OptimizationReport =
            serde_json::from_str(&std::fs::read_to_string(&written[0]).unwrap()).unwrap();
        assert_eq!(reloaded, report);

        let html = std::fs::read_to_string(&written[1]).unwrap();
        assert!(html.contains("<td>notes</td>"));
        assert!(html.contains("<td>10.00 MB</td>"));
        assert!(html.contains("<td>count_patients</td>"));
    }

    #[tokio::test]
    async fn test_database_only_skips_probes() {
        let source = FakeMaintenance::default();
        let config = AppConfig::default();

        let report = optimize(OptimizeAction::Database, &source, &config, fixed_now()).await.unwrap();
        assert!(report.performance.is_none());
        assert_eq!(source.probes.load(Ordering::SeqCst), 0);
    }
}
