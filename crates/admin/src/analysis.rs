//! Data analysis pipeline (`analyze` binary)
//!
//! Builds a [`DataAnalysis`] section by section, derives recommendations
//! from fixed threshold rules, and writes it as JSON, HTML and CSV under
//! the analysis directory.

use crate::pipeline::{run_steps, PipelineContext, Step};
use crate::render::{
    artifact_stem, page_context, write_artifacts, Artifact, CsvWriter, HtmlRenderer,
};
use crate::stats::{
    collect_documents, collect_notes, collect_overview, collect_patients, collect_trends,
    collect_users, DocumentStats, NoteStats, Overview, PatientStats, TrendStats, UserStats,
};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use medesk_common::{config::AdminConfig, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const EXTRACTION_RATE_THRESHOLD: f64 = 80.0;
pub const CONSENT_RATE_THRESHOLD: f64 = 90.0;
pub const PATIENTS_WITHOUT_NOTES_THRESHOLD: f64 = 20.0;
pub const SENSITIVE_RATE_THRESHOLD: f64 = 50.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub category: String,
    pub priority: Priority,
    pub message: String,
    pub action: String,
}

impl Recommendation {
    fn new(category: &str, priority: Priority, message: String, action: &str) -> Self {
        Self {
            category: category.to_string(),
            priority,
            message,
            action: action.to_string(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Detailed {
    pub patients: PatientStats,
    pub documents: DocumentStats,
    pub notes: NoteStats,
    pub users: UserStats,
    pub trends: TrendStats,
}

/// Accumulator of the analysis pipeline
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataAnalysis {
    pub generated_at: DateTime<Utc>,
    pub summary: Overview,
    pub detailed: Detailed,
    pub recommendations: Vec<Recommendation>,
}

impl DataAnalysis {
    pub fn new(generated_at: DateTime<Utc>) -> Self {
        Self {
            generated_at,
            summary: Overview::default(),
            detailed: Detailed::default(),
            recommendations: Vec::new(),
        }
    }
}

// ============================================================================
// Steps
// ============================================================================

fn overview_step<'a, 's>(ctx: &'a PipelineContext<'s>, acc: &'a mut DataAnalysis) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        acc.summary = collect_overview(ctx).await?;
        Ok(())
    })
}

fn patients_step<'a, 's>(ctx: &'a PipelineContext<'s>, acc: &'a mut DataAnalysis) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        acc.detailed.patients = collect_patients(ctx, acc.summary.total_patients).await?;
        Ok(())
    })
}

fn documents_step<'a, 's>(ctx: &'a PipelineContext<'s>, acc: &'a mut DataAnalysis) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        acc.detailed.documents =
            collect_documents(ctx, acc.summary.total_documents, acc.summary.total_patients).await?;
        Ok(())
    })
}

fn notes_step<'a, 's>(ctx: &'a PipelineContext<'s>, acc: &'a mut DataAnalysis) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        acc.detailed.notes =
            collect_notes(ctx, acc.summary.total_notes, acc.summary.total_patients).await?;
        Ok(())
    })
}

fn users_step<'a, 's>(ctx: &'a PipelineContext<'s>, acc: &'a mut DataAnalysis) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        acc.detailed.users = collect_users(ctx, acc.summary.total_users).await?;
        Ok(())
    })
}

fn trends_step<'a, 's>(ctx: &'a PipelineContext<'s>, acc: &'a mut DataAnalysis) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        acc.detailed.trends = collect_trends(ctx).await?;
        Ok(())
    })
}

fn recommendations_step<'a, 's>(_: &'a PipelineContext<'s>, acc: &'a mut DataAnalysis) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        acc.recommendations = recommend(acc);
        Ok(())
    })
}

/// Fill a fresh [`DataAnalysis`] from `ctx`
pub async fn analyze(ctx: &PipelineContext<'_>) -> Result<DataAnalysis> {
    let mut analysis = DataAnalysis::new(ctx.now);

    run_steps(
        "analysis",
        ctx,
        &mut analysis,
        &[
            Step::new("overview", overview_step),
            Step::new("patients", patients_step),
            Step::new("documents", documents_step),
            Step::new("notes", notes_step),
            Step::new("users", users_step),
            Step::new("trends", trends_step),
            Step::new("recommendations", recommendations_step),
        ],
    )
    .await?;

    Ok(analysis)
}

/// Run the pipeline and write `data-analysis-<ts>.{json,html,csv}`
pub async fn run(ctx: &PipelineContext<'_>, admin: &AdminConfig) -> Result<(DataAnalysis, Vec<PathBuf>)> {
    let analysis = analyze(ctx).await?;

    let outputs = [
        Artifact::json(&analysis)?,
        Artifact::new("html", render_html(&analysis)?),
        Artifact::new("csv", render_csv(&analysis)),
    ];
    let stem = artifact_stem("data-analysis", analysis.generated_at);
    let written = write_artifacts(&admin.analysis_dir, &stem, &outputs).await?;

    tracing::info!(
        recommendations = analysis.recommendations.len(),
        patients = analysis.summary.total_patients,
        "Data analysis complete"
    );

    Ok((analysis, written))
}

// ============================================================================
// Recommendation rules
// ============================================================================

/// Threshold rules over a filled analysis, highest priority first
pub fn recommend(analysis: &DataAnalysis) -> Vec<Recommendation> {
    let patients = &analysis.detailed.patients;
    let documents = &analysis.detailed.documents;
    let users = &analysis.detailed.users;
    let extraction = &documents.extraction_status;
    let mut out = Vec::new();

    if documents.total > 0 && extraction.success_rate < EXTRACTION_RATE_THRESHOLD {
        out.push(Recommendation::new(
            "documents",
            Priority::High,
            format!(
                "Text extraction succeeded for only {:.2}% of documents",
                extraction.success_rate
            ),
            "Review the extraction service and reprocess pending documents",
        ));
    }

    if extraction.failed > 0 {
        out.push(Recommendation::new(
            "documents",
            Priority::Medium,
            format!("{} documents failed text extraction", extraction.failed),
            "Inspect failed documents and retry extraction",
        ));
    }

    if patients.total > 0 && patients.privacy_consent_rate < CONSENT_RATE_THRESHOLD {
        out.push(Recommendation::new(
            "compliance",
            Priority::High,
            format!(
                "Only {:.2}% of patients have given privacy consent",
                patients.privacy_consent_rate
            ),
            "Collect consent forms at the next visit",
        ));
    }

    if patients.total > 0 && patients.without_notes_rate > PATIENTS_WITHOUT_NOTES_THRESHOLD {
        out.push(Recommendation::new(
            "clinical",
            Priority::Medium,
            format!(
                "{:.2}% of patients have no clinical notes",
                patients.without_notes_rate
            ),
            "Check that consultations are being documented",
        ));
    }

    if users.unverified > 0 {
        out.push(Recommendation::new(
            "security",
            Priority::Medium,
            format!("{} staff accounts are not verified", users.unverified),
            "Verify professional licenses for pending accounts",
        ));
    }

    if documents.total > 0 && documents.sensitive_rate > SENSITIVE_RATE_THRESHOLD {
        out.push(Recommendation::new(
            "security",
            Priority::Low,
            format!("{:.2}% of documents are marked sensitive", documents.sensitive_rate),
            "Audit access to sensitive documents",
        ));
    }

    if users.inactive > 0 {
        out.push(Recommendation::new(
            "users",
            Priority::Low,
            format!("{} staff accounts are inactive", users.inactive),
            "Remove or archive accounts that are no longer used",
        ));
    }

    if analysis.detailed.trends.patients.trend.is_decreasing() {
        out.push(Recommendation::new(
            "growth",
            Priority::Medium,
            format!(
                "New patient registrations are {}",
                analysis.detailed.trends.patients.trend
            ),
            "Review scheduling and referral channels",
        ));
    }

    out.sort_by_key(|r| r.priority);
    out
}

// ============================================================================
// Rendering
// ============================================================================

fn render_html(analysis: &DataAnalysis) -> Result<String> {
    let mut context = page_context(
        analysis,
        "MedDesk Data Analysis",
        &format!("Generated at {}", analysis.generated_at.to_rfc3339()),
    )?;
    context.insert("trend_rows", &analysis.detailed.trends.rows());

    HtmlRenderer::new()?.render("analysis.html", &context)
}

fn render_csv(analysis: &DataAnalysis) -> String {
    let s = &analysis.summary;
    let d = &analysis.detailed;
    let mut csv = CsvWriter::new(&["section", "metric", "value"]);
    let mut put = |section: &str, metric: &str, value: String| {
        csv.record([section, metric, value.as_str()]);
    };

    put("summary", "total_patients", s.total_patients.to_string());
    put("summary", "total_documents", s.total_documents.to_string());
    put("summary", "total_notes", s.total_notes.to_string());
    put("summary", "total_users", s.total_users.to_string());
    put("summary", "active_users", s.active_users.to_string());

    for (label, count) in d.patients.age_distribution.entries() {
        put("patients", &format!("age {}", label), count.to_string());
    }
    for g in &d.patients.by_gender {
        put("patients", &format!("gender {}", g.key), g.count.to_string());
    }
    put("patients", "privacy_consent_rate", format!("{:.2}", d.patients.privacy_consent_rate));
    put("patients", "without_notes_rate", format!("{:.2}", d.patients.without_notes_rate));

    let ex = &d.documents.extraction_status;
    put("documents", "extraction_completed", ex.completed.to_string());
    put("documents", "extraction_pending", ex.pending.to_string());
    put("documents", "extraction_failed", ex.failed.to_string());
    put("documents", "extraction_success_rate", format!("{:.2}", ex.success_rate));
    put("documents", "sensitive_rate", format!("{:.2}", d.documents.sensitive_rate));
    put("documents", "total_bytes", d.documents.size.total_bytes.to_string());

    put("notes", "average_length", format!("{:.2}", d.notes.average_length));
    put("users", "inactive", d.users.inactive.to_string());
    put("users", "unverified", d.users.unverified.to_string());

    for row in d.trends.rows() {
        put("trends", row.entity, row.point.trend.to_string());
    }

    for r in &analysis.recommendations {
        put("recommendations", r.priority.as_str(), r.message.clone());
    }

    csv.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{fixed_now, FakeStats};
    use medesk_common::domain::Trend;

    #[tokio::test]
    async fn test_analysis_pipeline_fills_every_section() {
        let source = FakeStats::sample();
        let ctx = PipelineContext::new(&source, fixed_now(), 30);

        let analysis = analyze(&ctx).await.unwrap();

        assert_eq!(analysis.summary.total_patients, 10);
        assert_eq!(analysis.detailed.patients.total, 10);
        assert_eq!(analysis.detailed.documents.total, 20);
        assert_eq!(analysis.detailed.notes.total, 15);
        assert_eq!(analysis.detailed.users.inactive, 1);
        assert_eq!(analysis.detailed.trends.patients.trend, Trend::DecreasingFast);
        assert!(!analysis.recommendations.is_empty());
    }

    #[tokio::test]
    async fn test_failing_source_aborts() {
        let source = FakeStats { fail: true, ..FakeStats::sample() };
        let ctx = PipelineContext::new(&source, fixed_now(), 30);

        assert!(analyze(&ctx).await.is_err());
    }

    #[tokio::test]
    async fn test_sample_recommendations() {
        let source = FakeStats::sample();
        let ctx = PipelineContext::new(&source, fixed_now(), 30);
        let analysis = analyze(&ctx).await.unwrap();

        let messages: Vec<&str> = analysis.recommendations.iter().map(|r| r.message.as_str()).collect();

        // 70% extraction, 2 failed, 80% consent, 40% without notes,
        // 1 inactive, 0 unverified, 30% sensitive, falling patient trend
        assert_eq!(analysis.recommendations.len(), 6);
        assert_eq!(analysis.recommendations[0].priority, Priority::High);
        assert!(messages.iter().any(|m| m.contains("70.00%")));
        assert!(!messages.iter().any(|m| m.contains("not verified")));
        assert!(!messages.iter().any(|m| m.contains("sensitive")));
    }

    #[test]
    fn test_extraction_threshold_is_strict() {
        let mut analysis = DataAnalysis::new(fixed_now());
        analysis.detailed.documents.total = 10;
        analysis.detailed.documents.extraction_status.success_rate = 80.0;

        assert!(recommend(&analysis).is_empty());

        analysis.detailed.documents.extraction_status.success_rate = 79.99;
        let recs = recommend(&analysis);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].priority, Priority::High);
    }

    #[test]
    fn test_empty_database_has_no_recommendations() {
        assert!(recommend(&DataAnalysis::new(fixed_now())).is_empty());
    }

    #[test]
    fn test_sensitive_and_unverified_rules() {
        let mut analysis = DataAnalysis::new(fixed_now());
        analysis.detailed.documents.total = 4;
        analysis.detailed.documents.extraction_status.success_rate = 100.0;
        analysis.detailed.documents.sensitive_rate = 75.0;
        analysis.detailed.users.unverified = 2;

        let recs = recommend(&analysis);
        let categories: Vec<&str> = recs.iter().map(|r| r.category.as_str()).collect();
        assert_eq!(categories, vec!["security", "security"]);
    }

    #[tokio::test]
    async fn test_json_artifact_round_trip() {
        let source = FakeStats::sample();
        let ctx = PipelineContext::new(&source, fixed_now(), 30);
        let tmp = tempfile::tempdir().unwrap();
        let admin = AdminConfig {
            analysis_dir: tmp.path().join("analysis"),
            ..AdminConfig::default()
        };

        let (analysis, written) = run(&ctx, &admin).await.unwrap();
        assert_eq!(written.len(), 3);

        let json_path = written.iter().find(|p| p.extension().is_some_and(|e| e == "json")).unwrap();
        let reloaded: DataAnalysis =
            serde_json::from_str(&std::fs::read_to_string(json_path).unwrap()).unwrap();
        assert_eq!(reloaded, analysis);

        let file_name = json_path.file_name().unwrap().to_string_lossy().to_string();
        assert_eq!(file_name, "data-analysis-2024-06-15T12-00-00-000Z.json");
    }

    #[test]
    fn test_csv_has_header_and_trends() {
        let csv = render_csv(&DataAnalysis::new(fixed_now()));
        assert!(csv.starts_with("section,metric,value\r\n"));
        assert!(csv.contains("trends,patients,stable\r\n"));
    }

    #[tokio::test]
    async fn test_html_escapes_recommendation_text() {
        let source = FakeStats::sample();
        let ctx = PipelineContext::new(&source, fixed_now(), 30);
        let mut analysis = analyze(&ctx).await.unwrap();
        analysis.recommendations[0].message = "<img src=x onerror=alert(1)>".into();

        let html = render_html(&analysis).unwrap();
        assert!(html.contains("<h2>Trends</h2>"));
        assert!(html.contains("decreasing_fast"));
        assert!(html.contains("&lt;img src=x onerror=alert(1)&gt;"));
        assert!(!html.contains("<img"));
    }
}
