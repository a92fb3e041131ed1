//! Periodic report generation (`reports` binary)

use crate::pipeline::{run_steps, PipelineContext, Step};
use crate::render::{
    artifact_stem, format_bytes, page_context, write_artifacts, Artifact, HtmlRenderer, TextDoc,
};
use crate::stats::{
    collect_documents, collect_notes, collect_overview, collect_patients, collect_trends,
    collect_users, DocumentStats, NoteStats, Overview, PatientStats, TrendStats, UserStats,
};
use chrono::{DateTime, Utc};
use clap::Subcommand;
use futures::future::BoxFuture;
use medesk_common::{config::AdminConfig, domain::Trend, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Which sections a report contains
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Subcommand)]
#[serde(rename_all = "lowercase")]
pub enum ReportKind {
    /// Every section
    Full,
    /// Overview and patient demographics
    Patients,
    /// Overview and document storage
    Documents,
    /// Overview, users, notes and trends
    Activity,
}

impl ReportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportKind::Full => "full",
            ReportKind::Patients => "patients",
            ReportKind::Documents => "documents",
            ReportKind::Activity => "activity",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            ReportKind::Full => "MedDesk Full Report",
            ReportKind::Patients => "MedDesk Patient Report",
            ReportKind::Documents => "MedDesk Document Report",
            ReportKind::Activity => "MedDesk Activity Report",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Period {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Sections {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overview: Option<Overview>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patients: Option<PatientStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documents: Option<DocumentStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<NoteStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub users: Option<UserStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trends: Option<TrendStats>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConclusionLevel {
    Positive,
    Info,
    Warning,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conclusion {
    pub level: ConclusionLevel,
    pub message: String,
}

impl Conclusion {
    fn new(level: ConclusionLevel, message: String) -> Self {
        Self { level, message }
    }
}

/// Accumulator of the report pipeline
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: Uuid,
    pub kind: ReportKind,
    pub title: String,
    pub period: Period,
    pub generated_at: DateTime<Utc>,
    pub sections: Sections,
    pub conclusions: Vec<Conclusion>,
}

impl Report {
    pub fn new(kind: ReportKind, ctx: &PipelineContext<'_>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            title: kind.title().to_string(),
            period: Period {
                from: ctx.now - ctx.trend_window,
                to: ctx.now,
            },
            generated_at: ctx.now,
            sections: Sections::default(),
            conclusions: Vec::new(),
        }
    }

    /// Overview totals; zero until the overview step has run
    fn totals(&self) -> Overview {
        self.sections.overview.clone().unwrap_or_default()
    }
}

// ============================================================================
// Steps
// ============================================================================

type ReportStep<'s> = Step<'s, Report>;

fn overview_step<'a, 's>(ctx: &'a PipelineContext<'s>, acc: &'a mut Report) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        acc.sections.overview = Some(collect_overview(ctx).await?);
        Ok(())
    })
}

fn patients_step<'a, 's>(ctx: &'a PipelineContext<'s>, acc: &'a mut Report) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        let totals = acc.totals();
        acc.sections.patients = Some(collect_patients(ctx, totals.total_patients).await?);
        Ok(())
    })
}

fn documents_step<'a, 's>(ctx: &'a PipelineContext<'s>, acc: &'a mut Report) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        let totals = acc.totals();
        acc.sections.documents =
            Some(collect_documents(ctx, totals.total_documents, totals.total_patients).await?);
        Ok(())
    })
}

fn notes_step<'a, 's>(ctx: &'a PipelineContext<'s>, acc: &'a mut Report) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        let totals = acc.totals();
        acc.sections.notes = Some(collect_notes(ctx, totals.total_notes, totals.total_patients).await?);
        Ok(())
    })
}

fn users_step<'a, 's>(ctx: &'a PipelineContext<'s>, acc: &'a mut Report) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        let totals = acc.totals();
        acc.sections.users = Some(collect_users(ctx, totals.total_users).await?);
        Ok(())
    })
}

fn trends_step<'a, 's>(ctx: &'a PipelineContext<'s>, acc: &'a mut Report) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        acc.sections.trends = Some(collect_trends(ctx).await?);
        Ok(())
    })
}

fn conclusions_step<'a, 's>(_: &'a PipelineContext<'s>, acc: &'a mut Report) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        acc.conclusions = conclude(&acc.sections);
        Ok(())
    })
}

fn steps_for<'s>(kind: ReportKind) -> Vec<ReportStep<'s>> {
    let mut steps: Vec<ReportStep<'s>> = vec![Step::new("overview", overview_step)];

    match kind {
        ReportKind::Full => {
            steps.push(Step::new("patients", patients_step));
            steps.push(Step::new("documents", documents_step));
            steps.push(Step::new("notes", notes_step));
            steps.push(Step::new("users", users_step));
            steps.push(Step::new("trends", trends_step));
        }
        ReportKind::Patients => steps.push(Step::new("patients", patients_step)),
        ReportKind::Documents => steps.push(Step::new("documents", documents_step)),
        ReportKind::Activity => {
            steps.push(Step::new("users", users_step));
            steps.push(Step::new("notes", notes_step));
            steps.push(Step::new("trends", trends_step));
        }
    }

    steps.push(Step::new("conclusions", conclusions_step));
    steps
}

pub async fn generate(kind: ReportKind, ctx: &PipelineContext<'_>) -> Result<Report> {
    let mut report = Report::new(kind, ctx);
    let pipeline = format!("report_{}", kind.as_str());

    run_steps(&pipeline, ctx, &mut report, &steps_for(kind)).await?;

    Ok(report)
}

/// Generate and write `<kind>-report-<ts>.{json,html,txt}`
pub async fn run(
    kind: ReportKind,
    ctx: &PipelineContext<'_>,
    admin: &AdminConfig,
) -> Result<(Report, Vec<PathBuf>)> {
    let report = generate(kind, ctx).await?;

    let outputs = [
        Artifact::json(&report)?,
        Artifact::new("html", render_html(&report)?),
        Artifact::new("txt", render_text(&report)),
    ];
    let stem = artifact_stem(&format!("{}-report", kind.as_str()), report.generated_at);
    let written = write_artifacts(&admin.reports_dir, &stem, &outputs).await?;

    tracing::info!(report_id = %report.id, kind = kind.as_str(), "Report generated");

    Ok((report, written))
}

// ============================================================================
// Conclusions
// ============================================================================

/// Narrative conclusions over whichever sections are present
pub fn conclude(sections: &Sections) -> Vec<Conclusion> {
    let mut out = Vec::new();

    if let Some(ref overview) = sections.overview {
        out.push(Conclusion::new(
            ConclusionLevel::Info,
            format!(
                "The practice holds {} patients, {} documents and {} notes; {} patients were registered in the last {} days",
                overview.total_patients,
                overview.total_documents,
                overview.total_notes,
                overview.new_patients,
                overview.window_days
            ),
        ));
    }

    if let Some(ref documents) = sections.documents {
        let extraction = &documents.extraction_status;
        if documents.total == 0 {
            out.push(Conclusion::new(ConclusionLevel::Info, "No documents have been uploaded yet".to_string()));
        } else if extraction.success_rate >= crate::analysis::EXTRACTION_RATE_THRESHOLD {
            out.push(Conclusion::new(
                ConclusionLevel::Positive,
                format!("Document text extraction is healthy at {:.2}%", extraction.success_rate),
            ));
        } else {
            out.push(Conclusion::new(
                ConclusionLevel::Warning,
                format!(
                    "Document text extraction is low at {:.2}% ({} pending, {} failed)",
                    extraction.success_rate, extraction.pending, extraction.failed
                ),
            ));
        }
    }

    if let Some(ref patients) = sections.patients {
        if patients.total > 0 && patients.privacy_consent_rate < crate::analysis::CONSENT_RATE_THRESHOLD {
            out.push(Conclusion::new(
                ConclusionLevel::Warning,
                format!("Privacy consent is missing for {:.2}% of patients", 100.0 - patients.privacy_consent_rate),
            ));
        } else if patients.total > 0 {
            out.push(Conclusion::new(
                ConclusionLevel::Positive,
                "Privacy consent coverage meets the target".to_string(),
            ));
        }
    }

    if let Some(ref users) = sections.users {
        if users.total > 0 {
            out.push(Conclusion::new(
                ConclusionLevel::Info,
                format!("{} of {} staff members logged in during the period", users.recently_active, users.total),
            ));
        }
    }

    if let Some(ref trends) = sections.trends {
        let level = match trends.patients.trend {
            Trend::IncreasingFast | Trend::Increasing => ConclusionLevel::Positive,
            Trend::Stable => ConclusionLevel::Info,
            Trend::Decreasing | Trend::DecreasingFast => ConclusionLevel::Warning,
        };
        out.push(Conclusion::new(
            level,
            format!("Patient registrations are {}", trends.patients.trend),
        ));
    }

    out
}

// ============================================================================
// Rendering
// ============================================================================

fn render_html(report: &Report) -> Result<String> {
    let mut context = page_context(
        report,
        &report.title,
        &format!(
            "Period {} to {} (report {})",
            report.period.from.format("%Y-%m-%d"),
            report.period.to.format("%Y-%m-%d"),
            report.id
        ),
    )?;
    if let Some(ref trends) = report.sections.trends {
        context.insert("trend_rows", &trends.rows());
    }

    HtmlRenderer::new()?.render("report.html", &context)
}

fn render_text(report: &Report) -> String {
    let s = &report.sections;
    let mut doc = TextDoc::new(&report.title);
    doc.field("Report id", report.id);
    doc.field("Generated at", report.generated_at.to_rfc3339());
    doc.field(
        "Period",
        format!("{} .. {}", report.period.from.format("%Y-%m-%d"), report.period.to.format("%Y-%m-%d")),
    );

    if let Some(ref o) = s.overview {
        doc.heading("Overview");
        doc.field("Patients", o.total_patients);
        doc.field("Documents", o.total_documents);
        doc.field("Notes", o.total_notes);
        doc.field("Users", o.total_users);
    }

    if let Some(ref p) = s.patients {
        doc.heading("Patients");
        for (label, count) in p.age_distribution.entries() {
            doc.field(&format!("Age {}", label), count);
        }
        doc.field("Privacy consent", format!("{:.2}%", p.privacy_consent_rate));
    }

    if let Some(ref d) = s.documents {
        doc.heading("Documents");
        doc.field("Total", d.total);
        doc.field("Extraction success", format!("{:.2}%", d.extraction_status.success_rate));
        doc.field("Storage", format_bytes(d.size.total_bytes));
    }

    if let Some(ref n) = s.notes {
        doc.heading("Notes");
        doc.field("Total", n.total);
        doc.field("Average length", format!("{:.2}", n.average_length));
    }

    if let Some(ref u) = s.users {
        doc.heading("Staff");
        doc.field("Active", u.active);
        doc.field("Logged in during period", u.recently_active);
    }

    if let Some(ref t) = s.trends {
        doc.heading("Trends");
        doc.field("Patients", t.patients.trend);
        doc.field("Documents", t.documents.trend);
        doc.field("Notes", t.notes.trend);
    }

    doc.heading("Conclusions");
    for c in &report.conclusions {
        doc.line(&format!("  [{:?}] {}", c.level, c.message));
    }

    doc.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{fixed_now, FakeStats};

    #[tokio::test]
    async fn test_patients_report_sections() {
        let source = FakeStats::sample();
        let ctx = PipelineContext::new(&source, fixed_now(), 30);

        let report = generate(ReportKind::Patients, &ctx).await.unwrap();

        assert!(report.sections.overview.is_some());
        assert_eq!(report.sections.patients.as_ref().unwrap().total, 10);
        assert!(report.sections.documents.is_none());
        assert!(report.sections.trends.is_none());
    }

    #[tokio::test]
    async fn test_activity_report_sections() {
        let source = FakeStats::sample();
        let ctx = PipelineContext::new(&source, fixed_now(), 30);

        let report = generate(ReportKind::Activity, &ctx).await.unwrap();

        assert!(report.sections.users.is_some());
        assert!(report.sections.notes.is_some());
        assert!(report.sections.trends.is_some());
        assert!(report.sections.patients.is_none());
    }

    #[tokio::test]
    async fn test_documents_conclusion_reads_extraction_status() {
        let source = FakeStats::sample();
        let ctx = PipelineContext::new(&source, fixed_now(), 30);

        let report = generate(ReportKind::Documents, &ctx).await.unwrap();
        let warning = report
            .conclusions
            .iter()
            .find(|c| c.level == ConclusionLevel::Warning)
            .unwrap();

        assert!(warning.message.contains("70.00%"));
        assert!(warning.message.contains("4 pending, 2 failed"));
    }

    #[test]
    fn test_conclusions_without_sections() {
        assert!(conclude(&Sections::default()).is_empty());
    }

    #[tokio::test]
    async fn test_full_report_round_trip() {
        let source = FakeStats::sample();
        let ctx = PipelineContext::new(&source, fixed_now(), 30);
        let tmp = tempfile::tempdir().unwrap();
        let admin = AdminConfig {
            reports_dir: tmp.path().join("reports"),
            ..AdminConfig::default()
        };

        let (report, written) = run(ReportKind::Full, &ctx, &admin).await.unwrap();
        assert_eq!(written.len(), 3);
        assert!(written[0].ends_with("full-report-2024-06-15T12-00-00-000Z.json"));

        let reloaded: Report = serde_json::from_str(&std::fs::read_to_string(&written[0]).unwrap()).unwrap();
        assert_eq!(reloaded, report);

        let text = std::fs::read_to_string(&written[2]).unwrap();
        assert!(text.starts_with("MedDesk Full Report\n"));
    }

    #[tokio::test]
    async fn test_html_renders_present_sections_only() {
        let source = FakeStats::sample();
        let ctx = PipelineContext::new(&source, fixed_now(), 30);
        let mut report = generate(ReportKind::Activity, &ctx).await.unwrap();
        report.conclusions.push(Conclusion::new(
            ConclusionLevel::Info,
            "<script>alert(1)</script>".to_string(),
        ));

        let html = render_html(&report).unwrap();
        assert!(html.contains("<title>MedDesk Activity Report</title>"));
        assert!(html.contains("<h2>Trends</h2>"));
        assert!(html.contains("<h2>Staff</h2>"));
        assert!(!html.contains("<h2>Patients</h2>"));
        assert!(html.contains("<li class=\"level-info\">&lt;script&gt;alert(1)&lt;&#x2F;script&gt;</li>"));
    }
}
