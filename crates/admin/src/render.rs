//! Artifact rendering: HTML, CSV and plain text, plus file output
//!
//! HTML pages come from the tera templates under `templates/`, embedded at
//! compile time and auto-escaped. CSV follows RFC 4180 quoting.

use chrono::{DateTime, SecondsFormat, Utc};
use medesk_common::{AppError, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::error::Error as _;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tera::{Context, Tera, Value};
use tracing::info;

/// ISO-8601 instant with `:` and `.` replaced by `-`, safe for file names
pub fn timestamp_suffix(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-")
}

/// `<prefix>-<timestamp>`
pub fn artifact_stem(prefix: &str, now: DateTime<Utc>) -> String {
    format!("{}-{}", prefix, timestamp_suffix(now))
}

/// One rendered output file
#[derive(Clone, Debug)]
pub struct Artifact {
    pub extension: &'static str,
    pub content: String,
}

impl Artifact {
    pub fn new(extension: &'static str, content: String) -> Self {
        Self { extension, content }
    }

    pub fn json<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Self::new("json", serde_json::to_string_pretty(value)?))
    }
}

/// Create `dir` if needed and write `<stem>.<ext>` for every artifact
pub async fn write_artifacts(dir: &Path, stem: &str, outputs: &[Artifact]) -> Result<Vec<PathBuf>> {
    tokio::fs::create_dir_all(dir).await?;

    let mut written = Vec::with_capacity(outputs.len());
    for artifact in outputs {
        let path = dir.join(format!("{}.{}", stem, artifact.extension));
        tokio::fs::write(&path, &artifact.content).await?;
        info!(path = %path.display(), bytes = artifact.content.len(), "Artifact written");
        written.push(path);
    }

    Ok(written)
}

// ============================================================================
// HTML
// ============================================================================

const TEMPLATES: [(&str, &str); 5] = [
    ("base.html", include_str!("../templates/base.html")),
    ("trends.html", include_str!("../templates/trends.html")),
    ("analysis.html", include_str!("../templates/analysis.html")),
    ("report.html", include_str!("../templates/report.html")),
    ("optimization.html", include_str!("../templates/optimization.html")),
];

/// Embedded page templates, auto-escaped because every name ends in `.html`
pub struct HtmlRenderer {
    tera: Tera,
}

impl HtmlRenderer {
    pub fn new() -> Result<Self> {
        let mut tera = Tera::default();
        tera.register_filter("bytes", bytes_filter);
        tera.add_raw_templates(TEMPLATES).map_err(template_error)?;
        Ok(Self { tera })
    }

    pub fn render(&self, template: &str, context: &Context) -> Result<String> {
        self.tera.render(template, context).map_err(template_error)
    }
}

/// Context for a page: the serialized accumulator plus its heading
pub fn page_context<T: Serialize>(value: &T, title: &str, subtitle: &str) -> Result<Context> {
    let mut context = Context::from_serialize(value).map_err(template_error)?;
    context.insert("title", title);
    context.insert("subtitle", subtitle);
    Ok(context)
}

fn bytes_filter(value: &Value, _: &HashMap<String, Value>) -> tera::Result<Value> {
    let bytes = value
        .as_i64()
        .ok_or_else(|| tera::Error::msg(format!("bytes filter expects an integer, got {}", value)))?;
    Ok(Value::String(format_bytes(bytes)))
}

fn template_error(err: tera::Error) -> AppError {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    AppError::Internal { message }
}

// ============================================================================
// CSV
// ============================================================================

/// Quote a field when it contains a delimiter, quote or line break
pub fn csv_field(raw: &str) -> String {
    if raw.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

/// Accumulates CRLF-terminated CSV records
#[derive(Default)]
pub struct CsvWriter {
    buf: String,
}

impl CsvWriter {
    pub fn new(header: &[&str]) -> Self {
        let mut writer = Self::default();
        writer.record(header.iter().copied());
        writer
    }

    pub fn record<'a, I>(&mut self, fields: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let line: Vec<String> = fields.into_iter().map(csv_field).collect();
        self.buf.push_str(&line.join(","));
        self.buf.push_str("\r\n");
    }

    pub fn finish(self) -> String {
        self.buf
    }
}

// ============================================================================
// Plain text
// ============================================================================

/// Plain text report with underlined headings
#[derive(Default)]
pub struct TextDoc {
    buf: String,
}

impl TextDoc {
    pub fn new(title: &str) -> Self {
        let mut doc = Self::default();
        let rule = "=".repeat(title.chars().count());
        let _ = writeln!(doc.buf, "{}\n{}\n", title, rule);
        doc
    }

    pub fn heading(&mut self, heading: &str) {
        let rule = "-".repeat(heading.chars().count());
        let _ = writeln!(self.buf, "\n{}\n{}", heading, rule);
    }

    pub fn line(&mut self, text: &str) {
        let _ = writeln!(self.buf, "{}", text);
    }

    pub fn field(&mut self, label: &str, value: impl std::fmt::Display) {
        let _ = writeln!(self.buf, "  {:<32} {}", format!("{}:", label), value);
    }

    pub fn finish(self) -> String {
        self.buf
    }
}

/// Human readable byte count
pub fn format_bytes(bytes: i64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes.max(0) as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes.max(0), UNITS[0])
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_suffix() {
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 12, 30, 5).unwrap();
        assert_eq!(timestamp_suffix(now), "2024-06-15T12-30-05-000Z");
        assert_eq!(artifact_stem("data-analysis", now), "data-analysis-2024-06-15T12-30-05-000Z");
    }

    #[test]
    fn test_templates_escape_values() {
        let renderer = HtmlRenderer::new().unwrap();
        let value = serde_json::json!({ "recommendations": [], "conclusions": [
            { "level": "info", "message": "<script>alert('x')</script>" }
        ], "sections": {} });
        let context = page_context(&value, "Tom & Jerry", "<b>sub</b>").unwrap();

        let html = renderer.render("report.html", &context).unwrap();
        assert!(html.contains("<title>Tom &amp; Jerry</title>"));
        assert!(html.contains("&lt;script&gt;"));
        assert!(html.contains("&lt;b&gt;sub"));
        assert!(!html.contains("<script>"));
    }

    #[test]
    fn test_bytes_filter_formats_sizes() {
        let out = bytes_filter(&Value::from(1536), &HashMap::new()).unwrap();
        assert_eq!(out, Value::String("1.50 KB".into()));
        assert!(bytes_filter(&Value::from("big"), &HashMap::new()).is_err());
    }

    #[test]
    fn test_csv_quoting() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_field("two\nlines"), "\"two\nlines\"");
    }

    #[test]
    fn test_csv_writer() {
        let mut csv = CsvWriter::new(&["section", "metric", "value"]);
        csv.record(["patients", "gender, female", "6"]);
        assert_eq!(
            csv.finish(),
            "section,metric,value\r\npatients,\"gender, female\",6\r\n"
        );
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.00 MB");
    }

    #[tokio::test]
    async fn test_write_artifacts_creates_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("analysis");

        let written = write_artifacts(
            &dir,
            "data-analysis-x",
            &[Artifact::new("csv", "a,b\r\n".into()), Artifact::new("txt", "hi".into())],
        )
        .await
        .unwrap();

        assert_eq!(written.len(), 2);
        assert_eq!(std::fs::read_to_string(dir.join("data-analysis-x.txt")).unwrap(), "hi");
    }
}
