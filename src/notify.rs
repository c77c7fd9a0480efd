//! Downstream summary mail for one country and category.

use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use serde::Serialize;
use tempfile::Builder;
use tracing::info;

use crate::domain::NormalizedRow;
use crate::error::PipelineError;
use crate::table::SqliteTable;

/// Rows for one country and category, oldest month first.
pub trait SummarySource: Send + Sync {
    fn rows_for(&self, country: &str, category: &str) -> Result<Vec<NormalizedRow>, PipelineError>;
}

impl SummarySource for SqliteTable {
    fn rows_for(
        &self,
        country: &str,
        category: &str,
    ) -> Result<Vec<NormalizedRow>, PipelineError> {
        SqliteTable::rows_for(self, country, category)
    }
}

pub trait Mailer: Send + Sync {
    /// Delivers one HTML message and returns its message id.
    fn send(&self, recipient: &str, subject: &str, html: &str) -> Result<String, PipelineError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifySettings {
    pub recipient: String,
    pub sender: String,
    pub country: String,
    pub category: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NotifyReport {
    pub sent: bool,
    pub rows: usize,
    pub recipient: String,
    pub subject: String,
    pub message_id: Option<String>,
}

pub struct Notifier;

impl Notifier {
    pub fn notify<S: SummarySource, M: Mailer>(
        source: &S,
        mailer: &M,
        settings: &NotifySettings,
    ) -> Result<NotifyReport, PipelineError> {
        let rows = source.rows_for(&settings.country, &settings.category)?;
        let subject = subject_for(settings);
        if rows.is_empty() {
            info!(
                country = %settings.country,
                category = %settings.category,
                "no rows to summarize"
            );
            return Ok(NotifyReport {
                sent: false,
                rows: 0,
                recipient: settings.recipient.clone(),
                subject,
                message_id: None,
            });
        }

        let html = format_summary(&settings.country, &settings.category, &rows);
        let message_id = mailer.send(&settings.recipient, &subject, &html)?;
        info!(recipient = %settings.recipient, message_id = %message_id, rows = rows.len(), "summary sent");

        Ok(NotifyReport {
            sent: true,
            rows: rows.len(),
            recipient: settings.recipient.clone(),
            subject,
            message_id: Some(message_id),
        })
    }
}

pub fn subject_for(settings: &NotifySettings) -> String {
    format!("{} {} Production Data", settings.country, settings.category)
}

pub fn format_summary(country: &str, category: &str, rows: &[NormalizedRow]) -> String {
    let category = escape_html(category);
    let mut body = format!(
        "<b>{category}</b><br><b>{} production</b><br><br>",
        escape_html(country)
    );
    for row in rows {
        body.push_str(&format!(
            "In the month of <b>{}</b>, the {category} production was <b>{} 1000 tonnes</b>.<br>",
            row.year_month.format("%B %Y"),
            row.tonnes
        ));
    }
    body
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[derive(Debug, Serialize)]
struct OutboxMessage<'a> {
    message_id: &'a str,
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    html: &'a str,
    queued_at: String,
}

/// Spools messages as JSON files in a local directory.
#[derive(Debug, Clone)]
pub struct OutboxMailer {
    dir: Utf8PathBuf,
    sender: String,
}

impl OutboxMailer {
    pub fn new(dir: Utf8PathBuf, sender: impl Into<String>) -> Self {
        Self {
            dir,
            sender: sender.into(),
        }
    }

    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }
}

impl Mailer for OutboxMailer {
    fn send(&self, recipient: &str, subject: &str, html: &str) -> Result<String, PipelineError> {
        fs::create_dir_all(self.dir.as_std_path())
            .map_err(|err| PipelineError::Mail(err.to_string()))?;
        let mut temp = Builder::new()
            .prefix(".outbox-")
            .suffix(".tmp")
            .tempfile_in(self.dir.as_std_path())
            .map_err(|err| PipelineError::Mail(err.to_string()))?;

        let nonce = temp
            .path()
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| {
                name.trim_start_matches(".outbox-")
                    .trim_end_matches(".tmp")
                    .to_string()
            })
            .unwrap_or_default();
        let now = Utc::now();
        let message_id = format!("{}-{nonce}", now.format("%Y%m%d%H%M%S"));

        let message = OutboxMessage {
            message_id: &message_id,
            from: &self.sender,
            to: recipient,
            subject,
            html,
            queued_at: now.to_rfc3339(),
        };
        let json = serde_json::to_vec_pretty(&message)
            .map_err(|err| PipelineError::Mail(err.to_string()))?;
        temp.write_all(&json)
            .map_err(|err| PipelineError::Mail(err.to_string()))?;
        temp.persist_noclobber(self.dir.join(format!("{message_id}.json")).as_std_path())
            .map_err(|err| PipelineError::Mail(err.error.to_string()))?;
        Ok(message_id)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn row(month: u32, tonnes: f64) -> NormalizedRow {
        NormalizedRow {
            country: "Luxembourg".to_string(),
            year_month: NaiveDate::from_ymd_opt(2024, month, 1).unwrap(),
            tonnes,
            category: "Bull".to_string(),
        }
    }

    #[test]
    fn summary_lines() {
        let html = format_summary("Luxembourg", "Bull", &[row(3, 12.5), row(4, 9.75)]);
        assert!(html.starts_with("<b>Bull</b><br><b>Luxembourg production</b><br><br>"));
        assert!(html.contains(
            "In the month of <b>March 2024</b>, the Bull production was <b>12.5 1000 tonnes</b>.<br>"
        ));
        assert!(html.contains("<b>April 2024</b>"));
    }

    #[test]
    fn summary_escapes_text() {
        let html = format_summary("<script>", "A&B", &[]);
        assert_eq!(
            html,
            "<b>A&amp;B</b><br><b>&lt;script&gt; production</b><br><br>"
        );
    }

    #[test]
    fn outbox_spools_json() {
        let temp = tempfile::tempdir().unwrap();
        let dir = Utf8PathBuf::from_path_buf(temp.path().join("outbox")).unwrap();
        let mailer = OutboxMailer::new(dir.clone(), "pipeline@example.org");

        let id = mailer.send("ops@example.org", "Subject", "<b>hi</b>").unwrap();
        let content = fs::read_to_string(dir.join(format!("{id}.json")).as_std_path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(value["to"], "ops@example.org");
        assert_eq!(value["from"], "pipeline@example.org");
        assert_eq!(value["html"], "<b>hi</b>");

        let second = mailer.send("ops@example.org", "Subject", "again").unwrap();
        assert_ne!(id, second);
    }
}
