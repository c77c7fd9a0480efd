use std::sync::Mutex;

use assert_matches::assert_matches;
use chrono::NaiveDate;

use agridata_pipeline::domain::NormalizedRow;
use agridata_pipeline::error::PipelineError;
use agridata_pipeline::notify::{Mailer, Notifier, NotifySettings};
use agridata_pipeline::table::{SqliteTable, TableSettings, TableWriter};

#[derive(Default)]
struct MockMailer {
    sent: Mutex<Vec<(String, String, String)>>,
}

impl Mailer for MockMailer {
    fn send(&self, recipient: &str, subject: &str, html: &str) -> Result<String, PipelineError> {
        let mut sent = self.sent.lock().unwrap();
        sent.push((recipient.to_string(), subject.to_string(), html.to_string()));
        Ok(format!("msg-{}", sent.len()))
    }
}

struct DownMailer;

impl Mailer for DownMailer {
    fn send(&self, _recipient: &str, _subject: &str, _html: &str) -> Result<String, PipelineError> {
        Err(PipelineError::Mail("relay unavailable".to_string()))
    }
}

fn settings() -> NotifySettings {
    NotifySettings {
        recipient: "ops@example.org".to_string(),
        sender: "agridata@example.org".to_string(),
        country: "Luxembourg".to_string(),
        category: "Bull".to_string(),
    }
}

fn row(month: u32, category: &str, tonnes: f64) -> NormalizedRow {
    NormalizedRow {
        country: "Luxembourg".to_string(),
        year_month: NaiveDate::from_ymd_opt(2024, month, 1).unwrap(),
        tonnes,
        category: category.to_string(),
    }
}

#[test]
fn summary_covers_matching_rows_in_month_order() {
    let table = SqliteTable::in_memory(&TableSettings::default()).unwrap();
    table
        .insert_rows(&[row(4, "Bull", 9.0), row(3, "Bull", 12.5)])
        .unwrap();
    let mailer = MockMailer::default();

    let report = Notifier::notify(&table, &mailer, &settings()).unwrap();
    assert!(report.sent);
    assert_eq!(report.rows, 2);
    assert_eq!(report.message_id.as_deref(), Some("msg-1"));
    assert_eq!(report.subject, "Luxembourg Bull Production Data");

    let sent = mailer.sent.lock().unwrap();
    let (recipient, _, html) = &sent[0];
    assert_eq!(recipient, "ops@example.org");
    let march = html.find("March 2024").unwrap();
    let april = html.find("April 2024").unwrap();
    assert!(march < april);
    assert!(html.contains("<b>12.5 1000 tonnes</b>"));
}

#[test]
fn no_rows_sends_nothing() {
    let table = SqliteTable::in_memory(&TableSettings::default()).unwrap();
    table.insert_rows(&[row(3, "Bullock", 4.0)]).unwrap();
    let mailer = MockMailer::default();

    let report = Notifier::notify(&table, &mailer, &settings()).unwrap();
    assert!(!report.sent);
    assert_eq!(report.rows, 0);
    assert!(report.message_id.is_none());
    assert!(mailer.sent.lock().unwrap().is_empty());
}

#[test]
fn mail_failure_propagates() {
    let table = SqliteTable::in_memory(&TableSettings::default()).unwrap();
    table.insert_rows(&[row(3, "Bull", 12.5)]).unwrap();

    let err = Notifier::notify(&table, &DownMailer, &settings()).unwrap_err();
    assert_matches!(err, PipelineError::Mail(_));
}
