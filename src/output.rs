use std::io::{self, Write};

use serde::Serialize;

use crate::extract::ExtractReport;
use crate::loader::LoadReport;
use crate::notify::NotifyReport;

#[derive(Debug, Serialize)]
pub struct ObjectList {
    pub bucket: String,
    pub keys: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub extract: ExtractReport,
    pub load: LoadReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notify: Option<NotifyReport>,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_extract(report: &ExtractReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_load(report: &LoadReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_notify(report: &NotifyReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_objects(list: &ObjectList) -> io::Result<()> {
        Self::print_json(list)
    }

    pub fn print_run(summary: &RunSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}
